//! Sales Dashboard - Sales Spreadsheet Aggregation & Report Generator
//!
//! Loads a sales spreadsheet, computes the dashboard aggregates and writes
//! their CSV exports, optional charts and a run manifest.

mod charts;
mod config;
mod data;
mod report;

use anyhow::{Context, Result};
use charts::StaticChartRenderer;
use clap::Parser;
use config::Cli;
use data::{DataLoader, SalesPipeline};
use report::{ReportManifest, ReportWriter};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let table = DataLoader::new()
        .with_sheet(cli.sheet.clone())
        .load(&cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;

    let report = SalesPipeline::run(&table).context("failed to aggregate sales")?;

    let writer = ReportWriter::new(&cli.out_dir);
    writer.prepare().context("failed to create output directory")?;

    // Charts go first: a drawing failure must not leave exports behind
    let mut charts = Vec::new();
    if cli.charts {
        let (width, height) = cli.chart_size;
        charts = StaticChartRenderer::new(width, height)
            .render_all(&report, writer.out_dir())
            .context("failed to render charts")?;
        info!(count = charts.len(), "rendered charts");
    }

    let exports = writer
        .write_exports(&report)
        .context("failed to write CSV exports")?;
    let manifest = ReportManifest::new(&cli.input, &table, exports).with_charts(&charts);
    writer
        .write_manifest(&manifest)
        .context("failed to write manifest")?;

    if cli.preview {
        report::print_preview(&report, &mut std::io::stdout().lock())?;
    }

    info!(
        out_dir = %writer.out_dir().display(),
        rows = table.height(),
        "report complete"
    );
    Ok(())
}
