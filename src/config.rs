//! Command line configuration.

use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_INPUT: &str = "Adidas US Sales Datasets.xlsx";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sales_dashboard",
    about = "Aggregate a sales spreadsheet into CSV summaries and charts.",
    version
)]
pub struct Cli {
    /// Sales spreadsheet (.xlsx, .xls, .ods) or CSV file.
    #[arg(default_value = DEFAULT_INPUT)]
    pub input: PathBuf,

    /// Directory receiving the CSV exports, charts and manifest.
    #[arg(short, long, default_value = "reports")]
    pub out_dir: PathBuf,

    /// Worksheet to read instead of the first one.
    #[arg(long)]
    pub sheet: Option<String>,

    /// Render PNG charts next to the exports.
    #[arg(long)]
    pub charts: bool,

    /// Chart size in pixels, as WIDTHxHEIGHT.
    #[arg(long, default_value = "1280x720", value_parser = parse_size)]
    pub chart_size: (u32, u32),

    /// Print every aggregate to stdout.
    #[arg(long)]
    pub preview: bool,
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .ok()
            .filter(|v| (200..=8000).contains(v))
            .ok_or_else(|| format!("chart dimension must be 200..=8000 pixels, got {s:?}"))
    };
    Ok((parse(w)?, parse(h)?))
}
