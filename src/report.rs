//! Report Writer Module
//! Writes the CSV export of every aggregate, the run manifest and the
//! terminal preview of each data view.

use crate::data::{Aggregate, DashboardReport, SalesTable};
use chrono::Local;
use polars::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Manifest file name inside the output directory.
pub const MANIFEST_FILE: &str = "report.json";
/// Date format of the "last updated" stamp.
const STAMP_FORMAT: &str = "%d %B %Y";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("failed to serialize manifest: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One exported CSV as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportEntry {
    pub title: String,
    pub file: String,
    pub rows: usize,
}

/// Summary of one run, written next to the exports.
#[derive(Debug, Clone, Serialize)]
pub struct ReportManifest {
    pub generated_on: String,
    pub source: String,
    pub rows: usize,
    pub total_sales: f64,
    pub exports: Vec<ExportEntry>,
    pub charts: Vec<String>,
}

impl ReportManifest {
    pub fn new(source: &Path, table: &SalesTable, exports: Vec<ExportEntry>) -> Self {
        Self {
            generated_on: Local::now().format(STAMP_FORMAT).to_string(),
            source: source.display().to_string(),
            rows: table.height(),
            total_sales: table.total_sales(),
            exports,
            charts: Vec::new(),
        }
    }

    pub fn with_charts(mut self, charts: &[PathBuf]) -> Self {
        self.charts = charts
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect();
        self
    }
}

/// Writes report artifacts into one output directory.
pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Create the output directory if it does not exist.
    pub fn prepare(&self) -> Result<(), ReportError> {
        fs::create_dir_all(&self.out_dir).map_err(io_err(&self.out_dir))
    }

    /// Serialize an aggregate's export columns as CSV with a header row.
    pub fn csv_bytes(aggregate: &dyn Aggregate) -> Result<Vec<u8>, ReportError> {
        let mut df = aggregate.export_frame()?;
        let mut buf = Vec::new();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .with_date_format(Some(DATE_FORMAT.to_string()))
            .finish(&mut df)?;
        Ok(buf)
    }

    /// Write all five CSV exports.
    ///
    /// Every export is serialized before the first file is written.
    pub fn write_exports(
        &self,
        report: &DashboardReport,
    ) -> Result<Vec<ExportEntry>, ReportError> {
        self.prepare()?;

        let encoded: Vec<(&dyn Aggregate, Vec<u8>)> = report
            .aggregates()
            .into_iter()
            .map(|aggregate| Ok((aggregate, Self::csv_bytes(aggregate)?)))
            .collect::<Result<_, ReportError>>()?;

        encoded
            .into_iter()
            .map(|(aggregate, bytes)| -> Result<ExportEntry, ReportError> {
                let path = self.out_dir.join(aggregate.file_name());
                fs::write(&path, &bytes).map_err(io_err(&path))?;

                let rows = aggregate.frame().height();
                info!(file = %path.display(), rows, "wrote export");
                Ok(ExportEntry {
                    title: aggregate.title().to_string(),
                    file: aggregate.file_name().to_string(),
                    rows,
                })
            })
            .collect()
    }

    /// Write the run manifest as pretty JSON.
    pub fn write_manifest(&self, manifest: &ReportManifest) -> Result<PathBuf, ReportError> {
        let path = self.out_dir.join(MANIFEST_FILE);
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, manifest)?;
        writer.flush().map_err(io_err(&path))?;
        info!(file = %path.display(), "wrote manifest");
        Ok(path)
    }
}

/// Print every data view with its panel title.
pub fn print_preview(report: &DashboardReport, out: &mut impl Write) -> std::io::Result<()> {
    for aggregate in report.aggregates() {
        writeln!(out, "== {} ==", aggregate.title())?;
        writeln!(out, "{}", aggregate.frame())?;
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SalesPipeline, SalesRecord};
    use chrono::NaiveDate;

    fn table() -> SalesTable {
        let rows = [
            ("Kohl's", "Northeast", "New York", "New York", (2020, 1, 3), 20000.0, 40),
            ("Kohl's", "Northeast", "New York", "Albany", (2020, 2, 7), 5000.0, 10),
            ("West Gear", "West", "Oregon", "Portland", (2020, 1, 20), 12500.5, 25),
        ];
        let records: Vec<SalesRecord> = rows
            .iter()
            .map(|(retailer, region, state, city, (y, m, d), sales, units)| SalesRecord {
                retailer: retailer.to_string(),
                region: region.to_string(),
                state: state.to_string(),
                city: city.to_string(),
                invoice_date: NaiveDate::from_ymd_opt(*y, *m, *d).unwrap(),
                total_sales: *sales,
                units_sold: *units,
            })
            .collect();
        SalesTable::from_records(&records).unwrap()
    }

    #[test]
    fn test_write_exports_creates_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("out"));
        let report = SalesPipeline::run(&table()).unwrap();

        let entries = writer.write_exports(&report).unwrap();
        let files: Vec<&str> = entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(
            files,
            vec![
                "RetailerSales.csv",
                "Monthly Sales.csv",
                "Sales_by_UnitsSold.csv",
                "Sales_by_Region.csv",
                "SalesRawData.csv",
            ]
        );
        for file in files {
            assert!(writer.out_dir().join(file).is_file(), "{file}");
        }
    }

    #[test]
    fn test_export_headers() {
        let report = SalesPipeline::run(&table()).unwrap();
        let header = |aggregate: &dyn Aggregate| {
            let bytes = ReportWriter::csv_bytes(aggregate).unwrap();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        };

        assert_eq!(header(&report.retailer), "Retailer,TotalSales");
        assert_eq!(header(&report.monthly), "Month_Year,TotalSales");
        assert_eq!(header(&report.state), "State,TotalSales,UnitsSold");
        assert_eq!(header(&report.region_city), "Region,City,TotalSales");
        assert_eq!(
            header(&report.raw),
            "Retailer,Region,State,City,InvoiceDate,TotalSales,UnitsSold"
        );
    }

    #[test]
    fn test_monthly_export_rows() {
        let report = SalesPipeline::run(&table()).unwrap();
        let csv = String::from_utf8(ReportWriter::csv_bytes(&report.monthly).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Jan'20,32500.5"));
        assert!(lines[2].starts_with("Feb'20,5000"));
    }

    #[test]
    fn test_raw_export_keeps_iso_dates() {
        let report = SalesPipeline::run(&table()).unwrap();
        let csv = String::from_utf8(ReportWriter::csv_bytes(&report.raw).unwrap()).unwrap();
        assert!(csv.contains("2020-01-03"));
        assert_eq!(csv.lines().count(), 4);
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let table = table();
        let report = SalesPipeline::run(&table).unwrap();
        let exports = writer.write_exports(&report).unwrap();

        let manifest = ReportManifest::new(Path::new("sales.csv"), &table, exports)
            .with_charts(&[dir.path().join("retailer_sales.png")]);
        let path = writer.write_manifest(&manifest).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["rows"], 3);
        assert_eq!(json["source"], "sales.csv");
        assert_eq!(json["exports"].as_array().unwrap().len(), 5);
        assert_eq!(json["exports"][3]["file"], "Sales_by_Region.csv");
        assert_eq!(json["charts"][0], "retailer_sales.png");
    }

    #[test]
    fn test_preview_lists_every_view() {
        let report = SalesPipeline::run(&table()).unwrap();
        let mut out = Vec::new();
        print_preview(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        for aggregate in report.aggregates() {
            assert!(text.contains(aggregate.title()));
        }
    }
}
