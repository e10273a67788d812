//! Sales Data Loader Module
//! Reads CSV files with Polars and workbooks with calamine into a validated
//! `SalesTable`.

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::schema::{
    days_since_epoch, parse_date, ColumnKind, SalesTable, INVOICE_DATE, SCHEMA, TOTAL_SALES,
};

/// Rows scanned for the header in workbooks with title rows above the table.
const HEADER_SEARCH_ROWS: usize = 10;
/// Rows polars samples to type the optional CSV columns.
const CSV_INFER_ROWS: usize = 10_000;

static EMPTY_CELL: Data = Data::Empty;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported input format: {0} (expected .csv, .xlsx, .xlsm, .xlsb, .xls or .ods)")]
    UnsupportedFormat(String),
    #[error("failed to read table: {0}")]
    Polars(#[from] PolarsError),
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("worksheet not found: {0}")]
    SheetNotFound(String),
    #[error("required column missing: {0}")]
    MissingColumn(String),
    #[error("column {column} should be {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },
    #[error("column {column} has {count} empty values")]
    NullValues { column: String, count: usize },
    #[error("invalid invoice date at data row {row}: {value:?}")]
    InvalidDate { row: usize, value: String },
    #[error("input contains no data rows")]
    Empty,
}

/// Supported input file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Workbook,
}

impl InputFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "csv" => Ok(InputFormat::Csv),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(InputFormat::Workbook),
            _ => Err(LoadError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Loads the sales dataset once per run.
pub struct DataLoader {
    sheet: Option<String>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self { sheet: None }
    }

    /// Read a named worksheet instead of the first one.
    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    /// Load and validate the dataset at `path`.
    pub fn load(&self, path: &Path) -> Result<SalesTable, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let format = InputFormat::from_path(path)?;
        let frame = match format {
            InputFormat::Csv => Self::read_csv(path)?,
            InputFormat::Workbook => self.read_workbook(path)?,
        };
        debug!(columns = ?frame.get_column_names(), "read raw frame");

        if frame.height() == 0 {
            return Err(LoadError::Empty);
        }

        let table = SalesTable::try_from_frame(frame)?;
        info!(
            path = %path.display(),
            ?format,
            rows = table.height(),
            columns = table.frame().width(),
            "loaded sales table"
        );
        Ok(table)
    }

    /// Load a CSV file using Polars.
    ///
    /// Required columns are read with fixed types instead of inferred ones:
    /// invoice dates as text, parsed later by `SalesTable`, and both
    /// measures as floats.
    fn read_csv(path: &Path) -> Result<DataFrame, LoadError> {
        let reader = || {
            LazyCsvReader::new(path)
                .with_has_header(true)
                .with_infer_schema_length(Some(CSV_INFER_ROWS))
        };

        let inferred = reader().finish()?.collect_schema()?;
        let overwrite: Schema = SCHEMA
            .iter()
            .filter(|(name, _)| inferred.contains(name))
            .filter_map(|(name, kind)| {
                csv_read_type(*kind).map(|dtype| Field::new((*name).into(), dtype))
            })
            .collect();

        let df = reader()
            .with_dtype_overwrite(Some(Arc::new(overwrite)))
            .finish()?
            .collect()?;
        Ok(df)
    }

    fn read_workbook(&self, path: &Path) -> Result<DataFrame, LoadError> {
        let mut workbook = open_workbook_auto(path)?;

        let range = match &self.sheet {
            Some(name) => {
                if !workbook.sheet_names().iter().any(|s| s == name) {
                    return Err(LoadError::SheetNotFound(name.clone()));
                }
                workbook.worksheet_range(name)?
            }
            None => workbook
                .worksheet_range_at(0)
                .ok_or_else(|| LoadError::SheetNotFound("<first sheet>".to_string()))??,
        };

        range_to_frame(&range)
    }
}

/// Convert a worksheet range into a frame with typed required columns.
///
/// Optional columns are kept as strings for the raw view.
pub fn range_to_frame(range: &Range<Data>) -> Result<DataFrame, LoadError> {
    let rows: Vec<&[Data]> = range.rows().collect();
    let header_idx = find_header_row(&rows)?;
    let header: Vec<String> = rows[header_idx]
        .iter()
        .map(|c| cell_to_string(c).trim().to_string())
        .collect();

    // Trailing blank rows are common in exported sheets
    let body: Vec<&[Data]> = rows[header_idx + 1..]
        .iter()
        .copied()
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .collect();

    let mut columns = Vec::with_capacity(header.len());
    for (idx, name) in header.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let cells = body.iter().map(|row| row.get(idx).unwrap_or(&EMPTY_CELL));
        let kind = SCHEMA
            .iter()
            .find(|(n, _)| *n == name.as_str())
            .map(|(_, k)| *k);

        let column = match kind {
            Some(ColumnKind::Date) => {
                let mut days: Vec<Option<i32>> = Vec::with_capacity(body.len());
                for (row, cell) in cells.enumerate() {
                    if matches!(cell, Data::Empty) {
                        days.push(None);
                        continue;
                    }
                    let date = cell_to_date(cell).ok_or_else(|| LoadError::InvalidDate {
                        row: row + 1,
                        value: cell_to_string(cell),
                    })?;
                    days.push(Some(days_since_epoch(date)));
                }
                Column::new(INVOICE_DATE.into(), days).cast(&DataType::Date)?
            }
            Some(ColumnKind::Currency) | Some(ColumnKind::Count) => {
                let mut values: Vec<Option<f64>> = Vec::with_capacity(body.len());
                for cell in cells {
                    if matches!(cell, Data::Empty) {
                        values.push(None);
                        continue;
                    }
                    let value = cell_to_f64(cell).ok_or_else(|| LoadError::TypeMismatch {
                        column: name.clone(),
                        expected: kind.map(|k| k.describe()).unwrap_or("numeric"),
                        found: cell_to_string(cell),
                    })?;
                    values.push(Some(value));
                }
                Column::new(name.as_str().into(), values)
            }
            _ => {
                let values: Vec<Option<String>> = cells
                    .map(|c| match c {
                        Data::Empty => None,
                        other => Some(cell_to_string(other)),
                    })
                    .collect();
                Column::new(name.as_str().into(), values)
            }
        };
        columns.push(column);
    }

    Ok(DataFrame::new(columns)?)
}

/// Index of the first row that carries every required column name.
fn find_header_row(rows: &[&[Data]]) -> Result<usize, LoadError> {
    let has_name = |row: &[Data], name: &str| {
        row.iter()
            .any(|c| matches!(c, Data::String(s) if s.trim() == name))
    };
    let matched = |row: &[Data]| SCHEMA.iter().filter(|(n, _)| has_name(row, n)).count();

    let scanned = &rows[..rows.len().min(HEADER_SEARCH_ROWS)];
    if let Some(idx) = scanned.iter().position(|r| matched(r) == SCHEMA.len()) {
        return Ok(idx);
    }

    // Blame the row that came closest to being the header
    let closest = scanned
        .iter()
        .copied()
        .max_by_key(|r| matched(r))
        .unwrap_or(&[]);
    let missing = SCHEMA
        .iter()
        .find(|(name, _)| !has_name(closest, name))
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| TOTAL_SALES.to_string());
    Err(LoadError::MissingColumn(missing))
}

/// Type a required column is read as from CSV, `None` to keep inference.
fn csv_read_type(kind: ColumnKind) -> Option<DataType> {
    match kind {
        ColumnKind::Text => None,
        ColumnKind::Date => Some(DataType::String),
        ColumnKind::Currency | ColumnKind::Count => Some(DataType::Float64),
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(v) => v.to_string(),
        Data::Float(v) => v.to_string(),
        Data::Int(v) => v.to_string(),
        Data::Bool(v) => v.to_string(),
        Data::DateTime(v) => v.to_string(),
        Data::DateTimeIso(v) => v.to_string(),
        Data::DurationIso(v) => v.to_string(),
        Data::Error(v) => format!("{v:?}"),
        Data::Empty => String::new(),
    }
}

fn cell_to_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(v) => Some(*v),
        Data::Int(v) => Some(*v as f64),
        // Currency columns are sometimes stored as text like "$1,200"
        Data::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse::<f64>()
            .ok(),
        _ => None,
    }
}

fn cell_to_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(v) => v.as_datetime().map(|dt| dt.date()),
        Data::DateTimeIso(s) | Data::String(s) => parse_date(s),
        Data::Float(v) => excel_serial_to_date(*v),
        Data::Int(v) => excel_serial_to_date(*v as f64),
        _ => None,
    }
}

/// Excel serial day numbers count from 1899-12-30.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_signed(Duration::days(serial.trunc() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::{CITY, REGION, RETAILER, STATE, UNITS_SOLD};
    use crate::data::SalesPipeline;
    use std::io::Write;

    fn workbook_fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sales.xlsx")
    }

    fn cells(values: &[&str]) -> Vec<Data> {
        values.iter().map(|v| Data::String(v.to_string())).collect()
    }

    fn sheet(rows: Vec<Vec<Data>>) -> Range<Data> {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut range = Range::new((0, 0), (rows.len() as u32 - 1, width as u32 - 1));
        for (r, row) in rows.into_iter().enumerate() {
            for (c, cell) in row.into_iter().enumerate() {
                range.set_value((r as u32, c as u32), cell);
            }
        }
        range
    }

    fn header() -> Vec<Data> {
        cells(&[
            RETAILER,
            REGION,
            STATE,
            CITY,
            INVOICE_DATE,
            TOTAL_SALES,
            UNITS_SOLD,
            "SalesMethod",
        ])
    }

    fn data_row(date: Data, sales: Data, units: Data) -> Vec<Data> {
        let mut row = cells(&["Walmart", "South", "Florida", "Orlando"]);
        row.extend([date, sales, units, Data::String("Online".into())]);
        row
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            InputFormat::from_path(Path::new("sales.CSV")).unwrap(),
            InputFormat::Csv
        );
        assert_eq!(
            InputFormat::from_path(Path::new("Adidas US Sales Datasets.xlsx")).unwrap(),
            InputFormat::Workbook
        );
        assert_eq!(
            InputFormat::from_path(Path::new("sales.xlsb")).unwrap(),
            InputFormat::Workbook
        );
        let err = InputFormat::from_path(Path::new("sales.json")).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
        assert!(err.to_string().contains(".xlsb"));
    }

    #[test]
    fn test_missing_file() {
        let err = DataLoader::new()
            .load(Path::new("does/not/exist.csv"))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_load_csv_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(
            file,
            "Retailer,Region,State,City,InvoiceDate,TotalSales,UnitsSold,SalesMethod"
        )
        .unwrap();
        writeln!(file, "Walmart,South,Texas,Houston,2021-01-05,1200.5,10,Outlet").unwrap();
        writeln!(file, "Kohl's,West,Oregon,Portland,2021-02-11,300,3,Online").unwrap();
        file.flush().unwrap();

        let table = DataLoader::new().load(file.path()).unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.frame().width(), 8);
        assert_eq!(
            table.frame().column(INVOICE_DATE).unwrap().dtype(),
            &DataType::Date
        );
        assert_eq!(table.total_sales(), 1500.5);
    }

    #[test]
    fn test_csv_slash_dates_are_month_first() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(
            file,
            "Retailer,Region,State,City,InvoiceDate,TotalSales,UnitsSold"
        )
        .unwrap();
        writeln!(file, "Walmart,South,Texas,Houston,01/02/2023,100,1").unwrap();
        writeln!(file, "Walmart,South,Texas,Houston,03/04/2023,50,1").unwrap();
        file.flush().unwrap();

        let table = DataLoader::new().load(file.path()).unwrap();
        let dates: Vec<NaiveDate> = table
            .records()
            .unwrap()
            .iter()
            .map(|r| r.invoice_date)
            .collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2023, 3, 4).unwrap(),
            ]
        );

        let monthly = SalesPipeline::aggregate_monthly(&table).unwrap();
        let labels: Vec<String> = monthly
            .entries()
            .unwrap()
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(labels, vec!["Jan'23", "Mar'23"]);
    }

    #[test]
    fn test_csv_fractional_sales_past_inference_window() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(
            file,
            "Retailer,Region,State,City,InvoiceDate,TotalSales,UnitsSold"
        )
        .unwrap();
        for _ in 0..CSV_INFER_ROWS {
            writeln!(file, "Walmart,South,Texas,Houston,2021-01-05,10,1").unwrap();
        }
        writeln!(file, "Walmart,South,Texas,Houston,2021-01-06,2.5,3").unwrap();
        file.flush().unwrap();

        let table = DataLoader::new().load(file.path()).unwrap();
        assert_eq!(table.height(), CSV_INFER_ROWS + 1);
        assert_eq!(
            table.frame().column(UNITS_SOLD).unwrap().dtype(),
            &DataType::Int64
        );
        assert_eq!(table.total_sales(), CSV_INFER_ROWS as f64 * 10.0 + 2.5);
    }

    #[test]
    fn test_corrupt_workbook() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"Retailer,Region\nnot a zip archive").unwrap();
        file.flush().unwrap();

        let err = DataLoader::new().load(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Workbook(_)));
    }

    #[test]
    fn test_workbook_named_sheet() {
        let table = DataLoader::new()
            .with_sheet(Some("Data Sales Adidas".to_string()))
            .load(&workbook_fixture())
            .unwrap();

        assert_eq!(table.height(), 3);
        assert_eq!(table.frame().width(), 8);
        let records = table.records().unwrap();
        assert_eq!(records[0].retailer, "Foot Locker");
        assert_eq!(
            records[1].invoice_date,
            NaiveDate::from_ymd_opt(2020, 12, 14).unwrap()
        );
        assert_eq!(records[2].units_sold, 300);
        assert_eq!(table.total_sales(), 937_500.0);
    }

    #[test]
    fn test_workbook_first_sheet_by_default() {
        let table = DataLoader::new().load(&workbook_fixture()).unwrap();
        assert_eq!(table.height(), 3);
    }

    #[test]
    fn test_workbook_unknown_sheet() {
        let err = DataLoader::new()
            .with_sheet(Some("missing".to_string()))
            .load(&workbook_fixture())
            .unwrap_err();
        assert!(matches!(err, LoadError::SheetNotFound(ref s) if s == "missing"));
    }

    #[test]
    fn test_csv_without_rows_is_empty() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(
            file,
            "Retailer,Region,State,City,InvoiceDate,TotalSales,UnitsSold"
        )
        .unwrap();
        file.flush().unwrap();

        let err = DataLoader::new().load(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Empty));
    }

    #[test]
    fn test_range_with_title_rows() {
        let range = sheet(vec![
            cells(&["Adidas Sales Database"]),
            vec![Data::Empty],
            header(),
            data_row(Data::Float(44197.0), Data::Float(600000.0), Data::Float(1200.0)),
            data_row(
                Data::String("2021-01-02".into()),
                Data::String("$1,000".into()),
                Data::Int(4),
            ),
            vec![Data::Empty],
        ]);

        let frame = range_to_frame(&range).unwrap();
        assert_eq!(frame.height(), 2);

        let table = SalesTable::try_from_frame(frame).unwrap();
        let records = table.records().unwrap();
        assert_eq!(
            records[0].invoice_date,
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
        );
        assert_eq!(records[0].units_sold, 1200);
        assert_eq!(records[1].total_sales, 1000.0);
        assert_eq!(
            table.frame().column("SalesMethod").unwrap().dtype(),
            &DataType::String
        );
    }

    #[test]
    fn test_range_without_header_reports_missing_column() {
        let range = sheet(vec![cells(&[RETAILER, REGION, STATE, CITY, INVOICE_DATE])]);
        let err = range_to_frame(&range).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn(ref c) if c == TOTAL_SALES));
    }

    #[test]
    fn test_missing_column_is_read_from_near_header_row() {
        let range = sheet(vec![
            cells(&["Adidas Sales Database"]),
            cells(&[RETAILER, REGION, STATE, CITY, INVOICE_DATE, TOTAL_SALES, "Units"]),
            data_row(Data::Float(44197.0), Data::Float(10.0), Data::Float(1.0)),
        ]);
        let err = range_to_frame(&range).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn(ref c) if c == UNITS_SOLD));
    }

    #[test]
    fn test_range_with_bad_sales_cell() {
        let range = sheet(vec![
            header(),
            data_row(
                Data::String("2021-01-02".into()),
                Data::String("n/a".into()),
                Data::Int(4),
            ),
        ]);
        let err = range_to_frame(&range).unwrap_err();
        assert!(matches!(err, LoadError::TypeMismatch { ref column, .. } if column == TOTAL_SALES));
    }

    #[test]
    fn test_excel_serial_dates() {
        assert_eq!(
            excel_serial_to_date(45000.0),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
        assert_eq!(excel_serial_to_date(-3.0), None);
    }
}
