//! Sales Table Schema
//! Column names, the typed row model and the validated table wrapper.

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use serde::Serialize;

use super::loader::LoadError;

pub const RETAILER: &str = "Retailer";
pub const REGION: &str = "Region";
pub const STATE: &str = "State";
pub const CITY: &str = "City";
pub const INVOICE_DATE: &str = "InvoiceDate";
pub const TOTAL_SALES: &str = "TotalSales";
pub const UNITS_SOLD: &str = "UnitsSold";

/// Logical type of a required column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Date,
    Currency,
    Count,
}

impl ColumnKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ColumnKind::Text => "string",
            ColumnKind::Date => "date",
            ColumnKind::Currency => "numeric",
            ColumnKind::Count => "integer",
        }
    }
}

/// Required columns in canonical order.
pub const SCHEMA: [(&str, ColumnKind); 7] = [
    (RETAILER, ColumnKind::Text),
    (REGION, ColumnKind::Text),
    (STATE, ColumnKind::Text),
    (CITY, ColumnKind::Text),
    (INVOICE_DATE, ColumnKind::Date),
    (TOTAL_SALES, ColumnKind::Currency),
    (UNITS_SOLD, ColumnKind::Count),
];

/// Date layouts accepted for textual invoice dates.
pub const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];

/// A single row of the sales table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesRecord {
    pub retailer: String,
    pub region: String,
    pub state: String,
    pub city: String,
    pub invoice_date: NaiveDate,
    pub total_sales: f64,
    pub units_sold: i64,
}

pub(crate) fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

pub(crate) fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - unix_epoch()).num_days() as i32
}

pub(crate) fn date_from_epoch_days(days: i32) -> NaiveDate {
    unix_epoch() + Duration::days(days as i64)
}

/// Parse a textual date using the accepted layouts.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    // Timestamps such as "2023-01-15 00:00:00" keep only the date part
    let date_part = value.split([' ', 'T']).next().unwrap_or(value);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// A sales table whose required columns have been checked and cast.
///
/// The wrapped frame is never mutated after construction; every pipeline
/// function borrows it.
#[derive(Debug, Clone)]
pub struct SalesTable {
    frame: DataFrame,
}

impl SalesTable {
    /// Validate an arbitrary frame against the sales schema.
    ///
    /// Required columns are cast in place; any extra columns are kept for
    /// the raw view.
    pub fn try_from_frame(mut frame: DataFrame) -> Result<Self, LoadError> {
        for (name, kind) in SCHEMA {
            let column = frame
                .column(name)
                .map_err(|_| LoadError::MissingColumn(name.to_string()))?;

            let nulls = column.null_count();
            if nulls > 0 {
                return Err(LoadError::NullValues {
                    column: name.to_string(),
                    count: nulls,
                });
            }

            let typed = match kind {
                ColumnKind::Text => Self::cast_text(column)?,
                ColumnKind::Date => Self::cast_date(name, column)?,
                ColumnKind::Currency => Self::cast_currency(name, column)?,
                ColumnKind::Count => Self::cast_count(name, column)?,
            };
            frame.with_column(typed)?;
        }

        Ok(Self { frame })
    }

    /// Build a table from typed rows.
    pub fn from_records(records: &[SalesRecord]) -> Result<Self, LoadError> {
        let text = |pick: fn(&SalesRecord) -> String| -> Vec<String> {
            records.iter().map(pick).collect()
        };
        let days: Vec<i32> = records
            .iter()
            .map(|r| days_since_epoch(r.invoice_date))
            .collect();
        let sales: Vec<f64> = records.iter().map(|r| r.total_sales).collect();
        let units: Vec<i64> = records.iter().map(|r| r.units_sold).collect();

        let frame = DataFrame::new(vec![
            Column::new(RETAILER.into(), text(|r| r.retailer.clone())),
            Column::new(REGION.into(), text(|r| r.region.clone())),
            Column::new(STATE.into(), text(|r| r.state.clone())),
            Column::new(CITY.into(), text(|r| r.city.clone())),
            Column::new(INVOICE_DATE.into(), days).cast(&DataType::Date)?,
            Column::new(TOTAL_SALES.into(), sales),
            Column::new(UNITS_SOLD.into(), units),
        ])?;

        Ok(Self { frame })
    }

    /// Read the required columns back as typed rows.
    pub fn records(&self) -> Result<Vec<SalesRecord>, PolarsError> {
        let df = &self.frame;
        let retailer = df.column(RETAILER)?.str()?;
        let region = df.column(REGION)?.str()?;
        let state = df.column(STATE)?.str()?;
        let city = df.column(CITY)?.str()?;
        let days = df.column(INVOICE_DATE)?.cast(&DataType::Int32)?;
        let days = days.i32()?;
        let sales = df.column(TOTAL_SALES)?.f64()?;
        let units = df.column(UNITS_SOLD)?.i64()?;

        let records = (0..df.height())
            .map(|i| SalesRecord {
                retailer: retailer.get(i).unwrap_or_default().to_string(),
                region: region.get(i).unwrap_or_default().to_string(),
                state: state.get(i).unwrap_or_default().to_string(),
                city: city.get(i).unwrap_or_default().to_string(),
                invoice_date: date_from_epoch_days(days.get(i).unwrap_or_default()),
                total_sales: sales.get(i).unwrap_or_default(),
                units_sold: units.get(i).unwrap_or_default(),
            })
            .collect();

        Ok(records)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Sum of TotalSales over every row.
    pub fn total_sales(&self) -> f64 {
        self.frame
            .column(TOTAL_SALES)
            .ok()
            .and_then(|c| c.f64().ok().map(|ca| ca.sum().unwrap_or(0.0)))
            .unwrap_or(0.0)
    }

    fn cast_text(column: &Column) -> Result<Column, LoadError> {
        Ok(column.cast(&DataType::String)?)
    }

    fn cast_currency(name: &str, column: &Column) -> Result<Column, LoadError> {
        if !is_numeric(column.dtype()) {
            return Err(type_mismatch(name, ColumnKind::Currency, column.dtype()));
        }
        Ok(column.cast(&DataType::Float64)?)
    }

    fn cast_count(name: &str, column: &Column) -> Result<Column, LoadError> {
        match column.dtype() {
            dt if is_integer(dt) => Ok(column.cast(&DataType::Int64)?),
            DataType::Float32 | DataType::Float64 => {
                let values = column.cast(&DataType::Float64)?;
                let whole = values
                    .f64()?
                    .into_iter()
                    .flatten()
                    .all(|v| v.is_finite() && v.fract() == 0.0);
                if !whole {
                    return Err(type_mismatch(name, ColumnKind::Count, column.dtype()));
                }
                Ok(column.cast(&DataType::Int64)?)
            }
            other => Err(type_mismatch(name, ColumnKind::Count, other)),
        }
    }

    fn cast_date(name: &str, column: &Column) -> Result<Column, LoadError> {
        match column.dtype() {
            DataType::Date => Ok(column.clone()),
            DataType::Datetime(_, _) => Ok(column.cast(&DataType::Date)?),
            DataType::String => {
                let mut days = Vec::with_capacity(column.len());
                for (row, value) in column.str()?.into_iter().enumerate() {
                    let value = value.unwrap_or_default();
                    let date = parse_date(value).ok_or_else(|| LoadError::InvalidDate {
                        row: row + 1,
                        value: value.to_string(),
                    })?;
                    days.push(days_since_epoch(date));
                }
                Ok(Column::new(name.into(), days).cast(&DataType::Date)?)
            }
            other => Err(type_mismatch(name, ColumnKind::Date, other)),
        }
    }
}

fn is_integer(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn is_numeric(dtype: &DataType) -> bool {
    is_integer(dtype) || matches!(dtype, DataType::Float32 | DataType::Float64)
}

fn type_mismatch(name: &str, expected: ColumnKind, found: &DataType) -> LoadError {
    LoadError::TypeMismatch {
        column: name.to_string(),
        expected: expected.describe(),
        found: found.to_string(),
    }
}
