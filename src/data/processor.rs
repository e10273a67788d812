//! Aggregation Pipeline Module
//! Group-and-sum reductions that turn the sales table into the dashboard views.

use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use super::format::{format_lakh, FormatError};
use super::schema::{
    SalesTable, CITY, INVOICE_DATE, REGION, RETAILER, STATE, TOTAL_SALES, UNITS_SOLD,
};

/// Display label column of the monthly view.
pub const MONTH_YEAR: &str = "Month_Year";
/// Lakh label column of the treemap view.
pub const FORMATTED_SALES: &str = "TotalSales (Formatted)";
/// Three-letter month and two-digit year, e.g. `Jan'23`.
pub const MONTH_LABEL_FORMAT: &str = "%b'%y";

const YEAR: &str = "Year";
const MONTH: &str = "Month";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// A table-shaped aggregate handed to the rendering surface.
pub trait Aggregate {
    /// Panel title shown next to the data view.
    fn title(&self) -> &'static str;

    /// File name of the CSV export.
    fn file_name(&self) -> &'static str;

    /// Full aggregate frame.
    fn frame(&self) -> &DataFrame;

    /// Columns written to the CSV export.
    fn export_frame(&self) -> Result<DataFrame, PolarsError> {
        Ok(self.frame().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetailerTotal {
    pub retailer: String,
    pub total_sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyTotal {
    pub year: i32,
    pub month: u32,
    pub label: String,
    pub total_sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTotal {
    pub state: String,
    pub total_sales: f64,
    pub units_sold: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionCityEntry {
    pub region: String,
    pub city: String,
    pub total_sales: f64,
    pub formatted: String,
}

/// Total sales per retailer, sorted by retailer name.
#[derive(Debug, Clone)]
pub struct RetailerSales {
    frame: DataFrame,
}

impl RetailerSales {
    pub fn rows(&self) -> Result<Vec<RetailerTotal>, PolarsError> {
        let retailer = self.frame.column(RETAILER)?.str()?;
        let sales = self.frame.column(TOTAL_SALES)?.f64()?;
        Ok(retailer
            .into_iter()
            .zip(sales)
            .map(|(r, s)| RetailerTotal {
                retailer: r.unwrap_or_default().to_string(),
                total_sales: s.unwrap_or_default(),
            })
            .collect())
    }

    /// Retailer -> total sales.
    pub fn to_map(&self) -> Result<BTreeMap<String, f64>, PolarsError> {
        Ok(self
            .rows()?
            .into_iter()
            .map(|r| (r.retailer, r.total_sales))
            .collect())
    }
}

impl Aggregate for RetailerSales {
    fn title(&self) -> &'static str {
        "Retailer-wise Sales"
    }

    fn file_name(&self) -> &'static str {
        "RetailerSales.csv"
    }

    fn frame(&self) -> &DataFrame {
        &self.frame
    }
}

/// Total sales per calendar month, in chronological order.
#[derive(Debug, Clone)]
pub struct MonthlySales {
    frame: DataFrame,
}

impl MonthlySales {
    pub fn rows(&self) -> Result<Vec<MonthlyTotal>, PolarsError> {
        let years = self.frame.column(YEAR)?.cast(&DataType::Int32)?;
        let months = self.frame.column(MONTH)?.cast(&DataType::Int32)?;
        let labels = self.frame.column(MONTH_YEAR)?.str()?;
        let sales = self.frame.column(TOTAL_SALES)?.f64()?;

        Ok(years
            .i32()?
            .into_iter()
            .zip(months.i32()?)
            .zip(labels)
            .zip(sales)
            .map(|(((y, m), l), s)| MonthlyTotal {
                year: y.unwrap_or_default(),
                month: m.unwrap_or_default() as u32,
                label: l.unwrap_or_default().to_string(),
                total_sales: s.unwrap_or_default(),
            })
            .collect())
    }

    /// (label, total) pairs in chronological order.
    pub fn entries(&self) -> Result<Vec<(String, f64)>, PolarsError> {
        Ok(self
            .rows()?
            .into_iter()
            .map(|r| (r.label, r.total_sales))
            .collect())
    }
}

impl Aggregate for MonthlySales {
    fn title(&self) -> &'static str {
        "Monthly Sales"
    }

    fn file_name(&self) -> &'static str {
        "Monthly Sales.csv"
    }

    fn frame(&self) -> &DataFrame {
        &self.frame
    }

    fn export_frame(&self) -> Result<DataFrame, PolarsError> {
        self.frame.select([MONTH_YEAR, TOTAL_SALES])
    }
}

/// Total sales and units sold per state.
#[derive(Debug, Clone)]
pub struct StateSales {
    frame: DataFrame,
}

impl StateSales {
    pub fn rows(&self) -> Result<Vec<StateTotal>, PolarsError> {
        let state = self.frame.column(STATE)?.str()?;
        let sales = self.frame.column(TOTAL_SALES)?.f64()?;
        let units = self.frame.column(UNITS_SOLD)?.i64()?;
        Ok(state
            .into_iter()
            .zip(sales)
            .zip(units)
            .map(|((st, s), u)| StateTotal {
                state: st.unwrap_or_default().to_string(),
                total_sales: s.unwrap_or_default(),
                units_sold: u.unwrap_or_default(),
            })
            .collect())
    }
}

impl Aggregate for StateSales {
    fn title(&self) -> &'static str {
        "View Data for Sales by Units Sold"
    }

    fn file_name(&self) -> &'static str {
        "Sales_by_UnitsSold.csv"
    }

    fn frame(&self) -> &DataFrame {
        &self.frame
    }
}

/// Total sales per (region, city) with lakh labels for the treemap.
#[derive(Debug, Clone)]
pub struct RegionCityTreemap {
    frame: DataFrame,
}

impl RegionCityTreemap {
    pub fn rows(&self) -> Result<Vec<RegionCityEntry>, PolarsError> {
        let region = self.frame.column(REGION)?.str()?;
        let city = self.frame.column(CITY)?.str()?;
        let sales = self.frame.column(TOTAL_SALES)?.f64()?;
        let formatted = self.frame.column(FORMATTED_SALES)?.str()?;
        Ok(region
            .into_iter()
            .zip(city)
            .zip(sales)
            .zip(formatted)
            .map(|(((r, c), s), f)| RegionCityEntry {
                region: r.unwrap_or_default().to_string(),
                city: c.unwrap_or_default().to_string(),
                total_sales: s.unwrap_or_default(),
                formatted: f.unwrap_or_default().to_string(),
            })
            .collect())
    }
}

impl Aggregate for RegionCityTreemap {
    fn title(&self) -> &'static str {
        "View data for Total Sales by Region and City"
    }

    fn file_name(&self) -> &'static str {
        "Sales_by_Region.csv"
    }

    fn frame(&self) -> &DataFrame {
        &self.frame
    }

    fn export_frame(&self) -> Result<DataFrame, PolarsError> {
        self.frame.select([REGION, CITY, TOTAL_SALES])
    }
}

/// The unaggregated table.
#[derive(Debug, Clone)]
pub struct RawView {
    frame: DataFrame,
}

impl Aggregate for RawView {
    fn title(&self) -> &'static str {
        "View Sales Raw Data"
    }

    fn file_name(&self) -> &'static str {
        "SalesRawData.csv"
    }

    fn frame(&self) -> &DataFrame {
        &self.frame
    }
}

/// All views produced by one pipeline run.
#[derive(Debug, Clone)]
pub struct DashboardReport {
    pub retailer: RetailerSales,
    pub monthly: MonthlySales,
    pub state: StateSales,
    pub region_city: RegionCityTreemap,
    pub raw: RawView,
}

impl DashboardReport {
    /// Aggregates in dashboard order.
    pub fn aggregates(&self) -> [&dyn Aggregate; 5] {
        [
            &self.retailer,
            &self.monthly,
            &self.state,
            &self.region_city,
            &self.raw,
        ]
    }
}

/// Stateless aggregation functions over a borrowed sales table.
pub struct SalesPipeline;

impl SalesPipeline {
    /// Run every aggregation. The first failure fails the whole run.
    pub fn run(table: &SalesTable) -> Result<DashboardReport, PipelineError> {
        let report = DashboardReport {
            retailer: Self::aggregate_by_retailer(table)?,
            monthly: Self::aggregate_monthly(table)?,
            state: Self::aggregate_by_state(table)?,
            region_city: Self::aggregate_region_city(table)?,
            raw: Self::passthrough_raw(table),
        };

        debug!(
            retailers = report.retailer.frame().height(),
            months = report.monthly.frame().height(),
            states = report.state.frame().height(),
            cities = report.region_city.frame().height(),
            rows = report.raw.frame().height(),
            "aggregated sales table"
        );
        Ok(report)
    }

    /// Sum TotalSales per Retailer.
    pub fn aggregate_by_retailer(table: &SalesTable) -> Result<RetailerSales, PipelineError> {
        let frame = table
            .frame()
            .clone()
            .lazy()
            .group_by([col(RETAILER)])
            .agg([col(TOTAL_SALES).sum()])
            .sort([RETAILER], SortMultipleOptions::default())
            .collect()?;
        Ok(RetailerSales { frame })
    }

    /// Sum TotalSales per calendar month.
    ///
    /// Groups on the (year, month) pair and only uses the short label for
    /// display, so months a century apart never merge even when their labels
    /// coincide.
    pub fn aggregate_monthly(table: &SalesTable) -> Result<MonthlySales, PipelineError> {
        let frame = table
            .frame()
            .clone()
            .lazy()
            .with_columns([
                col(INVOICE_DATE).dt().year().alias(YEAR),
                col(INVOICE_DATE).dt().month().alias(MONTH),
                col(INVOICE_DATE)
                    .dt()
                    .strftime(MONTH_LABEL_FORMAT)
                    .alias(MONTH_YEAR),
            ])
            .group_by([col(YEAR), col(MONTH)])
            .agg([col(MONTH_YEAR).first(), col(TOTAL_SALES).sum()])
            .sort([YEAR, MONTH], SortMultipleOptions::default())
            .select([col(YEAR), col(MONTH), col(MONTH_YEAR), col(TOTAL_SALES)])
            .collect()?;
        Ok(MonthlySales { frame })
    }

    /// Sum TotalSales and UnitsSold per State in one pass.
    pub fn aggregate_by_state(table: &SalesTable) -> Result<StateSales, PipelineError> {
        let frame = table
            .frame()
            .clone()
            .lazy()
            .group_by([col(STATE)])
            .agg([col(TOTAL_SALES).sum(), col(UNITS_SOLD).sum()])
            .sort([STATE], SortMultipleOptions::default())
            .collect()?;
        Ok(StateSales { frame })
    }

    /// Sum TotalSales per (Region, City) and attach the lakh label.
    pub fn aggregate_region_city(table: &SalesTable) -> Result<RegionCityTreemap, PipelineError> {
        let mut frame = table
            .frame()
            .clone()
            .lazy()
            .group_by([col(REGION), col(CITY)])
            .agg([col(TOTAL_SALES).sum()])
            .sort([REGION, CITY], SortMultipleOptions::default())
            .collect()?;

        let labels = frame
            .column(TOTAL_SALES)?
            .f64()?
            .into_iter()
            .map(|v| format_lakh(v.unwrap_or_default()))
            .collect::<Result<Vec<String>, FormatError>>()?;
        frame.with_column(Column::new(FORMATTED_SALES.into(), labels))?;

        Ok(RegionCityTreemap { frame })
    }

    /// The loaded table, unchanged.
    pub fn passthrough_raw(table: &SalesTable) -> RawView {
        RawView {
            frame: table.frame().clone(),
        }
    }
}
