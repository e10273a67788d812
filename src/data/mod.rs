//! Data module - loading, validation and aggregation

mod format;
mod loader;
mod processor;
mod schema;

pub use format::format_lakh;
#[cfg(test)]
pub use format::FormatError;
pub use loader::DataLoader;
pub use processor::{
    Aggregate, DashboardReport, MonthlyTotal, RegionCityEntry, RetailerTotal, SalesPipeline,
    StateTotal,
};
pub use schema::{SalesRecord, SalesTable};
