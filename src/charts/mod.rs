//! Charts module - Static chart rendering

mod renderer;
mod treemap;

pub use renderer::{ChartError, ChartKind, StaticChartRenderer};
