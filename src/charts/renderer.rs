//! Static Chart Renderer
//! Renders one PNG per aggregate with plotters.
//!
//! Charts:
//! 1. Total Sales by Retailer: bar chart
//! 2. Total Sales Over Time: line chart by month
//! 3. Total Sales and Units Sold by State: bars on the left axis, units line
//!    on the right axis
//! 4. Total Sales by Region and City: treemap

use super::treemap::{self, Rect};
use crate::data::{DashboardReport, MonthlyTotal, RegionCityEntry, RetailerTotal, StateTotal};
use plotters::coord::Shift;
use plotters::prelude::*;
use polars::prelude::PolarsError;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const FONT: &str = "sans-serif";
/// Charts render here first and move into the output directory together.
const STAGING_DIR: &str = ".charts-staging";

const BAR_COLOR: RGBColor = RGBColor(91, 155, 213);
const LINE_COLOR: RGBColor = RGBColor(237, 125, 49);
const GRID_COLOR: RGBColor = RGBColor(200, 200, 200);

pub const PALETTE: [RGBColor; 10] = [
    RGBColor(231, 76, 60),
    RGBColor(46, 204, 113),
    RGBColor(155, 89, 182),
    RGBColor(243, 156, 18),
    RGBColor(26, 188, 156),
    RGBColor(233, 30, 99),
    RGBColor(0, 188, 212),
    RGBColor(255, 87, 34),
    RGBColor(121, 85, 72),
    RGBColor(96, 125, 139),
];

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("failed to draw {chart}: {message}")]
    Draw { chart: &'static str, message: String },
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ChartError + '_ {
    move |source| ChartError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// The charts rendered for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Retailer,
    Monthly,
    State,
    RegionCity,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [
        ChartKind::Retailer,
        ChartKind::Monthly,
        ChartKind::State,
        ChartKind::RegionCity,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ChartKind::Retailer => "retailer_sales.png",
            ChartKind::Monthly => "monthly_sales.png",
            ChartKind::State => "state_sales.png",
            ChartKind::RegionCity => "region_city_treemap.png",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ChartKind::Retailer => "Total Sales by Retailer",
            ChartKind::Monthly => "Total Sales Over Time",
            ChartKind::State => "Total Sales and Units Sold by State",
            ChartKind::RegionCity => "Total Sales by Region and City",
        }
    }
}

fn draw_err<E: std::fmt::Display>(chart: &'static str) -> impl Fn(E) -> ChartError {
    move |e| ChartError::Draw {
        chart,
        message: e.to_string(),
    }
}

/// Upper bound for a value axis with 10% headroom.
pub fn axis_max(max: f64) -> f64 {
    if max.is_finite() && max > 0.0 {
        max * 1.1
    } else {
        1.0
    }
}

/// Short tick label for large currency values, e.g. `1.5M`.
pub fn compact_amount(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.1}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.1}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.0}k", value / 1e3)
    } else {
        format!("{:.0}", value)
    }
}

/// Longest prefix of `text` that fits in `max_width` pixels, with ".." marking
/// the cut. `None` when not even one character fits.
fn fit_label(text: &str, max_width: u32, measure: impl Fn(&str) -> u32) -> Option<String> {
    if measure(text) <= max_width {
        return Some(text.to_string());
    }
    let chars: Vec<char> = text.chars().collect();
    (1..chars.len())
        .rev()
        .map(|n| format!("{}..", chars[..n].iter().collect::<String>()))
        .find(|label| measure(label) <= max_width)
}

fn category_label(labels: &[String], value: &SegmentValue<u32>) -> String {
    match value {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Renders the report's charts as PNG files.
pub struct StaticChartRenderer {
    width: u32,
    height: u32,
}

impl StaticChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Render every chart into `out_dir`, one chart per rayon task.
    ///
    /// Nothing lands in `out_dir` unless all charts rendered.
    pub fn render_all(
        &self,
        report: &DashboardReport,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, ChartError> {
        let staging = out_dir.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(io_err(&staging))?;

        let result = self.render_staged(report, &staging).and_then(|staged| {
            staged
                .into_iter()
                .map(|(kind, path)| -> Result<PathBuf, ChartError> {
                    let dest = out_dir.join(kind.file_name());
                    fs::rename(&path, &dest).map_err(io_err(&dest))?;
                    Ok(dest)
                })
                .collect()
        });

        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(dir = %staging.display(), error = %e, "failed to remove chart staging directory");
        }
        result
    }

    fn render_staged(
        &self,
        report: &DashboardReport,
        staging: &Path,
    ) -> Result<Vec<(ChartKind, PathBuf)>, ChartError> {
        ChartKind::ALL
            .par_iter()
            .map(|kind| -> Result<(ChartKind, PathBuf), ChartError> {
                let path = staging.join(kind.file_name());
                self.render(*kind, report, &path)?;
                Ok((*kind, path))
            })
            .collect()
    }

    pub fn render(
        &self,
        kind: ChartKind,
        report: &DashboardReport,
        path: &Path,
    ) -> Result<(), ChartError> {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err(kind.title()))?;

        match kind {
            ChartKind::Retailer => Self::draw_retailer(&root, &report.retailer.rows()?)?,
            ChartKind::Monthly => Self::draw_monthly(&root, &report.monthly.rows()?)?,
            ChartKind::State => Self::draw_state(&root, &report.state.rows()?)?,
            ChartKind::RegionCity => Self::draw_treemap(&root, &report.region_city.rows()?)?,
        }

        root.present().map_err(draw_err(kind.title()))?;
        Ok(())
    }

    fn draw_retailer(
        root: &DrawingArea<BitMapBackend, Shift>,
        rows: &[RetailerTotal],
    ) -> Result<(), ChartError> {
        let title = ChartKind::Retailer.title();
        let labels: Vec<String> = rows.iter().map(|r| r.retailer.clone()).collect();
        let y_max = axis_max(rows.iter().map(|r| r.total_sales).fold(0.0, f64::max));

        let mut chart = ChartBuilder::on(root)
            .caption(title, (FONT, 24))
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(80)
            .build_cartesian_2d(
                (0u32..(rows.len() as u32).max(1)).into_segmented(),
                0f64..y_max,
            )
            .map_err(draw_err(title))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .light_line_style(GRID_COLOR.mix(0.3))
            .x_desc("Retailer")
            .y_desc("Total Sales ($)")
            .x_labels(rows.len().max(1))
            .x_label_formatter(&|v| category_label(&labels, v))
            .y_label_formatter(&|v| compact_amount(*v))
            .draw()
            .map_err(draw_err(title))?;

        chart
            .draw_series(
                Histogram::vertical(&chart)
                    .style(BAR_COLOR.filled())
                    .margin(10)
                    .data(rows.iter().enumerate().map(|(i, r)| (i as u32, r.total_sales))),
            )
            .map_err(draw_err(title))?;

        Ok(())
    }

    fn draw_monthly(
        root: &DrawingArea<BitMapBackend, Shift>,
        rows: &[MonthlyTotal],
    ) -> Result<(), ChartError> {
        let title = ChartKind::Monthly.title();
        let labels: Vec<String> = rows.iter().map(|r| r.label.clone()).collect();
        let y_max = axis_max(rows.iter().map(|r| r.total_sales).fold(0.0, f64::max));
        let x_max = rows.len().saturating_sub(1).max(1);

        let mut chart = ChartBuilder::on(root)
            .caption(title, (FONT, 24))
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(80)
            .build_cartesian_2d(0usize..x_max, 0f64..y_max)
            .map_err(draw_err(title))?;

        chart
            .configure_mesh()
            .light_line_style(GRID_COLOR.mix(0.3))
            .x_desc("Month_Year")
            .y_desc("TotalSales")
            .x_labels(rows.len().clamp(2, 24))
            .x_label_formatter(&|i| labels.get(*i).cloned().unwrap_or_default())
            .y_label_formatter(&|v| compact_amount(*v))
            .draw()
            .map_err(draw_err(title))?;

        chart
            .draw_series(LineSeries::new(
                rows.iter().enumerate().map(|(i, r)| (i, r.total_sales)),
                BAR_COLOR.stroke_width(2),
            ))
            .map_err(draw_err(title))?;

        Ok(())
    }

    fn draw_state(
        root: &DrawingArea<BitMapBackend, Shift>,
        rows: &[StateTotal],
    ) -> Result<(), ChartError> {
        let title = ChartKind::State.title();
        let n = (rows.len() as u32).max(1);
        let labels: Vec<String> = rows.iter().map(|r| r.state.clone()).collect();
        let sales_max = axis_max(rows.iter().map(|r| r.total_sales).fold(0.0, f64::max));
        let units_max = axis_max(rows.iter().map(|r| r.units_sold as f64).fold(0.0, f64::max));

        let mut chart = ChartBuilder::on(root)
            .caption(title, (FONT, 24))
            .margin(20)
            .x_label_area_size(90)
            .y_label_area_size(80)
            .right_y_label_area_size(80)
            .build_cartesian_2d((0u32..n).into_segmented(), 0f64..sales_max)
            .map_err(draw_err(title))?
            .set_secondary_coord((0u32..n).into_segmented(), 0f64..units_max);

        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("State")
            .y_desc("Total Sales")
            .x_labels(rows.len().max(1))
            .x_label_style((FONT, 11).into_font().transform(FontTransform::Rotate90))
            .x_label_formatter(&|v| category_label(&labels, v))
            .y_label_formatter(&|v| compact_amount(*v))
            .draw()
            .map_err(draw_err(title))?;

        chart
            .configure_secondary_axes()
            .y_desc("Units Sold")
            .y_label_formatter(&|v| compact_amount(*v))
            .draw()
            .map_err(draw_err(title))?;

        chart
            .draw_series(rows.iter().enumerate().map(|(i, r)| {
                let i = i as u32;
                Rectangle::new(
                    [
                        (SegmentValue::Exact(i), 0.0),
                        (SegmentValue::Exact(i + 1), r.total_sales),
                    ],
                    BAR_COLOR.filled(),
                )
            }))
            .map_err(draw_err(title))?
            .label("Total Sales")
            .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], BAR_COLOR.filled()));

        chart
            .draw_secondary_series(LineSeries::new(
                rows.iter()
                    .enumerate()
                    .map(|(i, r)| (SegmentValue::CenterOf(i as u32), r.units_sold as f64)),
                LINE_COLOR.stroke_width(2),
            ))
            .map_err(draw_err(title))?
            .label("Units Sold")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], LINE_COLOR));

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(draw_err(title))?;

        Ok(())
    }

    fn draw_treemap(
        root: &DrawingArea<BitMapBackend, Shift>,
        rows: &[RegionCityEntry],
    ) -> Result<(), ChartError> {
        let title = ChartKind::RegionCity.title();
        let area = root
            .titled(title, (FONT, 24))
            .map_err(draw_err(title))?
            .margin(10, 10, 10, 10);

        let (w, h) = area.dim_in_pixel();
        let tiles = treemap::layout(rows, Rect::new(0.0, 0.0, w as f64, h as f64));

        let city_style: TextStyle = (FONT, 13).into();
        let amount_style: TextStyle = (FONT, 11).into();
        let region_style: TextStyle = (FONT, 14).into_font().style(FontStyle::Bold).into();
        let text_width = |text: &str, style: &TextStyle| {
            area.estimate_text_size(text, style)
                .map(|(w, _)| w)
                .unwrap_or(u32::MAX)
        };

        let mut color_idx = 0;
        for region in &tiles {
            for city in &region.cities {
                let color = PALETTE[color_idx % PALETTE.len()];
                color_idx += 1;

                let (x0, y0) = (city.rect.x0 as i32, city.rect.y0 as i32);
                let (x1, y1) = (city.rect.x1 as i32, city.rect.y1 as i32);
                area.draw(&Rectangle::new([(x0, y0), (x1, y1)], color.mix(0.8).filled()))
                    .map_err(draw_err(title))?;
                area.draw(&Rectangle::new([(x0, y0), (x1, y1)], WHITE.stroke_width(1)))
                    .map_err(draw_err(title))?;

                if city.rect.height() <= 36.0 {
                    continue;
                }
                let max_width = (city.rect.width() - 8.0).max(0.0) as u32;
                if let Some(name) =
                    fit_label(&city.city, max_width, |t| text_width(t, &city_style))
                {
                    area.draw(&Text::new(name, (x0 + 4, y0 + 4), city_style.clone()))
                        .map_err(draw_err(title))?;
                }
                if let Some(amount) =
                    fit_label(&city.label, max_width, |t| text_width(t, &amount_style))
                {
                    area.draw(&Text::new(amount, (x0 + 4, y0 + 20), amount_style.clone()))
                        .map_err(draw_err(title))?;
                }
            }

            let (x0, y0) = (region.rect.x0 as i32, region.rect.y0 as i32);
            let (x1, y1) = (region.rect.x1 as i32, region.rect.y1 as i32);
            area.draw(&Rectangle::new([(x0, y0), (x1, y1)], BLACK.stroke_width(2)))
                .map_err(draw_err(title))?;
            let max_width = (region.rect.width() - 8.0).max(0.0) as u32;
            if let Some(name) =
                fit_label(&region.region, max_width, |t| text_width(t, &region_style))
            {
                area.draw(&Text::new(name, (x0 + 4, y1 - 18), region_style.clone()))
                    .map_err(draw_err(title))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_max_has_headroom() {
        assert!((axis_max(1000.0) - 1100.0).abs() < 1e-9);
        assert_eq!(axis_max(0.0), 1.0);
        assert_eq!(axis_max(f64::NAN), 1.0);
    }

    #[test]
    fn test_compact_amount() {
        assert_eq!(compact_amount(950.0), "950");
        assert_eq!(compact_amount(12_600.0), "13k");
        assert_eq!(compact_amount(2_500_000.0), "2.5M");
        assert_eq!(compact_amount(3_000_000_000.0), "3.0B");
    }

    #[test]
    fn test_category_label() {
        let labels = vec!["Amazon".to_string(), "Walmart".to_string()];
        assert_eq!(category_label(&labels, &SegmentValue::CenterOf(1)), "Walmart");
        assert_eq!(category_label(&labels, &SegmentValue::CenterOf(5)), "");
        assert_eq!(category_label(&labels, &SegmentValue::Last), "");
    }

    #[test]
    fn test_fit_label_truncates_to_width() {
        // 7 px per character
        let measure = |t: &str| t.chars().count() as u32 * 7;
        assert_eq!(fit_label("Miami", 70, measure), Some("Miami".to_string()));
        assert_eq!(
            fit_label("San Francisco", 56, measure),
            Some("San Fr..".to_string())
        );
        assert_eq!(fit_label("Los Angeles", 14, measure), None);
        assert_eq!(fit_label("", 0, measure), Some(String::new()));
    }

    #[test]
    fn test_chart_file_names_are_distinct() {
        let mut names: Vec<&str> = ChartKind::ALL.iter().map(|k| k.file_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ChartKind::ALL.len());
    }
}
