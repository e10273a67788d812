//! Treemap Layout
//! Slice-and-dice layout: regions split the width, cities split each region's
//! height, both proportionally to total sales.

use crate::data::RegionCityEntry;

/// Pixel rectangle, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionTile {
    pub region: String,
    pub rect: Rect,
    pub cities: Vec<CityTile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityTile {
    pub city: String,
    pub label: String,
    pub rect: Rect,
}

/// Lay out `entries` inside `bounds`.
///
/// Entries must be grouped by region (the pipeline sorts them by region and
/// city). Zero-sales entries get no area; an all-zero input yields no tiles.
pub fn layout(entries: &[RegionCityEntry], bounds: Rect) -> Vec<RegionTile> {
    let total: f64 = entries.iter().map(|e| e.total_sales.max(0.0)).sum();
    if total <= 0.0 {
        return Vec::new();
    }

    let mut groups: Vec<(&str, Vec<&RegionCityEntry>)> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some((region, members)) if *region == entry.region => members.push(entry),
            _ => groups.push((entry.region.as_str(), vec![entry])),
        }
    }

    let mut tiles = Vec::with_capacity(groups.len());
    let mut x = bounds.x0;
    for (region, members) in groups {
        let region_total: f64 = members.iter().map(|e| e.total_sales.max(0.0)).sum();
        if region_total <= 0.0 {
            continue;
        }
        let width = bounds.width() * region_total / total;
        let rect = Rect::new(x, bounds.y0, x + width, bounds.y1);
        x += width;

        let mut y = rect.y0;
        let cities = members
            .iter()
            .filter(|e| e.total_sales > 0.0)
            .map(|e| {
                let height = rect.height() * e.total_sales / region_total;
                let tile = CityTile {
                    city: e.city.clone(),
                    label: e.formatted.clone(),
                    rect: Rect::new(rect.x0, y, rect.x1, y + height),
                };
                y += height;
                tile
            })
            .collect();

        tiles.push(RegionTile {
            region: region.to_string(),
            rect,
            cities,
        });
    }

    tiles
}
