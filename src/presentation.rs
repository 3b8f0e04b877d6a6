//! Turns engine records into a display table and a bar chart description.
//! Nothing here derives numbers; it only orders, rounds and labels them.

use crate::fall_from_high::{FallRecord, ThresholdFlags};
use serde::Serialize;

pub const DASHBOARD_TITLE: &str = "📊 Fall Dashboard - % Drop from 52W High";
pub const DASHBOARD_DESCRIPTION: &str = "This dashboard shows the percentage fall of major indices, stocks, ETFs, and crypto assets from their 52-week highs.";

pub const TABLE_COLUMNS: [&str; 8] = [
    "Symbol", "Price", "52W High", "% Fall", "10% Low", "15% Low", "20% Low", "25% Low",
];
pub const FLAG_MARKER: &str = "✅";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub display_name: String, // row key
    pub symbol: String,
    pub price: f64,
    pub high_52w: f64,
    pub fall_pct: f64,
    pub flags: ThresholdFlags, // from the unrounded fall
    pub markers: [&'static str; 4],
}

impl TableRow {
    /// Cell texts in `TABLE_COLUMNS` order.
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.symbol.clone(),
            format!("{:.2}", self.price),
            format!("{:.2}", self.high_52w),
            format!("{:.2}", self.fall_pct),
        ];
        cells.extend(self.markers.iter().map(|m| m.to_string()));
        cells
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallTable {
    pub index_name: &'static str,
    pub columns: [&'static str; 8],
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BarColor {
    pub name: &'static str,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const CRIMSON: BarColor = BarColor {
    name: "crimson",
    r: 220,
    g: 20,
    b: 60,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBar {
    pub label: String,  // display name
    pub magnitude: f64, // -fall_pct, never negative
    pub text: String,   // e.g. "-25.00%"
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub title: &'static str,
    pub x_axis_title: &'static str,
    pub y_axis_title: &'static str,
    pub orientation: Orientation,
    pub color: BarColor,
    pub height: u32,
    pub bars: Vec<ChartBar>, // worst fall first
}

impl ChartSpec {
    pub fn max_magnitude(&self) -> f64 {
        self.bars.iter().map(|b| b.magnitude).fold(0.0, f64::max)
    }
}

fn marker(flag: bool) -> &'static str {
    if flag { FLAG_MARKER } else { "" }
}

pub fn render(records: &[FallRecord], height: u32) -> (FallTable, ChartSpec) {
    (build_table(records), build_chart(records, height))
}

/// One row per record, in the order received.
pub fn build_table(records: &[FallRecord]) -> FallTable {
    let rows = records
        .iter()
        .map(|record| TableRow {
            display_name: record.display_name.clone(),
            symbol: record.symbol.clone(),
            price: record.rounded_price(),
            high_52w: record.rounded_high(),
            fall_pct: record.rounded_fall(),
            flags: record.flags,
            markers: record.flags.as_array().map(marker),
        })
        .collect();

    FallTable {
        index_name: "Name",
        columns: TABLE_COLUMNS,
        rows,
    }
}

/// Bars sorted by fall ascending (worst first); ties keep record order.
pub fn build_chart(records: &[FallRecord], height: u32) -> ChartSpec {
    let mut sorted: Vec<&FallRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.fall_pct.total_cmp(&b.fall_pct));

    let bars = sorted
        .into_iter()
        .map(|record| ChartBar {
            label: record.display_name.clone(),
            // `0.0 - x` keeps an at-high bar at +0.0 rather than -0.0.
            magnitude: 0.0 - record.fall_pct,
            text: format!("{:.2}%", record.fall_pct),
        })
        .collect();

    ChartSpec {
        title: "📉 Sorted Fall Bar - % Drop from 52W High",
        x_axis_title: "Fall (%)",
        y_axis_title: "Asset",
        orientation: Orientation::Horizontal,
        color: CRIMSON,
        height,
        bars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fall_from_high::{FallMetrics, FallRecord};
    use crate::storage_utils::InstrumentConfig;

    fn record(symbol: &str, name: &str, current: f64, high: f64) -> FallRecord {
        FallRecord::new(
            &InstrumentConfig::new(symbol, name),
            FallMetrics {
                current_price: current,
                high_52w: high,
                fall_pct: (current - high) / high * 100.0,
            },
        )
    }

    #[test]
    fn table_keeps_record_order_and_keys_by_name() {
        let records = vec![
            record("A", "Alpha", 95.0, 100.0),
            record("B", "Beta", 50.0, 100.0),
        ];
        let table = build_table(&records);

        assert_eq!(table.index_name, "Name");
        let names: Vec<_> = table.rows.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Beta"]);
        assert_eq!(table.rows[1].symbol, "B");
    }

    #[test]
    fn markers_follow_flags() {
        let records = vec![record("X", "Asset X", 82.0, 100.0)];
        let table = build_table(&records);
        assert_eq!(table.rows[0].markers, ["✅", "✅", "", ""]);
        assert_eq!(
            table.rows[0].cells(),
            ["X", "82.00", "100.00", "-18.00", "✅", "✅", "", ""]
        );
    }

    #[test]
    fn boundary_row_displays_ten_without_flag() {
        let records = vec![FallRecord::new(
            &InstrumentConfig::new("B", "Boundary"),
            FallMetrics {
                current_price: 90.004,
                high_52w: 100.0,
                fall_pct: -9.996,
            },
        )];
        let row = &build_table(&records).rows[0];
        assert_eq!(row.fall_pct, -10.0);
        assert!(!row.flags.pct_10);
        assert_eq!(row.markers, ["", "", "", ""]);
    }

    #[test]
    fn price_rounding_matches_half_even_display() {
        let row = &build_table(&[record("P", "Penny", 0.125, 0.5)]).rows[0];
        assert_eq!(row.cells()[1], "0.12");
        assert_eq!(row.cells()[2], "0.50");
    }

    #[test]
    fn table_values_are_rounded() {
        let records = vec![record("X", "Asset X", 123.456, 130.0)];
        let row = &build_table(&records).rows[0];
        assert_eq!(row.price, 123.46);
        assert_eq!(row.high_52w, 130.0);
        assert_eq!(row.fall_pct, -5.03);
    }

    #[test]
    fn chart_sorts_worst_first_and_negates() {
        let records = vec![
            record("A", "Alpha", 95.0, 100.0),
            record("B", "Beta", 75.0, 100.0),
            record("C", "Gamma", 100.0, 100.0),
        ];
        let chart = build_chart(&records, 600);

        let labels: Vec<_> = chart.bars.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["Beta", "Alpha", "Gamma"]);
        assert_eq!(chart.bars[0].magnitude, 25.0);
        assert_eq!(chart.bars[0].text, "-25.00%");
        assert_eq!(chart.bars[2].text, "0.00%");
        assert!(chart.bars.iter().all(|b| b.magnitude >= 0.0));
        assert!(chart.bars[2].magnitude.is_sign_positive());
        assert_eq!(chart.max_magnitude(), 25.0);
    }

    #[test]
    fn chart_ties_keep_input_order() {
        let records = vec![
            record("A", "First", 90.0, 100.0),
            record("B", "Worst", 50.0, 100.0),
            record("C", "Second", 90.0, 100.0),
        ];
        let chart = build_chart(&records, 600);
        let labels: Vec<_> = chart.bars.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["Worst", "First", "Second"]);
    }

    #[test]
    fn chart_metadata() {
        let (table, chart) = render(&[], 480);
        assert!(table.rows.is_empty());
        assert!(chart.bars.is_empty());
        assert_eq!(chart.orientation, Orientation::Horizontal);
        assert_eq!(chart.color, CRIMSON);
        assert_eq!(chart.height, 480);
        assert_eq!(chart.x_axis_title, "Fall (%)");
        assert_eq!(chart.y_axis_title, "Asset");
        assert_eq!(chart.max_magnitude(), 0.0);
    }
}
