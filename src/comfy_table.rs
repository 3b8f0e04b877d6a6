use crate::analysis::Dashboard;
use crate::fall_from_high::ThresholdFlags;
use crate::presentation::{self, ChartSpec, FallTable};
use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

const BAR_WIDTH: usize = 40;

pub fn format_timestamp(ts_ms: i64) -> String {
    if ts_ms == 0 {
        return "Never".to_string();
    }
    let seconds = ts_ms / 1000;
    let nanoseconds = ((ts_ms % 1000) * 1_000_000) as u32;
    DateTime::from_timestamp(seconds, nanoseconds)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

fn styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(title: &str) -> Cell {
    Cell::new(title).add_attribute(Attribute::Bold)
}

/// Color of the "% Fall" cell, deeper red the more flags are set.
fn severity_color(flags: ThresholdFlags) -> Color {
    if flags.pct_25 {
        Color::Rgb { r: 220, g: 20, b: 60 }
    } else if flags.pct_15 {
        Color::Rgb { r: 255, g: 99, b: 71 }
    } else if flags.pct_10 {
        Color::Rgb { r: 255, g: 165, b: 0 }
    } else {
        Color::Rgb { r: 0, g: 200, b: 0 }
    }
}

pub fn render_table(fall_table: &FallTable) -> Table {
    let mut table = styled_table();

    let mut header = vec![header_cell(fall_table.index_name)];
    header.extend(fall_table.columns.iter().map(|c| {
        header_cell(c).set_alignment(if *c == "Symbol" {
            CellAlignment::Left
        } else {
            CellAlignment::Right
        })
    }));
    table.set_header(header);

    for row in &fall_table.rows {
        let mut cells = vec![Cell::new(&row.display_name).fg(Color::Cyan)];
        for (i, text) in row.cells().into_iter().enumerate() {
            let cell = match i {
                0 => Cell::new(text).fg(Color::DarkGrey),
                3 => Cell::new(text)
                    .fg(severity_color(row.flags))
                    .set_alignment(CellAlignment::Right),
                _ => Cell::new(text).set_alignment(CellAlignment::Right),
            };
            cells.push(cell);
        }
        table.add_row(cells);
    }

    table
}

/// Text rendition of the horizontal bar chart, one row per bar.
pub fn render_chart(chart: &ChartSpec) -> Table {
    let mut table = styled_table();
    table.set_header(vec![
        header_cell(chart.y_axis_title),
        header_cell(chart.x_axis_title),
        header_cell(""),
    ]);

    let scale = chart.max_magnitude();
    let color = Color::Rgb {
        r: chart.color.r,
        g: chart.color.g,
        b: chart.color.b,
    };

    for bar in &chart.bars {
        let len = if scale > 0.0 {
            ((bar.magnitude / scale) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        table.add_row(vec![
            Cell::new(&bar.label),
            Cell::new("█".repeat(len)).fg(color),
            Cell::new(&bar.text).set_alignment(CellAlignment::Right),
        ]);
    }

    table
}

pub fn run(dashboard: &Dashboard) {
    println!("\n{}", presentation::DASHBOARD_TITLE);
    println!("{}", presentation::DASHBOARD_DESCRIPTION);
    println!(
        "(Data taken at {} UTC)",
        format_timestamp(dashboard.generated_at_ms)
    );

    for warning in &dashboard.report.warnings {
        println!("⚠ {}", warning);
    }

    if dashboard.table.rows.is_empty() {
        println!("No data found.");
        return;
    }

    println!("\n{}", render_table(&dashboard.table));
    println!("\n{}\n{}", dashboard.chart.title, render_chart(&dashboard.chart));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fall_from_high::{FallMetrics, FallRecord};
    use crate::storage_utils::InstrumentConfig;

    fn records() -> Vec<FallRecord> {
        [("X", "Asset X", 90.0, 120.0), ("Y", "Asset Y", 99.0, 100.0)]
            .into_iter()
            .map(|(s, n, c, h)| {
                FallRecord::new(
                    &InstrumentConfig::new(s, n),
                    FallMetrics {
                        current_price: c,
                        high_52w: h,
                        fall_pct: (c - h) / h * 100.0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn table_lists_names_values_and_markers() {
        let rendered = render_table(&presentation::build_table(&records())).to_string();
        assert!(rendered.contains("Name"));
        assert!(rendered.contains("25% Low"));
        assert!(rendered.contains("Asset X"));
        assert!(rendered.contains("-25.00"));
        assert!(rendered.contains("120.00"));
        assert!(rendered.contains("✅"));
    }

    #[test]
    fn fall_color_follows_flags_not_rounded_value() {
        let records = vec![FallRecord::new(
            &InstrumentConfig::new("B", "Boundary"),
            FallMetrics {
                current_price: 90.004,
                high_52w: 100.0,
                fall_pct: -9.996,
            },
        )];
        let row = &presentation::build_table(&records).rows[0];
        assert_eq!(row.fall_pct, -10.0);
        assert_eq!(severity_color(row.flags), Color::Rgb { r: 0, g: 200, b: 0 });

        let flags = ThresholdFlags::from_fall(-10.0);
        assert_eq!(severity_color(flags), Color::Rgb { r: 255, g: 165, b: 0 });
        let flags = ThresholdFlags::from_fall(-30.0);
        assert_eq!(severity_color(flags), Color::Rgb { r: 220, g: 20, b: 60 });
    }

    #[test]
    fn chart_bars_scale_to_worst_fall() {
        let chart = presentation::build_chart(&records(), 600);
        let rendered = render_chart(&chart).to_string();
        assert!(rendered.contains(&"█".repeat(BAR_WIDTH)));
        assert!(rendered.contains("-25.00%"));
        assert!(rendered.contains("-1.00%"));

        let worst = rendered.find("Asset X").unwrap();
        let mild = rendered.find("Asset Y").unwrap();
        assert!(worst < mild);
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp(0), "Never");
        assert_eq!(format_timestamp(1_700_000_000_000), "14-11-2023 22:13:20");
    }
}
