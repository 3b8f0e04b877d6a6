use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::analysis::{self, Dashboard};
use crate::comfy_table::format_timestamp;
use crate::presentation::{self, ChartSpec, FallTable};
use crate::storage_utils::AppConfig;

// --- App State ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Table,
    Chart,
}

const VIEWS: [(View, &str); 2] = [(View::Table, "Fall Table"), (View::Chart, "Fall Chart")];

struct App {
    config: AppConfig,
    dashboard: Option<Dashboard>,
    is_refreshing: bool,
    last_error: Option<String>,
    selected_view_index: usize,
}

impl App {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            dashboard: None,
            is_refreshing: false,
            last_error: None,
            selected_view_index: 0,
        }
    }

    fn view(&self) -> View {
        VIEWS[self.selected_view_index].0
    }

    fn apply(&mut self, result: Result<Dashboard>) {
        match result {
            Ok(dashboard) => {
                self.dashboard = Some(dashboard);
                self.last_error = None;
            }
            Err(e) => {
                tracing::error!("refresh failed: {:#}", e);
                self.last_error = Some(format!("{:#}", e));
            }
        }
        self.is_refreshing = false;
    }

    fn start_refresh(&mut self, tx: &mpsc::Sender<Result<Dashboard>>) {
        if self.is_refreshing {
            return;
        }
        self.is_refreshing = true;
        let tx = tx.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let result = analysis::run_analysis_pipeline(&config).await;
            let _ = tx.send(result).await;
        });
    }
}

// --- TUI ---

pub async fn run_tui(config: AppConfig) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, config).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, config: AppConfig) -> Result<()> {
    let (data_tx, mut data_rx) = mpsc::channel::<Result<Dashboard>>(1);
    let mut app = App::new(config);
    app.start_refresh(&data_tx);

    loop {
        terminal.draw(|f| ui(f, &app))?;

        if let Ok(result) = data_rx.try_recv() {
            app.apply(result);
        }

        if event::poll(Duration::from_millis(50))? {
            // Resize needs no handling: the next draw picks up the new size.
            if let Event::Key(key) = event::read()? {
                if !handle_key_event(key, &mut app, &data_tx) {
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `false` when the user asked to quit.
fn handle_key_event(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<Result<Dashboard>>) -> bool {
    if key.kind != KeyEventKind::Press {
        return true;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::F(5) => app.start_refresh(tx),
        KeyCode::Up => {
            app.selected_view_index = app
                .selected_view_index
                .checked_sub(1)
                .unwrap_or(VIEWS.len() - 1);
        }
        KeyCode::Down | KeyCode::Tab => {
            app.selected_view_index = (app.selected_view_index + 1) % VIEWS.len();
        }
        KeyCode::Char(c) => {
            let digit = c.to_digit(10).unwrap_or(0) as usize;
            if (1..=VIEWS.len()).contains(&digit) {
                app.selected_view_index = digit - 1;
            }
        }
        _ => {}
    }
    true
}

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(18), Constraint::Percentage(82)])
        .split(f.size());

    render_sidebar(f, app, main_layout[0]);

    let warning_lines: Vec<Line> = app
        .dashboard
        .iter()
        .flat_map(|d| d.report.warnings.iter())
        .map(|w| Line::from(w.to_string()).style(Style::default().fg(Color::Yellow)))
        .chain(
            app.last_error
                .iter()
                .map(|e| Line::from(format!("Refresh failed: {}", e)).style(Style::default().fg(Color::Red))),
        )
        .collect();
    let warnings_height = if warning_lines.is_empty() {
        0
    } else {
        (warning_lines.len() as u16 + 2).min(8)
    };

    let right_chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(warnings_height),
    ])
    .split(main_layout[1]);

    let time_str = app
        .dashboard
        .as_ref()
        .map_or_else(|| "Never".to_string(), |d| format_timestamp(d.generated_at_ms));
    f.render_widget(
        Paragraph::new(presentation::DASHBOARD_DESCRIPTION).block(
            Block::default()
                .borders(Borders::ALL)
                .title_alignment(Alignment::Center)
                .title(format!("{} | Last Updated: {} UTC", presentation::DASHBOARD_TITLE, time_str)),
        ),
        right_chunks[0],
    );

    match (&app.dashboard, app.view()) {
        (Some(d), View::Table) => render_fall_table(f, &d.table, right_chunks[1]),
        (Some(d), View::Chart) => render_fall_chart(f, &d.chart, right_chunks[1]),
        (None, _) => f.render_widget(
            Paragraph::new("No data yet.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL)),
            right_chunks[1],
        ),
    }

    if !warning_lines.is_empty() {
        f.render_widget(
            Paragraph::new(warning_lines)
                .wrap(Wrap { trim: true })
                .block(Block::default().borders(Borders::ALL).title("Warnings")),
            right_chunks[2],
        );
    }

    if app.is_refreshing {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Fetching 52-week history...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Views")
        .title_alignment(Alignment::Center);
    let inner = sidebar_block.inner(area);
    f.render_widget(sidebar_block, area);

    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(2)]).split(inner);

    let view_lines: Vec<Line> = VIEWS
        .iter()
        .enumerate()
        .map(|(i, (_, name))| {
            let line = Line::from(format!("{}. {}", i + 1, name));
            if i == app.selected_view_index {
                line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray))
            } else {
                line
            }
        })
        .collect();
    f.render_widget(Paragraph::new(view_lines), chunks[0]);

    f.render_widget(
        Paragraph::new("F5 refreshes data\nq quits").alignment(Alignment::Center),
        chunks[1],
    );
}

fn render_fall_table(f: &mut Frame, fall_table: &FallTable, area: Rect) {
    let header = Row::new(
        std::iter::once(fall_table.index_name)
            .chain(fall_table.columns.iter().copied())
            .map(Cell::from),
    )
    .style(Style::default().bg(Color::DarkGray));

    let rows = fall_table.rows.iter().map(|row| {
        let mut cells = vec![
            Cell::from(row.display_name.clone()).style(Style::default().fg(Color::Cyan)),
        ];
        cells.extend(row.cells().into_iter().enumerate().map(|(i, text)| {
            let cell = Cell::from(text);
            match i {
                0 => cell.style(Style::default().fg(Color::DarkGray)),
                3 => cell.style(Style::default().fg(Color::Rgb(220, 20, 60))),
                _ => cell,
            }
        }));
        Row::new(cells).height(1)
    });

    f.render_widget(
        Table::new(
            rows,
            [
                Constraint::Percentage(22), // Name
                Constraint::Percentage(14), // Symbol
                Constraint::Percentage(10), // Price
                Constraint::Percentage(10), // 52W High
                Constraint::Percentage(8),  // % Fall
                Constraint::Percentage(9),
                Constraint::Percentage(9),
                Constraint::Percentage(9),
                Constraint::Percentage(9),
            ],
        )
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Fall from 52W High")),
        area,
    );
}

/// Bar values are in hundredths of a percent so the widget's integer scale keeps two decimals.
fn chart_bars(chart: &ChartSpec) -> Vec<Bar<'static>> {
    let color = Color::Rgb(chart.color.r, chart.color.g, chart.color.b);
    chart
        .bars
        .iter()
        .map(|bar| {
            Bar::default()
                .value((bar.magnitude * 100.0).round() as u64)
                .label(Line::from(bar.label.clone()))
                .text_value(bar.text.clone())
                .style(Style::default().fg(color))
                .value_style(Style::default().fg(Color::White).bg(color))
        })
        .collect()
}

fn render_fall_chart(f: &mut Frame, chart: &ChartSpec, area: Rect) {
    let bars = chart_bars(chart);
    let max = ((chart.max_magnitude() * 100.0).round() as u64).max(1);

    f.render_widget(
        BarChart::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("{} ({} by {})", chart.title, chart.y_axis_title, chart.x_axis_title)),
            )
            .direction(Direction::Horizontal)
            .bar_width(1)
            .bar_gap(0)
            .max(max)
            .data(BarGroup::default().bars(&bars)),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
