use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols::Marker,
    text::Line,
    widgets::{
        Axis, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph, Wrap,
        block::{Position, Title},
        canvas::{Canvas, Line as CanvasLine},
    },
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::analysis::{self, Analysis, Extras, Services};
use crate::cache::SeriesCache;
use crate::chart::{AxisId, ChartModel, SecondaryAxis, TraceColor};
use crate::export::{self, ExportFormat};
use crate::market_data::normalize_ticker;
use crate::models::{Indicator, IndicatorSelection, Period, Series};
use crate::storage_utils::{AppConfig, AsyncStorageManager};

// --- Events & App State ---

/// Results reported back by spawned tasks.
#[derive(Debug)]
pub enum AppEvent {
    SeriesLoaded {
        ticker: String,
        period: Period,
        result: std::result::Result<Series, String>,
    },
    ExtrasLoaded {
        ticker: String,
        extras: Extras,
    },
    Exported(std::result::Result<PathBuf, String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Status {
    Info(String),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Editing,
    Normal,
}

/// Handles to everything a key handler may need to start background work.
#[derive(Clone)]
pub struct Context {
    pub tx: mpsc::Sender<AppEvent>,
    pub services: Services,
    pub storage: Arc<AsyncStorageManager>,
    pub export_dir: PathBuf,
    pub chart_size: (u32, u32),
}

struct App {
    input: String,
    input_mode: InputMode,
    ticker: Option<String>,
    period: Period,
    selection: IndicatorSelection,
    menu_index: usize,
    analysis: Option<Analysis>,
    extras: Option<Extras>,
    status: Status,
    is_loading: bool,
    cache: SeriesCache,
}

impl App {
    fn new(config: &AppConfig, cache: SeriesCache) -> Self {
        Self {
            input: String::new(),
            input_mode: InputMode::Editing,
            ticker: None,
            period: config.default_period,
            selection: config.default_indicators.clone(),
            menu_index: 0,
            analysis: None,
            extras: None,
            status: Status::Info("Type a ticker (e.g. PETR4.SA) and press Enter".to_string()),
            is_loading: false,
            cache,
        }
    }

    fn show_series(&mut self, series: Arc<Series>) {
        if series.is_empty() {
            self.status = Status::Info(format!(
                "No data for {} over {}",
                series.ticker(),
                series.period()
            ));
        } else {
            self.status = Status::Info(format!(
                "{} · {}: {} trading days",
                series.ticker(),
                series.period(),
                series.len()
            ));
        }
        self.analysis = Some(Analysis::compute(series, &self.selection));
    }

    /// Recomputes indicators for the held series; no provider round trip.
    fn reselect(&mut self) {
        if let Some(current) = &self.analysis {
            let series = Arc::clone(&current.series);
            self.analysis = Some(Analysis::compute(series, &self.selection));
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::SeriesLoaded {
                ticker,
                period,
                result,
            } => {
                self.is_loading = false;
                if self.ticker.as_deref() != Some(ticker.as_str()) || self.period != period {
                    return;
                }
                match result {
                    Ok(series) => {
                        let series = self.cache.insert(series);
                        self.show_series(series);
                    }
                    Err(message) => {
                        self.analysis = None;
                        self.status = Status::Error(format!("Could not load data: {}", message));
                    }
                }
            }
            AppEvent::ExtrasLoaded { ticker, extras } => {
                if self.ticker.as_deref() == Some(ticker.as_str()) {
                    self.extras = Some(extras);
                }
            }
            AppEvent::Exported(Ok(path)) => {
                self.status = Status::Info(format!("Saved {}", path.display()));
            }
            AppEvent::Exported(Err(message)) => {
                self.status = Status::Error(format!("Export failed: {}", message));
            }
        }
    }
}

// --- Handlers ---

fn request_load(app: &mut App, ctx: &Context) {
    if app.is_loading {
        app.status = Status::Info("Still loading, please wait".to_string());
        return;
    }
    // An empty input box reloads whatever is on screen
    let requested = if app.input.trim().is_empty() {
        app.ticker.clone().unwrap_or_default()
    } else {
        app.input.clone()
    };
    let ticker = match normalize_ticker(&requested) {
        Ok(t) => t,
        Err(e) => {
            app.status = Status::Error(e.to_string());
            return;
        }
    };
    app.input = ticker.clone();
    app.ticker = Some(ticker.clone());
    app.extras = None;
    let period = app.period;

    // 1. Cache hit: render right away, no loading popup
    if let Some(series) = app.cache.get(&ticker, period) {
        info!(ticker = %ticker, %period, "Serving series from cache");
        app.show_series(series);
    } else {
        // 2. Miss: fetch in the background, the UI loop applies the result
        app.is_loading = true;
        let tx = ctx.tx.clone();
        let provider = Arc::clone(&ctx.services.provider);
        let ticker = ticker.clone();
        tokio::spawn(async move {
            let result = provider
                .fetch_series(&ticker, period)
                .await
                .map_err(|e| e.to_string());
            let _ = tx
                .send(AppEvent::SeriesLoaded {
                    ticker,
                    period,
                    result,
                })
                .await;
        });
    }

    // 3. Fundamentals and news are never cached, refetch them on every load
    let tx = ctx.tx.clone();
    let services = ctx.services.clone();
    tokio::spawn(async move {
        let extras = analysis::fetch_extras(&services, &ticker).await;
        let _ = tx.send(AppEvent::ExtrasLoaded { ticker, extras }).await;
    });
}

fn request_export(app: &mut App, ctx: &Context, format: ExportFormat) {
    let Some(current) = &app.analysis else {
        app.status = Status::Error("Load a ticker before exporting".to_string());
        return;
    };
    if current.series.is_empty() {
        app.status = Status::Error("Nothing to export: no data loaded".to_string());
        return;
    }
    let series = Arc::clone(&current.series);
    let frame = current.frame.clone();
    let ctx = ctx.clone();
    app.status = Status::Info(format!("Exporting {}...", format.extension()));
    tokio::spawn(async move {
        let result = export::write_export(
            &ctx.storage,
            &ctx.export_dir,
            &series,
            &frame,
            format,
            ctx.chart_size,
        )
        .await
        .map_err(|e| e.to_string());
        let _ = ctx.tx.send(AppEvent::Exported(result)).await;
    });
}

fn change_period(app: &mut App, ctx: &Context, period: Period) {
    if app.is_loading {
        return;
    }
    app.period = period;
    if app.ticker.is_some() {
        request_load(app, ctx);
    }
}

/// Returns `false` when the user asked to quit.
fn handle_key_event(key: KeyEvent, app: &mut App, ctx: &Context) -> bool {
    if app.input_mode == InputMode::Editing {
        match key.code {
            KeyCode::Enter => {
                app.input_mode = InputMode::Normal;
                request_load(app, ctx);
            }
            KeyCode::Esc => {
                // abandon the edit and put the loaded ticker back
                app.input = app.ticker.clone().unwrap_or_default();
                app.input_mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Char(c) if !c.is_control() && app.input.len() < 20 => {
                app.input.push(c.to_ascii_uppercase());
            }
            _ => {}
        }
        return true;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::Char('/') | KeyCode::Char('t') => {
            app.input_mode = InputMode::Editing;
            app.input.clear();
        }
        KeyCode::Tab | KeyCode::Right => {
            let next = app.period.next();
            change_period(app, ctx, next);
        }
        KeyCode::BackTab | KeyCode::Left => {
            let previous = app.period.previous();
            change_period(app, ctx, previous);
        }
        KeyCode::Up => {
            app.menu_index = app
                .menu_index
                .checked_sub(1)
                .unwrap_or(Indicator::ALL.len() - 1);
        }
        KeyCode::Down => {
            app.menu_index = (app.menu_index + 1) % Indicator::ALL.len();
        }
        KeyCode::Char(' ') | KeyCode::Enter => {
            app.selection.toggle(Indicator::ALL[app.menu_index]);
            app.reselect();
        }
        KeyCode::Char('r') if app.ticker.is_some() => request_load(app, ctx),
        KeyCode::Char('c') => {
            if app.cache.is_empty() {
                app.status = Status::Info("Cache is already empty".to_string());
            } else {
                let dropped = app.cache.len();
                app.cache.clear();
                app.status = Status::Info(format!("Cache cleared ({} series dropped)", dropped));
            }
        }
        KeyCode::Char('e') => request_export(app, ctx, ExportFormat::Csv),
        KeyCode::Char('g') => request_export(app, ctx, ExportFormat::Png),
        KeyCode::Char(c) => {
            if let Some(digit) = c.to_digit(10) {
                if digit > 0 && digit as usize <= Indicator::ALL.len() {
                    app.menu_index = digit as usize - 1;
                    app.selection.toggle(Indicator::ALL[app.menu_index]);
                    app.reselect();
                }
            }
        }
        _ => {}
    }
    true
}

// --- TUI ---

pub async fn run_tui(
    config: AppConfig,
    storage: AsyncStorageManager,
    services: Services,
    cache: SeriesCache,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, config, storage, services, cache).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    config: AppConfig,
    storage: AsyncStorageManager,
    services: Services,
    cache: SeriesCache,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<AppEvent>(8);
    let ctx = Context {
        tx,
        services,
        export_dir: storage.export_dir(&config),
        storage: Arc::new(storage),
        chart_size: (config.chart.width, config.chart.height),
    };
    let mut app = App::new(&config, cache);

    loop {
        // 1. Redraw from the current state
        terminal.draw(|f| ui(f, &app))?;

        // 2. Apply whatever the background tasks finished since the last frame
        while let Ok(event) = rx.try_recv() {
            app.handle_event(event);
        }

        // 3. Poll input briefly so loads keep flowing while the user is idle
        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !handle_key_event(key, &mut app, &ctx) {
                        info!("Dashboard closed by user");
                        return Ok(());
                    }
                }
                // the next draw picks up the new size
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }
}

fn ratatui_color(color: TraceColor) -> Color {
    match color {
        TraceColor::Blue => Color::Blue,
        TraceColor::Green => Color::Green,
        TraceColor::Orange => Color::Rgb(255, 152, 0),
        TraceColor::Purple => Color::Magenta,
        TraceColor::Red => Color::Red,
        TraceColor::Yellow => Color::Yellow,
    }
}

fn ui(f: &mut Frame, app: &App) {
    let main_layout =
        Layout::horizontal([Constraint::Length(30), Constraint::Min(40)]).split(f.size());

    render_sidebar(f, app, main_layout[0]);

    let n_secondary = app
        .analysis
        .as_ref()
        .map_or(0, |a| a.chart.secondary_axes.len());
    let mut constraints = vec![Constraint::Length(3), Constraint::Min(10)];
    constraints.extend(std::iter::repeat_n(Constraint::Length(8), n_secondary));
    constraints.push(Constraint::Length(9));
    let right = Layout::vertical(constraints).split(main_layout[1]);

    render_status(f, app, right[0]);

    match &app.analysis {
        Some(a) if !a.chart.is_empty() => {
            render_price_chart(f, &a.chart, right[1]);
            for (i, axis) in a.chart.secondary_axes.iter().enumerate() {
                render_secondary(f, &a.chart, axis, right[2 + i]);
            }
        }
        Some(a) => {
            f.render_widget(
                Paragraph::new(format!(
                    "No data for {} over {}.\nCheck the ticker and try another period.",
                    a.series.ticker(),
                    a.series.period()
                ))
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title("Chart")),
                right[1],
            );
        }
        None => {
            f.render_widget(
                Block::default().borders(Borders::ALL).title("Chart"),
                right[1],
            );
        }
    }

    render_bottom(f, app, right[right.len() - 1]);

    if app.is_loading {
        let area = centered_rect(50, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(format!(
                "Loading {} ({})...\nPlease wait.",
                app.ticker.as_deref().unwrap_or(""),
                app.period
            ))
            .block(Block::default().title("Loading").borders(Borders::ALL))
            .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::vertical([
        Constraint::Length(3), // ticker input
        Constraint::Length(3), // period
        Constraint::Length(6), // indicator menu
        Constraint::Min(7),    // fundamentals
        Constraint::Length(9), // key help
    ])
    .split(area);

    let input_style = if app.input_mode == InputMode::Editing {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    f.render_widget(
        Paragraph::new(app.input.as_str())
            .style(input_style)
            .block(Block::default().borders(Borders::ALL).title("Ticker")),
        chunks[0],
    );

    let periods: Vec<Span> = Period::ALL
        .iter()
        .map(|p| {
            if *p == app.period {
                Span::styled(
                    format!("{} ", p),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )
            } else {
                Span::styled(format!("{} ", p), Style::default().fg(Color::DarkGray))
            }
        })
        .collect();
    f.render_widget(
        Paragraph::new(Line::from(periods))
            .block(Block::default().borders(Borders::ALL).title("Period")),
        chunks[1],
    );

    let indicator_lines: Vec<Line> = Indicator::ALL
        .iter()
        .enumerate()
        .map(|(i, indicator)| {
            let mark = if app.selection.contains(*indicator) { "[x]" } else { "[ ]" };
            let text = format!("{} {} {}", i + 1, mark, indicator.label());
            if i == app.menu_index && app.input_mode == InputMode::Normal {
                Line::from(Span::styled(
                    text,
                    Style::default().fg(Color::Yellow).bg(Color::DarkGray),
                ))
            } else {
                Line::from(text)
            }
        })
        .collect();
    f.render_widget(
        Paragraph::new(indicator_lines)
            .block(Block::default().borders(Borders::ALL).title("Indicators")),
        chunks[2],
    );

    let fundamentals: Vec<Line> = match &app.extras {
        Some(extras) => extras
            .fundamentals
            .rows()
            .into_iter()
            .map(|(label, value)| Line::from(format!("{:<15}{:>11}", label, value)))
            .collect(),
        None => vec![Line::from("-")],
    };
    f.render_widget(
        Paragraph::new(fundamentals)
            .block(Block::default().borders(Borders::ALL).title("Fundamentals")),
        chunks[3],
    );

    let help = [
        "Enter  load ticker",
        "/      edit ticker",
        "Tab    next period",
        "↑↓ ␣   pick indicator",
        "1-4    toggle indicator",
        "e / g  export CSV / PNG",
        "c      clear cache   q quit",
    ];
    f.render_widget(
        Paragraph::new(help.iter().map(|h| Line::from(*h)).collect::<Vec<_>>())
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL)),
        chunks[4],
    );
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let (text, style) = match &app.status {
        Status::Info(msg) => (msg.as_str(), Style::default()),
        Status::Error(msg) => (msg.as_str(), Style::default().fg(Color::Red)),
    };
    f.render_widget(
        Paragraph::new(text).style(style).block(
            Block::default()
                .borders(Borders::ALL)
                .title_alignment(Alignment::Center)
                .title(format!("Cached series: {}", app.cache.len())),
        ),
        area,
    );
}

fn date_span(chart: &ChartModel) -> String {
    match (chart.dates.first(), chart.dates.last()) {
        (Some(first), Some(last)) => format!(
            "{} → {}",
            first.format("%d-%m-%Y"),
            last.format("%d-%m-%Y")
        ),
        _ => String::new(),
    }
}

fn render_price_chart(f: &mut Frame, chart: &ChartModel, area: Rect) {
    let (lo, hi) = chart.price_range;
    let count = chart.candles.len() as f64;
    let legend: Vec<Span> = chart
        .traces_on(AxisId::Price)
        .map(|t| Span::styled(format!(" {} ", t.name), Style::default().fg(ratatui_color(t.color))))
        .collect();

    let canvas = Canvas::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{}  {}  [{:.2} – {:.2}]", chart.title, date_span(chart), lo, hi))
                .title(Title::from(Line::from(legend)).position(Position::Bottom)),
        )
        .marker(Marker::Braille)
        .x_bounds([0.0, count])
        .y_bounds([lo, hi])
        .paint(|ctx| {
            for (i, candle) in chart.candles.iter().enumerate() {
                let x = i as f64 + 0.5;
                let color = if candle.is_bullish() { Color::Green } else { Color::Red };
                ctx.draw(&CanvasLine {
                    x1: x,
                    y1: candle.low,
                    x2: x,
                    y2: candle.high,
                    color,
                });
                let (top, bottom) = (candle.open.max(candle.close), candle.open.min(candle.close));
                for dx in [-0.25, 0.0, 0.25] {
                    ctx.draw(&CanvasLine {
                        x1: x + dx,
                        y1: bottom,
                        x2: x + dx,
                        y2: top,
                        color,
                    });
                }
            }
            for trace in chart.traces_on(AxisId::Price) {
                let color = ratatui_color(trace.color);
                let clamp = |v: f64| v.clamp(lo, hi);
                for (i, pair) in trace.points.windows(2).enumerate() {
                    if let [Some(a), Some(b)] = pair {
                        ctx.draw(&CanvasLine {
                            x1: i as f64 + 0.5,
                            y1: clamp(*a),
                            x2: i as f64 + 1.5,
                            y2: clamp(*b),
                            color,
                        });
                    }
                }
            }
        });
    f.render_widget(canvas, area);
}

fn render_secondary(f: &mut Frame, chart: &ChartModel, axis: &SecondaryAxis, area: Rect) {
    let traces: Vec<_> = chart.traces_on(axis.id).collect();
    let data: Vec<Vec<(f64, f64)>> = traces
        .iter()
        .map(|t| {
            t.points
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i as f64 + 0.5, v)))
                .collect()
        })
        .collect();
    let datasets: Vec<Dataset> = traces
        .iter()
        .zip(data.iter())
        .map(|(t, points)| {
            Dataset::default()
                .name(t.name)
                .marker(Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(ratatui_color(t.color)))
                .data(points)
        })
        .collect();

    let y_labels = vec![
        Span::raw(format!("{:.1}", axis.min)),
        Span::raw(format!("{:.1}", (axis.min + axis.max) / 2.0)),
        Span::raw(format!("{:.1}", axis.max)),
    ];
    let widget = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(axis.title))
        .x_axis(Axis::default().bounds([0.0, chart.candles.len() as f64]))
        .y_axis(
            Axis::default()
                .bounds([axis.min, axis.max])
                .labels(y_labels)
                .style(Style::default().fg(Color::DarkGray)),
        );
    f.render_widget(widget, area);
}

fn render_bottom(f: &mut Frame, app: &App, area: Rect) {
    let chunks =
        Layout::horizontal([Constraint::Percentage(35), Constraint::Percentage(65)]).split(area);

    let forecast_text = match app.analysis.as_ref().and_then(|a| a.forecast) {
        Some(fc) => {
            let score = fc
                .r_squared
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.2}%", r * 100.0));
            vec![
                Line::from(format!("Next day ({})", fc.target_date.format("%d-%m-%Y"))),
                Line::from(Span::styled(
                    format!("{:.2}", fc.predicted_close),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!("R² held-out: {}", score)),
                Line::from(Span::styled(
                    "straight line through time, not a model",
                    Style::default().fg(Color::DarkGray),
                )),
            ]
        }
        None => vec![Line::from("Not enough history")],
    };
    f.render_widget(
        Paragraph::new(forecast_text)
            .block(Block::default().borders(Borders::ALL).title("Naive trend")),
        chunks[0],
    );

    let news_lines: Vec<Line> = match app.extras.as_ref().map(|e| e.news.as_deref()) {
        Some(Some(articles)) if !articles.is_empty() => articles
            .iter()
            .map(|a| {
                Line::from(vec![
                    Span::styled("• ", Style::default().fg(Color::DarkGray)),
                    Span::raw(a.title.clone()),
                    Span::styled(format!("  {}", a.url), Style::default().fg(Color::Blue)),
                ])
            })
            .collect(),
        Some(_) => vec![Line::from("No news available right now.")],
        None => vec![Line::from("-")],
    };
    f.render_widget(
        Paragraph::new(news_lines)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("News")),
        chunks[1],
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
