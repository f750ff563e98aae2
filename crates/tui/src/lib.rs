use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use sqlpanel_adapters::channel::{ChannelSender, PanelTransport, Subscription};
use sqlpanel_adapters::TransportError;
use sqlpanel_core::channel::MessageChannel;
use sqlpanel_core::config::PanelConfig;
use sqlpanel_core::messages::Envelope;
use sqlpanel_core::pagination::PageRequest;
use sqlpanel_core::panel::{Panel, PanelPhase};
use sqlpanel_core::registry::Tab;
use sqlpanel_core::result_set::QueryResult;
use sqlpanel_core::state::{PanelState, PersistenceSlot};
use thiserror::Error;
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(120);
const ERROR_HEADLINE: &str = "Query errored. Check the logs.";
const COLUMN_SEPARATOR: &str = " | ";

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextTab,
    PreviousTab,
    NextPage,
    PreviousPage,
    ScrollUp,
    ScrollDown,
    Host(Envelope),
    HostClosed,
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageDirection {
    Next,
    Previous,
}

#[derive(Debug)]
struct TuiApp<C, S> {
    panel: Panel<C, S>,
    show_help: bool,
    should_quit: bool,
    host_closed: bool,
    row_offset: usize,
    status_line: String,
}

impl<C: MessageChannel, S: PersistenceSlot> TuiApp<C, S> {
    fn new(mut panel: Panel<C, S>) -> Self {
        panel.mount();
        Self {
            panel,
            show_help: false,
            should_quit: false,
            host_closed: false,
            row_offset: 0,
            status_line: "Waiting for results from the host".to_string(),
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextTab => self.cycle_tab(true),
            Msg::PreviousTab => self.cycle_tab(false),
            Msg::NextPage => self.change_page(PageDirection::Next),
            Msg::PreviousPage => self.change_page(PageDirection::Previous),
            Msg::ScrollUp => self.row_offset = self.row_offset.saturating_sub(1),
            Msg::ScrollDown => {
                let row_count = self.panel.active_result().map_or(0, |result| result.rows.len());
                self.row_offset = (self.row_offset + 1).min(row_count.saturating_sub(1));
            }
            Msg::Host(envelope) => {
                let generation = self.panel.state().generation;
                let order_before = self.panel.state().query_order.clone();
                self.panel.handle_envelope(envelope);
                let state = self.panel.state();
                if state.query_order != order_before || state.generation != generation {
                    self.row_offset = 0;
                }
                self.status_line = status_for_phase(self.panel.phase()).to_string();
            }
            Msg::HostClosed => {
                if !self.host_closed {
                    self.host_closed = true;
                    self.status_line = "Host disconnected".to_string();
                    info!("host closed the panel channel");
                }
            }
            Msg::Tick => {
                if self.panel.poll_timeout(Instant::now()) {
                    self.status_line = "Page request timed out".to_string();
                }
            }
        }
    }

    fn cycle_tab(&mut self, forward: bool) {
        let state = self.panel.state();
        if !state.shows_tabs() {
            self.status_line = "Only one result set is open".to_string();
            return;
        }

        let count = state.query_order.len();
        let current = state.active_index.unwrap_or(0).min(count - 1);
        let index = if forward {
            (current + 1) % count
        } else {
            (current + count - 1) % count
        };

        self.panel.toggle(index);
        self.row_offset = 0;
        if let Some(tab) = self.panel.tabs().get(index) {
            self.status_line = format!("Showing `{}`", tab.label);
        }
    }

    fn change_page(&mut self, direction: PageDirection) {
        let state = self.panel.state();
        if state.loading {
            self.status_line = "Still waiting for the previous page".to_string();
            return;
        }

        let Some(result) = state.active_result() else {
            self.status_line = "No result set to page through".to_string();
            return;
        };

        let request = match direction {
            PageDirection::Next => PageRequest::next_for(result, state.page_size),
            PageDirection::Previous => PageRequest::previous_for(result, state.page_size),
        };
        let Some(request) = request else {
            self.status_line = match direction {
                PageDirection::Next => "Already on the last page",
                PageDirection::Previous => "Already on the first page",
            }
            .to_string();
            return;
        };

        let page = request.page;
        if self.panel.request_page(&request) {
            debug!(page, "page change requested");
            self.status_line = format!("Loading page {}", page.saturating_add(1));
        }
    }
}

fn status_for_phase(phase: PanelPhase) -> &'static str {
    match phase {
        PanelPhase::Uninitialized => "Starting",
        PanelPhase::Loading => "Loading...",
        PanelPhase::Ready => "Ready",
        PanelPhase::Errored => "Errored",
    }
}

/// Runs the terminal panel on `transport` until the user quits. The caller
/// must keep the transport's runtime alive on other threads.
pub fn run<S: PersistenceSlot>(
    transport: &PanelTransport,
    slot: S,
    config: &PanelConfig,
) -> Result<(), TuiError> {
    let mut subscription = transport.subscribe()?;
    let panel = Panel::new(transport.sender(), slot, config);
    let mut app = TuiApp::new(panel);

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app, &mut subscription);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<S: PersistenceSlot>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp<ChannelSender, S>,
    subscription: &mut Subscription,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        drain_inbound(app, subscription)?;
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn drain_inbound<C: MessageChannel, S: PersistenceSlot>(
    app: &mut TuiApp<C, S>,
    subscription: &mut Subscription,
) -> Result<(), TuiError> {
    if app.host_closed {
        return Ok(());
    }

    loop {
        match subscription.try_recv() {
            Ok(Some(envelope)) => app.handle(Msg::Host(envelope)),
            Ok(None) => return Ok(()),
            Err(TransportError::Closed) => {
                app.handle(Msg::HostClosed);
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        }
    }
}

fn render<C: MessageChannel, S: PersistenceSlot>(frame: &mut Frame<'_>, app: &TuiApp<C, S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let state = app.panel.state();
    let phase = app.panel.phase();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", status_for_phase(phase)),
            Style::default()
                .fg(phase_color(phase))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "Connection: {}",
            state.connection_id.as_deref().unwrap_or("-")
        )),
        Span::raw(" | "),
        Span::raw(format!("Result sets: {}", state.query_order.len())),
        Span::raw(" | "),
        Span::raw(format!(
            "Host: {}",
            if app.host_closed { "closed" } else { "connected" }
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Query Results"));
    frame.render_widget(header, chunks[0]);

    let visible_rows = usize::from(chunks[1].height.saturating_sub(2)).max(1);
    let tabs = app.panel.tabs();
    let body = Paragraph::new(body_lines(state, &tabs, app.row_offset, visible_rows))
        .block(Block::default().borders(Borders::ALL).title("Results"))
        .alignment(Alignment::Left);
    frame.render_widget(body, chunks[1]);

    let footer = Paragraph::new(vec![
        Line::from(page_summary(state)),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("h/l tabs | n/p pages | ? help | q quit"),
    );
    frame.render_widget(footer, chunks[2]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn phase_color(phase: PanelPhase) -> Color {
    match phase {
        PanelPhase::Uninitialized | PanelPhase::Loading => Color::Yellow,
        PanelPhase::Ready => Color::Green,
        PanelPhase::Errored => Color::Red,
    }
}

fn body_lines(
    state: &PanelState,
    tabs: &[Tab<'_>],
    row_offset: usize,
    visible_rows: usize,
) -> Vec<Line<'static>> {
    if let Some(error) = &state.error {
        return error_lines(error);
    }

    let mut lines = Vec::new();
    if state.shows_tabs() {
        lines.push(tab_strip(tabs));
        lines.push(Line::from(""));
    }

    let Some(result) = state.active_result() else {
        lines.push(Line::from(if state.loading {
            "Loading..."
        } else {
            "No results"
        }));
        return lines;
    };

    if let Some(message) = result.error_message() {
        lines.extend(error_lines(&message));
        return lines;
    }

    lines.extend(result_lines(result, row_offset, visible_rows));
    lines
}

fn error_lines(message: &str) -> Vec<Line<'static>> {
    vec![
        Line::from(Span::styled(
            ERROR_HEADLINE,
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(message.to_string()),
    ]
}

fn tab_strip(tabs: &[Tab<'_>]) -> Line<'static> {
    let mut spans = Vec::new();
    for tab in tabs {
        let style = if tab.active {
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default()
        };
        if tab.index > 0 {
            spans.push(Span::raw(COLUMN_SEPARATOR));
        }
        spans.push(Span::styled(format!(" {} ", tab.label), style));
    }
    Line::from(spans)
}

fn result_lines(result: &QueryResult, row_offset: usize, visible_rows: usize) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        result.columns.join(COLUMN_SEPARATOR),
        Style::default().add_modifier(Modifier::BOLD),
    ))];

    let end = (row_offset + visible_rows).min(result.rows.len());
    for row_index in row_offset.min(end)..end {
        let cells = result
            .columns
            .iter()
            .map(|column| result.cell_text(row_index, column).unwrap_or_default())
            .collect::<Vec<_>>();
        lines.push(Line::from(cells.join(COLUMN_SEPARATOR)));
    }

    if result.rows.is_empty() {
        lines.push(Line::from("No rows"));
    }
    for message in &result.messages {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}

fn page_summary(state: &PanelState) -> String {
    let Some(result) = state.active_result() else {
        return "No active result".to_string();
    };

    let page = result.page.unwrap_or(0);
    let page_size = result.page_size.unwrap_or(state.page_size).max(1);
    let rows = result.rows.len();
    match result.total {
        Some(total) => format!(
            "Page {} of {} | {rows} rows shown of {total}",
            page.saturating_add(1),
            total.div_ceil(page_size).max(1)
        ),
        None => format!("Page {} | {rows} rows shown", page.saturating_add(1)),
    }
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(60, 50, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Keymap"),
        Line::from("q: quit"),
        Line::from("?: toggle help"),
        Line::from("Tab / l / Right: next result set"),
        Line::from("Shift+Tab / h / Left: previous result set"),
        Line::from("n / PageDown: next page"),
        Line::from("p / PageUp: previous page"),
        Line::from("j / k / arrows: scroll rows"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Tab | KeyCode::Right | KeyCode::Char('l')) => Some(Msg::NextTab),
        (_, KeyCode::BackTab | KeyCode::Left | KeyCode::Char('h')) => Some(Msg::PreviousTab),
        (_, KeyCode::PageDown | KeyCode::Char('n')) => Some(Msg::NextPage),
        (_, KeyCode::PageUp | KeyCode::Char('p')) => Some(Msg::PreviousPage),
        (_, KeyCode::Up | KeyCode::Char('k')) => Some(Msg::ScrollUp),
        (_, KeyCode::Down | KeyCode::Char('j')) => Some(Msg::ScrollDown),
        _ => None,
    }
}
