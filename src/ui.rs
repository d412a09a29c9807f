use crate::aggregator::SummaryRow;
use crate::error::Result as ReportResult;
use crate::temporal::MonthSelection;
use crate::wizard::{ReportAction, ReportWizard};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, ListState, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

/// What the form calls when the user previews or generates
pub trait ReportBackend {
    fn preview(&self, wizard: &ReportWizard) -> ReportResult<Vec<SummaryRow>>;
    fn generate(&self, wizard: &ReportWizard) -> ReportResult<ReportAction>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Year,
    Month,
    Preview,
}

impl Focus {
    pub fn next(&self) -> Self {
        match self {
            Focus::Year => Focus::Month,
            Focus::Month => Focus::Preview,
            Focus::Preview => Focus::Year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Info(String),
    Error(String),
}

pub struct App {
    pub years: Vec<i32>,
    pub months: Vec<MonthSelection>,
    pub year_state: ListState,
    pub month_state: ListState,
    pub focus: Focus,
    pub preview: Vec<SummaryRow>,
    pub preview_state: TableState,
    pub status: Status,
}

impl App {
    /// Form over `years`, preselecting `initial` when it is one of them
    pub fn new(years: Vec<i32>, initial: ReportWizard) -> Self {
        let months = MonthSelection::choices();

        let mut year_state = ListState::default();
        let year_index = years
            .iter()
            .position(|y| *y == initial.year)
            .unwrap_or(years.len().saturating_sub(1));
        if !years.is_empty() {
            year_state.select(Some(year_index));
        }

        let mut month_state = ListState::default();
        month_state.select(months.iter().position(|m| *m == initial.month).or(Some(0)));

        Self {
            years,
            months,
            year_state,
            month_state,
            focus: Focus::Year,
            preview: Vec::new(),
            preview_state: TableState::default(),
            status: Status::Idle,
        }
    }

    /// Current form values; `None` when no year is selectable
    pub fn wizard(&self) -> Option<ReportWizard> {
        let year = *self.years.get(self.year_state.selected()?)?;
        let month = self
            .month_state
            .selected()
            .and_then(|i| self.months.get(i))
            .copied()
            .unwrap_or(MonthSelection::All);
        Some(ReportWizard::new(year, month))
    }

    pub fn next(&mut self) {
        match self.focus {
            Focus::Year => step(&mut self.year_state, self.years.len(), 1),
            Focus::Month => step(&mut self.month_state, self.months.len(), 1),
            Focus::Preview => step_table(&mut self.preview_state, self.preview.len(), 1),
        }
    }

    pub fn previous(&mut self) {
        match self.focus {
            Focus::Year => step(&mut self.year_state, self.years.len(), -1),
            Focus::Month => step(&mut self.month_state, self.months.len(), -1),
            Focus::Preview => step_table(&mut self.preview_state, self.preview.len(), -1),
        }
    }

    pub fn toggle_focus(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn load_preview(&mut self, backend: &dyn ReportBackend) {
        let Some(wizard) = self.wizard() else {
            self.status = Status::Error("No selectable year".to_string());
            return;
        };

        match backend.preview(&wizard) {
            Ok(rows) => {
                self.status = Status::Info(format!(
                    "{} rows for {} {}",
                    rows.len(),
                    wizard.month,
                    wizard.year
                ));
                self.preview_state.select(if rows.is_empty() { None } else { Some(0) });
                self.preview = rows;
            }
            Err(e) => self.status = Status::Error(e.to_string()),
        }
    }

    pub fn generate(&mut self, backend: &dyn ReportBackend) {
        let Some(wizard) = self.wizard() else {
            self.status = Status::Error("No selectable year".to_string());
            return;
        };

        self.status = match backend.generate(&wizard) {
            Ok(action) => Status::Info(format!(
                "Saved {} ({} rows) -> {}",
                action.attachment.file_name, action.row_count, action.url
            )),
            Err(e) => Status::Error(e.to_string()),
        };
    }
}

fn step(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).rem_euclid(len as isize) as usize;
    state.select(Some(next));
}

fn step_table(state: &mut TableState, len: usize, delta: isize) {
    if len == 0 {
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1) as usize;
    state.select(Some(next));
}

pub fn run_ui(app: &mut App, backend: &dyn ReportBackend) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend_term = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend_term)?;

    // Run the app
    let res = run_app(&mut terminal, app, backend);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    backend: &dyn ReportBackend,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => app.toggle_focus(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::Char('p') => app.load_preview(backend),
                KeyCode::Enter | KeyCode::Char('g') => app.generate(backend),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Form + preview
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(14), // Year
            Constraint::Length(18), // Month
            Constraint::Min(0),     // Preview
        ])
        .split(chunks[0]);

    render_years(f, body[0], app);
    render_months(f, body[1], app);
    render_preview(f, body[2], app);
    render_status_bar(f, chunks[1], app);
}

fn focus_border(app: &App, focus: Focus) -> Style {
    if app.focus == focus {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    }
}

fn highlight() -> Style {
    Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD)
}

fn render_years(f: &mut Frame, area: Rect, app: &mut App) {
    let items: Vec<ListItem> = app
        .years
        .iter()
        .map(|y| ListItem::new(y.to_string()))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(focus_border(app, Focus::Year))
                .title(" Year "),
        )
        .highlight_style(highlight())
        .highlight_symbol("→ ");

    f.render_stateful_widget(list, area, &mut app.year_state);
}

fn render_months(f: &mut Frame, area: Rect, app: &mut App) {
    let items: Vec<ListItem> = app
        .months
        .iter()
        .map(|m| ListItem::new(m.label()))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(focus_border(app, Focus::Month))
                .title(" Month "),
        )
        .highlight_style(highlight())
        .highlight_symbol("→ ");

    f.render_stateful_widget(list, area, &mut app.month_state);
}

fn render_preview(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Month", "Stage", "Leads", "Sales Persons", "Sales Teams"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.preview.iter().map(|row| {
        Row::new(vec![
            Cell::from(row.month_label().to_string()),
            Cell::from(truncate(&row.stage_name, 24)),
            Cell::from(row.lead_count.to_string()).style(Style::default().fg(Color::Green)),
            Cell::from(truncate(&row.sales_persons, 30)),
            Cell::from(truncate(&row.sales_teams, 30)),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(26),
            Constraint::Length(7),
            Constraint::Length(32),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(focus_border(app, Focus::Preview))
            .title(" Stage Summary "),
    )
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.preview_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = match &app.status {
        Status::Idle => vec![Span::styled(" Ready ", Style::default().fg(Color::Cyan))],
        Status::Info(msg) => {
            vec![Span::styled(format!(" {} ", msg), Style::default().fg(Color::Green))]
        }
        Status::Error(msg) => {
            vec![Span::styled(format!(" {} ", msg), Style::default().fg(Color::Red))]
        }
    };

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Field | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Select | "));
    status_spans.push(Span::styled("p", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Preview | "));
    status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Generate | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
