use crate::client::{ExplainClient, ExplanationView};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::FutureExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io;
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;

type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

/// Full-screen view of one explanation: the text on the left, papers found
/// along the way on the right, a status line at the bottom.
pub struct Viewer {
    term: String,
    view: ExplanationView,
    scroll: u16,
    follow: bool,
    tick: usize,
    should_quit: bool,
}

impl Viewer {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            view: ExplanationView::default(),
            scroll: 0,
            follow: true,
            tick: 0,
            should_quit: false,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [body, status] =
            Layout::vertical([Constraint::Min(3), Constraint::Length(1)]).areas(f.area());
        let [explanation, papers] =
            Layout::horizontal([Constraint::Percentage(65), Constraint::Percentage(35)])
                .areas(body);

        self.draw_explanation(f, explanation);
        self.draw_papers(f, papers);
        f.render_widget(Paragraph::new(self.status_line()), status);
        self.tick = self.tick.wrapping_add(1);
    }

    fn draw_explanation(&mut self, f: &mut Frame, area: Rect) {
        let mut lines: Vec<Line> = self
            .view
            .text
            .lines()
            .map(|line| Line::from(line.to_string()))
            .collect();
        for error in &self.view.errors {
            lines.push(Line::from(Span::styled(
                format!("Error: {error}"),
                Style::default().fg(Color::Red),
            )));
        }

        let inner_width = area.width.saturating_sub(2);
        let inner_height = area.height.saturating_sub(2);
        let content_height = wrapped_height(&lines, inner_width);
        let max_scroll = content_height.saturating_sub(inner_height);
        if self.follow {
            self.scroll = max_scroll;
        } else {
            self.scroll = self.scroll.min(max_scroll);
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" {} ", self.term))
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false })
            .scroll((self.scroll, 0));
        f.render_widget(paragraph, area);
    }

    fn draw_papers(&self, f: &mut Frame, area: Rect) {
        let title_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let detail_style = Style::default().fg(Color::Gray);

        let items: Vec<ListItem> = self
            .view
            .tool_results
            .iter()
            .map(|result| {
                let mut lines = result.lines();
                let mut text = Text::from(Line::from(Span::styled(
                    lines.next().unwrap_or_default().to_string(),
                    title_style,
                )));
                for line in lines {
                    text.push_line(Line::from(Span::styled(line.trim().to_string(), detail_style)));
                }
                text.push_line(Line::from(""));
                ListItem::new(text)
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Papers ({}) ", self.view.tool_results.len()))
                .border_style(Style::default().fg(Color::DarkGray)),
        );
        f.render_widget(list, area);
    }

    fn status_line(&self) -> Line<'static> {
        if self.view.is_loading() {
            let spinner = SPINNER[self.tick % SPINNER.len()];
            return Line::from(Span::styled(
                format!(" {spinner} Explaining '{}'... (q to quit)", self.term),
                Style::default().fg(Color::Yellow),
            ));
        }

        let mut status = format!(" Done. {} papers", self.view.tool_results.len());
        if !self.view.errors.is_empty() {
            status.push_str(&format!(", {} errors", self.view.errors.len()));
        }
        status.push_str(". Up/Down to scroll, q to quit");
        Line::from(Span::styled(
            status,
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        ))
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.scroll_up(1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll_down(1),
            KeyCode::PageUp => self.scroll_up(10),
            KeyCode::PageDown => self.scroll_down(10),
            KeyCode::Home => self.scroll_up(u16::MAX),
            KeyCode::End => self.follow = true,
            _ => {}
        }
    }

    fn fail(&mut self, message: String) {
        self.view.errors.push(message);
        self.view.complete = true;
    }

    fn scroll_up(&mut self, lines: u16) {
        self.follow = false;
        self.scroll = self.scroll.saturating_sub(lines);
    }

    fn scroll_down(&mut self, lines: u16) {
        self.follow = false;
        self.scroll = self.scroll.saturating_add(lines);
    }
}

fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

/// Stream an explanation into the full-screen viewer until the user quits.
pub fn run_viewer(client: ExplainClient, term: String) -> UiResult<ExplanationView> {
    let (updates, latest) = watch::channel(ExplanationView::default());
    let request_term = term.clone();
    let mut request = tokio::spawn(async move {
        client
            .explain(&request_term, move |view| {
                updates.send_replace(view.clone());
            })
            .await
    });

    let _guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    let mut viewer = Viewer::new(term);
    let mut finished = false;

    while !viewer.should_quit {
        if !finished {
            viewer.view = latest.borrow().clone();
            if let Some(outcome) = (&mut request).now_or_never() {
                finished = true;
                match outcome {
                    Ok(Ok(view)) => viewer.view = view,
                    Ok(Err(e)) => viewer.fail(e.to_string()),
                    Err(e) => viewer.fail(e.to_string()),
                }
            }
        }

        terminal.draw(|f| viewer.draw(f))?;

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            viewer.handle_key(key);
        }
    }

    request.abort();
    terminal.show_cursor()?;
    Ok(viewer.view)
}

/// Writes the explanation to stdout as it streams, for pipes and dumb
/// terminals.
#[derive(Debug, Default)]
pub struct PlainPrinter {
    text_written: usize,
    results_written: usize,
    errors_written: usize,
}

impl PlainPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, view: &ExplanationView, out: &mut impl Write) -> io::Result<()> {
        if view.text.len() > self.text_written {
            out.write_all(view.text[self.text_written..].as_bytes())?;
            self.text_written = view.text.len();
        }
        for result in &view.tool_results[self.results_written..] {
            let title = result.lines().next().unwrap_or_default();
            writeln!(out, "\n[paper] {title}")?;
        }
        self.results_written = view.tool_results.len();
        for error in &view.errors[self.errors_written..] {
            writeln!(out, "\n[error] {error}")?;
        }
        self.errors_written = view.errors.len();
        if view.complete {
            writeln!(out)?;
        }
        out.flush()
    }
}
