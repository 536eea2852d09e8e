//! Terminal output for fleetmon.
//!
//! Two renderers share the same [`Table`] model:
//!
//! - [`run`]: interactive dashboard using `ratatui` on the alternate screen
//! - [`run_headless`]: plain table printed to stdout each refresh, with
//!   colors and screen clearing only when stdout is a terminal
//!
//! # Controls
//!
//! - `q`, `Esc` or `Ctrl+C`: Quit

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::{
    cursor::MoveTo,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    style::Stylize,
    terminal::{
        disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
    ExecutableCommand, QueueableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame, Terminal,
};

use crate::app::App;
use crate::report::{Segment, Table};
use crate::thresholds::Severity;

/// Run the TUI event loop.
///
/// This takes ownership of the App, running until the user presses `q` or
/// `Esc`, or the `running` flag is set to false.
pub fn run(mut app: App, running: Arc<AtomicBool>, interval: Duration) -> io::Result<()> {
    enable_raw_mode()?;
    if let Err(e) = io::stdout().execute(EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(e);
    }

    let result = run_tui_loop(&mut app, &running, interval);

    // Always clean up terminal state
    let _ = disable_raw_mode();
    let _ = io::stdout().execute(LeaveAlternateScreen);

    result
}

/// Inner TUI loop - separated to ensure cleanup happens on any exit path.
fn run_tui_loop(app: &mut App, running: &AtomicBool, interval: Duration) -> io::Result<()> {
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let mut table = app.refresh();
    let mut last_refresh = Instant::now();

    while running.load(Ordering::Relaxed) {
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::Relaxed);
                        }
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            running.store(false, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_refresh.elapsed() >= interval {
            table = app.refresh();
            last_refresh = Instant::now();
        }

        terminal.draw(|f| draw_ui(f, &table, app.store.hosts().len(), interval))?;
    }

    Ok(())
}

fn severity_style(severity: Severity) -> Style {
    match severity {
        Severity::Critical => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Severity::Warning => Style::default().fg(Color::Yellow),
        Severity::Normal => Style::default().fg(Color::White),
    }
}

fn to_line(segments: &[Segment]) -> Line<'static> {
    Line::from(
        segments
            .iter()
            .map(|s| Span::styled(s.text.clone(), severity_style(s.severity)))
            .collect::<Vec<_>>(),
    )
}

fn draw_ui(f: &mut Frame, table: &Table, hosts: usize, interval: Duration) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(5)])
        .split(f.area());

    draw_status_bar(f, hosts, interval, chunks[0]);
    draw_table(f, table, chunks[1]);
}

fn draw_status_bar(f: &mut Frame, hosts: usize, interval: Duration, area: Rect) {
    let text = format!(
        " fleetmon | {} | {hosts} host(s) | refresh every {}s | q to quit",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        interval.as_secs(),
    );
    let status = Paragraph::new(text)
        .style(Style::default().fg(Color::White).bg(Color::DarkGray))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );
    f.render_widget(status, area);
}

fn draw_table(f: &mut Frame, table: &Table, area: Rect) {
    let lines: Vec<Line> = table.lines().iter().map(|l| to_line(l)).collect();
    let widget = Paragraph::new(lines).block(
        Block::default()
            .title(" Hosts ")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    f.render_widget(widget, area);
}

/// Render a line for a plain stream, colored when `colored` is set.
fn plain_line(segments: &[Segment], colored: bool) -> String {
    segments
        .iter()
        .map(|s| match (colored, s.severity) {
            (true, Severity::Critical) => s.text.as_str().red().bold().to_string(),
            (true, Severity::Warning) => s.text.as_str().yellow().to_string(),
            _ => s.text.clone(),
        })
        .collect()
}

/// Run in headless mode, printing the table every `interval`.
///
/// On a terminal the screen is cleared before each refresh; otherwise the
/// refreshes are appended to the output without escape codes.
pub fn run_headless(
    mut app: App,
    running: Arc<AtomicBool>,
    interval: Duration,
    terminal: bool,
) -> io::Result<()> {
    let mut stdout = io::stdout();

    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        let table = app.refresh();

        if terminal {
            stdout.queue(Clear(ClearType::All))?.queue(MoveTo(0, 0))?;
        }
        for line in table.lines() {
            writeln!(stdout, "{}", plain_line(&line, terminal))?;
        }
        if !terminal {
            writeln!(stdout)?;
        }
        stdout.flush()?;

        while running.load(Ordering::Relaxed) && started.elapsed() < interval {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    Ok(())
}
