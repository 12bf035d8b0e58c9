use crate::chat::{Message, Role, ToolCall, ToolCallStatus};
use crate::client::AgUiClient;
use crate::error::SessionError;
use crate::session::{ChatView, Session};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::collections::HashSet;
use std::io;
use std::io::Write;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INPUT_HEIGHT: u16 = 6;
const ARGS_PREVIEW: usize = 200;
const RESULT_PREVIEW: usize = 300;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

#[derive(Debug)]
pub enum Command {
    Submit(String),
    Reset,
}

/// Spawns the task that owns the [`Session`] and runs its exchanges.
///
/// The UI talks to it through `Command`s and reads the latest snapshot from
/// the returned watch channel.
pub fn spawn_controller(
    client: AgUiClient,
    cancel: CancellationToken,
) -> (mpsc::Sender<Command>, watch::Receiver<ChatView>, JoinHandle<()>) {
    let (commands, receiver) = mpsc::channel(8);
    let session = Session::new();
    let (views, updates) = watch::channel(session.view());
    let handle = tokio::spawn(run_controller(session, client, receiver, views, cancel));
    (commands, updates, handle)
}

async fn run_controller(
    mut session: Session,
    client: AgUiClient,
    mut commands: mpsc::Receiver<Command>,
    views: watch::Sender<ChatView>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            break;
        };

        match command {
            Command::Submit(prompt) => {
                let result = session
                    .run_exchange(&client, &prompt, &cancel, |s| {
                        views.send_replace(s.view());
                    })
                    .await;
                views.send_replace(session.view());
                match result {
                    Ok(_) | Err(SessionError::Transport(_)) => {}
                    Err(err) => tracing::warn!(error = %err, "submission rejected"),
                }
            }
            Command::Reset => match session.reset() {
                Ok(()) => {
                    views.send_replace(session.view());
                }
                Err(err) => tracing::warn!(error = %err, "reset rejected"),
            },
        }
    }
    tracing::debug!("session controller stopped");
}

fn message_lines(message: &Message) -> Vec<Line<'static>> {
    let (label, color) = match message.role {
        Role::User => ("You", Color::Blue),
        Role::Assistant => ("Assistant", Color::Yellow),
    };
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);

    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{label}:"), header_style),
        Span::styled(
            format!(" {}", message.timestamp.format("%H:%M")),
            Style::default().fg(Color::DarkGray),
        ),
    ])];
    for line in message.content.lines() {
        lines.push(Line::from(Span::styled(format!("  {line}"), body_style)));
    }
    lines.push(Line::default());
    lines
}

fn tool_call_lines(call: &ToolCall, selected: bool, expanded: bool) -> Vec<Line<'static>> {
    let (marker, color) = match call.status {
        ToolCallStatus::Calling => ("…", Color::Green),
        ToolCallStatus::Completed => ("✓", Color::Cyan),
    };
    let mut header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    if selected {
        header_style = header_style.add_modifier(Modifier::REVERSED);
    }
    let arrow = if expanded { "▾" } else { "▸" };

    let mut lines = vec![Line::from(Span::styled(
        format!("{arrow} {marker} {}", call.name),
        header_style,
    ))];
    if expanded {
        let body_style = Style::default().fg(color);
        lines.push(Line::from(Span::styled("  args:", body_style)));
        for line in truncate(&call.args, ARGS_PREVIEW, "...").lines() {
            lines.push(Line::from(Span::styled(format!("    {line}"), body_style)));
        }
        if let Some(result) = &call.result {
            lines.push(Line::from(Span::styled("  result:", body_style)));
            for line in truncate(result, RESULT_PREVIEW, "...\n[output truncated]").lines() {
                lines.push(Line::from(Span::styled(format!("    {line}"), body_style)));
            }
        }
    }
    lines
}

// Rows a set of lines occupies once wrapped to `width` columns.
fn wrapped_height(lines: &[Line<'_>], width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let rows: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    u16::try_from(rows).unwrap_or(u16::MAX)
}

fn truncate(value: &str, max: usize, suffix: &str) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => format!("{}{}", &value[..end], suffix),
        None => value.to_string(),
    }
}

struct InputBuffer {
    lines: Vec<String>,
    // Cursor column counted in chars, not bytes.
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn byte_offset(&self) -> usize {
        let line = &self.lines[self.cursor_y];
        line.char_indices()
            .nth(self.cursor_x)
            .map_or(line.len(), |(i, _)| i)
    }

    fn insert_char(&mut self, c: char) {
        let offset = self.byte_offset();
        self.lines[self.cursor_y].insert(offset, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let offset = self.byte_offset();
            self.lines[self.cursor_y].remove(offset);
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let offset = self.byte_offset();
        let remaining = self.lines[self.cursor_y].split_off(offset);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn home(&mut self) {
        self.cursor_x = 0;
    }

    fn end(&mut self) {
        self.cursor_x = self.line_len(self.cursor_y);
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.lines.iter().all(String::is_empty) {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

pub struct App {
    view: ChatView,
    updates: watch::Receiver<ChatView>,
    commands: mpsc::Sender<Command>,
    input: InputBuffer,
    expanded: HashSet<String>,
    selected: Option<usize>,
    // Exchange count at the time of an unanswered submission.
    pending: Option<u64>,
    should_quit: bool,
}

impl App {
    pub fn new(commands: mpsc::Sender<Command>, updates: watch::Receiver<ChatView>) -> Self {
        let view = updates.borrow().clone();
        Self {
            view,
            updates,
            commands,
            input: InputBuffer::new(),
            expanded: HashSet::new(),
            selected: None,
            pending: None,
            should_quit: false,
        }
    }

    fn busy(&self) -> bool {
        self.view.is_loading || self.pending.is_some()
    }

    fn refresh(&mut self) {
        if !self.updates.has_changed().unwrap_or(false) {
            return;
        }
        self.view = self.updates.borrow_and_update().clone();

        if let Some(seen) = self.pending {
            if self.view.exchanges > seen {
                self.pending = None;
            }
        }

        let ids: HashSet<&str> = self.view.tool_calls.iter().map(|c| c.id.as_str()).collect();
        self.expanded.retain(|id| ids.contains(id.as_str()));
        self.selected = match self.view.tool_calls.len() {
            0 => None,
            n => self.selected.map(|i| i.min(n - 1)),
        };
    }

    fn submit(&mut self) {
        if self.busy() || self.input.is_blank() {
            return;
        }
        let prompt = self.input.text();
        match self.commands.try_send(Command::Submit(prompt)) {
            Ok(()) => {
                self.pending = Some(self.view.exchanges);
                self.input.clear();
            }
            Err(err) => tracing::warn!(error = %err, "could not hand prompt to the session"),
        }
    }

    fn reset(&mut self) {
        if self.busy() {
            return;
        }
        if let Err(err) = self.commands.try_send(Command::Reset) {
            tracing::warn!(error = %err, "could not reset the session");
        }
        self.expanded.clear();
        self.selected = None;
    }

    fn select_next(&mut self, forward: bool) {
        let count = self.view.tool_calls.len();
        if count == 0 {
            self.selected = None;
            return;
        }
        self.selected = Some(match (self.selected, forward) {
            (None, true) => 0,
            (None, false) => count - 1,
            (Some(i), true) => (i + 1) % count,
            (Some(i), false) => (i + count - 1) % count,
        });
    }

    fn toggle_selected(&mut self) {
        let Some(call) = self.selected.and_then(|i| self.view.tool_calls.get(i)) else {
            return;
        };
        if !self.expanded.remove(&call.id) {
            self.expanded.insert(call.id.clone());
        }
    }

    fn draw(&self, f: &mut Frame) {
        let [header, body, input] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(INPUT_HEIGHT),
        ])
        .areas(f.area());

        self.draw_header(f, header);

        if self.view.tool_calls.is_empty() {
            self.draw_transcript(f, body);
        } else {
            let [transcript, tools] =
                Layout::horizontal([Constraint::Percentage(65), Constraint::Percentage(35)])
                    .areas(body);
            self.draw_transcript(f, transcript);
            self.draw_tool_calls(f, tools);
        }

        self.draw_input(f, input);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let status_color = match self.view.status.as_str() {
            "online" => Color::Green,
            "error" => Color::Red,
            _ => Color::Yellow,
        };
        let mut spans = vec![
            Span::styled(" agui-chat ", Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(
                format!("● {}", self.view.status),
                Style::default().fg(status_color),
            ),
        ];
        if self.busy() {
            spans.push(Span::styled(
                "  [Thinking...]",
                Style::default().fg(Color::DarkGray),
            ));
        }
        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_transcript(&self, f: &mut Frame, area: Rect) {
        let lines: Vec<Line<'static>> =
            self.view.messages.iter().flat_map(message_lines).collect();
        let inner_height = area.height.saturating_sub(2);
        let scroll =
            wrapped_height(&lines, area.width.saturating_sub(2)).saturating_sub(inner_height);

        let paragraph = Paragraph::new(Text::from(lines))
            .block(Block::default().borders(Borders::ALL).title(" Conversation "))
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));
        f.render_widget(paragraph, area);
    }

    fn draw_tool_calls(&self, f: &mut Frame, area: Rect) {
        let lines: Vec<Line<'static>> = self
            .view
            .tool_calls
            .iter()
            .enumerate()
            .flat_map(|(i, call)| {
                tool_call_lines(call, self.selected == Some(i), self.expanded.contains(&call.id))
            })
            .collect();

        let paragraph = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Tools (Tab select, Ctrl+E expand) "),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);
    }

    fn draw_input(&self, f: &mut Frame, area: Rect) {
        let paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Input (Enter to send, Ctrl+R reset, Esc to quit) ")
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(paragraph, area);

        let cursor_x = u16::try_from(self.input.cursor_x + 1).unwrap_or(u16::MAX);
        let cursor_y = u16::try_from(self.input.cursor_y).unwrap_or(u16::MAX);
        let x = area.x.saturating_add(cursor_x).min(area.x + area.width.saturating_sub(2));
        let y = (area.y + 1).saturating_add(cursor_y).min(area.y + area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn handle_events(&mut self) -> io::Result<()> {
        self.refresh();

        if !event::poll(Duration::from_millis(50))? {
            return Ok(());
        }
        let Event::Key(key) = event::read()? else {
            return Ok(());
        };
        if key.kind != KeyEventKind::Press {
            return Ok(());
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('r') if ctrl => self.reset(),
            KeyCode::Char('e') if ctrl => self.toggle_selected(),
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => self.input.new_line(),
            KeyCode::Enter => self.submit(),
            KeyCode::Tab => self.select_next(true),
            KeyCode::BackTab => self.select_next(false),
            KeyCode::Char(c) => self.input.insert_char(c),
            KeyCode::Backspace => self.input.delete_char(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Up => self.input.move_up(),
            KeyCode::Down => self.input.move_down(),
            KeyCode::Home => self.input.home(),
            KeyCode::End => self.input.end(),
            _ => {}
        }
        Ok(())
    }
}

/// Runs the interactive chat until the user quits. Blocks the calling thread.
pub fn run_tui(client: AgUiClient) -> io::Result<()> {
    let cancel = CancellationToken::new();
    let (commands, updates, _controller) = spawn_controller(client, cancel.clone());

    enable_raw_mode()?;
    let _guard = TerminalGuard;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(commands, updates);
    while !app.should_quit {
        terminal.draw(|f| app.draw(f))?;
        app.handle_events()?;
    }

    cancel.cancel();
    Ok(())
}
