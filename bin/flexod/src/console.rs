//! ---
//! flx_section: "12-operator-console"
//! flx_subsection: "binary"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Terminal operator console bound to the function keys."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! Runs on a blocking thread: it reads the session snapshot from the watch
//! channel, drains session events for the status line, and sends operator
//! input with `blocking_send`.

use std::io;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use flexo_core::{
    Command, CommandKind, ConfirmationKind, FinishRequest, OperatorInput, PrepStatus,
    SessionEvent, SessionView, SlotView, SpeedStatus,
};
use flexo_msg::Order;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Gauge, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use tokio::sync::{broadcast, mpsc, watch};

const POLL: Duration = Duration::from_millis(100);

enum InputMode {
    Normal,
    StopReason {
        text: String,
    },
    FinishForm {
        good: String,
        defect: String,
        operator: String,
        field: usize,
    },
    OperatorForm {
        operator: String,
        shift: String,
        field: usize,
    },
}

struct Status {
    text: String,
    error: bool,
}

pub struct ConsoleUi {
    title: String,
    view: watch::Receiver<SessionView>,
    events: broadcast::Receiver<SessionEvent>,
    inputs: mpsc::Sender<OperatorInput>,
    mode: InputMode,
    status: Option<Status>,
    detail: Option<Order>,
}

impl ConsoleUi {
    pub fn new(
        title: String,
        view: watch::Receiver<SessionView>,
        events: broadcast::Receiver<SessionEvent>,
        inputs: mpsc::Sender<OperatorInput>,
    ) -> Self {
        Self {
            title,
            view,
            events,
            inputs,
            mode: InputMode::Normal,
            status: None,
            detail: None,
        }
    }

    /// False once the session loop is gone.
    fn send(&self, input: impl Into<OperatorInput>) -> bool {
        self.inputs.blocking_send(input.into()).is_ok()
    }

    fn info(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            error: false,
        });
    }

    fn error(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            error: true,
        });
    }

    fn drain_events(&mut self, view: &SessionView) {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            };
            match event {
                SessionEvent::CommandRejected { command, reason } => {
                    self.error(format!("{command}: {reason}"))
                }
                SessionEvent::InputRejected { reason } => self.error(reason),
                SessionEvent::ConnectivityChanged { connected: false } => {
                    self.error("telemetry source unreachable")
                }
                SessionEvent::ConnectivityChanged { connected: true } => {
                    self.info("telemetry source connected")
                }
                SessionEvent::FinishConfirmationOpened { defaults } => {
                    self.mode = InputMode::FinishForm {
                        good: defaults.good_qty.unwrap_or_default().to_string(),
                        defect: defaults.defect_qty.to_string(),
                        operator: defaults.operator.unwrap_or_default(),
                        field: 0,
                    };
                }
                SessionEvent::OperatorSwitchRequested => {
                    self.mode = InputMode::OperatorForm {
                        operator: view.operator.clone(),
                        shift: view.shift.clone(),
                        field: 0,
                    };
                }
                SessionEvent::OrderDetail { order } => self.detail = Some(order),
                SessionEvent::OrderStarted { order } => {
                    self.info(format!("running {} (target {})", order.order_no, order.target_qty))
                }
                SessionEvent::OrderFinished { record } => {
                    if matches!(self.mode, InputMode::FinishForm { .. }) {
                        self.mode = InputMode::Normal;
                    }
                    self.info(format!(
                        "finished {}: {} good, {} defect, OEE {}%",
                        record.order_no, record.good_qty, record.defect_qty, record.oee
                    ));
                }
                SessionEvent::OrderReturned { returned, .. } => {
                    self.info(format!("{} returned to the queue", returned.order_no))
                }
                SessionEvent::StopRecorded { stop } => self.info(format!(
                    "stop recorded: {} ({}s)",
                    stop.reason_label, stop.duration_seconds
                )),
                SessionEvent::AutoNextChanged { enabled } => {
                    self.info(format!("auto-next {}", if enabled { "on" } else { "off" }))
                }
                SessionEvent::OperatorChanged { operator, shift } => {
                    self.info(format!("{operator} on {shift} shift"))
                }
                SessionEvent::QuantityAdjusted { quantity, .. } => {
                    self.info(format!("quantity corrected to {quantity}"))
                }
                SessionEvent::MotorChanged { on: false } => self.info("target reached, motor off"),
                _ => {}
            }
        }
    }

    fn sync_mode(&mut self, view: &SessionView) {
        match (&self.mode, view.awaiting_reason_since.is_some()) {
            (InputMode::Normal, true) => {
                self.mode = InputMode::StopReason {
                    text: String::new(),
                }
            }
            (InputMode::StopReason { .. }, false) => self.mode = InputMode::Normal,
            _ => {}
        }
    }

    /// Returns true when the console should close.
    fn handle_key(&mut self, key: KeyEvent, view: &SessionView) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }
        if self.detail.take().is_some() {
            return false;
        }
        let mode = std::mem::replace(&mut self.mode, InputMode::Normal);
        match mode {
            InputMode::FinishForm {
                mut good,
                mut defect,
                mut operator,
                mut field,
            } => {
                match key.code {
                    KeyCode::Esc => return !self.send(OperatorInput::CancelConfirmation),
                    KeyCode::Enter => {
                        let request = FinishRequest {
                            good_qty: good.trim().parse().ok(),
                            defect_qty: defect.trim().parse().unwrap_or(0),
                            operator: Some(operator.trim().to_string()).filter(|op| !op.is_empty()),
                        };
                        return !self.send(Command::ConfirmFinish(request));
                    }
                    KeyCode::Tab | KeyCode::Down => field = (field + 1) % 3,
                    KeyCode::BackTab | KeyCode::Up => field = (field + 2) % 3,
                    code => {
                        let target = match field {
                            0 => &mut good,
                            1 => &mut defect,
                            _ => &mut operator,
                        };
                        edit_field(target, code, field < 2);
                    }
                }
                self.mode = InputMode::FinishForm {
                    good,
                    defect,
                    operator,
                    field,
                };
            }
            InputMode::OperatorForm {
                mut operator,
                mut shift,
                mut field,
            } => {
                match key.code {
                    KeyCode::Esc => return false,
                    KeyCode::Enter if !operator.trim().is_empty() && !shift.trim().is_empty() => {
                        return !self.send(OperatorInput::SwitchOperator {
                            operator: operator.trim().to_string(),
                            shift: shift.trim().to_string(),
                        });
                    }
                    KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                        field = 1 - field
                    }
                    code => {
                        let target = if field == 0 { &mut operator } else { &mut shift };
                        edit_field(target, code, false);
                    }
                }
                self.mode = InputMode::OperatorForm {
                    operator,
                    shift,
                    field,
                };
            }
            InputMode::StopReason { mut text } => {
                match key.code {
                    KeyCode::Enter if !text.trim().is_empty() => {
                        if !self.send(OperatorInput::StopReason(text.trim().to_string())) {
                            return true;
                        }
                        text.clear();
                    }
                    // the prompt does not block the function keys
                    KeyCode::F(n) => {
                        if !self.function_key(n) {
                            return true;
                        }
                    }
                    code => edit_field(&mut text, code, false),
                }
                self.mode = InputMode::StopReason { text };
            }
            InputMode::Normal => return !self.normal_key(key, view),
        }
        false
    }

    /// Returns false once the session loop is gone.
    fn normal_key(&mut self, key: KeyEvent, view: &SessionView) -> bool {
        if view.pending_confirmation == Some(ConfirmationKind::Exit) {
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    self.send(Command::Exit { confirmed: true })
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.send(OperatorInput::CancelConfirmation)
                }
                _ => true,
            };
        }
        match key.code {
            KeyCode::F(n) => self.function_key(n),
            KeyCode::Up | KeyCode::Char('k') => self.send(OperatorInput::SelectStep(-1)),
            KeyCode::Down | KeyCode::Char('j') => self.send(OperatorInput::SelectStep(1)),
            _ => true,
        }
    }

    fn function_key(&mut self, n: u8) -> bool {
        match Command::from_function_key(n) {
            Some(command) => self.send(command),
            None => {
                self.error(format!("F{n} is not bound"));
                true
            }
        }
    }

    fn draw(&self, frame: &mut Frame, view: &SessionView) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(10),
                Constraint::Length(7),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(frame.size());

        frame.render_widget(self.header(view), rows[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(rows[1]);
        draw_production(frame, body[0], view);
        draw_queue(frame, body[1], view);
        draw_stops(frame, rows[2], view);

        let help: Vec<Span> = CommandKind::keyed()
            .into_iter()
            .map(|(key, kind)| Span::raw(format!("F{key} {}  ", key_label(kind))))
            .collect();
        frame.render_widget(
            Paragraph::new(Line::from(help)).style(Style::default().fg(Color::Gray)),
            rows[3],
        );
        if let Some(status) = &self.status {
            let color = if status.error { Color::Red } else { Color::Green };
            frame.render_widget(
                Paragraph::new(status.text.as_str()).style(Style::default().fg(color)),
                rows[4],
            );
        }

        self.draw_overlay(frame, view);
    }

    fn header(&self, view: &SessionView) -> Paragraph<'static> {
        let (link, link_color) = if view.connected {
            ("ONLINE", Color::Green)
        } else {
            ("OFFLINE", Color::Red)
        };
        let line = Line::from(vec![
            Span::styled(
                self.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(format!("● {link}"), Style::default().fg(link_color)),
            Span::raw(format!(
                "  operator {} / {}  auto-next {}  {}",
                view.operator,
                view.shift,
                if view.auto_next { "on" } else { "off" },
                view.timestamp.with_timezone(&Local).format("%H:%M:%S")
            )),
        ]);
        Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Line"))
    }

    fn draw_overlay(&self, frame: &mut Frame, view: &SessionView) {
        if let Some(order) = &self.detail {
            let lines = vec![
                Line::from(format!("Order     {}", order.order_no)),
                Line::from(format!("Box       {}", order.box_no)),
                Line::from(format!(
                    "Customer  {}",
                    order.customer.as_deref().unwrap_or("-")
                )),
                Line::from(format!(
                    "Product   {}",
                    order.product_name.as_deref().unwrap_or("-")
                )),
                Line::from(format!("Target    {}", order.target_qty)),
                Line::from(format!("Sequence  {}", order.seq_no)),
                Line::from(format!("Status    {}", order.status)),
                Line::from(""),
                Line::from("any key to close"),
            ];
            popup(frame, "Order detail", lines, 50, 11);
            return;
        }
        match &self.mode {
            InputMode::FinishForm {
                good,
                defect,
                operator,
                field,
            } => {
                let lines = vec![
                    Line::from(format!("Produced  {}", view.relative_quantity.max(0))),
                    form_line("Good", good, *field == 0),
                    form_line("Defect", defect, *field == 1),
                    form_line("Operator", operator, *field == 2),
                    Line::from(""),
                    Line::from("Tab next field  Enter confirm  Esc cancel"),
                ];
                popup(frame, "Finish order", lines, 50, 8);
            }
            InputMode::OperatorForm {
                operator,
                shift,
                field,
            } => {
                let lines = vec![
                    form_line("Operator", operator, *field == 0),
                    form_line("Shift", shift, *field == 1),
                    Line::from(""),
                    Line::from("Tab next field  Enter apply  Esc cancel"),
                ];
                popup(frame, "Switch operator", lines, 50, 6);
            }
            InputMode::StopReason { text } => {
                let mut lines: Vec<Line> = view
                    .stop_reasons
                    .iter()
                    .map(|entry| Line::from(format!("{}  {}", entry.code, entry.label)))
                    .collect();
                lines.push(Line::from(""));
                lines.push(form_line("Reason", text, true));
                lines.push(Line::from("code, label or free text, then Enter"));
                let height = lines.len() as u16 + 2;
                popup(frame, "Line stopped: reason?", lines, 50, height);
            }
            InputMode::Normal => {
                if view.pending_confirmation == Some(ConfirmationKind::Exit) {
                    popup(
                        frame,
                        "Exit",
                        vec![Line::from("Close the console? y / n")],
                        40,
                        3,
                    );
                }
            }
        }
    }
}

fn edit_field(target: &mut String, code: KeyCode, digits_only: bool) {
    match code {
        KeyCode::Backspace => {
            target.pop();
        }
        KeyCode::Char(c) if !digits_only || c.is_ascii_digit() => target.push(c),
        _ => {}
    }
}

fn key_label(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::MoveUp => "up",
        CommandKind::MoveDown => "down",
        CommandKind::Start => "start",
        CommandKind::Finish => "finish",
        CommandKind::QuantityUp => "+1",
        CommandKind::QuantityDown => "-1",
        CommandKind::OpenOrderDetail => "detail",
        CommandKind::ToggleAutoNext => "auto",
        CommandKind::SwitchOperator => "operator",
        CommandKind::Return => "return",
        CommandKind::Exit => "exit",
        CommandKind::ConfirmFinish => "confirm",
    }
}

fn hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

fn form_line(label: &str, value: &str, active: bool) -> Line<'static> {
    let style = if active {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let cursor = if active { "_" } else { "" };
    Line::from(vec![
        Span::raw(format!("{label:<10}")),
        Span::styled(format!("{value}{cursor}"), style),
    ])
}

fn popup(frame: &mut Frame, title: &str, lines: Vec<Line>, width: u16, height: u16) {
    let area = centered(frame.size(), width, height);
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(
                    title.to_string(),
                    Style::default().fg(Color::Cyan),
                )),
        ),
        area,
    );
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn draw_production(frame: &mut Frame, area: Rect, view: &SessionView) {
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let gauge_color = if view.near_complete {
        Color::Yellow
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(gauge_color))
        .percent(view.percent_complete.clamp(0.0, 100.0) as u16)
        .label(format!(
            "{} / {}  ({:.1}%)",
            view.relative_quantity, view.target_qty, view.percent_complete
        ));
    frame.render_widget(gauge, parts[0]);

    let speed_color = match view.speed_status {
        SpeedStatus::OnTarget => Color::Green,
        SpeedStatus::BelowStandard => Color::Yellow,
        SpeedStatus::Low => Color::LightRed,
        SpeedStatus::Stopped => Color::Red,
    };
    let prep_color = match view.prep_status {
        PrepStatus::Green => Color::Green,
        PrepStatus::Yellow => Color::Yellow,
        PrepStatus::Red => Color::Red,
    };
    let remaining_style = if view.near_complete {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let lines = vec![
        Line::from(vec![
            Span::raw("Speed       "),
            Span::styled(
                format!("{:.0} /min  {}", view.line_speed, view.speed_status),
                Style::default().fg(speed_color),
            ),
        ]),
        Line::from(format!("Quantity    {}", view.quantity)),
        Line::from(vec![
            Span::raw("Remaining   "),
            Span::styled(view.remaining.to_string(), remaining_style),
        ]),
        Line::from(format!(
            "Counter     {:.0}  (offset {:.0})",
            view.cumulative_count, view.offset
        )),
        Line::from(""),
        Line::from(format!(
            "Job   run {}  stop {}",
            hms(view.timers.job_run),
            hms(view.timers.job_stop)
        )),
        Line::from(format!(
            "Day   run {}  stop {}",
            hms(view.timers.day_run),
            hms(view.timers.day_stop)
        )),
        Line::from(vec![
            Span::raw("Prep  "),
            Span::styled(hms(view.timers.prep), Style::default().fg(prep_color)),
            Span::raw(if view.continuous_production {
                "  (producing)"
            } else {
                ""
            }),
        ]),
    ];
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Production")),
        parts[1],
    );
}

fn draw_queue(frame: &mut Frame, area: Rect, view: &SessionView) {
    let items: Vec<ListItem> = view
        .slots
        .iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            SlotView::Placeholder => ListItem::new(Line::from(Span::styled(
                "-- no running order --",
                Style::default().fg(Color::DarkGray),
            ))),
            SlotView::Order { order } => {
                let marker = if index == 0 { "RUN " } else { "    " };
                ListItem::new(format!(
                    "{marker}{:<12} {:<10} {:>7}",
                    order.order_no, order.box_no, order.target_qty
                ))
            }
        })
        .collect();
    let mut state = ListState::default();
    state.select(view.selected_index());
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Orders"))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_stops(frame: &mut Frame, area: Rect, view: &SessionView) {
    let mut items: Vec<ListItem> = view
        .stop_events
        .iter()
        .rev()
        .map(|stop| {
            ListItem::new(format!(
                "{}  {:<20} {}",
                stop.start_time.with_timezone(&Local).format("%H:%M:%S"),
                stop.reason_label,
                hms(stop.duration_seconds)
            ))
        })
        .collect();
    if let Some(since) = view.awaiting_reason_since {
        items.insert(
            0,
            ListItem::new(Span::styled(
                format!(
                    "{}  waiting for reason",
                    since.with_timezone(&Local).format("%H:%M:%S")
                ),
                Style::default().fg(Color::Red),
            )),
        );
    }
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Stops")),
        area,
    );
}

pub fn run(mut ui: ConsoleUi) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let result = event_loop(&mut terminal, &mut ui);
    cleanup_terminal(&mut terminal)?;
    result
}

fn cleanup_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen, Show)?;
    terminal.show_cursor()?;
    Ok(())
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ui: &mut ConsoleUi,
) -> Result<()> {
    loop {
        if ui.view.has_changed().is_err() {
            // session loop ended, e.g. after a confirmed exit
            return Ok(());
        }
        let view = ui.view.borrow_and_update().clone();
        ui.drain_events(&view);
        ui.sync_mode(&view);
        terminal.draw(|frame| ui.draw(frame, &view))?;
        if event::poll(POLL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && ui.handle_key(key, &view) {
                    return Ok(());
                }
            }
        }
    }
}
