//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Operator session state and command execution."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! The session is the single owner of job state. Samples, clock ticks and
//! commands go in; [`Effect`]s and [`SessionEvent`]s come out. Nothing in here
//! performs I/O, which keeps every rule testable with a [`flexo_common::ManualClock`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use flexo_common::{AppConfig, SharedClock, StopReasonEntry};
use flexo_msg::{CompletionRecord, Order, OrderId, ProductionRecord, Sample, StopEvent};
use flexo_net::CurrentOrder;
use flexo_persistence::{AuditEntry, AuditOutcome};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use crate::detector::{DetectorTransition, StopDetector, StopReasonCatalog};
use crate::dispatcher::{
    check_guard, Command, CommandDispatcher, CommandGuardContext, CommandKind, FinishRequest,
};
use crate::offset::OffsetManager;
use crate::queue::{OrderQueue, QueueSlot, StartOutcome};
use crate::scheduler::SecondTicker;
use crate::stats::{build_record, FinishFigures};
use crate::timers::{TimerState, TimerSubsystem};
use crate::view::{percent_complete, PrepStatus, SessionView, SlotView, SpeedStatus};
use crate::GuardViolation;

/// Rules and defaults the session runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub gap_threshold: u64,
    pub standard_speed: f64,
    pub speed_low_percent: f64,
    pub std_prep_secs: u64,
    pub prep_yellow_percent: f64,
    pub timer_tick: Duration,
    pub command_cooldown: Duration,
    pub auto_next: bool,
    pub auto_stop_at_target: bool,
    pub operator: String,
    pub shift: String,
    pub stop_reasons: Vec<StopReasonEntry>,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            gap_threshold: config.line.small_gap_threshold,
            standard_speed: config.line.standard_speed(),
            speed_low_percent: config.line.speed_low_percent,
            std_prep_secs: config.line.std_prep_time_minutes * 60,
            prep_yellow_percent: config.line.prep_yellow_percent,
            timer_tick: config.session.timer_tick,
            command_cooldown: config.session.command_cooldown,
            auto_next: config.session.auto_next,
            auto_stop_at_target: config.mode.is_simulation()
                && config.simulation.auto_stop_at_target,
            operator: config.session.operator.clone(),
            shift: config.session.shift.clone(),
            stop_reasons: config.line.stop_reasons.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A prompt waiting for the operator's yes or no.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationKind {
    Finish,
    Exit,
}

/// Work the session asks the runtime to carry out.
#[derive(Debug, Clone)]
pub enum Effect {
    AssignCurrentOrder(CurrentOrder),
    ClearCurrentOrder,
    /// Always emitted before the matching [`Effect::PublishCompletion`].
    ArchiveRecord(ProductionRecord),
    PublishCompletion(CompletionRecord),
    PersistOrders(Vec<Order>),
    Audit(AuditEntry),
    SetMotor(bool),
    Terminate,
}

/// Notifications for displays and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Tared { offset: f64 },
    ConnectivityChanged { connected: bool },
    StopFlagged { started_at: DateTime<Utc> },
    StopCleared,
    StopRecorded { stop: StopEvent },
    OrderStarted { order: Order },
    OrderFinished { record: ProductionRecord },
    OrderReturned { returned: Order, promoted: Option<Order> },
    QueueChanged,
    FinishConfirmationOpened { defaults: FinishRequest },
    ExitConfirmationOpened,
    OrderDetail { order: Order },
    OperatorSwitchRequested,
    OperatorChanged { operator: String, shift: String },
    AutoNextChanged { enabled: bool },
    QuantityAdjusted { delta: i64, quantity: i64 },
    MotorChanged { on: bool },
    CommandRejected { command: CommandKind, reason: String },
    InputRejected { reason: String },
    ExitRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Applied(String),
    ConfirmationRequired(ConfirmationKind),
    Rejected(GuardViolation),
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Applied(_) => "applied",
            CommandOutcome::ConfirmationRequired(_) => "confirmation",
            CommandOutcome::Rejected(_) => "rejected",
        }
    }

    fn audit_outcome(&self) -> AuditOutcome {
        match self {
            CommandOutcome::Applied(_) => AuditOutcome::Accepted,
            CommandOutcome::ConfirmationRequired(_) => AuditOutcome::Info,
            CommandOutcome::Rejected(_) => AuditOutcome::Rejected,
        }
    }

    pub fn message(&self) -> String {
        match self {
            CommandOutcome::Applied(message) => message.clone(),
            CommandOutcome::ConfirmationRequired(kind) => format!("{kind} awaiting confirmation"),
            CommandOutcome::Rejected(violation) => violation.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub command: CommandKind,
    pub outcome: CommandOutcome,
}

pub struct Session {
    settings: SessionSettings,
    clock: SharedClock,
    catalog: StopReasonCatalog,
    sample: Sample,
    tared: bool,
    connected: bool,
    offset: OffsetManager,
    timers: TimerSubsystem,
    ticker: SecondTicker,
    detector: StopDetector,
    stop_events: Vec<StopEvent>,
    queue: OrderQueue,
    selected: Option<OrderId>,
    auto_next: bool,
    operator: String,
    shift: String,
    dispatcher: CommandDispatcher,
    pending: Option<ConfirmationKind>,
    motor_on: bool,
    effects: Vec<Effect>,
    events: Vec<SessionEvent>,
}

impl Session {
    /// Open a session over previously persisted orders.
    pub fn new(settings: SessionSettings, clock: SharedClock, orders: Vec<Order>) -> Self {
        let queue = OrderQueue::from_orders(orders);
        let mut timers = TimerSubsystem::new();
        timers.track_running_order(queue.running().map(|order| &order.id));
        let selected = queue
            .running()
            .or_else(|| queue.queued().first())
            .map(|order| order.id.clone());
        Self {
            catalog: StopReasonCatalog::new(settings.stop_reasons.clone()),
            sample: Sample::idle(clock.now()),
            tared: false,
            connected: false,
            offset: OffsetManager::default(),
            timers,
            ticker: SecondTicker::new(clock.monotonic(), settings.timer_tick),
            detector: StopDetector::new(settings.gap_threshold),
            stop_events: Vec::new(),
            queue,
            selected,
            auto_next: settings.auto_next,
            operator: settings.operator.clone(),
            shift: settings.shift.clone(),
            dispatcher: CommandDispatcher::new(settings.command_cooldown),
            pending: None,
            motor_on: true,
            effects: Vec::new(),
            events: Vec::new(),
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn queue(&self) -> &OrderQueue {
        &self.queue
    }

    pub fn timers(&self) -> TimerState {
        self.timers.state()
    }

    pub fn offset(&self) -> OffsetManager {
        self.offset
    }

    pub fn last_sample(&self) -> &Sample {
        &self.sample
    }

    pub fn stop_events(&self) -> &[StopEvent] {
        &self.stop_events
    }

    pub fn awaiting_reason_since(&self) -> Option<DateTime<Utc>> {
        self.detector.awaiting_since()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn auto_next(&self) -> bool {
        self.auto_next
    }

    pub fn selected(&self) -> Option<&OrderId> {
        self.selected.as_ref()
    }

    pub fn pending_confirmation(&self) -> Option<ConfirmationKind> {
        self.pending
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Speed as the rules see it: zero while the source is unreachable.
    pub fn effective_speed(&self) -> f64 {
        if self.connected {
            self.sample.line_speed
        } else {
            0.0
        }
    }

    pub fn relative_quantity(&self) -> i64 {
        self.offset.relative_quantity(&self.sample)
    }

    fn target_qty(&self) -> u64 {
        self.queue.running().map_or(0, |order| order.target_qty)
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take in a fresh sample from the telemetry source.
    pub fn apply_sample(&mut self, sample: Sample) {
        if !self.connected {
            self.set_connectivity(true);
        }
        self.sample = sample;
        if !self.tared && sample.cumulative_count != 0.0 {
            self.offset.tare(sample.cumulative_count);
            self.tared = true;
            info!(offset = sample.cumulative_count, "counter tared on first reading");
            self.events.push(SessionEvent::Tared {
                offset: sample.cumulative_count,
            });
        }

        let now = self.clock.now();
        let relative = self.relative_quantity();
        let target = self.target_qty();
        match self
            .detector
            .observe(self.effective_speed(), relative, target, now)
        {
            Some(DetectorTransition::Opened { started_at }) => {
                info!(quantity = relative, target, "unplanned stop, waiting for reason");
                self.events.push(SessionEvent::StopFlagged { started_at });
            }
            Some(DetectorTransition::Cleared) => {
                debug!("line moving again, stop prompt withdrawn");
                self.events.push(SessionEvent::StopCleared);
            }
            None => {}
        }

        if self.settings.auto_stop_at_target
            && self.motor_on
            && target > 0
            && relative >= target as i64
        {
            info!(quantity = relative, target, "target reached, stopping motor");
            self.set_motor(false);
        }
    }

    /// Record a change of reachability of the telemetry source.
    pub fn set_connectivity(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        if connected {
            info!("telemetry source connected");
        } else {
            warn!("telemetry source unreachable, speed forced to 0");
        }
        self.events
            .push(SessionEvent::ConnectivityChanged { connected });
    }

    /// Account every whole timer period elapsed since the last call.
    pub fn on_clock(&mut self) -> u64 {
        let due = self.ticker.due(self.clock.monotonic());
        let speed = self.effective_speed();
        for _ in 0..due {
            self.timers.tick(speed);
        }
        due
    }

    pub fn guard_context(&self) -> CommandGuardContext {
        CommandGuardContext {
            speed: self.effective_speed(),
            is_plc_connected: self.connected,
            selected_order_id: self.selected.clone(),
            auto_next_enabled: self.auto_next,
            relative_quantity: self.relative_quantity(),
            finish_pending: self.pending == Some(ConfirmationKind::Finish),
        }
    }

    /// Run one operator command through cooldown, guard and execution.
    ///
    /// Every invocation, accepted or not, leaves one audit effect.
    pub fn dispatch(&mut self, command: Command) -> CommandReport {
        let kind = command.kind();
        let now = self.clock.monotonic();
        let result = self
            .dispatcher
            .check_cooldown(kind, now)
            .and_then(|()| check_guard(&command, &self.guard_context(), &self.queue))
            .and_then(|()| self.execute(command));
        let outcome = match result {
            Ok(outcome) => {
                if outcome.is_applied() {
                    self.dispatcher.record_accepted(kind, now);
                }
                outcome
            }
            Err(violation) => {
                info!(command = %kind, reason = %violation, "command rejected");
                self.events.push(SessionEvent::CommandRejected {
                    command: kind,
                    reason: violation.to_string(),
                });
                CommandOutcome::Rejected(violation)
            }
        };
        self.audit(kind.into(), outcome.audit_outcome(), outcome.message());
        CommandReport {
            command: kind,
            outcome,
        }
    }

    fn execute(&mut self, command: Command) -> Result<CommandOutcome, GuardViolation> {
        match command {
            Command::MoveUp => self.move_selected(true),
            Command::MoveDown => self.move_selected(false),
            Command::OpenOrderDetail => {
                let order = self
                    .selected
                    .as_ref()
                    .and_then(|id| self.queue.get(id))
                    .or_else(|| self.queue.running())
                    .cloned();
                Ok(match order {
                    Some(order) => {
                        let message = format!("showing order {}", order.order_no);
                        self.events.push(SessionEvent::OrderDetail { order });
                        CommandOutcome::Applied(message)
                    }
                    None => CommandOutcome::Applied("no order to show".into()),
                })
            }
            Command::Start => self.start(),
            Command::Finish => {
                self.pending = Some(ConfirmationKind::Finish);
                self.events.push(SessionEvent::FinishConfirmationOpened {
                    defaults: FinishRequest {
                        good_qty: Some(self.relative_quantity().max(0) as u64),
                        defect_qty: 0,
                        operator: Some(self.operator.clone()),
                    },
                });
                Ok(CommandOutcome::ConfirmationRequired(ConfirmationKind::Finish))
            }
            Command::ConfirmFinish(request) => self.finish(request),
            Command::QuantityUp => Ok(self.adjust_quantity(1)),
            Command::QuantityDown => Ok(self.adjust_quantity(-1)),
            Command::ToggleAutoNext => {
                self.auto_next = !self.auto_next;
                self.events.push(SessionEvent::AutoNextChanged {
                    enabled: self.auto_next,
                });
                Ok(CommandOutcome::Applied(format!(
                    "auto-next {}",
                    if self.auto_next { "on" } else { "off" }
                )))
            }
            Command::SwitchOperator => {
                self.events.push(SessionEvent::OperatorSwitchRequested);
                Ok(CommandOutcome::Applied("operator switch opened".into()))
            }
            Command::Return => self.return_running(),
            Command::Exit { confirmed: false } => {
                self.pending = Some(ConfirmationKind::Exit);
                self.events.push(SessionEvent::ExitConfirmationOpened);
                Ok(CommandOutcome::ConfirmationRequired(ConfirmationKind::Exit))
            }
            Command::Exit { confirmed: true } => {
                self.pending = None;
                self.events.push(SessionEvent::ExitRequested);
                self.effects.push(Effect::Terminate);
                Ok(CommandOutcome::Applied("console closing".into()))
            }
        }
    }

    fn move_selected(&mut self, up: bool) -> Result<CommandOutcome, GuardViolation> {
        let id = self.selected.clone().ok_or(GuardViolation::NoOrderSelected)?;
        let position = if up {
            self.queue.move_up(&id)?
        } else {
            self.queue.move_down(&id)?
        };
        self.queue_changed();
        Ok(CommandOutcome::Applied(format!(
            "order {} moved to position {position}",
            self.order_no(&id)
        )))
    }

    fn start(&mut self) -> Result<CommandOutcome, GuardViolation> {
        match self.queue.start(self.selected.as_ref())? {
            StartOutcome::Started(order) => {
                self.begin_job();
                self.activate(&order);
                self.queue_changed();
                info!(order_id = %order.id, order_no = %order.order_no, target = order.target_qty, "order started");
                Ok(CommandOutcome::Applied(format!("started order {}", order.order_no)))
            }
            StartOutcome::AlreadyRunning(order) => {
                self.effects
                    .push(Effect::AssignCurrentOrder(current_order(&order)));
                Ok(CommandOutcome::Applied(format!(
                    "order {} already running, relay re-synced",
                    order.order_no
                )))
            }
        }
    }

    fn finish(&mut self, request: FinishRequest) -> Result<CommandOutcome, GuardViolation> {
        let running = self
            .queue
            .running()
            .cloned()
            .ok_or(GuardViolation::NothingRunning)?;
        self.on_clock();
        let quantity = self.relative_quantity().max(0) as u64;
        let good_qty = request
            .good_qty
            .unwrap_or_else(|| quantity.saturating_sub(request.defect_qty));
        let operator = request
            .operator
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.operator.clone());
        let record = build_record(
            &running,
            quantity,
            FinishFigures {
                good_qty,
                defect_qty: request.defect_qty,
                operator,
                shift: self.shift.clone(),
            },
            &self.timers.state(),
            &self.stop_events,
            self.clock.now(),
        );
        let change = self.queue.finish()?;
        self.pending = None;

        info!(
            order_id = %record.order_id,
            good = record.good_qty,
            defect = record.defect_qty,
            oee = record.oee,
            "order finished"
        );
        self.effects.push(Effect::ArchiveRecord(record.clone()));
        self.effects
            .push(Effect::PublishCompletion(CompletionRecord::from(&record)));
        let message = format!(
            "finished order {}: {} good, {} defect, OEE {}%",
            record.order_no, record.good_qty, record.defect_qty, record.oee
        );
        self.events.push(SessionEvent::OrderFinished { record });

        self.begin_job();
        self.follow_head(change.promoted);
        self.queue_changed();
        Ok(CommandOutcome::Applied(message))
    }

    fn return_running(&mut self) -> Result<CommandOutcome, GuardViolation> {
        let change = self.queue.return_running(self.auto_next)?;
        self.begin_job();
        self.follow_head(change.promoted.clone());
        self.queue_changed();
        let message = match &change.promoted {
            Some(next) => format!(
                "order {} returned, {} promoted",
                change.previous.order_no, next.order_no
            ),
            None => format!("order {} returned to the queue", change.previous.order_no),
        };
        info!(order_id = %change.previous.id, promoted = change.promoted.is_some(), "order returned");
        self.events.push(SessionEvent::OrderReturned {
            returned: change.previous,
            promoted: change.promoted,
        });
        Ok(CommandOutcome::Applied(message))
    }

    fn adjust_quantity(&mut self, delta: i64) -> CommandOutcome {
        self.offset.adjust(delta);
        let quantity = self.relative_quantity();
        self.events
            .push(SessionEvent::QuantityAdjusted { delta, quantity });
        CommandOutcome::Applied(format!("quantity corrected to {quantity}"))
    }

    /// Job-boundary reset shared by start, finish and return.
    fn begin_job(&mut self) {
        // whole seconds already elapsed belong to the previous job
        self.on_clock();
        self.ticker.resync(self.clock.monotonic());
        self.offset.tare(self.sample.cumulative_count);
        self.tared = true;
        self.timers.reset_job();
        self.stop_events.clear();
        self.detector.reset();
        self.pending = None;
        self.set_motor(true);
    }

    /// React to whatever now occupies the head slot.
    fn follow_head(&mut self, promoted: Option<Order>) {
        match promoted {
            Some(order) => self.activate(&order),
            None => {
                self.timers.track_running_order(None);
                self.effects.push(Effect::ClearCurrentOrder);
                self.selected = self.queue.queued().first().map(|order| order.id.clone());
            }
        }
    }

    fn activate(&mut self, order: &Order) {
        self.timers.track_running_order(Some(&order.id));
        self.effects
            .push(Effect::AssignCurrentOrder(current_order(order)));
        self.selected = Some(order.id.clone());
        self.events.push(SessionEvent::OrderStarted {
            order: order.clone(),
        });
    }

    fn set_motor(&mut self, on: bool) {
        if self.motor_on == on {
            return;
        }
        self.motor_on = on;
        self.effects.push(Effect::SetMotor(on));
        self.events.push(SessionEvent::MotorChanged { on });
    }

    fn queue_changed(&mut self) {
        self.effects
            .push(Effect::PersistOrders(self.queue.to_orders()));
        self.events.push(SessionEvent::QueueChanged);
    }

    fn order_no(&self, id: &OrderId) -> String {
        self.queue
            .get(id)
            .map_or_else(|| id.to_string(), |order| order.order_no.clone())
    }

    fn audit(&mut self, command: &str, outcome: AuditOutcome, message: String) {
        let entry = AuditEntry::new(self.clock.now(), &self.operator, command, outcome, message);
        self.effects.push(Effect::Audit(entry));
    }

    /// Close the open stop with the operator's reason.
    pub fn supply_stop_reason(&mut self, input: &str) -> Result<StopEvent, GuardViolation> {
        if self.detector.awaiting_since().is_none() {
            return Err(GuardViolation::NoPendingStop);
        }
        let reason = self.catalog.resolve(input)?;
        let stop = self.detector.supply_reason(reason, self.clock.now())?;
        info!(reason = %stop.reason_label, duration_seconds = stop.duration_seconds, "stop reason recorded");
        self.stop_events.push(stop.clone());
        self.events
            .push(SessionEvent::StopRecorded { stop: stop.clone() });
        self.audit(
            "stop_reason",
            AuditOutcome::Info,
            format!("{} for {}s", stop.reason_label, stop.duration_seconds),
        );
        Ok(stop)
    }

    /// Dismiss an open finish or exit prompt.
    pub fn cancel_confirmation(&mut self) -> Option<ConfirmationKind> {
        let cancelled = self.pending.take();
        if let Some(kind) = cancelled {
            self.audit(&kind.to_string(), AuditOutcome::Info, "cancelled".into());
        }
        cancelled
    }

    pub fn select_order(&mut self, id: Option<OrderId>) -> Result<(), GuardViolation> {
        if let Some(id) = &id {
            if self.queue.index_of(id).is_none() {
                return Err(GuardViolation::UnknownOrder(id.clone()));
            }
        }
        self.selected = id;
        Ok(())
    }

    /// Move the selection by `step` slots; the placeholder selects nothing.
    pub fn select_step(&mut self, step: isize) {
        let current = self
            .selected
            .as_ref()
            .and_then(|id| self.queue.index_of(id))
            .unwrap_or(0) as isize;
        let last = self.queue.len() as isize - 1;
        let index = (current + step).clamp(0, last) as usize;
        self.selected = match self.queue.slot(index) {
            Some(QueueSlot::Order(order)) => Some(order.id.clone()),
            _ => None,
        };
    }

    pub fn switch_operator(&mut self, operator: impl Into<String>, shift: impl Into<String>) {
        let operator = operator.into();
        let shift = shift.into();
        info!(from = %self.operator, to = %operator, shift = %shift, "operator changed");
        self.audit(
            "switch_operator",
            AuditOutcome::Info,
            format!("{} on {} shift takes over", operator, shift),
        );
        self.operator = operator.clone();
        self.shift = shift.clone();
        self.events
            .push(SessionEvent::OperatorChanged { operator, shift });
    }

    pub fn enqueue(&mut self, order: Order) -> usize {
        info!(order_id = %order.id, order_no = %order.order_no, target = order.target_qty, "order queued");
        let message = format!("order {} queued", order.order_no);
        let index = self.queue.enqueue(order);
        if self.selected.is_none() {
            self.selected = self.queue.queued().last().map(|order| order.id.clone());
        }
        self.audit("enqueue", AuditOutcome::Info, message);
        self.queue_changed();
        index
    }

    pub fn update_target(&mut self, id: &OrderId, target_qty: u64) -> Result<(), GuardViolation> {
        self.queue.update_target(id, target_qty)?;
        if let Some(running) = self.queue.running().filter(|order| &order.id == id) {
            let current = current_order(running);
            self.effects.push(Effect::AssignCurrentOrder(current));
        }
        self.audit(
            "update_target",
            AuditOutcome::Info,
            format!("order {} target set to {target_qty}", self.order_no(id)),
        );
        self.queue_changed();
        Ok(())
    }

    pub fn delete_order(&mut self, id: &OrderId) -> Result<Order, GuardViolation> {
        let removed = self.queue.delete(id)?;
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        self.audit(
            "delete_order",
            AuditOutcome::Info,
            format!("order {} removed", removed.order_no),
        );
        self.queue_changed();
        Ok(removed)
    }

    pub fn renumber(&mut self) {
        self.queue.renumber();
        self.queue_changed();
    }

    /// Snapshot for displays.
    pub fn view(&self) -> SessionView {
        let relative = self.relative_quantity();
        let target = self.target_qty();
        let remaining = target as i64 - relative;
        let speed = self.effective_speed();
        let timers = self.timers.state();
        SessionView {
            timestamp: self.clock.now(),
            connected: self.connected,
            line_speed: speed,
            cumulative_count: self.sample.cumulative_count,
            offset: self.offset.offset(),
            quantity: self.offset.display_quantity(&self.sample),
            relative_quantity: relative,
            target_qty: target,
            remaining,
            percent_complete: percent_complete(relative, target),
            near_complete: self.queue.running().is_some()
                && remaining > 0
                && remaining <= self.settings.gap_threshold as i64,
            speed_status: SpeedStatus::classify(
                speed,
                self.settings.standard_speed,
                self.settings.speed_low_percent,
            ),
            prep_status: PrepStatus::classify(
                timers.prep,
                self.settings.std_prep_secs,
                self.settings.prep_yellow_percent,
            ),
            timers,
            continuous_production: self.timers.continuous_production(),
            awaiting_reason_since: self.detector.awaiting_since(),
            stop_events: self.stop_events.clone(),
            slots: self
                .queue
                .slots()
                .into_iter()
                .map(|slot| match slot {
                    QueueSlot::Placeholder => SlotView::Placeholder,
                    QueueSlot::Order(order) => SlotView::Order {
                        order: order.clone(),
                    },
                })
                .collect(),
            selected: self.selected.clone(),
            auto_next: self.auto_next,
            operator: self.operator.clone(),
            shift: self.shift.clone(),
            pending_confirmation: self.pending,
            stop_reasons: self.catalog.entries().to_vec(),
        }
    }
}

fn current_order(order: &Order) -> CurrentOrder {
    CurrentOrder {
        order_id: order.id.to_string(),
        order_no: order.order_no.clone(),
        box_no: order.box_no.clone(),
        target_qty: order.target_qty,
    }
}
