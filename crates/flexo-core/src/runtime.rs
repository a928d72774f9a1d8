//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Primary orchestration and lifecycle management."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use flexo_common::{AppConfig, Mode, SharedClock, SimulationRoute, SystemClock};
use flexo_metrics::{ConsoleMetrics, SharedRegistry};
use flexo_msg::{
    DeliveryGuarantee, InMemoryBus, Message, Order, OrderId, ReliablePublisher, Sample, Topic,
    Transport,
};
use flexo_net::{CurrentOrder, HttpRelayClient, TelemetryRelay};
use flexo_persistence::{AuditLogWriter, StateStore};
use flexo_sim::SimulationEngine;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{forward_bus_samples, RelayPoller, SourceEvent, SourceKind};
use crate::dispatcher::Command;
use crate::scheduler::{Scheduler, SchedulerTick, TaskSet};
use crate::session::{Effect, Session, SessionEvent, SessionSettings};
use crate::view::SessionView;
use crate::error::{CoreError, GuardViolation};

/// Audit trail file inside the storage directory.
pub const AUDIT_FILE: &str = "operator_audit.ndjson";

const INPUT_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;
const RELAY_CALL_CAPACITY: usize = 16;

/// Requests from the operator surface.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorInput {
    Command(Command),
    SelectOrder(Option<OrderId>),
    SelectStep(isize),
    StopReason(String),
    CancelConfirmation,
    SwitchOperator { operator: String, shift: String },
    Enqueue(Order),
    UpdateTarget { id: OrderId, target_qty: u64 },
    DeleteOrder(OrderId),
    Renumber,
    /// Simulation only.
    SetSpeedFactor(f64),
    /// Simulation only.
    ToggleMotor,
}

impl From<Command> for OperatorInput {
    fn from(command: Command) -> Self {
        OperatorInput::Command(command)
    }
}

enum Backend {
    Simulated {
        engine: SimulationEngine,
        route: SimulationRoute,
    },
    Relay {
        poll: mpsc::Sender<()>,
    },
}

#[derive(Debug)]
enum RelayCall {
    Assign(CurrentOrder),
    Clear,
}

/// Builds and starts the session loop for one console.
pub struct ConsoleRuntime {
    config: Arc<AppConfig>,
    clock: SharedClock,
    bus: InMemoryBus,
    relay: Option<Arc<dyn TelemetryRelay>>,
    metrics_registry: Option<SharedRegistry>,
}

impl ConsoleRuntime {
    pub fn new(config: AppConfig) -> Self {
        let bus = InMemoryBus::new(config.bus.topic_prefix.clone(), config.bus.channel_capacity);
        Self {
            config: Arc::new(config),
            clock: SystemClock::shared(),
            bus,
            relay: None,
            metrics_registry: None,
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Use this relay instead of an HTTP client built from `[relay]`.
    /// In simulation mode it still receives current-order notifications.
    pub fn with_relay(mut self, relay: Arc<dyn TelemetryRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_metrics(mut self, registry: SharedRegistry) -> Self {
        self.metrics_registry = Some(registry);
        self
    }

    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    pub async fn start(self) -> Result<RuntimeHandle> {
        let config = self.config;
        let store = StateStore::open(&config.storage.directory, config.storage.history_cap)
            .with_context(|| {
                format!(
                    "failed to open state store {}",
                    config.storage.directory.display()
                )
            })?;
        let orders = match store.load_orders() {
            Ok(orders) => orders,
            Err(err) => {
                warn!(error = %err, "stored orders unreadable, starting with an empty queue");
                Vec::new()
            }
        };
        let audit = AuditLogWriter::open(&store.root().join(AUDIT_FILE))
            .context("failed to open operator audit log")?;
        let metrics = match &self.metrics_registry {
            Some(registry) => Some(ConsoleMetrics::new(registry.clone())?),
            None => None,
        };

        let session = Session::new(
            SessionSettings::from_config(&config),
            self.clock.clone(),
            orders,
        );
        let (shutdown_tx, _) = broadcast::channel(4);
        let (source_tx, source_rx) = mpsc::channel(config.bus.channel_capacity.max(1));
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (view_tx, view_rx) = watch::channel(session.view());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let mut tasks = TaskSet::default();
        let mut scheduler = Scheduler::new(config.session.timer_tick);

        let mut relay = self.relay;
        let backend = match config.mode {
            Mode::Simulation => {
                let engine = SimulationEngine::from_config(&config.simulation, &config.line)
                    .context("failed to build simulation engine")?;
                scheduler = scheduler.with_simulation(engine.tick_interval());
                let route = config.simulation.route;
                if route == SimulationRoute::Remote {
                    tasks.spawn(
                        "bus-listener",
                        forward_bus_samples(
                            self.bus.subscribe(Topic::MachineUpdate),
                            source_tx.clone(),
                            shutdown_tx.subscribe(),
                        ),
                    );
                }
                Backend::Simulated { engine, route }
            }
            Mode::Production => {
                let client: Arc<dyn TelemetryRelay> = match relay.clone() {
                    Some(relay) => relay,
                    None => Arc::new(
                        HttpRelayClient::new(&config.relay.base_url, config.relay.request_timeout)
                            .map_err(CoreError::from)
                            .context("invalid relay configuration")?,
                    ),
                };
                relay = Some(client.clone());
                scheduler = scheduler.with_poll(config.relay.poll_interval);
                let (poll_tx, poll_rx) = mpsc::channel(1);
                let poller = RelayPoller::new(
                    client,
                    Arc::new(self.bus.clone()),
                    source_tx.clone(),
                    self.clock.clone(),
                );
                tasks.spawn("relay-poller", poller.run(poll_rx, shutdown_tx.subscribe()));
                Backend::Relay { poll: poll_tx }
            }
        };
        drop(source_tx);

        let relay_calls = relay.map(|relay| {
            let (tx, rx) = mpsc::channel(RELAY_CALL_CAPACITY);
            tasks.spawn("relay-notifier", notify_relay(relay, rx, shutdown_tx.subscribe()));
            tx
        });

        let publisher = ReliablePublisher::new(
            Arc::new(self.bus.clone()),
            DeliveryGuarantee::AtLeastOnce {
                max_retries: config.bus.completion_max_retries,
                retry_interval: config.bus.completion_retry_interval,
            },
        );

        let worker = SessionLoop {
            session,
            backend,
            scheduler,
            publisher,
            store,
            audit,
            metrics,
            relay_calls,
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            events: events_tx.clone(),
            view: view_tx,
            shutdown: shutdown_tx.clone(),
        };
        let task = tokio::spawn(worker.run(input_rx, source_rx, shutdown_tx.subscribe(), tasks));

        info!(mode = ?config.mode, machine = %config.line.machine_id, "console runtime started");

        Ok(RuntimeHandle {
            inputs: input_tx,
            view: view_rx,
            events: events_tx,
            shutdown: shutdown_tx,
            bus: self.bus,
            task,
        })
    }
}

/// Handle for the operator surface and lifecycle control.
pub struct RuntimeHandle {
    inputs: mpsc::Sender<OperatorInput>,
    view: watch::Receiver<SessionView>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: broadcast::Sender<()>,
    bus: InMemoryBus,
    task: JoinHandle<Result<()>>,
}

impl RuntimeHandle {
    pub async fn send(&self, input: impl Into<OperatorInput>) -> Result<()> {
        self.inputs
            .send(input.into())
            .await
            .map_err(|_| CoreError::RuntimeStopped)?;
        Ok(())
    }

    /// Raw input sender, for callers outside the async runtime
    /// (`blocking_send`).
    pub fn inputs(&self) -> mpsc::Sender<OperatorInput> {
        self.inputs.clone()
    }

    /// Latest snapshot, updated after every loop iteration.
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn bus(&self) -> &InMemoryBus {
        &self.bus
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end on its own, after a confirmed exit.
    pub async fn wait(self) -> Result<()> {
        self.task.await.context("session loop join failure")?
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("session loop join failure")??;
        info!("console runtime shutdown complete");
        Ok(())
    }
}

struct SessionLoop {
    session: Session,
    backend: Backend,
    scheduler: Scheduler,
    publisher: ReliablePublisher,
    store: StateStore,
    audit: AuditLogWriter,
    metrics: Option<ConsoleMetrics>,
    relay_calls: Option<mpsc::Sender<RelayCall>>,
    bus: InMemoryBus,
    clock: SharedClock,
    events: broadcast::Sender<SessionEvent>,
    view: watch::Sender<SessionView>,
    shutdown: broadcast::Sender<()>,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut inputs: mpsc::Receiver<OperatorInput>,
        mut sources: mpsc::Receiver<SourceEvent>,
        mut shutdown: broadcast::Receiver<()>,
        tasks: TaskSet,
    ) -> Result<()> {
        loop {
            let keep_running = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("session loop shutdown signal received");
                    false
                }
                input = inputs.recv() => match input {
                    Some(input) => {
                        self.handle_input(input);
                        true
                    }
                    None => false,
                },
                Some(event) = sources.recv() => {
                    self.handle_source(event);
                    true
                }
                tick = self.scheduler.next() => {
                    self.handle_tick(tick);
                    true
                }
            };
            let terminate = self.flush();
            if !keep_running || terminate {
                break;
            }
        }

        let _ = self.shutdown.send(());
        self.stop_backend();
        tasks.join().await;
        info!("session loop stopped");
        Ok(())
    }

    fn handle_input(&mut self, input: OperatorInput) {
        let refused = match input {
            OperatorInput::Command(command) => {
                let report = self.session.dispatch(command);
                if let Some(metrics) = &self.metrics {
                    metrics.record_command(report.command.into(), report.outcome.label());
                }
                None
            }
            OperatorInput::SelectOrder(id) => refusal(self.session.select_order(id)),
            OperatorInput::SelectStep(step) => {
                self.session.select_step(step);
                None
            }
            OperatorInput::StopReason(reason) => refusal(self.session.supply_stop_reason(&reason)),
            OperatorInput::CancelConfirmation => {
                self.session.cancel_confirmation();
                None
            }
            OperatorInput::SwitchOperator { operator, shift } => {
                self.session.switch_operator(operator, shift);
                None
            }
            OperatorInput::Enqueue(order) => {
                self.session.enqueue(order);
                None
            }
            OperatorInput::UpdateTarget { id, target_qty } => {
                refusal(self.session.update_target(&id, target_qty))
            }
            OperatorInput::DeleteOrder(id) => refusal(self.session.delete_order(&id)),
            OperatorInput::Renumber => {
                self.session.renumber();
                None
            }
            OperatorInput::SetSpeedFactor(factor) => match &mut self.backend {
                Backend::Simulated { engine, .. } => {
                    engine.machine_mut().set_speed_factor(factor);
                    info!(factor = engine.machine().speed_factor(), "simulated speed factor changed");
                    None
                }
                Backend::Relay { .. } => Some("speed factor applies to simulation only".to_string()),
            },
            OperatorInput::ToggleMotor => match &mut self.backend {
                Backend::Simulated { engine, .. } => {
                    let on = !engine.machine().motor_on();
                    engine.machine_mut().set_motor(on);
                    info!(on, "simulated motor toggled");
                    None
                }
                Backend::Relay { .. } => Some("motor control applies to simulation only".to_string()),
            },
        };
        if let Some(reason) = refused {
            info!(reason = %reason, "operator input refused");
            let _ = self.events.send(SessionEvent::InputRejected { reason });
        }
    }

    fn handle_source(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Sample { sample, source } => self.apply_sample(sample, source),
            SourceEvent::Connectivity { connected, source } => {
                self.session.set_connectivity(connected);
                if !connected {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_sample_error(source.into());
                    }
                }
            }
        }
    }

    fn apply_sample(&mut self, sample: Sample, source: SourceKind) {
        self.session.apply_sample(sample);
        if let Some(metrics) = &self.metrics {
            metrics.record_sample(
                source.into(),
                self.session.effective_speed(),
                self.session.relative_quantity(),
            );
        }
    }

    fn handle_tick(&mut self, tick: SchedulerTick) {
        match tick {
            SchedulerTick::Timer => {
                self.session.on_clock();
                let report = self.publisher.retry_due();
                if report.delivered > 0 {
                    info!(delivered = report.delivered, "queued completions delivered");
                }
                if report.dropped > 0 {
                    warn!(dropped = report.dropped, "completions abandoned after retries");
                }
            }
            SchedulerTick::Simulation => {
                let Backend::Simulated { engine, route } = &mut self.backend else {
                    return;
                };
                let sample = engine.next_sample(self.clock.now());
                match route {
                    SimulationRoute::Local => self.apply_sample(sample, SourceKind::Simulation),
                    SimulationRoute::Remote => {
                        if let Err(err) = self.bus.publish(Message::machine_update(sample)) {
                            warn!(error = %err, "simulated sample not published");
                            if let Some(metrics) = &self.metrics {
                                metrics.record_sample_error(SourceKind::Simulation.into());
                            }
                        }
                    }
                }
            }
            SchedulerTick::Poll => {
                if let Backend::Relay { poll } = &self.backend {
                    match poll.try_send(()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(())) => {
                            debug!("previous relay fetch still in flight, skipping poll");
                        }
                        Err(mpsc::error::TrySendError::Closed(())) => {
                            warn!("relay poller gone");
                        }
                    }
                }
            }
        }
    }

    /// Carry out pending effects and publish the new state. Returns whether
    /// the session asked to terminate.
    fn flush(&mut self) -> bool {
        let mut terminate = false;
        for effect in self.session.drain_effects() {
            match effect {
                Effect::AssignCurrentOrder(order) => self.call_relay(RelayCall::Assign(order)),
                Effect::ClearCurrentOrder => self.call_relay(RelayCall::Clear),
                Effect::ArchiveRecord(record) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_order_finished();
                    }
                    match self.store.record_production(record) {
                        Ok(len) => debug!(history = len, "production record archived"),
                        Err(err) => warn!(error = %err, "failed to archive production record"),
                    }
                }
                Effect::PublishCompletion(completion) => {
                    let order_id = completion.order_id.clone();
                    if let Err(err) = self.publisher.publish(Message::completion(completion)) {
                        warn!(order_id = %order_id, error = %err, "completion not published, will retry");
                        if let Some(metrics) = &self.metrics {
                            metrics.record_publish_failure();
                        }
                    }
                }
                Effect::PersistOrders(orders) => {
                    if let Err(err) = self.store.save_orders(&orders) {
                        warn!(error = %err, "failed to persist order queue");
                    }
                }
                Effect::Audit(entry) => {
                    info!(target: "audit", "{entry}");
                    if let Err(err) = self.audit.append(entry) {
                        warn!(error = %err, "failed to append audit entry");
                    }
                }
                Effect::SetMotor(on) => {
                    if let Backend::Simulated { engine, .. } = &mut self.backend {
                        engine.machine_mut().set_motor(on);
                    }
                }
                Effect::Terminate => terminate = true,
            }
        }
        for event in self.session.drain_events() {
            if let (SessionEvent::StopFlagged { .. }, Some(metrics)) = (&event, &self.metrics) {
                metrics.record_stop_episode();
            }
            let _ = self.events.send(event);
        }
        self.view.send_replace(self.session.view());
        terminate
    }

    fn call_relay(&self, call: RelayCall) {
        let Some(calls) = &self.relay_calls else {
            debug!(?call, "no relay configured, notification skipped");
            return;
        };
        if let Err(err) = calls.try_send(call) {
            warn!(error = %err, "relay notification queue full, dropping call");
        }
    }

    fn stop_backend(&mut self) {
        if let Backend::Simulated {
            engine,
            route: SimulationRoute::Remote,
        } = &mut self.backend
        {
            engine.machine_mut().set_motor(false);
            let sample = engine.next_sample(self.clock.now());
            if let Err(err) = self.bus.publish(Message::machine_update(sample)) {
                debug!(error = %err, "final simulated sample not published");
            }
        }
    }
}

fn refusal<T>(result: std::result::Result<T, GuardViolation>) -> Option<String> {
    result.err().map(|violation| violation.to_string())
}

/// Deliver current-order notifications in order, one at a time.
async fn notify_relay(
    relay: Arc<dyn TelemetryRelay>,
    mut calls: mpsc::Receiver<RelayCall>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            call = calls.recv() => {
                let Some(call) = call else { break };
                let result = match &call {
                    RelayCall::Assign(order) => relay.set_current_order(order).await,
                    RelayCall::Clear => relay.clear_current_order().await,
                };
                match result {
                    Ok(()) => debug!(?call, "relay notified"),
                    Err(err) => warn!(?call, error = %err, "relay notification failed"),
                }
            }
        }
    }
    Ok(())
}
