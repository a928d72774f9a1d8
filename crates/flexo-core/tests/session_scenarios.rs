//! ---
//! flx_section: "09-testing-qa"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "End-to-end shift scenarios driven through the session with a manual clock."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flexo_common::ManualClock;
use flexo_core::{
    Command, CommandOutcome, ConfirmationKind, Effect, FinishRequest, GuardViolation, Session,
    SessionEvent, SessionSettings, SlotView,
};
use flexo_msg::{Order, OrderStatus, Sample};

struct Shift {
    session: Session,
    clock: Arc<ManualClock>,
    count: f64,
}

impl Shift {
    fn new(settings: SessionSettings, orders: Vec<Order>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let session = Session::new(settings, clock.clone(), orders);
        Self {
            session,
            clock,
            count: 0.0,
        }
    }

    fn with_orders(orders: Vec<Order>) -> Self {
        let settings = SessionSettings {
            command_cooldown: Duration::ZERO,
            ..SessionSettings::default()
        };
        Self::new(settings, orders)
    }

    fn reading(&mut self, count: f64, speed: f64) {
        self.count = count;
        self.session.apply_sample(Sample {
            cumulative_count: count,
            line_speed: speed,
            status_code: i64::from(speed > 0.0),
            timestamp: Utc::now(),
        });
    }

    /// Hold `speed` for `secs` seconds, adding `per_sec` to the counter each second.
    fn run_for(&mut self, secs: u64, speed: f64, per_sec: f64) {
        for _ in 0..secs {
            self.clock.advance_secs(1);
            let next = self.count + per_sec;
            self.reading(next, speed);
            self.session.on_clock();
        }
    }

    fn dispatch(&mut self, command: Command) -> CommandOutcome {
        self.session.dispatch(command).outcome
    }

    fn running_no(&self) -> Option<String> {
        self.session
            .queue()
            .running()
            .map(|order| order.order_no.clone())
    }
}

fn order(no: &str, target: u64) -> Order {
    Order::new(no, format!("BX-{no}"), target)
}

fn started_shift(target: u64) -> Shift {
    let mut shift = Shift::with_orders(vec![order("A-100", target)]);
    shift.reading(1000.0, 0.0);
    assert!(shift.dispatch(Command::Start).is_applied());
    shift
}

#[test]
fn tare_gap_threshold_and_stop_reason_over_one_job() {
    let mut shift = started_shift(50);

    // the simulator advances the counter by speed / 60 each second
    shift.run_for(10, 50.0, 50.0 / 60.0);
    let view = shift.session.view();
    assert_eq!(view.offset, 1000.0);
    assert_eq!(view.relative_quantity, 8);
    assert_eq!(view.timers.job_run, 10);
    assert_eq!(view.timers.prep, 0);
    assert!(view.continuous_production);

    // 42 remaining is inside the 50 unit gap
    shift.run_for(60, 0.0, 0.0);
    assert!(shift.session.awaiting_reason_since().is_none());
    assert_eq!(shift.session.timers().job_stop, 60);

    let id = shift.session.queue().running().unwrap().id.clone();
    shift.session.update_target(&id, 100).unwrap();
    shift.run_for(1, 0.0, 0.0);
    assert!(shift.session.awaiting_reason_since().is_some());
    shift.run_for(30, 0.0, 0.0);

    let stop = shift.session.supply_stop_reason("Feed Skew").unwrap();
    assert_eq!(stop.duration_seconds, 30);
    assert_eq!(stop.reason_label, "Feed Skew");
    assert_eq!(stop.reason_code.as_deref(), Some("001"));
    assert_eq!(shift.session.stop_events(), &[stop]);
}

#[test]
fn answered_stop_is_not_asked_again_while_standing() {
    let mut shift = started_shift(1000);
    shift.run_for(5, 50.0, 2.0);
    assert_eq!(shift.session.relative_quantity(), 10);

    shift.run_for(1, 0.0, 0.0);
    let first = shift.session.awaiting_reason_since().unwrap();
    shift.run_for(30, 0.0, 0.0);
    shift.session.supply_stop_reason("Feed Skew").unwrap();
    shift.session.drain_events();

    shift.clock.advance(Duration::from_millis(100));
    let count = shift.count;
    shift.reading(count, 0.0);
    shift.run_for(20, 0.0, 0.0);
    assert!(shift.session.awaiting_reason_since().is_none());
    assert!(!shift
        .session
        .drain_events()
        .iter()
        .any(|event| matches!(event, SessionEvent::StopFlagged { .. })));
    assert_eq!(shift.session.stop_events().len(), 1);

    // moving again starts a fresh stop episode
    shift.run_for(2, 50.0, 2.0);
    shift.run_for(1, 0.0, 0.0);
    let second = shift.session.awaiting_reason_since().unwrap();
    assert!(second > first);
}

#[test]
fn job_seconds_start_at_the_job_boundary() {
    let mut shift = Shift::with_orders(vec![order("A-100", 500)]);
    shift.reading(1000.0, 0.0);
    shift.clock.advance(Duration::from_millis(600));
    assert!(shift.dispatch(Command::Start).is_applied());

    shift.clock.advance(Duration::from_millis(600));
    assert_eq!(shift.session.on_clock(), 0);
    assert_eq!(shift.session.timers().job_stop, 0);

    shift.clock.advance(Duration::from_millis(400));
    assert_eq!(shift.session.on_clock(), 1);
    assert_eq!(shift.session.timers().job_stop, 1);
}

#[test]
fn stopped_before_any_output_never_asks_for_a_reason() {
    let mut shift = started_shift(500);
    shift.run_for(60, 0.0, 0.0);

    assert!(shift.session.awaiting_reason_since().is_none());
    let view = shift.session.view();
    assert_eq!(view.timers.job_stop, 60);
    assert_eq!(view.timers.prep, 60);
}

#[test]
fn a_stall_opens_only_one_prompt() {
    let mut shift = started_shift(500);
    shift.run_for(5, 50.0, 2.0);
    shift.session.drain_events();
    shift.run_for(20, 0.0, 0.0);

    let flagged = shift
        .session
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::StopFlagged { .. }))
        .count();
    assert_eq!(flagged, 1);
}

#[test]
fn resuming_withdraws_the_stop_prompt() {
    let mut shift = started_shift(500);
    shift.run_for(5, 50.0, 2.0);
    shift.run_for(3, 0.0, 0.0);
    assert!(shift.session.awaiting_reason_since().is_some());
    shift.session.drain_events();

    shift.run_for(1, 50.0, 2.0);
    assert!(shift.session.awaiting_reason_since().is_none());
    assert!(shift
        .session
        .drain_events()
        .iter()
        .any(|event| matches!(event, SessionEvent::StopCleared)));
    assert_eq!(
        shift.session.supply_stop_reason("Low Ink"),
        Err(GuardViolation::NoPendingStop)
    );
}

#[test]
fn finish_requires_output_and_a_stopped_line() {
    let mut shift = started_shift(500);
    assert_eq!(
        shift.dispatch(Command::Finish),
        CommandOutcome::Rejected(GuardViolation::ZeroQuantity)
    );

    shift.run_for(4, 50.0, 5.0);
    assert!(matches!(
        shift.dispatch(Command::Finish),
        CommandOutcome::Rejected(GuardViolation::LineMoving { .. })
    ));

    shift.run_for(1, 0.0, 0.0);
    assert_eq!(
        shift.dispatch(Command::Finish),
        CommandOutcome::ConfirmationRequired(ConfirmationKind::Finish)
    );
}

#[test]
fn confirmed_finish_archives_then_promotes_next_order() {
    let mut shift = Shift::with_orders(vec![order("A-100", 500), order("A-200", 300)]);
    shift.reading(1000.0, 0.0);
    shift.dispatch(Command::Start);
    shift.run_for(10, 60.0, 3.0);
    shift.run_for(2, 0.0, 0.0);
    shift.session.drain_effects();

    shift.dispatch(Command::Finish);
    let outcome = shift.dispatch(Command::ConfirmFinish(FinishRequest {
        good_qty: None,
        defect_qty: 2,
        operator: None,
    }));
    assert!(outcome.is_applied(), "{outcome:?}");

    let effects = shift.session.drain_effects();
    let archived = effects
        .iter()
        .position(|effect| matches!(effect, Effect::ArchiveRecord(_)))
        .expect("record archived");
    let published = effects
        .iter()
        .position(|effect| matches!(effect, Effect::PublishCompletion(_)))
        .expect("completion published");
    assert!(archived < published);
    let Effect::ArchiveRecord(record) = &effects[archived] else {
        unreachable!()
    };
    assert_eq!(record.good_qty, 28);
    assert_eq!(record.defect_qty, 2);
    assert_eq!(record.run_minutes, 0.2);
    assert_eq!(record.stop_minutes, 0.0);

    assert_eq!(shift.running_no().as_deref(), Some("A-200"));
    let view = shift.session.view();
    assert_eq!(view.relative_quantity, 0);
    assert_eq!(view.timers.job_run, 0);
    assert_eq!(view.timers.day_run, 10);
    assert!(view.stop_events.is_empty());
}

#[test]
fn return_with_auto_next_promotes_the_next_order() {
    let mut shift = Shift::with_orders(vec![order("A-100", 500), order("A-200", 300)]);
    shift.reading(1000.0, 0.0);
    shift.dispatch(Command::Start);
    shift.run_for(3, 40.0, 2.0);
    shift.run_for(1, 0.0, 0.0);

    assert!(shift.dispatch(Command::Return).is_applied());
    assert_eq!(shift.running_no().as_deref(), Some("A-200"));
    let queued: Vec<_> = shift
        .session
        .queue()
        .queued()
        .iter()
        .map(|order| (order.order_no.as_str(), order.status))
        .collect();
    assert_eq!(queued, vec![("A-100", OrderStatus::Queued)]);
    assert_eq!(shift.session.relative_quantity(), 0);

    let view = shift.session.view();
    assert!(matches!(&view.slots[0], SlotView::Order { order } if order.order_no == "A-200"));
    assert_eq!(
        (view.timers.job_run, view.timers.job_stop, view.timers.prep),
        (0, 0, 0)
    );

    // no second passes with the placeholder in the running slot
    for _ in 0..5 {
        shift.run_for(1, 0.0, 0.0);
        let view = shift.session.view();
        assert!(!matches!(view.slots[0], SlotView::Placeholder));
        assert_eq!(shift.running_no().as_deref(), Some("A-200"));
    }
    let timers = shift.session.timers();
    assert_eq!((timers.job_run, timers.job_stop, timers.prep), (0, 5, 5));
}

#[test]
fn return_without_auto_next_leaves_the_slot_empty() {
    let mut shift = Shift::with_orders(vec![order("A-100", 500), order("A-200", 300)]);
    shift.reading(1000.0, 0.0);
    shift.dispatch(Command::Start);
    assert!(shift.dispatch(Command::ToggleAutoNext).is_applied());
    shift.session.drain_effects();

    assert!(shift.dispatch(Command::Return).is_applied());
    assert!(shift.running_no().is_none());
    assert_eq!(shift.session.queue().queued().len(), 2);
    assert_eq!(shift.session.queue().queued()[0].order_no, "A-100");
    assert!(shift
        .session
        .drain_effects()
        .iter()
        .any(|effect| matches!(effect, Effect::ClearCurrentOrder)));
}

#[test]
fn repeated_start_is_cooled_down() {
    let settings = SessionSettings {
        command_cooldown: Duration::from_millis(1000),
        ..SessionSettings::default()
    };
    let mut shift = Shift::new(settings, vec![order("A-100", 500)]);
    shift.reading(1000.0, 0.0);

    assert!(shift.dispatch(Command::Start).is_applied());
    assert!(matches!(
        shift.dispatch(Command::Start),
        CommandOutcome::Rejected(GuardViolation::CoolingDown { .. })
    ));
    // other commands keep their own cooldown
    assert!(shift.dispatch(Command::ToggleAutoNext).is_applied());

    shift.clock.advance(Duration::from_millis(1001));
    assert!(shift.dispatch(Command::Start).is_applied());
}

#[test]
fn disconnected_source_blocks_start() {
    let mut shift = Shift::with_orders(vec![order("A-100", 500)]);
    assert_eq!(
        shift.dispatch(Command::Start),
        CommandOutcome::Rejected(GuardViolation::PlcDisconnected)
    );
    shift.reading(1000.0, 0.0);
    shift.session.set_connectivity(false);
    assert_eq!(
        shift.dispatch(Command::Start),
        CommandOutcome::Rejected(GuardViolation::PlcDisconnected)
    );
}

#[test]
fn day_counters_accumulate_across_jobs() {
    let mut shift = Shift::with_orders(vec![order("A-100", 500), order("A-200", 300)]);
    shift.reading(1000.0, 0.0);
    shift.dispatch(Command::Start);
    shift.run_for(6, 30.0, 1.0);
    shift.run_for(4, 0.0, 0.0);
    shift.dispatch(Command::Return);
    shift.run_for(5, 30.0, 1.0);

    let timers = shift.session.timers();
    assert_eq!(timers.job_run, 5);
    assert_eq!(timers.job_stop, 0);
    assert_eq!(timers.day_run, 11);
    assert_eq!(timers.day_stop, 4);
    assert_eq!(
        timers.day_run + timers.day_stop,
        15,
        "every elapsed second counts exactly once"
    );
}

#[test]
fn quantity_corrections_move_the_offset() {
    let mut shift = started_shift(500);
    shift.run_for(2, 20.0, 5.0);
    assert_eq!(shift.session.relative_quantity(), 10);

    shift.dispatch(Command::QuantityUp);
    shift.dispatch(Command::QuantityUp);
    shift.dispatch(Command::QuantityDown);
    assert_eq!(shift.session.relative_quantity(), 11);
    assert_eq!(shift.session.offset().offset(), 999.0);
}

#[test]
fn exit_needs_a_second_confirmation() {
    let mut shift = Shift::with_orders(Vec::new());
    assert_eq!(
        shift.dispatch(Command::Exit { confirmed: false }),
        CommandOutcome::ConfirmationRequired(ConfirmationKind::Exit)
    );
    assert!(!shift
        .session
        .drain_effects()
        .iter()
        .any(|effect| matches!(effect, Effect::Terminate)));

    assert!(shift.dispatch(Command::Exit { confirmed: true }).is_applied());
    assert!(shift
        .session
        .drain_effects()
        .iter()
        .any(|effect| matches!(effect, Effect::Terminate)));
}
