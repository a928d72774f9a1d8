//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Operator command vocabulary, guards and cooldown."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use flexo_msg::OrderId;
use serde::{Deserialize, Serialize};
use strum::{EnumDiscriminants, EnumIter, IntoEnumIterator};

use crate::queue::OrderQueue;
use crate::GuardViolation;

/// Operator-supplied figures for confirming a finish. Missing values fall
/// back to the session's quantity and operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    pub good_qty: Option<u64>,
    pub defect_qty: u64,
    pub operator: Option<String>,
}

/// Everything the operator can ask of the console.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(CommandKind))]
#[strum_discriminants(derive(Hash, EnumIter, strum::Display, strum::IntoStaticStr, Serialize))]
#[strum_discriminants(strum(serialize_all = "snake_case"), serde(rename_all = "snake_case"))]
pub enum Command {
    MoveUp,
    MoveDown,
    OpenOrderDetail,
    Start,
    Finish,
    ConfirmFinish(FinishRequest),
    QuantityUp,
    QuantityDown,
    ToggleAutoNext,
    SwitchOperator,
    Return,
    Exit { confirmed: bool },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        CommandKind::from(self)
    }

    /// Function-key binding of the console keyboard.
    pub fn from_function_key(key: u8) -> Option<Command> {
        Some(match key {
            1 => Command::MoveUp,
            2 => Command::MoveDown,
            3 => Command::Start,
            4 => Command::Finish,
            5 => Command::QuantityUp,
            6 => Command::QuantityDown,
            7 => Command::OpenOrderDetail,
            8 => Command::ToggleAutoNext,
            9 => Command::SwitchOperator,
            10 => Command::Return,
            12 => Command::Exit { confirmed: false },
            _ => return None,
        })
    }
}

impl CommandKind {
    pub fn function_key(self) -> Option<u8> {
        match self {
            CommandKind::MoveUp => Some(1),
            CommandKind::MoveDown => Some(2),
            CommandKind::Start => Some(3),
            CommandKind::Finish => Some(4),
            CommandKind::QuantityUp => Some(5),
            CommandKind::QuantityDown => Some(6),
            CommandKind::OpenOrderDetail => Some(7),
            CommandKind::ToggleAutoNext => Some(8),
            CommandKind::SwitchOperator => Some(9),
            CommandKind::Return => Some(10),
            CommandKind::Exit => Some(12),
            CommandKind::ConfirmFinish => None,
        }
    }

    /// Commands that change line or queue state too much to allow repeats.
    pub fn has_cooldown(self) -> bool {
        matches!(
            self,
            CommandKind::Start
                | CommandKind::Finish
                | CommandKind::ConfirmFinish
                | CommandKind::Return
                | CommandKind::Exit
        )
    }

    /// Key-bound commands in key order, for help lines.
    pub fn keyed() -> Vec<(u8, CommandKind)> {
        let mut keys: Vec<_> = CommandKind::iter()
            .filter_map(|kind| kind.function_key().map(|key| (key, kind)))
            .collect();
        keys.sort_by_key(|(key, _)| *key);
        keys
    }
}

/// Session facts the guards look at.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandGuardContext {
    pub speed: f64,
    pub is_plc_connected: bool,
    pub selected_order_id: Option<OrderId>,
    pub auto_next_enabled: bool,
    pub relative_quantity: i64,
    pub finish_pending: bool,
}

/// Check a command's preconditions. Pure: nothing is mutated here.
pub fn check_guard(
    command: &Command,
    ctx: &CommandGuardContext,
    queue: &OrderQueue,
) -> Result<(), GuardViolation> {
    match command {
        Command::MoveUp | Command::MoveDown => {
            let id = ctx
                .selected_order_id
                .as_ref()
                .ok_or(GuardViolation::NoOrderSelected)?;
            match queue.index_of(id) {
                None => Err(GuardViolation::UnknownOrder(id.clone())),
                Some(0) => Err(GuardViolation::RunningOrderLocked),
                Some(_) => Ok(()),
            }
        }
        Command::Start => {
            if !ctx.is_plc_connected {
                return Err(GuardViolation::PlcDisconnected);
            }
            if queue.running().is_some() {
                return Ok(());
            }
            let id = ctx
                .selected_order_id
                .as_ref()
                .ok_or(GuardViolation::NoOrderSelected)?;
            match queue.index_of(id) {
                Some(idx) if idx > 0 => Ok(()),
                _ => Err(GuardViolation::NoOrderSelected),
            }
        }
        Command::Finish => finish_guard(ctx, queue),
        Command::ConfirmFinish(request) => {
            if !ctx.finish_pending {
                return Err(GuardViolation::NoConfirmationPending);
            }
            finish_guard(ctx, queue)?;
            let produced = ctx.relative_quantity.max(0) as u64;
            if request.good_qty.is_none() && request.defect_qty > produced {
                return Err(GuardViolation::DefectsExceedOutput {
                    defect: request.defect_qty,
                    produced,
                });
            }
            Ok(())
        }
        Command::Return => {
            stopped(ctx)?;
            queue
                .running()
                .map(|_| ())
                .ok_or(GuardViolation::NothingRunning)
        }
        Command::OpenOrderDetail
        | Command::QuantityUp
        | Command::QuantityDown
        | Command::ToggleAutoNext
        | Command::SwitchOperator
        | Command::Exit { .. } => Ok(()),
    }
}

fn stopped(ctx: &CommandGuardContext) -> Result<(), GuardViolation> {
    if ctx.speed != 0.0 {
        return Err(GuardViolation::LineMoving { speed: ctx.speed });
    }
    Ok(())
}

fn finish_guard(ctx: &CommandGuardContext, queue: &OrderQueue) -> Result<(), GuardViolation> {
    stopped(ctx)?;
    if queue.running().is_none() {
        return Err(GuardViolation::NothingRunning);
    }
    if ctx.relative_quantity <= 0 {
        return Err(GuardViolation::ZeroQuantity);
    }
    Ok(())
}

/// Per-kind cooldown on the monotonic clock.
///
/// Only accepted invocations arm the cooldown, so a rejected press does not
/// lock the operator out.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    cooldown: Duration,
    last_accepted: HashMap<CommandKind, Duration>,
}

impl CommandDispatcher {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: HashMap::new(),
        }
    }

    pub fn check_cooldown(&self, kind: CommandKind, now: Duration) -> Result<(), GuardViolation> {
        if !kind.has_cooldown() {
            return Ok(());
        }
        match self.last_accepted.get(&kind) {
            Some(last) if now.saturating_sub(*last) < self.cooldown => {
                let remaining = self.cooldown - now.saturating_sub(*last);
                Err(GuardViolation::CoolingDown {
                    command: kind,
                    remaining_ms: remaining.as_millis() as u64,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn record_accepted(&mut self, kind: CommandKind, now: Duration) {
        if kind.has_cooldown() {
            self.last_accepted.insert(kind, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexo_msg::Order;

    fn ctx() -> CommandGuardContext {
        CommandGuardContext {
            speed: 0.0,
            is_plc_connected: true,
            selected_order_id: None,
            auto_next_enabled: true,
            relative_quantity: 0,
            finish_pending: false,
        }
    }

    fn queue_with(n: usize) -> (OrderQueue, Vec<OrderId>) {
        let mut queue = OrderQueue::new();
        let ids = (0..n)
            .map(|i| {
                let order = Order::new(format!("SO-{i}"), "BX", 100);
                let id = order.id.clone();
                queue.enqueue(order);
                id
            })
            .collect();
        (queue, ids)
    }

    #[test]
    fn function_keys_round_trip() {
        for (key, kind) in CommandKind::keyed() {
            let command = Command::from_function_key(key).unwrap();
            assert_eq!(command.kind(), kind);
        }
        assert_eq!(Command::from_function_key(11), None);
        assert_eq!(CommandKind::keyed().len(), 11);
        assert_eq!(CommandKind::iter().count(), 12);
    }

    #[test]
    fn command_names_are_snake_case() {
        assert_eq!(CommandKind::ConfirmFinish.to_string(), "confirm_finish");
        assert_eq!(CommandKind::QuantityUp.to_string(), "quantity_up");
    }

    #[test]
    fn start_needs_connection_and_selection() {
        let (queue, ids) = queue_with(2);
        let mut ctx = ctx();
        ctx.is_plc_connected = false;
        assert_eq!(
            check_guard(&Command::Start, &ctx, &queue),
            Err(GuardViolation::PlcDisconnected)
        );
        ctx.is_plc_connected = true;
        assert_eq!(
            check_guard(&Command::Start, &ctx, &queue),
            Err(GuardViolation::NoOrderSelected)
        );
        ctx.selected_order_id = Some(ids[1].clone());
        assert_eq!(check_guard(&Command::Start, &ctx, &queue), Ok(()));
    }

    #[test]
    fn finish_requires_stopped_line_and_output() {
        let (mut queue, ids) = queue_with(1);
        let mut ctx = ctx();
        assert_eq!(
            check_guard(&Command::Finish, &ctx, &queue),
            Err(GuardViolation::NothingRunning)
        );
        queue.start(Some(&ids[0])).unwrap();
        assert_eq!(
            check_guard(&Command::Finish, &ctx, &queue),
            Err(GuardViolation::ZeroQuantity)
        );
        ctx.relative_quantity = 12;
        ctx.speed = 80.0;
        assert_eq!(
            check_guard(&Command::Finish, &ctx, &queue),
            Err(GuardViolation::LineMoving { speed: 80.0 })
        );
        ctx.speed = 0.0;
        assert_eq!(check_guard(&Command::Finish, &ctx, &queue), Ok(()));
    }

    #[test]
    fn confirm_requires_pending_finish() {
        let (mut queue, ids) = queue_with(1);
        queue.start(Some(&ids[0])).unwrap();
        let mut ctx = ctx();
        ctx.relative_quantity = 10;
        let confirm = Command::ConfirmFinish(FinishRequest::default());
        assert_eq!(
            check_guard(&confirm, &ctx, &queue),
            Err(GuardViolation::NoConfirmationPending)
        );
        ctx.finish_pending = true;
        assert_eq!(check_guard(&confirm, &ctx, &queue), Ok(()));
        let too_many = Command::ConfirmFinish(FinishRequest {
            defect_qty: 11,
            ..FinishRequest::default()
        });
        assert!(matches!(
            check_guard(&too_many, &ctx, &queue),
            Err(GuardViolation::DefectsExceedOutput { .. })
        ));
    }

    #[test]
    fn moves_exclude_the_running_slot() {
        let (mut queue, ids) = queue_with(2);
        queue.start(Some(&ids[0])).unwrap();
        let mut ctx = ctx();
        ctx.selected_order_id = Some(ids[0].clone());
        assert_eq!(
            check_guard(&Command::MoveDown, &ctx, &queue),
            Err(GuardViolation::RunningOrderLocked)
        );
        ctx.selected_order_id = Some(ids[1].clone());
        assert_eq!(check_guard(&Command::MoveUp, &ctx, &queue), Ok(()));
    }

    #[test]
    fn cooldown_applies_per_kind_after_acceptance() {
        let mut dispatcher = CommandDispatcher::new(Duration::from_millis(1000));
        let t0 = Duration::from_secs(10);
        assert!(dispatcher.check_cooldown(CommandKind::Start, t0).is_ok());
        dispatcher.record_accepted(CommandKind::Start, t0);

        let soon = t0 + Duration::from_millis(400);
        assert_eq!(
            dispatcher.check_cooldown(CommandKind::Start, soon),
            Err(GuardViolation::CoolingDown {
                command: CommandKind::Start,
                remaining_ms: 600
            })
        );
        assert!(dispatcher.check_cooldown(CommandKind::Return, soon).is_ok());
        assert!(dispatcher
            .check_cooldown(CommandKind::Start, t0 + Duration::from_millis(1000))
            .is_ok());
    }

    #[test]
    fn quantity_keys_have_no_cooldown() {
        let mut dispatcher = CommandDispatcher::new(Duration::from_secs(1));
        let now = Duration::from_secs(1);
        dispatcher.record_accepted(CommandKind::QuantityUp, now);
        assert!(dispatcher.check_cooldown(CommandKind::QuantityUp, now).is_ok());
    }
}
