//! ---
//! flx_section: "01-core-functionality"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Order queue with a single running head slot."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! The queue is shown as a list whose index 0 is either the running order or
//! a waiting placeholder. Storing the head separately from the queued tail
//! makes "at most one running order, and only at index 0" hold by
//! construction.

use flexo_msg::{Order, OrderId, OrderStatus};
use tracing::warn;

use crate::GuardViolation;

/// One position of the displayed queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueueSlot<'a> {
    Placeholder,
    Order(&'a Order),
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// A queued order was promoted into the head slot.
    Started(Order),
    /// Something was already running; only the relay needs re-syncing.
    AlreadyRunning(Order),
}

/// A head order leaving the line, and whatever replaced it.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadChange {
    pub previous: Order,
    pub promoted: Option<Order>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderQueue {
    running: Option<Order>,
    queued: Vec<Order>,
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted orders. The first running order keeps the head;
    /// extra running orders are demoted and finished ones dropped.
    pub fn from_orders(orders: Vec<Order>) -> Self {
        let mut queue = Self::default();
        for mut order in orders {
            match order.status {
                OrderStatus::Finished => continue,
                OrderStatus::Running if queue.running.is_none() => queue.running = Some(order),
                OrderStatus::Running => {
                    warn!(order = %order.id, "second running order demoted to queued");
                    order.status = OrderStatus::Queued;
                    queue.queued.push(order);
                }
                OrderStatus::Queued => queue.queued.push(order),
            }
        }
        queue
    }

    /// Orders in display order, for persistence.
    pub fn to_orders(&self) -> Vec<Order> {
        self.running.iter().chain(self.queued.iter()).cloned().collect()
    }

    pub fn running(&self) -> Option<&Order> {
        self.running.as_ref()
    }

    pub fn queued(&self) -> &[Order] {
        &self.queued
    }

    /// Number of displayed slots, the head included.
    pub fn len(&self) -> usize {
        1 + self.queued.len()
    }

    /// The head slot always exists.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn slot(&self, index: usize) -> Option<QueueSlot<'_>> {
        match index {
            0 => Some(match &self.running {
                Some(order) => QueueSlot::Order(order),
                None => QueueSlot::Placeholder,
            }),
            n => self.queued.get(n - 1).map(QueueSlot::Order),
        }
    }

    pub fn slots(&self) -> Vec<QueueSlot<'_>> {
        (0..self.len()).filter_map(|idx| self.slot(idx)).collect()
    }

    pub fn index_of(&self, id: &OrderId) -> Option<usize> {
        if self.running.as_ref().is_some_and(|order| &order.id == id) {
            return Some(0);
        }
        self.queued
            .iter()
            .position(|order| &order.id == id)
            .map(|pos| pos + 1)
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.running
            .iter()
            .chain(self.queued.iter())
            .find(|order| &order.id == id)
    }

    /// Append a new order at the tail. Returns its slot index.
    pub fn enqueue(&mut self, mut order: Order) -> usize {
        order.status = OrderStatus::Queued;
        if order.seq_no == 0 {
            order.seq_no = (self.len() as u32 + 1) * 10;
        }
        self.queued.push(order);
        self.len() - 1
    }

    /// Promote `selected` into the head slot if nothing is running.
    pub fn start(&mut self, selected: Option<&OrderId>) -> Result<StartOutcome, GuardViolation> {
        if let Some(running) = &self.running {
            return Ok(StartOutcome::AlreadyRunning(running.clone()));
        }
        let id = selected.ok_or(GuardViolation::NoOrderSelected)?;
        let pos = self
            .queued
            .iter()
            .position(|order| &order.id == id)
            .ok_or_else(|| GuardViolation::UnknownOrder(id.clone()))?;
        let mut order = self.queued.remove(pos);
        order.status = OrderStatus::Running;
        self.running = Some(order.clone());
        Ok(StartOutcome::Started(order))
    }

    /// Remove the finished head and promote the next queued order, if any.
    pub fn finish(&mut self) -> Result<HeadChange, GuardViolation> {
        let mut finished = self.running.take().ok_or(GuardViolation::NothingRunning)?;
        finished.status = OrderStatus::Finished;
        let promoted = self.promote_next();
        Ok(HeadChange {
            previous: finished,
            promoted,
        })
    }

    /// Put the running order back at index 1.
    ///
    /// With `auto_next` the next queued order takes the head in the same step;
    /// otherwise the head becomes the placeholder.
    pub fn return_running(&mut self, auto_next: bool) -> Result<HeadChange, GuardViolation> {
        let mut returned = self.running.take().ok_or(GuardViolation::NothingRunning)?;
        returned.status = OrderStatus::Queued;
        let promoted = if auto_next { self.promote_next() } else { None };
        self.queued.insert(0, returned.clone());
        Ok(HeadChange {
            previous: returned,
            promoted,
        })
    }

    fn promote_next(&mut self) -> Option<Order> {
        if self.queued.is_empty() {
            return None;
        }
        let mut next = self.queued.remove(0);
        next.status = OrderStatus::Running;
        self.running = Some(next.clone());
        Some(next)
    }

    /// Swap a queued order with its upper neighbour. Returns the new index.
    pub fn move_up(&mut self, id: &OrderId) -> Result<usize, GuardViolation> {
        let pos = self.queued_position(id)?;
        if pos == 0 {
            return Err(GuardViolation::QueueEdge);
        }
        self.queued.swap(pos, pos - 1);
        Ok(pos)
    }

    /// Swap a queued order with its lower neighbour. Returns the new index.
    pub fn move_down(&mut self, id: &OrderId) -> Result<usize, GuardViolation> {
        let pos = self.queued_position(id)?;
        if pos + 1 >= self.queued.len() {
            return Err(GuardViolation::QueueEdge);
        }
        self.queued.swap(pos, pos + 1);
        Ok(pos + 2)
    }

    pub fn delete(&mut self, id: &OrderId) -> Result<Order, GuardViolation> {
        let pos = self.queued_position(id)?;
        Ok(self.queued.remove(pos))
    }

    pub fn update_target(&mut self, id: &OrderId, target_qty: u64) -> Result<(), GuardViolation> {
        if target_qty == 0 {
            return Err(GuardViolation::ZeroTarget);
        }
        let order = self
            .running
            .iter_mut()
            .chain(self.queued.iter_mut())
            .find(|order| &order.id == id)
            .ok_or_else(|| GuardViolation::UnknownOrder(id.clone()))?;
        order.target_qty = target_qty;
        Ok(())
    }

    /// Sequence numbers follow slot positions: (index + 1) * 10.
    pub fn renumber(&mut self) {
        if let Some(order) = self.running.as_mut() {
            order.seq_no = 10;
        }
        for (pos, order) in self.queued.iter_mut().enumerate() {
            order.seq_no = (pos as u32 + 2) * 10;
        }
    }

    fn queued_position(&self, id: &OrderId) -> Result<usize, GuardViolation> {
        if self.running.as_ref().is_some_and(|order| &order.id == id) {
            return Err(GuardViolation::RunningOrderLocked);
        }
        self.queued
            .iter()
            .position(|order| &order.id == id)
            .ok_or_else(|| GuardViolation::UnknownOrder(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(n: usize) -> (OrderQueue, Vec<OrderId>) {
        let mut queue = OrderQueue::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let order = Order::new(format!("SO-{i}"), format!("BX-{i}"), 100);
            ids.push(order.id.clone());
            queue.enqueue(order);
        }
        (queue, ids)
    }

    fn assert_single_running_head(queue: &OrderQueue) {
        for order in queue.queued() {
            assert_eq!(order.status, OrderStatus::Queued);
        }
        if let Some(order) = queue.running() {
            assert_eq!(order.status, OrderStatus::Running);
        }
    }

    #[test]
    fn empty_queue_shows_placeholder() {
        let queue = OrderQueue::new();
        assert_eq!(queue.slots(), vec![QueueSlot::Placeholder]);
    }

    #[test]
    fn start_requires_selection_and_promotes() {
        let (mut queue, ids) = queue_of(3);
        assert_eq!(queue.start(None), Err(GuardViolation::NoOrderSelected));
        let outcome = queue.start(Some(&ids[1])).unwrap();
        assert!(matches!(outcome, StartOutcome::Started(ref o) if o.id == ids[1]));
        assert_eq!(queue.index_of(&ids[1]), Some(0));
        assert_eq!(queue.index_of(&ids[0]), Some(1));
        assert_eq!(queue.index_of(&ids[2]), Some(2));
        assert_single_running_head(&queue);

        let again = queue.start(Some(&ids[0])).unwrap();
        assert!(matches!(again, StartOutcome::AlreadyRunning(ref o) if o.id == ids[1]));
    }

    #[test]
    fn finish_promotes_next_or_leaves_placeholder() {
        let (mut queue, ids) = queue_of(2);
        queue.start(Some(&ids[0])).unwrap();
        let change = queue.finish().unwrap();
        assert_eq!(change.previous.status, OrderStatus::Finished);
        assert_eq!(change.promoted.as_ref().map(|o| &o.id), Some(&ids[1]));
        assert_single_running_head(&queue);

        let change = queue.finish().unwrap();
        assert!(change.promoted.is_none());
        assert_eq!(queue.slots(), vec![QueueSlot::Placeholder]);
        assert_eq!(queue.finish(), Err(GuardViolation::NothingRunning));
    }

    #[test]
    fn return_with_auto_next_swaps_head() {
        let (mut queue, ids) = queue_of(2);
        queue.start(Some(&ids[0])).unwrap();
        let change = queue.return_running(true).unwrap();
        assert_eq!(change.promoted.as_ref().map(|o| &o.id), Some(&ids[1]));
        assert_eq!(queue.index_of(&ids[1]), Some(0));
        assert_eq!(queue.index_of(&ids[0]), Some(1));
        assert_single_running_head(&queue);
    }

    #[test]
    fn return_without_auto_next_leaves_placeholder() {
        let (mut queue, ids) = queue_of(2);
        queue.start(Some(&ids[0])).unwrap();
        let change = queue.return_running(false).unwrap();
        assert!(change.promoted.is_none());
        assert_eq!(queue.slot(0), Some(QueueSlot::Placeholder));
        assert_eq!(queue.index_of(&ids[0]), Some(1));
        assert_eq!(queue.index_of(&ids[1]), Some(2));
    }

    #[test]
    fn running_order_cannot_move_or_be_deleted() {
        let (mut queue, ids) = queue_of(3);
        queue.start(Some(&ids[0])).unwrap();
        assert_eq!(queue.move_up(&ids[0]), Err(GuardViolation::RunningOrderLocked));
        assert_eq!(queue.move_down(&ids[0]), Err(GuardViolation::RunningOrderLocked));
        assert_eq!(queue.delete(&ids[0]), Err(GuardViolation::RunningOrderLocked));
    }

    #[test]
    fn moves_stay_below_the_head() {
        let (mut queue, ids) = queue_of(3);
        assert_eq!(queue.move_up(&ids[0]), Err(GuardViolation::QueueEdge));
        assert_eq!(queue.move_down(&ids[2]), Err(GuardViolation::QueueEdge));
        assert_eq!(queue.move_down(&ids[0]), Ok(2));
        assert_eq!(queue.move_up(&ids[2]), Ok(2));
        let order: Vec<_> = queue.queued().iter().map(|o| o.id.clone()).collect();
        assert_eq!(order, vec![ids[1].clone(), ids[2].clone(), ids[0].clone()]);
    }

    #[test]
    fn renumber_follows_slots() {
        let (mut queue, ids) = queue_of(3);
        queue.start(Some(&ids[2])).unwrap();
        queue.renumber();
        let seqs: Vec<u32> = queue.to_orders().iter().map(|o| o.seq_no).collect();
        assert_eq!(seqs, vec![10, 20, 30]);
    }

    #[test]
    fn reload_keeps_a_single_running_head() {
        let mut a = Order::new("SO-A", "BX-A", 10);
        a.status = OrderStatus::Running;
        let mut b = Order::new("SO-B", "BX-B", 10);
        b.status = OrderStatus::Running;
        let mut c = Order::new("SO-C", "BX-C", 10);
        c.status = OrderStatus::Finished;
        let queue = OrderQueue::from_orders(vec![a.clone(), b.clone(), c]);
        assert_eq!(queue.running().map(|o| &o.id), Some(&a.id));
        assert_eq!(queue.queued().len(), 1);
        assert_single_running_head(&queue);
    }

    #[test]
    fn update_target_rejects_zero_and_unknown() {
        let (mut queue, ids) = queue_of(1);
        assert_eq!(queue.update_target(&ids[0], 0), Err(GuardViolation::ZeroTarget));
        let ghost = OrderId::from("ghost");
        assert_eq!(
            queue.update_target(&ghost, 5),
            Err(GuardViolation::UnknownOrder(ghost.clone()))
        );
        queue.update_target(&ids[0], 250).unwrap();
        assert_eq!(queue.get(&ids[0]).map(|o| o.target_qty), Some(250));
    }
}
