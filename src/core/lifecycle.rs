//! Customer lifecycle: slot allocation, mean-share seeding, and the
//! two-phase disconnect.
//!
//! Disconnect is split so a live notifier can never observe a recycled slot:
//! phase one releases any held tool, dequeues a waiter, and clears the
//! allocation flag (the notifier's exit condition); the caller then joins
//! the notifier and runs phase two, which settles the aggregates and returns
//! the slot to the free list.

use tracing::{debug, error, warn};

use crate::core::error::SchedulerError;
use crate::core::state::{CustomerState, ReleaseKind, SchedulerState, SlotId};

impl SchedulerState {
    /// Allocate a customer slot for a new connection.
    ///
    /// The newcomer's initial share is the current mean share, so it neither
    /// leapfrogs long-running customers (share 0 would) nor carries a
    /// permanent handicap (the maximum share would). With no existing
    /// customers the initial share is `0`.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the arena is full; existing customers are
    /// unaffected.
    pub fn allocate(&mut self, external_id: u64) -> Result<SlotId, SchedulerError> {
        let initial_share = self.mean_share();
        let Some(slot) = self.free_slots_mut().pop() else {
            warn!(external_id, capacity = self.arena_capacity(), "customer arena full");
            return Err(SchedulerError::CapacityExceeded(self.arena_capacity()));
        };

        let c = self.customer_mut(slot);
        c.external_id = external_id;
        c.allocated = true;
        c.state = CustomerState::Resting;
        c.share = initial_share;
        c.request_ms = 0;
        c.remaining_ms = 0;
        c.current_tool = None;
        c.session_start = 0;
        c.wait_start = 0;
        c.pending_event = None;

        self.add_total_customers(1);
        self.add_resting(1);
        self.add_total_share(initial_share);

        debug!(external_id, slot, share = initial_share, "customer allocated");
        Ok(slot)
    }

    /// Disconnect phase one: detach the customer from scheduling.
    ///
    /// Releases a held tool (handing it straight to the best waiter),
    /// dequeues a waiting customer, and clears the allocation flag so the
    /// notifier exits. Returns the slots whose notifiers must be woken; the
    /// departing slot is always included.
    pub fn begin_disconnect(&mut self, slot: SlotId, now: u64) -> Vec<SlotId> {
        let mut woken = Vec::new();
        if !self.customer(slot).allocated {
            return woken;
        }

        match self.customer(slot).state {
            CustomerState::Using => {
                let tool = self.customer(slot).current_tool;
                self.release_tool(slot, ReleaseKind::Left, now, &mut woken);
                self.customer_mut(slot).state = CustomerState::Resting;
                self.add_resting(1);
                if let Some(tool) = tool {
                    self.assign_next_from_queue(tool, now, &mut woken);
                }
            }
            CustomerState::Waiting => {
                if self.heap().contains(slot) {
                    let _ = self.heap_mut().remove(slot);
                }
                self.add_waiting(-1);
                self.customer_mut(slot).state = CustomerState::Resting;
                self.add_resting(1);
            }
            CustomerState::Resting | CustomerState::Deleted => {}
        }

        self.customer_mut(slot).allocated = false;
        if !woken.contains(&slot) {
            woken.push(slot);
        }
        woken
    }

    /// Disconnect phase two: settle aggregates and recycle the slot.
    ///
    /// Runs after [`begin_disconnect`](SchedulerState::begin_disconnect) has
    /// detached the customer and its notifier has been joined, so the record
    /// is always `Resting` here. Idempotent: a slot already recycled is left
    /// alone. A slot still attached to scheduling is a logged error and is
    /// not recycled, so a live tool or queue binding can never dangle into
    /// the free list.
    pub fn finish_disconnect(&mut self, slot: SlotId) {
        let c = self.customer(slot);
        match c.state {
            CustomerState::Resting => {}
            CustomerState::Deleted => return,
            CustomerState::Waiting | CustomerState::Using => {
                error!(slot, state = ?c.state, "finish_disconnect without begin_disconnect");
                return;
            }
        }
        let share = c.share;
        let external_id = c.external_id;

        self.add_resting(-1);
        self.add_total_customers(-1);
        self.add_total_share(-share);

        let c = self.customer_mut(slot);
        c.allocated = false;
        c.state = CustomerState::Deleted;
        c.external_id = 0;
        c.current_tool = None;
        c.pending_event = None;

        self.free_slots_mut().push(slot);
        debug!(external_id, slot, "customer deallocated");
    }
}
