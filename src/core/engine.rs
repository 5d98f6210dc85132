//! Fairness and preemption engine.
//!
//! Three entry points mutate the state machine under the global mutex:
//! [`handle_request`](SchedulerState::handle_request),
//! [`handle_rest`](SchedulerState::handle_rest), and
//! [`tick_tool`](SchedulerState::tick_tool). Each takes the current
//! monotonic time explicitly and returns the slots whose notifiers must be
//! woken, so the engine itself stays free of clocks and condition variables
//! and tests can drive virtual time.
//!
//! At every decision point `elapsed = now - session_start` is authoritative;
//! the cached per-tool `current_usage_ms` is refreshed on ticks and feeds
//! reports only.

use std::cmp::Reverse;

use tracing::info;

use crate::core::state::{CustomerState, ReleaseKind, SchedulerState, SlotId, ToolEvent, ToolId};

impl SchedulerState {
    /// Handle `REQUEST <duration_ms>` from the customer at `slot`.
    ///
    /// Resolution order: a free tool (least `total_usage_ms`, ties to the
    /// smallest id), then preemption of the longest-running session provided
    /// the victim's share is high enough and it has held its tool at least
    /// `q`, otherwise the requester joins the waiting queue keyed by its
    /// share.
    ///
    /// A re-request while already `Using` only restates the durations; the
    /// current binding and `session_start` are kept.
    pub fn handle_request(&mut self, slot: SlotId, duration_ms: u64, now: u64) -> Vec<SlotId> {
        let mut woken = Vec::new();
        if !self.customer(slot).allocated {
            return woken;
        }

        if self.customer(slot).state == CustomerState::Using {
            let c = self.customer_mut(slot);
            let elapsed = now.saturating_sub(c.session_start);
            c.request_ms = duration_ms;
            c.remaining_ms = duration_ms.saturating_sub(elapsed);
            return woken;
        }

        // Leave the prior state; the customer is uncounted until it lands in
        // Using or Waiting below.
        match self.customer(slot).state {
            CustomerState::Resting => self.add_resting(-1),
            CustomerState::Waiting => {
                if self.heap().contains(slot) {
                    let _ = self.heap_mut().remove(slot);
                }
                self.add_waiting(-1);
                self.customer_mut(slot).state = CustomerState::Resting;
            }
            CustomerState::Using | CustomerState::Deleted => {}
        }

        let c = self.customer_mut(slot);
        c.request_ms = duration_ms;
        c.remaining_ms = duration_ms;
        let share = c.share;

        if let Some(tool) = self.find_free_tool() {
            self.assign_tool(slot, tool, now, &mut woken);
        } else if let Some((tool, victim)) = self.find_preemption_victim(share, now) {
            self.release_tool(victim, ReleaseKind::Removed, now, &mut woken);
            self.enqueue_waiter(victim, now);
            self.assign_tool(slot, tool, now, &mut woken);
        } else {
            self.enqueue_waiter(slot, now);
        }
        woken
    }

    /// Handle `REST` from the customer at `slot`.
    ///
    /// A `Using` customer completes its session and the freed tool goes to
    /// the best waiter; a `Waiting` customer leaves the queue; `REST` while
    /// already `Resting` is a no-op and changes no counter.
    pub fn handle_rest(&mut self, slot: SlotId, now: u64) -> Vec<SlotId> {
        let mut woken = Vec::new();
        if !self.customer(slot).allocated {
            return woken;
        }

        match self.customer(slot).state {
            CustomerState::Using => {
                let tool = self.customer(slot).current_tool;
                self.release_tool(slot, ReleaseKind::Completed, now, &mut woken);
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
        woken
    }

    /// Periodic poll for one tool.
    ///
    /// Refreshes the session bookkeeping, then applies in precedence order:
    /// completion, the hard slice `Q` (must yield when anyone waits), the
    /// soft slice `q` (yields when a waiter has a strictly lower share). A
    /// tick on an idle tool is a no-op.
    pub fn tick_tool(&mut self, tool: ToolId, now: u64) -> Vec<SlotId> {
        let mut woken = Vec::new();
        let Some(slot) = self.tool(tool).current_user else {
            return woken;
        };

        let elapsed = now.saturating_sub(self.tool(tool).session_start);
        self.tool_mut(tool).current_usage_ms = elapsed;
        let request_ms = self.customer(slot).request_ms;
        let remaining = request_ms.saturating_sub(elapsed);
        self.customer_mut(slot).remaining_ms = remaining;
        let holder_share = self.customer(slot).share;

        if remaining == 0 {
            self.release_tool(slot, ReleaseKind::Completed, now, &mut woken);
            self.customer_mut(slot).state = CustomerState::Resting;
            self.add_resting(1);
            self.assign_next_from_queue(tool, now, &mut woken);
        } else if elapsed >= self.max_slice_ms() && !self.heap().is_empty() {
            self.release_tool(slot, ReleaseKind::Removed, now, &mut woken);
            self.enqueue_waiter(slot, now);
            self.assign_next_from_queue(tool, now, &mut woken);
        } else if elapsed >= self.min_slice_ms() {
            let undercuts = self
                .heap()
                .peek_min()
                .is_some_and(|min| self.customer(min).share < holder_share);
            if undercuts {
                self.release_tool(slot, ReleaseKind::Removed, now, &mut woken);
                self.enqueue_waiter(slot, now);
                self.assign_next_from_queue(tool, now, &mut woken);
            }
        }
        woken
    }

    /// Free tool with the least lifetime usage, ties to the smallest id.
    fn find_free_tool(&self) -> Option<ToolId> {
        self.tools()
            .filter(|t| t.current_user.is_none())
            .min_by_key(|t| (t.total_usage_ms, t.id))
            .map(|t| t.id)
    }

    /// Occupied tool to preempt for a requester with `requester_share`.
    ///
    /// The candidate is the occupied tool whose current session has run the
    /// longest (ties to the smallest id). It is preemptible only if the
    /// holder's share is at least the requester's — strictly greater when
    /// equal-share preemption is disabled — and the session has run at least
    /// the minimum slice `q`.
    fn find_preemption_victim(&self, requester_share: f64, now: u64) -> Option<(ToolId, SlotId)> {
        let candidate = self
            .tools()
            .filter(|t| t.current_user.is_some())
            .max_by_key(|t| (now.saturating_sub(t.session_start), Reverse(t.id)))?;

        let victim = candidate.current_user?;
        let elapsed = now.saturating_sub(candidate.session_start);
        let victim_share = self.customer(victim).share;

        let share_allows = if self.preempt_equal_share() {
            victim_share >= requester_share
        } else {
            victim_share > requester_share
        };
        if !share_allows || elapsed < self.min_slice_ms() {
            return None;
        }
        Some((candidate.id, victim))
    }

    /// Transition `slot` into `Using(tool)` and queue its notification.
    pub(crate) fn assign_tool(
        &mut self,
        slot: SlotId,
        tool: ToolId,
        now: u64,
        woken: &mut Vec<SlotId>,
    ) {
        if self.customer(slot).state == CustomerState::Waiting {
            if self.heap().contains(slot) {
                let _ = self.heap_mut().remove(slot);
            }
            self.add_waiting(-1);
        }

        let c = self.customer_mut(slot);
        c.state = CustomerState::Using;
        c.current_tool = Some(tool);
        c.session_start = now;
        c.pending_event = Some(ToolEvent::Assigned { tool });
        let customer_id = c.external_id;
        let share = c.share;

        let t = self.tool_mut(tool);
        t.current_user = Some(slot);
        t.current_usage_ms = 0;
        t.session_start = now;

        woken.push(slot);
        info!(customer = customer_id, share, tool, "assigned to tool");
    }

    /// Release the tool held by `slot`, crediting the session to the
    /// customer's share and the tool's lifetime usage.
    ///
    /// State transition and counter updates are the caller's: completion
    /// rests the customer, preemption re-queues it, disconnect deallocates.
    pub(crate) fn release_tool(
        &mut self,
        slot: SlotId,
        kind: ReleaseKind,
        now: u64,
        woken: &mut Vec<SlotId>,
    ) {
        let Some(tool) = self.customer(slot).current_tool else {
            return;
        };

        let usage = now.saturating_sub(self.customer(slot).session_start);
        #[allow(clippy::cast_precision_loss)]
        let usage_share = usage as f64;

        let c = self.customer_mut(slot);
        c.share += usage_share;
        c.pending_event = Some(ToolEvent::Released { tool, kind });
        let customer_id = c.external_id;
        let share = c.share;
        c.current_tool = None;

        self.add_total_share(usage_share);

        let t = self.tool_mut(tool);
        t.total_usage_ms += usage;
        t.current_user = None;
        t.current_usage_ms = 0;

        woken.push(slot);
        match kind {
            ReleaseKind::Removed => {
                info!(customer = customer_id, share, tool, "removed from tool");
            }
            ReleaseKind::Completed | ReleaseKind::Left => {
                info!(customer = customer_id, share, tool, "leaves tool");
            }
        }
    }

    /// Hand a freed tool to the waiter with the smallest share, if any.
    pub(crate) fn assign_next_from_queue(
        &mut self,
        tool: ToolId,
        now: u64,
        woken: &mut Vec<SlotId>,
    ) {
        if let Some(next) = self.heap_mut().pop_min() {
            self.assign_tool(next, tool, now, woken);
        }
    }

    /// Queue `slot` as a waiter keyed by its current share.
    fn enqueue_waiter(&mut self, slot: SlotId, now: u64) {
        let c = self.customer_mut(slot);
        c.state = CustomerState::Waiting;
        c.wait_start = now;
        let share = c.share;
        let _ = self.heap_mut().insert(slot, share);
        self.add_waiting(1);
    }
}
