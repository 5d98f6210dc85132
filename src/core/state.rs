//! Shared state store: customer arena, tool table, aggregates, and the
//! synchronization wrapper shared by every actor.
//!
//! All fields are mutated only while the single global mutex is held. The
//! invariants listed on [`SchedulerState::check_invariants`] hold at every
//! quiescent point (outside a critical section).

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::SchedulerConfig;
use crate::core::heap::ShareHeap;

/// Index of a customer record in the arena.
pub type SlotId = usize;

/// Index of a tool in the dense tool table.
pub type ToolId = usize;

/// Lifecycle state of a customer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerState {
    /// Connected, no outstanding request.
    Resting,
    /// Requested a tool and queued in the waiting heap.
    Waiting,
    /// Holding a tool.
    Using,
    /// Slot is unallocated.
    Deleted,
}

/// The three categorized ways a customer stops holding a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// The requested duration was exhausted.
    Completed,
    /// Preempted by the fairness engine.
    Removed,
    /// The customer chose to rest or disconnected.
    Left,
}

/// A notification queued for one customer's outbound stream.
///
/// At most one event is pending per customer; a newer event overwrites a
/// still-queued older one. Rapid successive transitions may therefore
/// coalesce, and each subsequent transition produces its own notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEvent {
    /// The customer was handed a tool.
    Assigned {
        /// Tool granted.
        tool: ToolId,
    },
    /// The customer stopped holding a tool.
    Released {
        /// Tool released.
        tool: ToolId,
        /// Why the hold ended.
        kind: ReleaseKind,
    },
}

impl ToolEvent {
    /// Render the protocol line for this event.
    ///
    /// Shares are rendered as truncated integers.
    #[must_use]
    pub fn render(&self, customer_id: u64, share: f64) -> String {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let share = share as u64;
        match self {
            Self::Assigned { tool } => {
                format!("Customer {customer_id} with share {share} is assigned to the tool {tool}.\n")
            }
            Self::Released {
                tool,
                kind: ReleaseKind::Removed,
            } => {
                format!("Customer {customer_id} with share {share} is removed from the tool {tool}.\n")
            }
            Self::Released { tool, .. } => {
                format!("Customer {customer_id} with share {share} leaves the tool {tool}.\n")
            }
        }
    }
}

/// One customer record in the arena.
#[derive(Debug, Clone)]
pub struct Customer {
    /// Stable external identifier (connection id).
    pub external_id: u64,
    /// Whether the slot is currently allocated to a live connection.
    pub allocated: bool,
    /// Lifecycle state.
    pub state: CustomerState,
    /// Accumulated tool-milliseconds; monotonically non-decreasing across
    /// the customer's lifetime.
    pub share: f64,
    /// Duration of the most recent request, in milliseconds.
    pub request_ms: u64,
    /// Remaining duration of the request, refreshed on every tool tick.
    pub remaining_ms: u64,
    /// Tool currently held, if any.
    pub current_tool: Option<ToolId>,
    /// Monotonic timestamp when the current session started.
    pub session_start: u64,
    /// Monotonic timestamp when the customer last entered the waiting queue.
    pub wait_start: u64,
    /// Pending notification, if any.
    pub pending_event: Option<ToolEvent>,
}

impl Customer {
    fn empty() -> Self {
        Self {
            external_id: 0,
            allocated: false,
            state: CustomerState::Deleted,
            share: 0.0,
            request_ms: 0,
            remaining_ms: 0,
            current_tool: None,
            session_start: 0,
            wait_start: 0,
            pending_event: None,
        }
    }
}

/// One tool record. Tool records exist for the server's lifetime.
#[derive(Debug, Clone)]
pub struct Tool {
    /// Dense tool id, `0..k`.
    pub id: ToolId,
    /// Total usage in milliseconds across all completed sessions.
    pub total_usage_ms: u64,
    /// Slot of the current holder, if any.
    pub current_user: Option<SlotId>,
    /// Milliseconds elapsed in the in-progress session as of the last tick;
    /// zero when idle. Decisions use `now - session_start` directly, this
    /// cache feeds reports only.
    pub current_usage_ms: u64,
    /// Monotonic timestamp when the in-progress session started.
    pub session_start: u64,
}

impl Tool {
    fn new(id: ToolId) -> Self {
        Self {
            id,
            total_usage_ms: 0,
            current_user: None,
            current_usage_ms: 0,
            session_start: 0,
        }
    }
}

/// The scheduler state machine guarded by the global mutex.
///
/// All mutating entry points (`handle_request`, `handle_rest`, `tick_tool`,
/// allocation and disconnect) live in [`crate::core::engine`] and
/// [`crate::core::lifecycle`] as `impl` blocks on this type; each takes an
/// explicit `now` so tests drive virtual time.
#[derive(Debug)]
pub struct SchedulerState {
    customers: Vec<Customer>,
    free_slots: Vec<SlotId>,
    tools: Vec<Tool>,
    heap: ShareHeap,
    total_customers: usize,
    resting_customers: usize,
    waiting_customers: usize,
    total_share: f64,
    min_slice_ms: u64,
    max_slice_ms: u64,
    preempt_equal_share: bool,
    shutdown: bool,
}

impl SchedulerState {
    /// Build the initial state from a validated configuration.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        let capacity = config.max_customers;
        Self {
            customers: vec![Customer::empty(); capacity],
            free_slots: (0..capacity).rev().collect(),
            tools: (0..config.tool_count).map(Tool::new).collect(),
            heap: ShareHeap::new(capacity),
            total_customers: 0,
            resting_customers: 0,
            waiting_customers: 0,
            total_share: 0.0,
            min_slice_ms: config.min_slice_ms,
            max_slice_ms: config.max_slice_ms,
            preempt_equal_share: config.preempt_equal_share,
            shutdown: false,
        }
    }

    /// Customer record at `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is outside the arena; slots originate from
    /// [`allocate`](SchedulerState::allocate) and stay in range.
    #[must_use]
    pub fn customer(&self, slot: SlotId) -> &Customer {
        &self.customers[slot]
    }

    pub(crate) fn customer_mut(&mut self, slot: SlotId) -> &mut Customer {
        &mut self.customers[slot]
    }

    /// Tool record for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= tool_count`.
    #[must_use]
    pub fn tool(&self, id: ToolId) -> &Tool {
        &self.tools[id]
    }

    pub(crate) fn tool_mut(&mut self, id: ToolId) -> &mut Tool {
        &mut self.tools[id]
    }

    /// Number of tools in the pool.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Iterate over the tool table in id order.
    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    /// Iterate over allocated customer slots.
    pub fn allocated_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.customers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.allocated)
            .map(|(slot, _)| slot)
    }

    /// Currently connected customers.
    #[must_use]
    pub fn total_customers(&self) -> usize {
        self.total_customers
    }

    /// Customers in state `Resting`.
    #[must_use]
    pub fn resting_customers(&self) -> usize {
        self.resting_customers
    }

    /// Customers in state `Waiting`.
    #[must_use]
    pub fn waiting_customers(&self) -> usize {
        self.waiting_customers
    }

    /// Sum of all allocated customers' shares.
    #[must_use]
    pub fn total_share(&self) -> f64 {
        self.total_share
    }

    /// Mean share across connected customers, `0.0` when none.
    #[must_use]
    pub fn mean_share(&self) -> f64 {
        if self.total_customers == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let total = self.total_customers as f64;
            self.total_share / total
        }
    }

    /// Minimum slice `q` in milliseconds.
    #[must_use]
    pub fn min_slice_ms(&self) -> u64 {
        self.min_slice_ms
    }

    /// Maximum slice `Q` in milliseconds.
    #[must_use]
    pub fn max_slice_ms(&self) -> u64 {
        self.max_slice_ms
    }

    /// Whether an equal-share holder may be preempted by a new request.
    #[must_use]
    pub fn preempt_equal_share(&self) -> bool {
        self.preempt_equal_share
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Request shutdown; actors drain their current iteration and exit.
    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    pub(crate) fn heap(&self) -> &ShareHeap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut ShareHeap {
        &mut self.heap
    }

    pub(crate) fn free_slots_mut(&mut self) -> &mut Vec<SlotId> {
        &mut self.free_slots
    }

    pub(crate) fn arena_capacity(&self) -> usize {
        self.customers.len()
    }

    pub(crate) fn add_total_customers(&mut self, delta: isize) {
        self.total_customers = self.total_customers.saturating_add_signed(delta);
    }

    pub(crate) fn add_resting(&mut self, delta: isize) {
        self.resting_customers = self.resting_customers.saturating_add_signed(delta);
    }

    pub(crate) fn add_waiting(&mut self, delta: isize) {
        self.waiting_customers = self.waiting_customers.saturating_add_signed(delta);
    }

    pub(crate) fn add_total_share(&mut self, delta: f64) {
        self.total_share += delta;
    }

    /// Verify every cross-structure invariant at a quiescent point.
    ///
    /// Checked invariants:
    /// - every allocated customer is in exactly one of `Resting`, `Waiting`,
    ///   `Using`;
    /// - `Waiting` ⇔ present in the heap with a consistent back-pointer;
    /// - `Using` ⇔ some tool's `current_user` is the slot, and the
    ///   customer/tool back-pointers agree;
    /// - `waiting == |heap|` and `resting + waiting + using == total`;
    /// - `total_share` equals the sum of allocated shares (±1 ms rounding);
    /// - the heap property holds.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.heap.check()?;

        let mut using = 0usize;
        let mut share_sum = 0.0f64;
        for (slot, c) in self.customers.iter().enumerate() {
            if !c.allocated {
                if self.heap.contains(slot) {
                    return Err(format!("unallocated slot {slot} present in heap"));
                }
                continue;
            }
            share_sum += c.share;
            match c.state {
                CustomerState::Resting => {
                    if self.heap.contains(slot) || c.current_tool.is_some() {
                        return Err(format!("resting slot {slot} holds queue or tool state"));
                    }
                }
                CustomerState::Waiting => {
                    if !self.heap.contains(slot) {
                        return Err(format!("waiting slot {slot} absent from heap"));
                    }
                    if c.current_tool.is_some() {
                        return Err(format!("waiting slot {slot} holds a tool"));
                    }
                }
                CustomerState::Using => {
                    using += 1;
                    let Some(tool) = c.current_tool else {
                        return Err(format!("using slot {slot} has no tool"));
                    };
                    if self.tools[tool].current_user != Some(slot) {
                        return Err(format!(
                            "tool {tool} user {:?} disagrees with slot {slot}",
                            self.tools[tool].current_user
                        ));
                    }
                    if self.heap.contains(slot) {
                        return Err(format!("using slot {slot} present in heap"));
                    }
                }
                CustomerState::Deleted => {
                    return Err(format!("allocated slot {slot} marked Deleted"));
                }
            }
        }

        for t in &self.tools {
            if let Some(slot) = t.current_user {
                let c = &self.customers[slot];
                if !c.allocated || c.current_tool != Some(t.id) {
                    return Err(format!("tool {} binding to slot {slot} is stale", t.id));
                }
            }
        }

        if self.waiting_customers != self.heap.len() {
            return Err(format!(
                "waiting count {} != heap size {}",
                self.waiting_customers,
                self.heap.len()
            ));
        }
        if self.resting_customers + self.waiting_customers + using != self.total_customers {
            return Err(format!(
                "counter mismatch: {} resting + {} waiting + {using} using != {} total",
                self.resting_customers, self.waiting_customers, self.total_customers
            ));
        }
        if (share_sum - self.total_share).abs() > 1.0 {
            return Err(format!(
                "total_share {} drifted from arena sum {share_sum}",
                self.total_share
            ));
        }
        Ok(())
    }
}

/// The process-wide shared region: the state machine behind its global
/// mutex, plus the condition variables actors suspend on.
///
/// `new_customer` is broadcast after any state change that may unblock a
/// tool; per-slot agent condvars are signalled when a notification is queued
/// for that customer (or its allocation flag clears). There is no lock
/// hierarchy: the global mutex is the only lock.
#[derive(Debug)]
pub struct Shared {
    /// The global mutex and the state it guards.
    pub state: Mutex<SchedulerState>,
    /// Broadcast when any state change may unblock a tool actor.
    pub new_customer: Condvar,
    agent_wakeups: Vec<Condvar>,
}

impl Shared {
    /// Wrap a fresh state machine for the given configuration.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        let mut agent_wakeups = Vec::with_capacity(config.max_customers);
        agent_wakeups.resize_with(config.max_customers, Condvar::new);
        Self {
            state: Mutex::new(SchedulerState::new(config)),
            new_customer: Condvar::new(),
            agent_wakeups,
        }
    }

    /// Signal the notifier of `slot`.
    pub fn notify_agent(&self, slot: SlotId) {
        if let Some(cond) = self.agent_wakeups.get(slot) {
            cond.notify_all();
        }
    }

    /// Block the calling notifier until `slot` is signalled.
    ///
    /// The guard must belong to [`Shared::state`]; the caller re-checks its
    /// predicate after waking (spurious wakeups are possible).
    pub fn wait_agent(&self, slot: SlotId, guard: &mut MutexGuard<'_, SchedulerState>) {
        if let Some(cond) = self.agent_wakeups.get(slot) {
            cond.wait(guard);
        }
    }

    /// Signal the notifiers of every slot in `woken`, then broadcast
    /// `new_customer`.
    pub fn wake(&self, woken: &[SlotId]) {
        for &slot in woken {
            self.notify_agent(slot);
        }
        self.new_customer.notify_all();
    }

    /// Set the shutdown flag and wake every actor so it can observe it.
    pub fn trigger_shutdown(&self) {
        let mut state = self.state.lock();
        state.request_shutdown();
        self.new_customer.notify_all();
        for cond in &self.agent_wakeups {
            cond.notify_all();
        }
    }
}
