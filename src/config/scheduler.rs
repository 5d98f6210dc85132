//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard cap on the tool table size.
pub const MAX_TOOLS: usize = 100;

/// Default customer arena capacity.
fn default_max_customers() -> usize {
    1024
}

/// Default minimum slice `q` in milliseconds.
fn default_min_slice_ms() -> u64 {
    100
}

/// Default maximum slice `Q` in milliseconds.
fn default_max_slice_ms() -> u64 {
    1000
}

/// Default tool count.
fn default_tool_count() -> usize {
    2
}

/// Default tool tick cadence in milliseconds.
fn default_tick_interval_ms() -> u64 {
    10
}

/// Default bounded wait for an idle tool in milliseconds.
fn default_idle_wait_ms() -> u64 {
    1000
}

/// Default equal-share preemption policy.
fn default_preempt_equal_share() -> bool {
    true
}

/// Configuration for the fair-share scheduler.
///
/// `q` (`min_slice_ms`) is the minimum slice a tool holder is guaranteed
/// before it becomes eligible for preemption; `Q` (`max_slice_ms`) is the
/// maximum slice after which it *must* yield if anyone is waiting.
///
/// # Example
///
/// ```rust
/// use toolshare::config::SchedulerConfig;
///
/// let config = SchedulerConfig::new()
///     .with_tool_count(4)
///     .with_min_slice_ms(100)
///     .with_max_slice_ms(1000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of tools `k` in the pool.
    ///
    /// Must be in `1..=100`.
    #[serde(default = "default_tool_count")]
    pub tool_count: usize,

    /// Minimum slice `q` in milliseconds.
    ///
    /// A tool holder cannot be preempted before its current session has run
    /// at least this long.
    #[serde(default = "default_min_slice_ms")]
    pub min_slice_ms: u64,

    /// Maximum slice `Q` in milliseconds.
    ///
    /// A tool holder must yield after this long whenever the waiting queue
    /// is non-empty.
    #[serde(default = "default_max_slice_ms")]
    pub max_slice_ms: u64,

    /// Customer arena capacity.
    ///
    /// Connections beyond this are rejected; existing customers are
    /// unaffected.
    #[serde(default = "default_max_customers")]
    pub max_customers: usize,

    /// Tool tick cadence in milliseconds.
    ///
    /// Affects responsiveness of completion and slice enforcement, not
    /// correctness.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Bounded wait for an idle tool in milliseconds.
    ///
    /// Idle tools block on the `new_customer` condition at most this long,
    /// so a quiesced system still observes the shutdown flag.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// Whether a request may preempt a holder with an *equal* share.
    ///
    /// `true` follows the reference behavior (a victim with share equal to
    /// the requester's may be evicted); `false` requires the victim's share
    /// to be strictly greater.
    #[serde(default = "default_preempt_equal_share")]
    pub preempt_equal_share: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tool_count: default_tool_count(),
            min_slice_ms: default_min_slice_ms(),
            max_slice_ms: default_max_slice_ms(),
            max_customers: default_max_customers(),
            tick_interval_ms: default_tick_interval_ms(),
            idle_wait_ms: default_idle_wait_ms(),
            preempt_equal_share: default_preempt_equal_share(),
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tool count `k`.
    #[must_use]
    pub fn with_tool_count(mut self, count: usize) -> Self {
        self.tool_count = count;
        self
    }

    /// Set the minimum slice `q` in milliseconds.
    #[must_use]
    pub fn with_min_slice_ms(mut self, ms: u64) -> Self {
        self.min_slice_ms = ms;
        self
    }

    /// Set the maximum slice `Q` in milliseconds.
    #[must_use]
    pub fn with_max_slice_ms(mut self, ms: u64) -> Self {
        self.max_slice_ms = ms;
        self
    }

    /// Set the customer arena capacity.
    #[must_use]
    pub fn with_max_customers(mut self, capacity: usize) -> Self {
        self.max_customers = capacity;
        self
    }

    /// Set the tool tick cadence in milliseconds.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set the bounded idle wait in milliseconds.
    #[must_use]
    pub fn with_idle_wait_ms(mut self, ms: u64) -> Self {
        self.idle_wait_ms = ms;
        self
    }

    /// Set the equal-share preemption policy.
    #[must_use]
    pub fn with_preempt_equal_share(mut self, allow: bool) -> Self {
        self.preempt_equal_share = allow;
        self
    }

    /// Get the tick cadence as a `Duration`.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Get the bounded idle wait as a `Duration`.
    #[must_use]
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tool_count == 0 {
            return Err("tool_count must be greater than 0".into());
        }
        if self.tool_count > MAX_TOOLS {
            return Err(format!("tool_count must be at most {MAX_TOOLS}"));
        }
        if self.min_slice_ms == 0 {
            return Err("min_slice_ms must be greater than 0".into());
        }
        if self.max_slice_ms == 0 {
            return Err("max_slice_ms must be greater than 0".into());
        }
        if self.min_slice_ms > self.max_slice_ms {
            return Err("min_slice_ms must not exceed max_slice_ms".into());
        }
        if self.max_customers == 0 {
            return Err("max_customers must be greater than 0".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.idle_wait_ms == 0 {
            return Err("idle_wait_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
