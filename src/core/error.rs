//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::state::SlotId;

/// Errors produced by scheduler components.
///
/// Nothing here is fatal at runtime: capacity errors reject the offending
/// connection, precondition violations are logged and leave state unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The customer arena is full; the connection is rejected.
    #[error("customer arena full: capacity {0}")]
    CapacityExceeded(usize),
    /// The waiting queue cannot take another entry.
    #[error("waiting queue full: capacity {0}")]
    QueueFull(usize),
    /// A slot was inserted into the waiting queue twice.
    #[error("customer slot {0} is already queued")]
    AlreadyQueued(SlotId),
    /// A slot absent from the waiting queue was removed.
    #[error("customer slot {0} is not queued")]
    NotQueued(SlotId),
    /// A slot index outside the arena was used.
    #[error("customer slot {0} is out of range")]
    SlotOutOfRange(SlotId),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
