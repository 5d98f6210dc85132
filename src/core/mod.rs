//! The scheduler core: data model, waiting queue, lifecycle, fairness
//! engine, and status reports.

pub mod engine;
pub mod error;
pub mod heap;
pub mod lifecycle;
pub mod report;
pub mod state;

pub use error::{AppResult, SchedulerError};
pub use heap::ShareHeap;
pub use report::{ReportSnapshot, ToolRow, WaitingRow};
pub use state::{
    Customer, CustomerState, ReleaseKind, SchedulerState, Shared, SlotId, Tool, ToolEvent, ToolId,
};
