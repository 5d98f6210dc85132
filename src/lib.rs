//! # Toolshare
//!
//! A fair-share scheduler that multiplexes a small, fixed pool of
//! indistinguishable *tools* (exclusive resources) among an open-ended set of
//! connected *customers*. Customers request exclusive use of any one tool for
//! a stated duration; when demand exceeds supply the scheduler preempts and
//! reassigns tools according to a cumulative-usage fairness metric called
//! *share*, bounded below by a minimum slice `q` and above by a maximum
//! slice `Q`.
//!
//! ## Modules
//!
//! - [`core`](crate::core) - The scheduler itself: indexed min-heap, shared
//!   state store, customer lifecycle, fairness/preemption engine, status
//!   reports
//! - [`config`](crate::config) - Validated scheduler configuration
//! - [`server`](crate::server) - Socket transport, per-customer actors,
//!   per-tool tickers
//! - [`util`](crate::util) - Clock and telemetry helpers
//!
//! ## Example
//!
//! Driving the state machine directly (the server wraps exactly these calls
//! behind the global mutex):
//!
//! ```
//! use toolshare::config::SchedulerConfig;
//! use toolshare::core::SchedulerState;
//!
//! let config = SchedulerConfig::new()
//!     .with_tool_count(2)
//!     .with_min_slice_ms(100)
//!     .with_max_slice_ms(1000);
//! let mut state = SchedulerState::new(&config);
//!
//! let c1 = state.allocate(1).unwrap();
//! state.handle_request(c1, 300, 0);
//! assert_eq!(state.customer(c1).current_tool, Some(0));
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod core;
pub mod server;
pub mod util;

pub use crate::config::SchedulerConfig;
pub use crate::core::{SchedulerError, SchedulerState, Shared};
pub use crate::server::Server;
