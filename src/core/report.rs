//! Status report: snapshot under the lock, render and send outside it.
//!
//! `REPORT` replies can grow with the customer count, so the scheduler only
//! pays for a structured copy of the relevant rows while holding the global
//! mutex; formatting and socket I/O happen after release.

use crate::core::state::{CustomerState, SchedulerState};

/// One waiting-list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingRow {
    /// External customer id.
    pub customer: u64,
    /// Milliseconds spent waiting so far.
    pub waited_ms: u64,
    /// Share, truncated to whole milliseconds.
    pub share: u64,
}

/// One tool-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRow {
    /// The tool is idle.
    Free {
        /// Tool id.
        id: usize,
        /// Lifetime usage in milliseconds.
        total_usage_ms: u64,
    },
    /// The tool is held.
    Busy {
        /// Tool id.
        id: usize,
        /// Lifetime usage including the in-progress session.
        total_usage_ms: u64,
        /// External id of the holder.
        customer: u64,
        /// Holder's share, truncated.
        share: u64,
        /// Holder's remaining request duration in milliseconds.
        remaining_ms: u64,
    },
}

/// A consistent snapshot of scheduler status.
#[derive(Debug, Clone)]
pub struct ReportSnapshot {
    /// Number of tools `k`.
    pub tool_count: usize,
    /// Customers in the waiting queue.
    pub waiting: usize,
    /// Customers resting.
    pub resting: usize,
    /// Connected customers.
    pub total: usize,
    /// Mean share across connected customers.
    pub average_share: f64,
    /// Waiting list sorted by share ascending.
    pub waiting_rows: Vec<WaitingRow>,
    /// Tool table in id order.
    pub tool_rows: Vec<ToolRow>,
}

impl SchedulerState {
    /// Capture a report snapshot at monotonic time `now`.
    #[must_use]
    pub fn snapshot_report(&self, now: u64) -> ReportSnapshot {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let truncate = |share: f64| share as u64;

        let mut waiting_rows: Vec<WaitingRow> = self
            .allocated_slots()
            .filter(|&slot| self.customer(slot).state == CustomerState::Waiting)
            .map(|slot| {
                let c = self.customer(slot);
                WaitingRow {
                    customer: c.external_id,
                    waited_ms: now.saturating_sub(c.wait_start),
                    share: truncate(c.share),
                }
            })
            .collect();
        waiting_rows.sort_by_key(|row| row.share);

        let tool_rows = self
            .tools()
            .map(|t| match t.current_user {
                None => ToolRow::Free {
                    id: t.id,
                    total_usage_ms: t.total_usage_ms,
                },
                Some(slot) => {
                    let c = self.customer(slot);
                    ToolRow::Busy {
                        id: t.id,
                        total_usage_ms: t.total_usage_ms + now.saturating_sub(t.session_start),
                        customer: c.external_id,
                        share: truncate(c.share),
                        remaining_ms: c.remaining_ms,
                    }
                }
            })
            .collect();

        ReportSnapshot {
            tool_count: self.tool_count(),
            waiting: self.waiting_customers(),
            resting: self.resting_customers(),
            total: self.total_customers(),
            average_share: self.mean_share(),
            waiting_rows,
            tool_rows,
        }
    }
}

impl ReportSnapshot {
    /// Render the human-readable report text.
    #[must_use]
    pub fn render(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "k: {}, customers: {} waiting, {} resting, {} in total",
            self.tool_count, self.waiting, self.resting, self.total
        );
        let _ = writeln!(out, "average share: {:.2}", self.average_share);
        out.push_str("waiting list:\n");
        out.push_str("customer   duration  share\n");
        out.push_str("---------------------------\n");
        for row in &self.waiting_rows {
            let _ = writeln!(
                out,
                "{:<12} {:>10} {:>12}",
                row.customer, row.waited_ms, row.share
            );
        }
        out.push_str("\nTools:\n");
        out.push_str("id   totaluse currentuser share duration\n");
        out.push_str("--------------\n");
        for row in &self.tool_rows {
            match row {
                ToolRow::Free { id, total_usage_ms } => {
                    let _ = writeln!(out, "{id:<5} {total_usage_ms:>12} FREE");
                }
                ToolRow::Busy {
                    id,
                    total_usage_ms,
                    customer,
                    share,
                    remaining_ms,
                } => {
                    let _ = writeln!(
                        out,
                        "{id:<5} {total_usage_ms:>12} {customer:<12} {share:>10} {remaining_ms:>12}"
                    );
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;

    fn state() -> SchedulerState {
        SchedulerState::new(
            &SchedulerConfig::new()
                .with_tool_count(2)
                .with_max_customers(8)
                .with_min_slice_ms(100)
                .with_max_slice_ms(1000),
        )
    }

    #[test]
    fn test_empty_report() {
        let st = state();
        let snap = st.snapshot_report(0);
        assert_eq!(snap.total, 0);
        assert_eq!(snap.average_share, 0.0);
        let text = snap.render();
        assert!(text.starts_with("k: 2, customers: 0 waiting, 0 resting, 0 in total\n"));
        assert!(text.contains("average share: 0.00\n"));
        let free_rows: Vec<Vec<&str>> = text
            .lines()
            .filter(|l| l.ends_with("FREE"))
            .map(|l| l.split_whitespace().collect())
            .collect();
        assert_eq!(free_rows, vec![vec!["0", "0", "FREE"], vec!["1", "0", "FREE"]]);
    }

    #[test]
    fn test_waiting_rows_sorted_by_share() {
        let mut st = state();
        let a = st.allocate(10).unwrap();
        let b = st.allocate(11).unwrap();
        let c = st.allocate(12).unwrap();
        let d = st.allocate(13).unwrap();
        st.handle_request(a, 5000, 0);
        st.handle_request(b, 5000, 0);
        st.customer_mut(d).share = 75.0;
        st.add_total_share(75.0);
        st.handle_request(d, 500, 10);
        st.handle_request(c, 500, 20);

        let snap = st.snapshot_report(100);
        assert_eq!(snap.waiting, 2);
        let shares: Vec<u64> = snap.waiting_rows.iter().map(|r| r.share).collect();
        assert_eq!(shares, vec![0, 75]);
        assert_eq!(snap.waiting_rows[0].customer, 12);
        assert_eq!(snap.waiting_rows[0].waited_ms, 80);
        assert_eq!(snap.waiting_rows[1].waited_ms, 90);
    }

    #[test]
    fn test_busy_row_includes_live_session() {
        let mut st = state();
        let a = st.allocate(7).unwrap();
        st.handle_request(a, 600, 0);
        st.tick_tool(0, 250);

        let snap = st.snapshot_report(400);
        match &snap.tool_rows[0] {
            ToolRow::Busy {
                id,
                total_usage_ms,
                customer,
                share,
                remaining_ms,
            } => {
                assert_eq!(*id, 0);
                assert_eq!(*total_usage_ms, 400);
                assert_eq!(*customer, 7);
                assert_eq!(*share, 0);
                assert_eq!(*remaining_ms, 350);
            }
            other => panic!("expected busy row, got {other:?}"),
        }
        assert!(matches!(snap.tool_rows[1], ToolRow::Free { id: 1, .. }));
    }

    #[test]
    fn test_average_share_two_decimals() {
        let mut st = state();
        let a = st.allocate(1).unwrap();
        st.allocate(2).unwrap();
        st.customer_mut(a).share = 100.5;
        st.add_total_share(100.5);
        let text = st.snapshot_report(0).render();
        assert!(text.contains("average share: 50.25\n"));
    }
}
