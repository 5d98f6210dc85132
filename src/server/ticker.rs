//! Per-tool tick actor.
//!
//! Each tool owns one thread that polls its in-progress session at a fixed
//! cadence. An idle tool parks on `new_customer` with a bounded wait, so a
//! quiesced system still re-checks the shutdown flag about once a second.

use std::time::Duration;

use crate::core::state::{Shared, ToolId};
use crate::util::clock::now_ms;

/// Run the tick loop for `tool` until shutdown is requested.
pub(crate) fn run(shared: &Shared, tool: ToolId, tick_interval: Duration, idle_wait: Duration) {
    loop {
        {
            let mut state = shared.state.lock();
            if state.is_shutdown() {
                break;
            }
            if state.tool(tool).current_user.is_none() {
                let _ = shared.new_customer.wait_for(&mut state, idle_wait);
                if state.is_shutdown() {
                    break;
                }
            } else {
                let woken = state.tick_tool(tool, now_ms());
                drop(state);
                for slot in woken {
                    shared.notify_agent(slot);
                }
            }
        }
        std::thread::sleep(tick_interval);
    }
}
