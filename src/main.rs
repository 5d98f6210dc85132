//! toolshare server binary.
//!
//! `toolshare <conn> <q> <Q> <k>` starts the fair-share scheduler on the
//! given address with minimum slice `q`, maximum slice `Q` (milliseconds),
//! and `k` tools.

use std::thread;

use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use toolshare::core::AppResult;
use toolshare::util::{clock, telemetry};
use toolshare::{SchedulerConfig, Server};

/// Fair-share scheduler for a fixed pool of exclusive tools.
#[derive(Parser, Debug)]
#[command(name = "toolshare", version, about)]
struct Cli {
    /// Listening address: @/path/to/socket (Unix) or ip:port (TCP).
    conn: String,

    /// Minimum slice q in milliseconds before a holder may be preempted.
    #[arg(value_name = "q", value_parser = clap::value_parser!(u64).range(1..))]
    min_slice_ms: u64,

    /// Maximum slice Q in milliseconds after which a holder must yield.
    #[arg(value_name = "Q", value_parser = clap::value_parser!(u64).range(1..))]
    max_slice_ms: u64,

    /// Number of tools in the pool (at most 100).
    #[arg(value_name = "k", value_parser = clap::value_parser!(u64).range(1..=100))]
    tools: u64,
}

fn main() -> AppResult<()> {
    telemetry::init_tracing();
    // Anchor the monotonic epoch at startup.
    let _ = clock::now_ms();

    let cli = Cli::parse();
    let config = SchedulerConfig::new()
        .with_tool_count(usize::try_from(cli.tools)?)
        .with_min_slice_ms(cli.min_slice_ms)
        .with_max_slice_ms(cli.max_slice_ms);

    let server = Server::bind(&cli.conn, config)?;

    let shared = server.shared();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let _signal_listener = thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            for signal in signals.forever() {
                info!(signal, "shutdown requested");
                shared.trigger_shutdown();
            }
        })?;

    server.run()
}
