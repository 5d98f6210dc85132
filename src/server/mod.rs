//! Socket server: accept loop, per-customer actors, per-tool tickers.
//!
//! Every actor that mutates shared state takes the single global mutex in
//! [`Shared`]; actors suspend only on that mutex, the `new_customer`
//! condition, a customer's agent condition, or their own transport I/O
//! outside the lock.

pub mod connection;
pub mod listener;
pub mod ticker;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::core::error::AppResult;
use crate::core::state::Shared;
pub use listener::{BindAddr, ClientStream, Listener};

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// The assembled scheduler server.
///
/// Owns the shared state region, the listening socket, and the tool ticker
/// threads. [`Server::run`] blocks until shutdown is triggered via
/// [`Shared::trigger_shutdown`] (normally from a signal handler).
pub struct Server {
    shared: Arc<Shared>,
    listener: Listener,
    config: SchedulerConfig,
}

impl Server {
    /// Validate the configuration, parse the connection string, and bind
    /// the listening socket.
    ///
    /// # Errors
    ///
    /// Initialization failures (bad configuration, unparseable address,
    /// bind failure) are fatal and reported with context.
    pub fn bind(conn: &str, config: SchedulerConfig) -> AppResult<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let addr = BindAddr::parse(conn).map_err(anyhow::Error::msg)?;
        let listener = Listener::bind(&addr)
            .with_context(|| format!("failed to bind listening socket `{conn}`"))?;
        Ok(Self {
            shared: Arc::new(Shared::new(&config)),
            listener,
            config,
        })
    }

    /// Handle to the shared state region, for signal handlers and tests.
    #[must_use]
    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Local TCP address when bound over TCP (tests bind port 0).
    #[must_use]
    pub fn local_tcp_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.local_tcp_addr()
    }

    /// Run the server until shutdown.
    ///
    /// Spawns one ticker thread per tool, then accepts connections until the
    /// shutdown flag is set. Tickers are joined on the way out; connection
    /// threads finish with their sockets.
    pub fn run(self) -> AppResult<()> {
        info!("listening on {}", self.listener.local_description());
        info!(
            k = self.config.tool_count,
            q = self.config.min_slice_ms,
            big_q = self.config.max_slice_ms,
            "scheduler ready"
        );

        let tickers = self.spawn_tickers();
        self.accept_loop();

        // The flag may already be set by a signal; make sure parked tickers
        // wake and observe it.
        self.shared.trigger_shutdown();
        for ticker in tickers {
            if ticker.join().is_err() {
                warn!("ticker thread panicked");
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    fn spawn_tickers(&self) -> Vec<JoinHandle<()>> {
        let tick = self.config.tick_interval();
        let idle = self.config.idle_wait();
        (0..self.config.tool_count)
            .map(|tool| {
                let shared = Arc::clone(&self.shared);
                thread::Builder::new()
                    .name(format!("tool-{tool}"))
                    .spawn(move || ticker::run(&shared, tool, tick, idle))
                    .expect("failed to spawn ticker thread")
            })
            .collect()
    }

    fn accept_loop(&self) {
        let mut next_customer_id: u64 = 0;
        loop {
            if self.shared.state.lock().is_shutdown() {
                break;
            }
            match self.listener.accept() {
                Ok(stream) => {
                    next_customer_id += 1;
                    let customer_id = next_customer_id;
                    let shared = Arc::clone(&self.shared);
                    let spawned = thread::Builder::new()
                        .name(format!("agent-{customer_id}"))
                        .spawn(move || connection::serve(&shared, stream, customer_id));
                    if spawned.is_err() {
                        warn!(customer = customer_id, "failed to spawn connection thread");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
    }
}
