//! Per-customer actors: command reader, event notifier, and the outbound
//! writer that serializes everything onto one socket.
//!
//! The reader owns the inbound half of the connection and drives the engine.
//! The notifier blocks on the customer's condvar until an event is pending
//! or the customer is deallocated. Both hand their output lines to a single
//! writer actor through a bounded channel, so a `REPORT` reply can never
//! interleave with a notification. Dropping the last sender shuts the
//! writer down.

use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::core::state::{Shared, SlotId};
use crate::server::listener::ClientStream;
use crate::util::clock::now_ms;

/// Depth of the per-connection outbound queue.
const OUTBOUND_DEPTH: usize = 64;

/// Serve one accepted connection to completion.
///
/// Allocates a customer slot (rejecting the connection if the arena is
/// full), runs the actor trio, and tears the customer down in two phases on
/// EOF, `QUIT`, or transport failure.
pub(crate) fn serve(shared: &Arc<Shared>, stream: ClientStream, customer_id: u64) {
    let slot = {
        let mut state = shared.state.lock();
        match state.allocate(customer_id) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(customer = customer_id, error = %e, "rejecting connection");
                let _ = stream.shutdown();
                return;
            }
        }
    };
    info!(customer = customer_id, slot, "customer connected");

    let Ok(write_half) = stream.try_clone() else {
        warn!(customer = customer_id, "failed to clone stream, dropping connection");
        let woken = shared.state.lock().begin_disconnect(slot, now_ms());
        shared.wake(&woken);
        shared.state.lock().finish_disconnect(slot);
        return;
    };

    let (out_tx, out_rx) = bounded::<String>(OUTBOUND_DEPTH);

    let writer = spawn_writer(customer_id, write_half, out_rx);
    let notifier = spawn_notifier(customer_id, Arc::clone(shared), slot, out_tx.clone());

    read_commands(shared, &stream, slot, &out_tx);

    // Phase one: detach from scheduling and clear the allocation flag; the
    // wake lets the notifier observe it and exit.
    let woken = {
        let mut state = shared.state.lock();
        state.begin_disconnect(slot, now_ms())
    };
    shared.wake(&woken);
    if let Err(e) = notifier.join() {
        warn!(customer = customer_id, "notifier panicked: {e:?}");
    }

    // Phase two: settle aggregates and recycle the slot.
    shared.state.lock().finish_disconnect(slot);

    drop(out_tx);
    let _ = stream.shutdown();
    if let Err(e) = writer.join() {
        warn!(customer = customer_id, "writer panicked: {e:?}");
    }
    info!(customer = customer_id, "customer disconnected");
}

/// Writer actor: drains outbound lines onto the socket until every sender
/// is gone or the peer stops accepting bytes.
fn spawn_writer(
    customer_id: u64,
    mut stream: ClientStream,
    out_rx: Receiver<String>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("agent-writer-{customer_id}"))
        .spawn(move || {
            for line in out_rx {
                if let Err(e) = stream.write_all(line.as_bytes()) {
                    debug!(customer = customer_id, error = %e, "outbound write failed");
                    break;
                }
            }
        })
        .expect("failed to spawn writer thread")
}

/// Notifier actor: waits on the customer's condvar, renders the pending
/// event, and queues it outbound.
fn spawn_notifier(
    customer_id: u64,
    shared: Arc<Shared>,
    slot: SlotId,
    out_tx: Sender<String>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("agent-notify-{customer_id}"))
        .spawn(move || loop {
            let line = {
                let mut state = shared.state.lock();
                loop {
                    let c = state.customer(slot);
                    if c.pending_event.is_some() || !c.allocated {
                        break;
                    }
                    shared.wait_agent(slot, &mut state);
                }
                if !state.customer(slot).allocated {
                    return;
                }
                let c = state.customer_mut(slot);
                let event = c.pending_event.take();
                let share = c.share;
                let external_id = c.external_id;
                event.map(|e| e.render(external_id, share))
            };
            let Some(line) = line else {
                return;
            };
            // Never park on a stalled peer: a full queue drops the line the
            // same way a newer event overwrites an unconsumed older one, and
            // teardown can always join this actor.
            match out_tx.try_send(line) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(customer = customer_id, "outbound queue full, dropping event");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        })
        .expect("failed to spawn notifier thread")
}

/// Reader loop: newline-framed verbs, `\r` tolerated, unknown input
/// silently ignored. Returns on EOF, error, or `QUIT`.
fn read_commands(
    shared: &Arc<Shared>,
    stream: &ClientStream,
    slot: SlotId,
    out_tx: &Sender<String>,
) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            continue;
        };

        match verb {
            "REQUEST" => {
                let duration = words.next().and_then(|w| w.parse::<i64>().ok());
                match duration {
                    Some(ms) if ms > 0 => {
                        #[allow(clippy::cast_sign_loss)]
                        let woken = shared.state.lock().handle_request(slot, ms as u64, now_ms());
                        shared.wake(&woken);
                    }
                    _ => debug!(slot, input = line.trim(), "dropping invalid REQUEST"),
                }
            }
            "REST" => {
                let woken = shared.state.lock().handle_rest(slot, now_ms());
                shared.wake(&woken);
            }
            "REPORT" => {
                let snapshot = shared.state.lock().snapshot_report(now_ms());
                if out_tx.send(snapshot.render()).is_err() {
                    return;
                }
            }
            "QUIT" => return,
            other => debug!(slot, verb = other, "ignoring unknown verb"),
        }
    }
}
