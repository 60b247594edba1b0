//! Message bus: the handler registry and ticker that drive a [`SimulatedNetwork`].
//!
//! The bus owns a single background ticker thread that advances the network at a wall-clock
//! interval; everything a handler does therefore runs serially on that thread. Tests that
//! want full determinism skip `start()` and pump [`MessageBus::tick_once`] by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::DeltaResult;
use crate::net::message::{Endpoint, Message, MessageEnvelope};
use crate::net::simulator::SimulatedNetwork;

/// Wall-clock interval between ticks when the background ticker is running.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop()` waits for the ticker thread before abandoning it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiver side of message delivery. Implementations run on the ticker thread, one
/// envelope at a time; a returned error is logged and swallowed, never propagated into the
/// network.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, envelope: &MessageEnvelope, bus: &MessageBus) -> DeltaResult<()>;
}

struct Ticker {
    stop_tx: crossbeam_channel::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Endpoint-to-handler registry over a [`SimulatedNetwork`].
pub struct MessageBus {
    network: SimulatedNetwork,
    handlers: RwLock<HashMap<Endpoint, Arc<dyn MessageHandler>>>,
    next_message_id: AtomicU64,
    stopped: AtomicBool,
    ticker: Mutex<Option<Ticker>>,
}

impl MessageBus {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::with_network(SimulatedNetwork::new())
    }

    pub fn with_network(network: SimulatedNetwork) -> Self {
        Self {
            network,
            handlers: RwLock::new(HashMap::new()),
            next_message_id: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            ticker: Mutex::new(None),
        }
    }

    /// The underlying network, for configuring loss, latency, and partitions.
    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn register_handler(&self, endpoint: Endpoint, handler: Arc<dyn MessageHandler>) {
        let Ok(mut handlers) = self.handlers.write() else {
            warn!(%endpoint, "handler registry poisoned; registration dropped");
            return;
        };
        if handlers.insert(endpoint.clone(), handler).is_some() {
            debug!(%endpoint, "replaced existing handler");
        }
    }

    pub fn unregister_handler(&self, endpoint: &Endpoint) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.remove(endpoint);
        }
    }

    /// Wrap `payload` in an envelope with a fresh message id and hand it to the network.
    ///
    /// Enqueue failures (loss, partitions) are deliberately silent here: to the sender they
    /// are indistinguishable from a slow network, and observable only as a missing response.
    /// A stopped bus refuses to send at all.
    pub fn send(&self, payload: Message, source: &Endpoint, destination: &Endpoint) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(kind = payload.kind(), "bus is stopped; refusing to send");
            return;
        }
        let envelope = MessageEnvelope {
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            source: source.clone(),
            destination: destination.clone(),
            payload,
        };
        if !self.network.send(envelope) {
            trace!("network dropped message at send time");
        }
    }

    /// Advance the network one tick, dispatching every due envelope to its destination's
    /// handler. Exposed so tests can drive time manually instead of starting the ticker.
    pub fn tick_once(&self) -> usize {
        if self.stopped.load(Ordering::SeqCst) {
            return 0;
        }
        self.network.tick(|envelope| self.dispatch(envelope))
    }

    fn dispatch(&self, envelope: MessageEnvelope) {
        let handler = {
            let Ok(handlers) = self.handlers.read() else {
                warn!("handler registry poisoned; dropping delivery");
                return;
            };
            handlers.get(&envelope.destination).cloned()
        };
        let Some(handler) = handler else {
            trace!(
                destination = %envelope.destination,
                kind = envelope.payload.kind(),
                "no handler registered for destination"
            );
            return;
        };
        if let Err(err) = handler.on_message(&envelope, self) {
            warn!(
                destination = %envelope.destination,
                kind = envelope.payload.kind(),
                %err,
                "handler failed; error swallowed"
            );
        }
    }

    /// Start the background ticker at [`DEFAULT_TICK_INTERVAL`].
    pub fn start(self: &Arc<Self>) {
        self.start_with_interval(DEFAULT_TICK_INTERVAL);
    }

    /// Start the background ticker. No-op if it is already running.
    pub fn start_with_interval(self: &Arc<Self>, interval: Duration) {
        let Ok(mut ticker) = self.ticker.lock() else {
            warn!("ticker slot poisoned; cannot start");
            return;
        };
        if ticker.is_some() {
            debug!("ticker already running");
            return;
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let bus = Arc::clone(self);
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    bus.tick_once();
                }
                // stop signal, or the bus dropped the sender
                _ => break,
            }
        });
        *ticker = Some(Ticker { stop_tx, handle });
    }

    /// Stop the ticker and refuse all further sends and deliveries. Waits a bounded time
    /// for the ticker thread to exit; a thread stuck in a handler is abandoned with a
    /// warning rather than blocking shutdown forever.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let ticker = match self.ticker.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(ticker) = ticker else {
            return;
        };
        let _ = ticker.stop_tx.send(());
        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !ticker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        if ticker.handle.is_finished() {
            let _ = ticker.handle.join();
        } else {
            warn!("ticker thread did not stop within {STOP_JOIN_TIMEOUT:?}; detaching");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        // the ticker thread holds an Arc<MessageBus>, so by the time we drop it has exited
        self.stopped.store(true, Ordering::SeqCst);
    }
}
