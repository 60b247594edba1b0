//! Deterministic simulated network.
//!
//! Messages are not delivered when sent; they are scheduled onto a priority queue and drained
//! by [`SimulatedNetwork::tick`], which models one unit of simulated time. Loss, latency, a
//! per-tick bandwidth cap and bidirectional partitions are all configurable at runtime, and
//! every probabilistic decision comes from a seeded RNG so a run is reproducible from its
//! seed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::error::{DeltaResult, Error};
use crate::net::message::{Endpoint, MessageEnvelope};

const DEFAULT_SEED: u64 = 0;

/// An envelope waiting in the delivery queue.
///
/// Ordered by `(delivery_tick, sequence)` ascending; the sequence number is allocated at
/// scheduling time so that messages due on the same tick drain in send order.
#[derive(Debug)]
struct ScheduledMessage {
    envelope: MessageEnvelope,
    delivery_tick: u64,
    sequence: u64,
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_tick == other.delivery_tick && self.sequence == other.sequence
    }
}

impl Eq for ScheduledMessage {}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop the earliest (tick, sequence) first
        (other.delivery_tick, other.sequence).cmp(&(self.delivery_tick, self.sequence))
    }
}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct NetState {
    current_tick: u64,
    next_sequence: u64,
    queue: BinaryHeap<ScheduledMessage>,
    /// Unordered endpoint pairs that cannot exchange messages, stored normalized.
    partitions: HashSet<(Endpoint, Endpoint)>,
    loss_rate: f64,
    min_latency: u64,
    max_latency: u64,
    /// `None` means unbounded.
    max_per_tick: Option<usize>,
    rng: StdRng,
    seed: u64,
}

impl NetState {
    fn new(seed: u64) -> Self {
        Self {
            current_tick: 0,
            next_sequence: 0,
            queue: BinaryHeap::new(),
            partitions: HashSet::new(),
            loss_rate: 0.0,
            min_latency: 0,
            max_latency: 0,
            max_per_tick: None,
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    fn is_partitioned(&self, a: &Endpoint, b: &Endpoint) -> bool {
        self.partitions.contains(&partition_key(a, b))
    }
}

/// Normalize an unordered endpoint pair for the partition set.
fn partition_key(a: &Endpoint, b: &Endpoint) -> (Endpoint, Endpoint) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Tick-driven message transport. See the module docs for the model.
pub struct SimulatedNetwork {
    state: Mutex<NetState>,
}

impl SimulatedNetwork {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create a network whose loss and latency decisions replay deterministically for a
    /// given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(NetState::new(seed)),
        }
    }

    /// Probability in `[0.0, 1.0]` that any given send is dropped.
    pub fn set_loss_rate(&self, rate: f64) -> DeltaResult<()> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::invalid_argument(format!(
                "message loss rate must be within [0.0, 1.0], got {rate}"
            )));
        }
        let mut state = self.lock()?;
        state.loss_rate = rate;
        Ok(())
    }

    /// Delivery latency range in ticks. A scheduled delay below one tick is clamped up:
    /// delivery never happens on the tick a message was sent.
    pub fn set_latency(&self, min_ticks: u64, max_ticks: u64) -> DeltaResult<()> {
        if min_ticks > max_ticks {
            return Err(Error::invalid_argument(format!(
                "latency range inverted: min {min_ticks} > max {max_ticks}"
            )));
        }
        let mut state = self.lock()?;
        state.min_latency = min_ticks;
        state.max_latency = max_ticks;
        Ok(())
    }

    /// Cap on deliveries per tick; `None` restores the unbounded default.
    pub fn set_max_messages_per_tick(&self, limit: Option<usize>) -> DeltaResult<()> {
        let mut state = self.lock()?;
        state.max_per_tick = limit;
        Ok(())
    }

    /// Cut the link between two endpoints, in both directions.
    pub fn disconnect(&self, a: &Endpoint, b: &Endpoint) -> DeltaResult<()> {
        let mut state = self.lock()?;
        state.partitions.insert(partition_key(a, b));
        Ok(())
    }

    /// Restore the link between two endpoints.
    pub fn reconnect(&self, a: &Endpoint, b: &Endpoint) -> DeltaResult<()> {
        let mut state = self.lock()?;
        state.partitions.remove(&partition_key(a, b));
        Ok(())
    }

    /// Heal every partition.
    pub fn reconnect_all(&self) -> DeltaResult<()> {
        let mut state = self.lock()?;
        state.partitions.clear();
        Ok(())
    }

    pub fn is_partitioned(&self, a: &Endpoint, b: &Endpoint) -> bool {
        match self.lock() {
            Ok(state) => state.is_partitioned(a, b),
            Err(_) => false,
        }
    }

    /// Schedule an envelope for delivery. Returns `false` if the message was dropped, either
    /// by a partition or by the configured loss rate; dropped messages are invisible to the
    /// receiver and surface to callers only as missing responses.
    pub fn send(&self, envelope: MessageEnvelope) -> bool {
        let Ok(mut state) = self.state.lock() else {
            warn!("network state poisoned; dropping message");
            return false;
        };
        if state.is_partitioned(&envelope.source, &envelope.destination) {
            debug!(
                message_id = envelope.message_id,
                source = %envelope.source,
                destination = %envelope.destination,
                "dropping message: endpoints partitioned"
            );
            return false;
        }
        if state.loss_rate > 0.0 {
            let loss_rate = state.loss_rate;
            if state.rng.gen_bool(loss_rate) {
                debug!(
                    message_id = envelope.message_id,
                    "dropping message: simulated loss"
                );
                return false;
            }
        }
        let delay = if state.min_latency == state.max_latency {
            state.min_latency
        } else {
            let (min, max) = (state.min_latency, state.max_latency);
            state.rng.gen_range(min..=max)
        };
        // minimum delay of one tick
        let delivery_tick = state.current_tick + delay.max(1);
        let sequence = state.next_sequence();
        trace!(
            message_id = envelope.message_id,
            delivery_tick,
            sequence,
            kind = envelope.payload.kind(),
            "scheduled message"
        );
        state.queue.push(ScheduledMessage {
            envelope,
            delivery_tick,
            sequence,
        });
        true
    }

    /// Advance simulated time by one tick and deliver everything that has come due, up to
    /// the per-tick cap. Overflow beyond the cap is re-enqueued for the next tick with fresh
    /// sequence numbers, which keeps the overflowed messages in order among themselves but
    /// lets messages newly scheduled at the boundary interleave ahead of them.
    ///
    /// Partitions are re-checked at delivery time, so a link cut after scheduling still
    /// drops the message. Returns the number of envelopes actually delivered.
    pub fn tick(&self, mut deliver: impl FnMut(MessageEnvelope)) -> usize {
        let due = {
            let Ok(mut state) = self.state.lock() else {
                warn!("network state poisoned; tick is a no-op");
                return 0;
            };
            state.current_tick += 1;
            let now = state.current_tick;
            let mut due = Vec::new();
            while let Some(head) = state.queue.peek() {
                if head.delivery_tick > now {
                    break;
                }
                let Some(message) = state.queue.pop() else {
                    break;
                };
                due.push(message.envelope);
            }
            if let Some(limit) = state.max_per_tick {
                for envelope in due.split_off(limit.min(due.len())) {
                    let sequence = state.next_sequence();
                    state.queue.push(ScheduledMessage {
                        envelope,
                        delivery_tick: now + 1,
                        sequence,
                    });
                }
            }
            due
        };

        // deliver outside the lock: handlers are free to send
        let mut delivered = 0;
        for envelope in due {
            if self.is_partitioned(&envelope.source, &envelope.destination) {
                debug!(
                    message_id = envelope.message_id,
                    "dropping due message: endpoints partitioned since scheduling"
                );
                continue;
            }
            deliver(envelope);
            delivered += 1;
        }
        delivered
    }

    /// Zero the clock, drop everything in flight, heal partitions, and restore the default
    /// configuration (including the RNG, re-seeded from the original seed).
    pub fn reset(&self) -> DeltaResult<()> {
        let mut state = self.lock()?;
        *state = NetState::new(state.seed);
        Ok(())
    }

    pub fn current_tick(&self) -> u64 {
        self.lock().map(|state| state.current_tick).unwrap_or(0)
    }

    /// Number of messages scheduled but not yet delivered.
    pub fn pending_len(&self) -> usize {
        self.lock().map(|state| state.queue.len()).unwrap_or(0)
    }

    fn lock(&self) -> DeltaResult<std::sync::MutexGuard<'_, NetState>> {
        self.state
            .lock()
            .map_err(|_| Error::generic("network state lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::{CorrelationId, Message};

    fn envelope(id: u64, source: &Endpoint, destination: &Endpoint) -> MessageEnvelope {
        MessageEnvelope {
            message_id: id,
            source: source.clone(),
            destination: destination.clone(),
            payload: Message::GetObject {
                key: format!("key-{id}"),
                correlation_id: CorrelationId::new(),
            },
        }
    }

    fn drain(network: &SimulatedNetwork) -> Vec<u64> {
        let mut ids = Vec::new();
        while network.pending_len() > 0 {
            network.tick(|env| ids.push(env.message_id));
        }
        ids
    }

    #[test]
    fn never_delivers_on_the_send_tick() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        assert!(network.send(envelope(1, &a, &b)));

        // latency is zero, but the minimum delay is one full tick
        assert_eq!(network.pending_len(), 1);
        let delivered = network.tick(|_| {});
        assert_eq!(delivered, 1);
        assert_eq!(network.current_tick(), 1);
    }

    #[test]
    fn fifo_within_a_tick() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        for id in 0..50 {
            assert!(network.send(envelope(id, &a, &b)));
        }
        assert_eq!(drain(&network), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn cross_tick_ordering_is_strict() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        network.set_latency(3, 3).unwrap();
        network.send(envelope(1, &a, &b));
        network.set_latency(1, 1).unwrap();
        network.send(envelope(2, &a, &b));

        // message 2 was sent later but has the earlier delivery tick
        assert_eq!(drain(&network), vec![2, 1]);
    }

    #[test]
    fn partitioned_sends_are_refused() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        network.disconnect(&a, &b).unwrap();

        // both directions are cut
        assert!(!network.send(envelope(1, &a, &b)));
        assert!(!network.send(envelope(2, &b, &a)));

        network.reconnect_all().unwrap();
        assert!(network.send(envelope(3, &a, &b)));
    }

    #[test]
    fn partition_is_rechecked_at_delivery() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        assert!(network.send(envelope(1, &a, &b)));
        network.disconnect(&a, &b).unwrap();

        let delivered = network.tick(|_| panic!("must not deliver across a partition"));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn full_loss_drops_everything() {
        let network = SimulatedNetwork::with_seed(7);
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        network.set_loss_rate(1.0).unwrap();
        assert!(!network.send(envelope(1, &a, &b)));
        assert_eq!(network.pending_len(), 0);
    }

    #[test]
    fn loss_is_deterministic_per_seed() {
        let outcomes = |seed: u64| -> Vec<bool> {
            let network = SimulatedNetwork::with_seed(seed);
            let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
            network.set_loss_rate(0.5).unwrap();
            (0..100).map(|id| network.send(envelope(id, &a, &b))).collect()
        };
        assert_eq!(outcomes(42), outcomes(42));
        assert_ne!(outcomes(42), outcomes(43));
    }

    #[test]
    fn bandwidth_cap_spills_into_the_next_tick() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        network.set_max_messages_per_tick(Some(2)).unwrap();
        for id in 0..5 {
            network.send(envelope(id, &a, &b));
        }

        let mut first = Vec::new();
        assert_eq!(network.tick(|env| first.push(env.message_id)), 2);
        assert_eq!(first, vec![0, 1]);
        assert_eq!(network.pending_len(), 3);

        // the overflow keeps its relative order on the following ticks
        assert_eq!(drain(&network), vec![2, 3, 4]);
    }

    #[test]
    fn latency_range_is_respected() {
        let network = SimulatedNetwork::with_seed(9);
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        network.set_latency(2, 4).unwrap();
        for id in 0..20 {
            network.send(envelope(id, &a, &b));
        }
        // nothing can arrive before tick 2
        assert_eq!(network.tick(|_| {}), 0);
        let mut seen = 0;
        for _ in 0..3 {
            seen += network.tick(|_| {});
        }
        assert_eq!(seen, 20);
    }

    #[test]
    fn reset_restores_defaults() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Endpoint::localhost(1), Endpoint::localhost(2));
        network.set_loss_rate(1.0).unwrap();
        network.disconnect(&a, &b).unwrap();
        network.tick(|_| {});
        network.reset().unwrap();

        assert_eq!(network.current_tick(), 0);
        assert!(!network.is_partitioned(&a, &b));
        assert!(network.send(envelope(1, &a, &b)));
    }

    #[test]
    fn bad_configuration_is_rejected() {
        let network = SimulatedNetwork::new();
        assert!(matches!(
            network.set_loss_rate(1.5),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            network.set_latency(5, 2),
            Err(Error::InvalidArgument(_))
        ));
    }
}
