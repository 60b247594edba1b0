//! In-process networking: the message vocabulary, the deterministic simulated transport,
//! and the bus that connects handlers to it.

mod bus;
mod message;
mod simulator;

pub use bus::{MessageBus, MessageHandler, DEFAULT_TICK_INTERVAL};
pub use message::{CorrelationId, Endpoint, Message, MessageEnvelope};
pub use simulator::SimulatedNetwork;
