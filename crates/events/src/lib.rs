//! Domain event names, the outbound webhook envelope, and pub/sub mechanics.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::WebhookEnvelope;
pub use event::DomainEvent;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
