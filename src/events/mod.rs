//! Domain events and their dispatch
//!
//! Services publish an event after the transaction that produced it has
//! committed. Subscribers run asynchronously and independently; their
//! failures never reach the publisher.

mod bus;
mod event;

pub use bus::{EventBus, Handler, HandlerFuture, Subscriptions};
pub use event::{DomainEvent, EventEnvelope, EventKind};
