//! Data transfer objects for inter-service communication
//!
//! Event envelopes and payloads exchanged over the message bus between the
//! store (publisher) and the builder worker (consumer).

pub mod event;
