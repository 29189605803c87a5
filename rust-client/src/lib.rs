//! Courier - messaging client for queue-backed background work.
//!
//! Services use this library to publish and retrieve structured messages
//! (emails, invitations, actions) on named RabbitMQ queues:
//! - `ServerConnectionManager`: one connection with ordered failover plus a
//!   cache of queue-scoped channels
//! - `Envelope`: the versioned JSON message format, with `EmailMessage` and
//!   `InviteMessage` views
//! - `courier-drain`: a binary that validates and drains a queue
//!
//! ## Architecture
//!
//! ```text
//! Producer → Envelope → manager.publish_envelope → queue → manager.retrieve_envelope → Consumer
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod naming;
pub mod pathmap;
pub mod transport;
pub mod uri;

// Re-export commonly used types
pub use config::{Config, QueueSettings, ServerCredentials};
pub use envelope::{EmailMessage, Envelope, InviteMessage, Message};
pub use error::{ConnectionError, EnvelopeError, ErrorKind, PathError, TransportError, UriError};
pub use manager::{ConnectionState, Decoded, Retrieved, ServerConnectionManager};
pub use naming::QueueNaming;
pub use pathmap::PathMap;
pub use transport::LapinTransport;
