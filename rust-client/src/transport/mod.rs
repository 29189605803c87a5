//! Broker transport abstraction.
//!
//! The connection manager only talks to the broker through these traits.
//! [`LapinTransport`] is the production implementation; tests plug in an
//! in-memory broker.

mod amqp;

use async_trait::async_trait;

use crate::error::TransportError;

pub use amqp::LapinTransport;

/// Queue declaration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclareOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

impl DeclareOptions {
    /// Durable, shared, kept when unused; waits for the broker's reply.
    pub const DURABLE: Self = Self {
        durable: true,
        auto_delete: false,
        exclusive: false,
        no_wait: false,
    };
}

/// Publish flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub mandatory: bool,
    pub immediate: bool,
}

/// A message ready to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content_type: &'static str,
    pub message_id: Option<String>,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn text(payload: &str) -> Self {
        Self {
            content_type: "text/plain",
            message_id: None,
            body: payload.as_bytes().to_vec(),
        }
    }

    pub fn json(body: Vec<u8>, message_id: impl Into<String>) -> Self {
        Self {
            content_type: "application/json",
            message_id: Some(message_id.into()),
            body,
        }
    }
}

/// Opens connections to a broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    type Connection: BrokerConnection;

    async fn dial(&self, uri: &str) -> Result<Self::Connection, TransportError>;
}

/// One open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    type Channel: BrokerChannel;

    async fn channel(&self) -> Result<Self::Channel, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// A channel multiplexed over a connection. Clones share the same channel.
#[async_trait]
pub trait BrokerChannel: Clone + Send + Sync {
    type Delivery: BrokerDelivery;

    async fn close(&self) -> Result<(), TransportError>;

    async fn declare_queue(&self, name: &str, options: DeclareOptions) -> Result<(), TransportError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: PublishOptions,
        message: OutboundMessage,
    ) -> Result<(), TransportError>;

    /// Fetch a single message; `None` when the queue is empty.
    async fn fetch(&self, queue: &str, auto_ack: bool) -> Result<Option<Self::Delivery>, TransportError>;
}

/// A fetched message awaiting acknowledgement.
#[async_trait]
pub trait BrokerDelivery: Send + Sync {
    fn body(&self) -> &[u8];

    async fn ack(&self) -> Result<(), TransportError>;

    async fn nack(&self, requeue: bool) -> Result<(), TransportError>;
}
