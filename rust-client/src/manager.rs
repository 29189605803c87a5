//! Connection and channel lifecycle with ordered multi-server failover.
//!
//! [`ServerConnectionManager`] owns at most one broker connection plus a cache
//! of named channels opened on it. Channels are keyed either by a caller
//! supplied name or, for queue work, by `"<purpose>.<effective queue>"`, so
//! producers and consumers on the same queue get separate channels.
//!
//! The cache only lives as long as the connection: every path that drops the
//! connection (close, reset, configuration changes) closes and forgets the
//! cached channels first.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use crate::config::{QueueSettings, ServerCredentials};
use crate::envelope::{Envelope, Message};
use crate::error::{ConnectionError, EnvelopeError, Result, TransportError};
use crate::naming::QueueNaming;
use crate::transport::{
    BrokerChannel, BrokerConnection, BrokerDelivery, BrokerTransport, DeclareOptions,
    OutboundMessage, PublishOptions,
};
use crate::uri;

/// Channel type produced by a transport's connections.
pub type ChannelOf<T> = <<T as BrokerTransport>::Connection as BrokerConnection>::Channel;

/// Delivery type produced by a transport's channels.
pub type DeliveryOf<T> = <ChannelOf<T> as BrokerChannel>::Delivery;

/// Default exchange; the routing key is the queue name.
const DEFAULT_EXCHANGE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Marks a dial in progress; the state falls back to `Disconnected` if the
/// dial is abandoned before [`Dialing::connected`] is called.
struct Dialing<'a> {
    state: &'a mut ConnectionState,
}

impl<'a> Dialing<'a> {
    fn start(state: &'a mut ConnectionState) -> Self {
        *state = ConnectionState::Connecting;
        Self { state }
    }

    fn connected(self) {
        *self.state = ConnectionState::Connected;
    }
}

impl Drop for Dialing<'_> {
    fn drop(&mut self) {
        if *self.state == ConnectionState::Connecting {
            *self.state = ConnectionState::Disconnected;
        }
    }
}

/// A decoded envelope together with the delivery it arrived on.
///
/// The delivery stays unacknowledged until the caller acks or rejects it.
#[derive(Debug)]
pub struct Retrieved<D> {
    pub envelope: Envelope,
    pub delivery: D,
}

impl<D: BrokerDelivery> Retrieved<D> {
    pub async fn ack(&self) -> Result<(), TransportError> {
        self.delivery.ack().await
    }

    /// Negative acknowledgement; `requeue` asks the broker to redeliver.
    pub async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.delivery.nack(requeue).await
    }
}

/// A delivery with the outcome of decoding its body.
#[derive(Debug)]
pub struct Decoded<D> {
    pub envelope: Result<Envelope, EnvelopeError>,
    pub delivery: D,
}

pub struct ServerConnectionManager<T: BrokerTransport> {
    transport: T,
    servers: Vec<ServerCredentials>,
    naming: QueueNaming,
    connection: Option<T::Connection>,
    channels: HashMap<String, ChannelOf<T>>,
    state: ConnectionState,
    active_server: Option<usize>,
}

impl<T: BrokerTransport> ServerConnectionManager<T> {
    /// Create a disconnected manager with no servers and no naming.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            servers: Vec::new(),
            naming: QueueNaming::default(),
            connection: None,
            channels: HashMap::new(),
            state: ConnectionState::Disconnected,
            active_server: None,
        }
    }

    pub fn from_settings(transport: T, settings: QueueSettings, default_queue: &str) -> Self {
        let mut manager = Self::new(transport);
        manager.servers = settings.servers;
        manager.naming = QueueNaming::new(settings.prefix, default_queue);
        manager
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Index into [`servers`](Self::servers) of the candidate that accepted
    /// the current connection.
    pub fn active_server(&self) -> Option<usize> {
        self.active_server
    }

    pub fn servers(&self) -> &[ServerCredentials] {
        &self.servers
    }

    pub fn prefix(&self) -> &str {
        self.naming.prefix()
    }

    pub fn default_queue(&self) -> &str {
        self.naming.default_queue()
    }

    pub fn is_channel_open(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Effective broker-side name for `name`.
    pub fn queue_name(&self, name: &str) -> Result<String> {
        self.naming.resolve(name)
    }

    /// Replace the candidate list. An open connection is closed first.
    pub async fn set_servers(&mut self, servers: Vec<ServerCredentials>) {
        self.close_quietly().await;
        self.servers = servers;
    }

    /// Change the queue prefix. An open connection is closed first.
    pub async fn set_prefix(&mut self, prefix: &str) {
        self.close_quietly().await;
        self.naming.set_prefix(prefix);
    }

    /// Change the default queue. An open connection is closed first.
    pub async fn set_default_queue(&mut self, name: &str) {
        self.close_quietly().await;
        self.naming.set_default_queue(name);
    }

    /// Return the live connection, dialing the candidates in order if there
    /// is none yet.
    pub async fn open(&mut self) -> Result<&T::Connection> {
        if self.connection.is_none() {
            self.connect().await?;
        }
        self.connection.as_ref().ok_or(ConnectionError::NotConnected)
    }

    async fn connect(&mut self) -> Result<()> {
        if self.servers.is_empty() {
            warn!("rabbitmq_no_servers_configured");
            return Err(ConnectionError::NoServersConfigured);
        }

        let dialing = Dialing::start(&mut self.state);

        for (index, server) in self.servers.iter().enumerate() {
            let uri = match uri::build(server) {
                Ok(uri) => uri,
                Err(e) => {
                    warn!(
                        candidate = index,
                        host = %server.host,
                        error = %e,
                        "rabbitmq_failover_candidate_failed"
                    );
                    continue;
                }
            };

            info!(
                candidate = index,
                host = %server.host,
                port = server.port,
                vhost = %server.vhost,
                "rabbitmq_connecting"
            );

            match self.transport.dial(&uri).await {
                Ok(connection) => {
                    info!(candidate = index, host = %server.host, "rabbitmq_connected");
                    self.connection = Some(connection);
                    self.active_server = Some(index);
                    dialing.connected();
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        candidate = index,
                        host = %server.host,
                        error = %e,
                        "rabbitmq_failover_candidate_failed"
                    );
                }
            }
        }

        drop(dialing);
        let attempted = self.servers.len();
        error!(attempted = attempted, "rabbitmq_no_reachable_server");
        Err(ConnectionError::NoReachableServer { attempted })
    }

    /// Close then reopen, returning the new connection.
    pub async fn reset(&mut self) -> Result<&T::Connection> {
        self.close_quietly().await;
        self.open().await
    }

    /// Close every cached channel, then the connection.
    ///
    /// Local state is cleared no matter what the broker answers. Release
    /// failures are reported afterwards as [`ConnectionError::ReleaseFailed`].
    pub async fn close(&mut self) -> Result<()> {
        let channels = std::mem::take(&mut self.channels);
        let connection = self.connection.take();
        self.state = ConnectionState::Disconnected;
        self.active_server = None;

        let mut failed = 0;
        let mut last = None;

        for (name, channel) in channels {
            if let Err(e) = channel.close().await {
                warn!(channel = %name, error = %e, "rabbitmq_channel_close_failed");
                failed += 1;
                last = Some(e);
            }
        }

        if let Some(connection) = connection {
            match connection.close().await {
                Ok(()) => info!("rabbitmq_connection_closed"),
                Err(e) => {
                    warn!(error = %e, "rabbitmq_connection_close_failed");
                    failed += 1;
                    last = Some(e);
                }
            }
        }

        match last {
            Some(last) => Err(ConnectionError::ReleaseFailed { failed, last }),
            None => Ok(()),
        }
    }

    async fn close_quietly(&mut self) {
        if let Err(e) = self.close().await {
            warn!(error = %e, "rabbitmq_close_failed");
        }
    }

    /// Return the channel cached under `name`, opening it on the current
    /// connection if needed. Never dials.
    pub async fn open_channel(&mut self, name: &str) -> Result<ChannelOf<T>> {
        if let Some(channel) = self.channels.get(name) {
            return Ok(channel.clone());
        }

        let connection = self.connection.as_ref().ok_or(ConnectionError::NotConnected)?;
        let channel = connection.channel().await?;
        self.channels.insert(name.to_string(), channel.clone());
        debug!(channel = %name, "rabbitmq_channel_opened");

        Ok(channel)
    }

    /// Channel for `purpose` on `queue`, plus the effective queue name.
    ///
    /// With `declare`, a newly opened channel declares the queue durable. A
    /// failed declaration is returned but the channel stays cached.
    pub async fn open_queue_channel(
        &mut self,
        purpose: &str,
        queue: &str,
        declare: bool,
    ) -> Result<(ChannelOf<T>, String)> {
        let name = self.naming.resolve(queue)?;
        let key = format!("{}.{}", purpose, name);
        let fresh = !self.channels.contains_key(&key);

        let channel = self.open_channel(&key).await?;

        if fresh && declare {
            channel.declare_queue(&name, DeclareOptions::DURABLE).await?;
            info!(queue = %name, "rabbitmq_queue_declared");
        }

        Ok((channel, name))
    }

    /// Publish a plain-text payload to `queue`.
    pub async fn publish_string(&mut self, purpose: &str, queue: &str, payload: &str) -> Result<()> {
        let (channel, name) = self.open_queue_channel(purpose, queue, false).await?;
        channel
            .publish(
                DEFAULT_EXCHANGE,
                &name,
                PublishOptions::default(),
                OutboundMessage::text(payload),
            )
            .await?;
        debug!(queue = %name, "message_published");
        Ok(())
    }

    /// Encode and publish a message; its id becomes the AMQP message id.
    pub async fn publish_envelope<M: Message>(
        &mut self,
        purpose: &str,
        queue: &str,
        message: &mut M,
    ) -> Result<()> {
        let body = message.to_vec()?;
        let id = message.envelope().id().to_string();

        let (channel, name) = self.open_queue_channel(purpose, queue, false).await?;
        channel
            .publish(
                DEFAULT_EXCHANGE,
                &name,
                PublishOptions::default(),
                OutboundMessage::json(body, id.clone()),
            )
            .await?;
        debug!(queue = %name, message_id = %id, "envelope_published");
        Ok(())
    }

    /// Fetch one raw delivery without auto-ack. `None` when the queue is empty.
    pub async fn retrieve(&mut self, purpose: &str, queue: &str) -> Result<Option<DeliveryOf<T>>> {
        let (channel, name) = self.open_queue_channel(purpose, queue, false).await?;
        Ok(channel.fetch(&name, false).await?)
    }

    /// Fetch one delivery and try to decode it, leaving both outcomes
    /// unacknowledged.
    pub async fn retrieve_decoded(
        &mut self,
        purpose: &str,
        queue: &str,
    ) -> Result<Option<Decoded<DeliveryOf<T>>>> {
        let delivery = match self.retrieve(purpose, queue).await? {
            Some(delivery) => delivery,
            None => return Ok(None),
        };

        let envelope = Envelope::from_slice(delivery.body()).map_err(|e| match e {
            EnvelopeError::Malformed(_) => e,
            other => EnvelopeError::Malformed(other.to_string()),
        });
        Ok(Some(Decoded { envelope, delivery }))
    }

    /// Fetch and decode one envelope.
    ///
    /// A payload that does not decode is rejected without requeue and
    /// reported as [`EnvelopeError::Malformed`]. Use
    /// [`retrieve_decoded`](Self::retrieve_decoded) to keep the delivery.
    pub async fn retrieve_envelope(
        &mut self,
        purpose: &str,
        queue: &str,
    ) -> Result<Option<Retrieved<DeliveryOf<T>>>> {
        let Decoded { envelope, delivery } = match self.retrieve_decoded(purpose, queue).await? {
            Some(decoded) => decoded,
            None => return Ok(None),
        };

        match envelope {
            Ok(envelope) => Ok(Some(Retrieved { envelope, delivery })),
            Err(e) => {
                error!(error = %e, "envelope_decode_failed");
                if let Err(nack_err) = delivery.nack(false).await {
                    warn!(error = %nack_err, "envelope_reject_failed");
                }
                Err(e.into())
            }
        }
    }

    /// Record an error on a retrieved envelope, bump its requeue count,
    /// publish it again to `queue` and ack the original delivery.
    ///
    /// `retrieved.envelope` is only updated once the publish succeeds.
    /// Returns the new requeue count.
    pub async fn requeue_envelope(
        &mut self,
        purpose: &str,
        queue: &str,
        retrieved: &mut Retrieved<DeliveryOf<T>>,
        code: i64,
        message: &str,
    ) -> Result<u32> {
        let mut envelope = retrieved.envelope.clone();
        envelope.set_error(code, message)?;
        let count = envelope.requeue();

        self.publish_envelope(purpose, queue, &mut envelope).await?;
        retrieved.envelope = envelope;
        retrieved.delivery.ack().await?;

        info!(
            message_id = %retrieved.envelope.id(),
            requeue_count = count,
            error_code = code,
            "envelope_requeued"
        );
        Ok(count)
    }
}
