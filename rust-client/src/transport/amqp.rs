//! [`BrokerTransport`] over lapin.

use async_trait::async_trait;
use lapin::{
    message::BasicGetMessage,
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};

use super::{
    BrokerChannel, BrokerConnection, BrokerDelivery, BrokerTransport, DeclareOptions,
    OutboundMessage, PublishOptions,
};
use crate::error::TransportError;

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ (or any AMQP 0.9.1 broker) with lapin.
#[derive(Clone, Default)]
pub struct LapinTransport {
    properties: ConnectionProperties,
}

impl LapinTransport {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl BrokerTransport for LapinTransport {
    type Connection = Connection;

    async fn dial(&self, uri: &str) -> Result<Connection, TransportError> {
        Ok(Connection::connect(uri, self.properties.clone()).await?)
    }
}

#[async_trait]
impl BrokerConnection for Connection {
    type Channel = Channel;

    async fn channel(&self) -> Result<Channel, TransportError> {
        Ok(self.create_channel().await?)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(Connection::close(self, REPLY_SUCCESS, "Normal shutdown").await?)
    }
}

#[async_trait]
impl BrokerChannel for Channel {
    type Delivery = BasicGetMessage;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(Channel::close(self, REPLY_SUCCESS, "Normal shutdown").await?)
    }

    async fn declare_queue(&self, name: &str, options: DeclareOptions) -> Result<(), TransportError> {
        self.queue_declare(
            name,
            QueueDeclareOptions {
                durable: options.durable,
                auto_delete: options.auto_delete,
                exclusive: options.exclusive,
                nowait: options.no_wait,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: PublishOptions,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2) // Persistent
            .with_content_type(message.content_type.into());
        if let Some(id) = message.message_id {
            properties = properties.with_message_id(id.into());
        }

        self.basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                mandatory: options.mandatory,
                immediate: options.immediate,
            },
            &message.body,
            properties,
        )
        .await?
        .await?;
        Ok(())
    }

    async fn fetch(&self, queue: &str, auto_ack: bool) -> Result<Option<BasicGetMessage>, TransportError> {
        Ok(self
            .basic_get(queue, BasicGetOptions { no_ack: auto_ack })
            .await?)
    }
}

#[async_trait]
impl BrokerDelivery for BasicGetMessage {
    fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    async fn ack(&self) -> Result<(), TransportError> {
        Ok(self.delivery.acker.ack(BasicAckOptions::default()).await?)
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        Ok(self
            .delivery
            .acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?)
    }
}
