//! Message transport abstraction.
//!
//! Stages and the poller talk to the broker through these traits so the
//! relay engine is independent of the wire protocol. Two backends exist:
//! an AMQP 0-9-1 client (feature `amqp-broker`) and an in-process broker
//! used for tests and single-host runs.
//!
//! A [`Connection`] owns a single subscription. Deliveries that were
//! received but never acknowledged are returned to their queue when the
//! connection is dropped.

#[cfg(feature = "amqp-broker")]
pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::{BrokerStats, MemoryBroker, MemoryConnector};

/// Content type of operator-facing bodies: failure reports and completions.
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type of job envelopes moving between stages.
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum TransportError {
    /// The link to the broker is gone; callers should reconnect.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The broker refused an operation on a live connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to encode binary body: {0}")]
    BinaryEncode(#[from] bincode::error::EncodeError),
    #[error("Invalid binary body: {0}")]
    BinaryDecode(#[from] bincode::error::DecodeError),
    #[error("Invalid binary body: {0} trailing byte(s)")]
    TrailingBytes(usize),
    #[error("Expected a {expected} body, got {found}")]
    ContentType { expected: String, found: String },
    #[cfg(feature = "amqp-broker")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl TransportError {
    /// Whether the error invalidates the connection it happened on.
    pub fn is_connection_level(&self) -> bool {
        match self {
            TransportError::Connection(_) => true,
            TransportError::Protocol(_)
            | TransportError::Json(_)
            | TransportError::BinaryEncode(_)
            | TransportError::BinaryDecode(_)
            | TransportError::TrailingBytes(_)
            | TransportError::ContentType { .. } => false,
            #[cfg(feature = "amqp-broker")]
            TransportError::Amqp(err) => matches!(
                err,
                lapin::Error::IOError(_)
                    | lapin::Error::InvalidConnectionState(_)
                    | lapin::Error::InvalidChannelState(_)
            ),
        }
    }
}

/// Body encoding of a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// bincode with the standard configuration.
    Binary,
    Json,
}

impl WireFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Binary => BINARY_CONTENT_TYPE,
            Self::Json => JSON_CONTENT_TYPE,
        }
    }
}

/// A message type that always travels in the same [`WireFormat`].
pub trait WireMessage: Serialize + DeserializeOwned {
    const FORMAT: WireFormat;
}

/// An outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub queue: String,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Ask the broker to keep the message across restarts.
    pub persistent: bool,
}

impl Envelope {
    /// Build a persistent JSON message for `queue`.
    pub fn json<T: Serialize + ?Sized>(queue: &str, value: &T) -> Result<Self, TransportError> {
        Ok(Self {
            queue: queue.to_string(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: serde_json::to_vec(value)?,
            persistent: true,
        })
    }

    /// Build a persistent bincode message for `queue`.
    pub fn binary<T: Serialize + ?Sized>(queue: &str, value: &T) -> Result<Self, TransportError> {
        Ok(Self {
            queue: queue.to_string(),
            content_type: BINARY_CONTENT_TYPE.to_string(),
            body: bincode::serde::encode_to_vec(value, bincode::config::standard())?,
            persistent: true,
        })
    }

    /// Encode `value` in the format its type travels in.
    pub fn encode<T: WireMessage>(queue: &str, value: &T) -> Result<Self, TransportError> {
        Ok(Self {
            queue: queue.to_string(),
            content_type: T::FORMAT.content_type().to_string(),
            body: encode(value)?,
            persistent: true,
        })
    }
}

/// Encode a message body of type `T`.
pub fn encode<T: WireMessage>(value: &T) -> Result<Vec<u8>, TransportError> {
    match T::FORMAT {
        WireFormat::Json => Ok(serde_json::to_vec(value)?),
        WireFormat::Binary => Ok(bincode::serde::encode_to_vec(
            value,
            bincode::config::standard(),
        )?),
    }
}

/// Decode a message body of type `T`.
///
/// Trailing bytes after a binary body are an error, so truncated or
/// concatenated messages do not slip through.
pub fn decode<T: WireMessage>(body: &[u8]) -> Result<T, TransportError> {
    match T::FORMAT {
        WireFormat::Json => Ok(serde_json::from_slice(body)?),
        WireFormat::Binary => {
            let (value, read) =
                bincode::serde::decode_from_slice(body, bincode::config::standard())?;
            if read != body.len() {
                return Err(TransportError::TrailingBytes(body.len() - read));
            }
            Ok(value)
        }
    }
}

/// A message received from a subscription, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub delivery_tag: u64,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// The broker delivered this message before without an acknowledgement.
    pub redelivered: bool,
}

impl Delivery {
    /// Decode the body as `T`, rejecting a content type that names another format.
    ///
    /// A missing content type is accepted.
    pub fn decode<T: WireMessage>(&self) -> Result<T, TransportError> {
        let expected = T::FORMAT.content_type();
        if let Some(found) = self.content_type.as_deref() {
            if found != expected {
                return Err(TransportError::ContentType {
                    expected: expected.to_string(),
                    found: found.to_string(),
                });
            }
        }
        decode(&self.body)
    }
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Human-readable target, with credentials redacted.
    fn describe(&self) -> String;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send {
    /// Start consuming `queue` with client acknowledgement and a prefetch of one.
    async fn subscribe(&mut self, queue: &str) -> Result<Box<dyn Subscription>, TransportError>;

    /// Publish outside any transaction; returns once the broker has accepted it.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Open a transaction grouping sends and acknowledgements.
    async fn begin_transaction(&mut self) -> Result<Box<dyn Transaction>, TransportError>;

    /// Acknowledge a delivery outside any transaction.
    async fn acknowledge(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Return a delivery to its queue for redelivery.
    async fn negative_acknowledge(&mut self, delivery: &Delivery) -> Result<(), TransportError>;
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the subscription ended.
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError>;
}

/// Sends and acknowledgements that take effect together on commit.
#[async_trait]
pub trait Transaction: Send {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    async fn acknowledge(&mut self, delivery: &Delivery) -> Result<(), TransportError>;

    async fn commit(&mut self) -> Result<(), TransportError>;

    /// Discard everything buffered in the transaction.
    async fn abort(&mut self) -> Result<(), TransportError>;
}
