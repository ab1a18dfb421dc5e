use crate::store::keys::SessionKeys;
use crate::types::events::DisconnectReason;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// The account a transport connection authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    /// Full account address, e.g. `5551234:1@s.whatsapp.net`.
    pub id: String,
    pub name: Option<String>,
}

/// An event produced by a transport client.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing payload the user must scan. Newer payloads replace older ones.
    PairingCode(String),
    /// The connection is authenticated and usable.
    ConnectionOpen(AccountIdentity),
    /// The connection went away.
    ConnectionClose(DisconnectReason),
    /// The top-level identity record changed and should be persisted.
    CredentialsChanged(Vec<u8>),
}

/// A [`TransportEvent`] stamped with the connection attempt that produced it.
#[derive(Debug, Clone)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Sending half of a session's event queue, bound to one connection attempt.
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues an event. Returns `false` once the session has stopped listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Credentials handed to [`TransportClient::connect`].
#[derive(Debug, Clone)]
pub struct AuthState {
    /// The persisted identity record, or `None` for a session that must pair.
    pub creds: Option<Vec<u8>>,
    pub keys: SessionKeys,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub name: Option<String>,
    pub unread_count: u32,
    /// Unix seconds of the latest message, 0 when unknown.
    pub last_message_time: i64,
    pub last_message_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub from_me: bool,
    pub body: String,
    pub timestamp: i64,
}

/// One connection attempt speaking the wire protocol.
///
/// Events are reported through the [`EventSender`] the client was created
/// with, in the order they happen.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Starts connecting. Returns once the attempt is under way; the outcome
    /// arrives as events.
    async fn connect(&self, auth: AuthState) -> Result<(), TransportError>;

    /// Sends a text message and returns the message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<String, TransportError>;

    async fn disconnect(&self);

    async fn chats(&self) -> Vec<ChatSummary>;

    async fn messages(&self, chat_jid: &str) -> Vec<ChatMessage>;
}

/// Builds a fresh transport client for each connection attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_client(
        &self,
        session_id: &str,
        events: EventSender,
    ) -> Result<Arc<dyn TransportClient>, TransportError>;
}
