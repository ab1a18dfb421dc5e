use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use anyhow::Context;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use wacore::transport::{ChatMessage, ChatSummary, TransportFactory};
use wacore::types::SessionState;
use wacore::types::jid::{normalize_recipient, user_part};
use whatsapp_gateway_redb_storage::RedbCredentialStore;

/// Default bound on how long a command waits for a session to connect.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of messages returned by [`Gateway::get_messages`] when no limit is given.
pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

/// The command surface over a [`SessionRegistry`].
#[derive(Clone)]
pub struct Gateway {
    registry: SessionRegistry,
    ready_timeout: Duration,
}

impl Gateway {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Builds a gateway over a redb credential store at `config.db_path`.
    pub async fn from_config(
        config: &GatewayConfig,
        transports: Arc<dyn TransportFactory>,
    ) -> anyhow::Result<Self> {
        info!(target: "Gateway/Commands", "Opening credential store at '{}'", config.db_path);
        let store = RedbCredentialStore::new(config.db_path.clone())
            .await
            .with_context(|| format!("Failed to open credential store at {}", config.db_path))?;

        let registry = SessionRegistry::builder()
            .with_store(Arc::new(store))
            .with_transport_factory(transports)
            .with_status_publisher(config.status_publisher())
            .with_reconnect_policy(config.reconnect_policy())
            .build()?;

        Ok(Self::new(registry).with_ready_timeout(config.ready_timeout()))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    /// Makes the session resident. `force_reinit` restarts a resident one.
    pub async fn connect(&self, session_id: &str, force_reinit: bool) -> Result<SessionState> {
        let handle = self.registry.acquire(session_id, force_reinit).await?;
        Ok(handle.state())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.registry.delete(session_id).await
    }

    /// Sends a text message, starting the session first when it is not resident.
    ///
    /// Returns the message id assigned by the transport.
    pub async fn send_message(&self, session_id: &str, recipient: &str, text: &str) -> Result<String> {
        let to = normalize_recipient(recipient)?;
        let handle = self.ready_session(session_id).await?;
        let transport = handle
            .transport()
            .await
            .ok_or_else(|| GatewayError::SessionNotReady {
                session_id: session_id.to_string(),
                state: handle.state(),
            })?;

        match transport.send_text(&to, text).await {
            Ok(message_id) => {
                debug!(target: "Gateway/Commands", "[{}] Sent message {} to {}", session_id, message_id, to);
                Ok(message_id)
            }
            Err(source) => {
                warn!(target: "Gateway/Commands", "[{}] Delivery to {} failed: {}", session_id, to, source);
                Err(GatewayError::Delivery {
                    recipient: to,
                    source,
                })
            }
        }
    }

    /// Chats known to the session, most recently active first.
    pub async fn get_chats(&self, session_id: &str) -> Result<Vec<ChatSummary>> {
        let handle = self.registry.acquire(session_id, false).await?;
        let Some(transport) = handle.transport().await else {
            return Ok(Vec::new());
        };

        let mut chats = transport.chats().await;
        for chat in &mut chats {
            if chat.name.as_deref().is_none_or(str::is_empty) {
                chat.name = Some(user_part(&chat.id).to_string());
            }
        }
        chats.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(chats)
    }

    /// The last `limit` messages of a chat, oldest first.
    pub async fn get_messages(
        &self,
        session_id: &str,
        chat_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>> {
        let jid = normalize_recipient(chat_id)?;
        let limit = limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
        let handle = self.registry.acquire(session_id, false).await?;
        let Some(transport) = handle.transport().await else {
            return Ok(Vec::new());
        };

        let mut messages = transport.messages(&jid).await;
        messages.sort_by_key(|m| m.timestamp);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    async fn ready_session(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        let handle = self.registry.acquire(session_id, false).await?;
        if handle.state() != SessionState::Connected {
            debug!(
                target: "Gateway/Commands",
                "[{}] Waiting up to {:?} for the session to connect",
                session_id, self.ready_timeout
            );
            handle.wait_until_connected(self.ready_timeout).await?;
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemoryStatusPublisher;
    use wacore::transport::AccountIdentity;
    use wacore::transport::mock::{ConnectBehavior, MockTransportFactory};

    fn alice() -> AccountIdentity {
        AccountIdentity {
            id: "5551234:1@s.whatsapp.net".into(),
            name: Some("Alice".into()),
        }
    }

    fn gateway(transports: Arc<MockTransportFactory>) -> Gateway {
        let registry = SessionRegistry::builder()
            .with_transport_factory(transports)
            .with_status_publisher(Arc::new(MemoryStatusPublisher::new()))
            .build()
            .unwrap();
        Gateway::new(registry).with_ready_timeout(Duration::from_secs(5))
    }

    fn chat(id: &str, name: Option<&str>, last: i64) -> ChatSummary {
        ChatSummary {
            id: id.into(),
            name: name.map(str::to_string),
            unread_count: 0,
            last_message_time: last,
            last_message_body: None,
        }
    }

    fn message(id: &str, timestamp: i64) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            from_me: false,
            body: format!("body {id}"),
            timestamp,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_resurrects_missing_session() {
        let transports = Arc::new(MockTransportFactory::new(ConnectBehavior::Open(alice())));
        let gateway = gateway(transports.clone());

        let id = gateway
            .send_message("acct", "+1 555-0100", "hello")
            .await
            .unwrap();

        assert_eq!(id, "MOCK1");
        assert_eq!(
            transports.latest_client().unwrap().sent_messages(),
            vec![("15550100@s.whatsapp.net".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_when_never_connected() {
        let transports = Arc::new(MockTransportFactory::new(ConnectBehavior::Silent));
        let gateway = gateway(transports.clone());

        let started = tokio::time::Instant::now();
        let err = gateway
            .send_message("acct", "15550100", "hello")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::SessionNotReady { .. }));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(transports.latest_client().unwrap().sent_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_recipient_fails_before_acquire() {
        let transports = Arc::new(MockTransportFactory::new(ConnectBehavior::Open(alice())));
        let gateway = gateway(transports.clone());

        let err = gateway
            .send_message("acct", "nobody", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRecipient(_)));
        assert_eq!(transports.created_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_delivery_error() {
        let transports = Arc::new(MockTransportFactory::new(ConnectBehavior::Open(alice())));
        transports.fail_sends_with("recipient not on network");
        let gateway = gateway(transports.clone());

        let err = gateway
            .send_message("acct", "120363@g.us", "hello")
            .await
            .unwrap_err();
        match err {
            GatewayError::Delivery { recipient, .. } => assert_eq!(recipient, "120363@g.us"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transports.created_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chats_sorted_newest_first_with_name_fallback() {
        let transports = Arc::new(
            MockTransportFactory::new(ConnectBehavior::Open(alice())).with_chats(vec![
                chat("111@s.whatsapp.net", Some("Bob"), 100),
                chat("222@g.us", None, 300),
                chat("333@s.whatsapp.net", Some(""), 200),
            ]),
        );
        let gateway = gateway(transports);

        let chats = gateway.get_chats("acct").await.unwrap();
        let view: Vec<(&str, Option<&str>)> = chats
            .iter()
            .map(|c| (c.id.as_str(), c.name.as_deref()))
            .collect();
        assert_eq!(
            view,
            vec![
                ("222@g.us", Some("222")),
                ("333@s.whatsapp.net", Some("333")),
                ("111@s.whatsapp.net", Some("Bob")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_oldest_first_and_limited() {
        let transports = Arc::new(
            MockTransportFactory::new(ConnectBehavior::Open(alice())).with_messages(
                "15550100@s.whatsapp.net",
                vec![message("c", 30), message("a", 10), message("d", 40), message("b", 20)],
            ),
        );
        let gateway = gateway(transports);

        let messages = gateway
            .get_messages("acct", "15550100", Some(3))
            .await
            .unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);

        let all = gateway
            .get_messages("acct", "15550100@s.whatsapp.net", None)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }
}
