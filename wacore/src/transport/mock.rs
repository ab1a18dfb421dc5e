//! A scriptable in-process transport for tests.

use super::*;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a mock client does when `connect` is called.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    /// Accept the attempt and never report anything.
    Silent,
    /// Emit a pairing code right away.
    PairingCode(String),
    /// Emit connection-open right away.
    Open(AccountIdentity),
    /// Pair when no credentials were supplied, open otherwise.
    PairIfNoCreds {
        code: String,
        identity: AccountIdentity,
    },
    /// Refuse to connect.
    Fail(String),
}

pub struct MockTransportClient {
    session_id: String,
    events: EventSender,
    behavior: ConnectBehavior,
    send_failure: Option<String>,
    chats: Vec<ChatSummary>,
    messages: HashMap<String, Vec<ChatMessage>>,
    sent: Mutex<Vec<(String, String)>>,
    connect_creds: Mutex<Vec<Option<Vec<u8>>>>,
    keys: Mutex<Option<SessionKeys>>,
    disconnects: AtomicUsize,
}

impl MockTransportClient {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    /// Pushes an event into the owning session as if the wire produced it.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.emit(event)
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    /// Credentials passed to each `connect` call, oldest first.
    pub fn connect_creds(&self) -> Vec<Option<Vec<u8>>> {
        lock(&self.connect_creds).clone()
    }

    /// The key view passed to the last `connect` call.
    pub fn keys(&self) -> Option<SessionKeys> {
        lock(&self.keys).clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TransportClient for MockTransportClient {
    async fn connect(&self, auth: AuthState) -> Result<(), TransportError> {
        let has_creds = auth.creds.is_some();
        lock(&self.connect_creds).push(auth.creds);
        *lock(&self.keys) = Some(auth.keys);

        match &self.behavior {
            ConnectBehavior::Silent => {}
            ConnectBehavior::PairingCode(code) => {
                self.emit(TransportEvent::PairingCode(code.clone()));
            }
            ConnectBehavior::Open(identity) => {
                self.emit(TransportEvent::ConnectionOpen(identity.clone()));
            }
            ConnectBehavior::PairIfNoCreds { code, identity } => {
                if has_creds {
                    self.emit(TransportEvent::ConnectionOpen(identity.clone()));
                } else {
                    self.emit(TransportEvent::PairingCode(code.clone()));
                }
            }
            ConnectBehavior::Fail(reason) => return Err(TransportError::Connect(reason.clone())),
        }
        Ok(())
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<String, TransportError> {
        if let Some(reason) = &self.send_failure {
            return Err(TransportError::Send(reason.clone()));
        }
        let mut sent = lock(&self.sent);
        sent.push((to.to_string(), text.to_string()));
        Ok(format!("MOCK{}", sent.len()))
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn chats(&self) -> Vec<ChatSummary> {
        self.chats.clone()
    }

    async fn messages(&self, chat_jid: &str) -> Vec<ChatMessage> {
        self.messages.get(chat_jid).cloned().unwrap_or_default()
    }
}

/// Factory handing out [`MockTransportClient`]s and remembering every one.
pub struct MockTransportFactory {
    behavior: Mutex<ConnectBehavior>,
    create_delay: Option<Duration>,
    send_failure: Mutex<Option<String>>,
    chats: Vec<ChatSummary>,
    messages: HashMap<String, Vec<ChatMessage>>,
    clients: Mutex<Vec<Arc<MockTransportClient>>>,
    created: AtomicUsize,
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new(ConnectBehavior::Silent)
    }
}

impl MockTransportFactory {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            create_delay: None,
            send_failure: Mutex::new(None),
            chats: Vec::new(),
            messages: HashMap::new(),
            clients: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Makes `create_client` yield for `delay` first, widening race windows.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn with_chats(mut self, chats: Vec<ChatSummary>) -> Self {
        self.chats = chats;
        self
    }

    pub fn with_messages(mut self, chat_jid: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        self.messages.insert(chat_jid.into(), messages);
        self
    }

    /// Applies to clients created after the call.
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Applies to clients created after the call.
    pub fn fail_sends_with(&self, reason: impl Into<String>) {
        *lock(&self.send_failure) = Some(reason.into());
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn clients(&self) -> Vec<Arc<MockTransportClient>> {
        lock(&self.clients).clone()
    }

    pub fn latest_client(&self) -> Option<Arc<MockTransportClient>> {
        lock(&self.clients).last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_client(
        &self,
        session_id: &str,
        events: EventSender,
    ) -> Result<Arc<dyn TransportClient>, TransportError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        let client = Arc::new(MockTransportClient {
            session_id: session_id.to_string(),
            events,
            behavior: lock(&self.behavior).clone(),
            send_failure: lock(&self.send_failure).clone(),
            chats: self.chats.clone(),
            messages: self.messages.clone(),
            sent: Mutex::new(Vec::new()),
            connect_creds: Mutex::new(Vec::new()),
            keys: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
        });
        lock(&self.clients).push(client.clone());
        Ok(client)
    }
}
