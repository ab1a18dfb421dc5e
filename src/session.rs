use crate::error::{GatewayError, Result};
use crate::qrcode::encode_data_url;
use crate::status::{StatusPublisher, publish_or_warn};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use wacore::reconnect::{ReconnectDecision, ReconnectPolicy, TerminalReason};
use wacore::store::{CredentialStore, SessionKeys, validate_session_id};
use wacore::transport::{
    AccountIdentity, AuthState, EventSender, TaggedEvent, TransportClient, TransportEvent,
    TransportFactory,
};
use wacore::types::events::DisconnectReason;
use wacore::types::jid::phone_from_account_id;
use wacore::types::{SessionSnapshot, SessionState, StatusUpdate};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Collaborators shared by every session of a registry.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub store: Arc<dyn CredentialStore>,
    pub transports: Arc<dyn TransportFactory>,
    pub publisher: Arc<dyn StatusPublisher>,
    pub policy: ReconnectPolicy,
}

type TransportSlot = Arc<Mutex<Option<Arc<dyn TransportClient>>>>;

/// One resident session: a transport client driven by its own task.
///
/// The task owns the state machine; the handle observes it through a watch
/// channel and can stop it.
pub struct SessionHandle {
    session_id: Arc<str>,
    snapshot: watch::Receiver<SessionSnapshot>,
    transport: TransportSlot,
    keys: SessionKeys,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Loads credentials, builds the first transport client and starts the
    /// session task.
    pub(crate) async fn start(session_id: &str, ctx: SessionContext) -> Result<Arc<Self>> {
        validate_session_id(session_id)?;
        let session_id: Arc<str> = Arc::from(session_id);
        let keys = SessionKeys::new(session_id.clone(), ctx.store.clone());
        let creds = keys.load_creds().await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let generation = 1;
        let client = ctx
            .transports
            .create_client(&session_id, EventSender::new(generation, events_tx.clone()))
            .await?;

        let (state_tx, state_rx) = watch::channel(SessionSnapshot {
            generation,
            ..SessionSnapshot::new()
        });
        let transport: TransportSlot = Arc::new(Mutex::new(Some(client.clone())));
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            session_id: session_id.clone(),
            ctx,
            keys: keys.clone(),
            events_tx,
            state_tx,
            transport: transport.clone(),
            generation,
            retry_at: None,
        };
        let task = tokio::spawn(actor.run(events_rx, cancel.clone(), client, creds));

        Ok(Arc::new(Self {
            session_id,
            snapshot: state_rx,
            transport,
            keys,
            cancel,
            task: Mutex::new(Some(task)),
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// A receiver that observes every transition of this session.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// The transport client of the current connection attempt, if any.
    pub async fn transport(&self) -> Option<Arc<dyn TransportClient>> {
        self.transport.lock().await.clone()
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// True once [`shutdown`](Self::shutdown) was requested or the task ended.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.snapshot.has_changed().is_err()
    }

    /// Waits until the session is connected, failing fast on terminal states.
    pub async fn wait_until_connected(&self, limit: Duration) -> Result<()> {
        let mut rx = self.snapshot.clone();
        let waited = timeout(
            limit,
            rx.wait_for(|s| s.state == SessionState::Connected || s.state.is_terminal()),
        )
        .await;

        let state = match waited {
            Ok(Ok(snapshot)) => snapshot.state,
            Ok(Err(_)) | Err(_) => self.state(),
        };
        if state == SessionState::Connected {
            Ok(())
        } else {
            Err(GatewayError::SessionNotReady {
                session_id: self.session_id.to_string(),
                state,
            })
        }
    }

    /// Stops the session task: cancels any pending reconnect, closes the
    /// transport and fences credential writes. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take()
            && let Err(e) = handle.await
        {
            error!(target: "Gateway/Session", "[{}] Session task ended abnormally: {}", self.session_id, e);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionActor {
    session_id: Arc<str>,
    ctx: SessionContext,
    keys: SessionKeys,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    state_tx: watch::Sender<SessionSnapshot>,
    transport: TransportSlot,
    generation: u64,
    retry_at: Option<Instant>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TaggedEvent>,
        cancel: CancellationToken,
        client: Arc<dyn TransportClient>,
        creds: Option<Vec<u8>>,
    ) {
        info!(
            target: "Gateway/Session",
            "[{}] Starting session (stored credentials: {})",
            self.session_id,
            creds.is_some()
        );
        self.publish(StatusUpdate::initializing()).await;
        self.update(|s| s.state = SessionState::Initializing);

        let auth = AuthState {
            creds,
            keys: self.keys.clone(),
        };
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = client.connect(auth) => Some(result),
        };
        if let Some(Err(e)) = connected {
            warn!(target: "Gateway/Session", "[{}] Connect failed: {}", self.session_id, e);
            self.on_close(DisconnectReason::ConnectionLost).await;
        }

        while !cancel.is_cancelled() {
            let retry_at = self.retry_at;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.reconnect(&cancel).await;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        self.teardown().await;
    }

    fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.state_tx.send_modify(|s| {
            f(s);
            s.updated_at = Utc::now();
        });
    }

    fn state(&self) -> SessionState {
        self.state_tx.borrow().state
    }

    async fn publish(&self, update: StatusUpdate) {
        publish_or_warn(self.ctx.publisher.as_ref(), &self.session_id, update).await;
    }

    async fn handle_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation {
            debug!(
                target: "Gateway/Session",
                "[{}] Dropping event from connection attempt {} (current {})",
                self.session_id, tagged.generation, self.generation
            );
            return;
        }

        match tagged.event {
            TransportEvent::PairingCode(code) => self.on_pairing_code(&code).await,
            TransportEvent::ConnectionOpen(identity) => self.on_open(identity).await,
            TransportEvent::ConnectionClose(reason) => {
                let state = self.state();
                if matches!(
                    state,
                    SessionState::Connected
                        | SessionState::AwaitingScan
                        | SessionState::Initializing
                ) {
                    info!(target: "Gateway/Session", "[{}] Connection closed ({})", self.session_id, reason);
                    self.on_close(reason).await;
                } else {
                    debug!(
                        target: "Gateway/Session",
                        "[{}] Ignoring close ({}) in state {}", self.session_id, reason, state
                    );
                }
            }
            TransportEvent::CredentialsChanged(creds) => {
                if let Err(e) = self.keys.save_creds(&creds).await {
                    warn!(target: "Gateway/Session", "[{}] Failed to persist credentials: {}", self.session_id, e);
                }
            }
        }
    }

    async fn on_pairing_code(&mut self, code: &str) {
        let state = self.state();
        if !matches!(state, SessionState::Initializing | SessionState::AwaitingScan) {
            debug!(target: "Gateway/Session", "[{}] Ignoring pairing code in state {}", self.session_id, state);
            return;
        }

        let qr = match encode_data_url(code) {
            Ok(qr) => qr,
            Err(e) => {
                error!(target: "Gateway/Session", "[{}] {}", self.session_id, e);
                return;
            }
        };
        info!(target: "Gateway/Session", "[{}] Pairing code issued", self.session_id);
        self.update(|s| {
            s.state = SessionState::AwaitingScan;
            s.qr_image = Some(qr.clone());
        });
        self.publish(StatusUpdate::scanning(qr)).await;
    }

    async fn on_open(&mut self, identity: AccountIdentity) {
        let state = self.state();
        if !matches!(state, SessionState::Initializing | SessionState::AwaitingScan) {
            debug!(target: "Gateway/Session", "[{}] Ignoring connection-open in state {}", self.session_id, state);
            return;
        }

        let phone = phone_from_account_id(&identity.id);
        info!(target: "Gateway/Session", "[{}] Connected as {}", self.session_id, phone);
        self.update(|s| {
            s.state = SessionState::Connected;
            s.qr_image = None;
            s.phone_number = Some(phone.clone());
            s.display_name = identity.name.clone();
        });
        self.publish(StatusUpdate::connected(phone, identity.name))
            .await;
    }

    async fn on_close(&mut self, reason: DisconnectReason) {
        self.disconnect_current().await;

        match self.ctx.policy.classify(reason) {
            ReconnectDecision::Retry(delay) => {
                if self.retry_at.is_none() {
                    info!(target: "Gateway/Session", "[{}] Reconnecting in {:?}", self.session_id, delay);
                    self.retry_at = Some(Instant::now() + delay);
                } else {
                    debug!(target: "Gateway/Session", "[{}] Reconnect already pending", self.session_id);
                }
                self.update(|s| {
                    s.state = SessionState::Closing;
                    s.qr_image = None;
                    s.reconnect_pending = true;
                });
            }
            ReconnectDecision::Terminal(TerminalReason::LoggedOut) => {
                info!(target: "Gateway/Session", "[{}] Logged out ({})", self.session_id, reason);
                self.retry_at = None;
                self.update(|s| {
                    s.state = SessionState::LoggedOut;
                    s.qr_image = None;
                    s.reconnect_pending = false;
                });
                self.publish(StatusUpdate::disconnected()).await;
            }
            ReconnectDecision::Terminal(TerminalReason::Conflict) => {
                warn!(
                    target: "Gateway/Session",
                    "[{}] Session conflict ({}); a forced re-init is required",
                    self.session_id, reason
                );
                self.retry_at = None;
                self.update(|s| {
                    s.state = SessionState::Conflict;
                    s.qr_image = None;
                    s.reconnect_pending = false;
                });
                self.publish(StatusUpdate::conflict()).await;
            }
        }
    }

    async fn connect_next(&self, generation: u64) -> Result<()> {
        let client = self
            .ctx
            .transports
            .create_client(
                &self.session_id,
                EventSender::new(generation, self.events_tx.clone()),
            )
            .await?;
        *self.transport.lock().await = Some(client.clone());

        let creds = self.keys.load_creds().await?;
        client
            .connect(AuthState {
                creds,
                keys: self.keys.clone(),
            })
            .await?;
        Ok(())
    }

    async fn reconnect(&mut self, cancel: &CancellationToken) {
        self.generation += 1;
        let generation = self.generation;
        info!(target: "Gateway/Session", "[{}] Reconnect attempt {}", self.session_id, generation);
        self.update(|s| {
            s.state = SessionState::Initializing;
            s.reconnect_pending = false;
            s.generation = generation;
        });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.connect_next(generation) => Some(result),
        };
        if let Some(Err(e)) = outcome {
            warn!(target: "Gateway/Session", "[{}] Reconnect failed: {}", self.session_id, e);
            self.on_close(DisconnectReason::ConnectionLost).await;
        }
    }

    /// Detaches the current client and lets it release its connection.
    async fn disconnect_current(&self) {
        let client = self.transport.lock().await.take();
        if let Some(client) = client
            && timeout(DISCONNECT_TIMEOUT, client.disconnect()).await.is_err()
        {
            warn!(target: "Gateway/Session", "[{}] Transport did not disconnect in time", self.session_id);
        }
    }

    async fn teardown(&mut self) {
        self.retry_at = None;
        self.disconnect_current().await;
        self.keys.close().await;
        self.update(|s| {
            s.state = SessionState::Closing;
            s.qr_image = None;
            s.reconnect_pending = false;
        });
        info!(target: "Gateway/Session", "[{}] Session stopped", self.session_id);
    }
}
