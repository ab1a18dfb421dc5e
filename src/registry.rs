use crate::error::{GatewayError, Result};
use crate::session::{SessionContext, SessionHandle};
use crate::status::{LogStatusPublisher, StatusPublisher, publish_or_warn};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use wacore::reconnect::ReconnectPolicy;
use wacore::store::{CredentialStore, MemoryCredentialStore, validate_session_id};
use wacore::transport::TransportFactory;
use wacore::types::{SessionSnapshot, StatusUpdate};

type Slot = Arc<Mutex<Option<Arc<SessionHandle>>>>;

struct RegistryInner {
    slots: DashMap<String, Slot>,
    ctx: SessionContext,
    closed: AtomicBool,
}

/// Owns the mapping from account id to its single resident session.
///
/// Each id has a slot guarded by its own lock, so acquisitions of one id are
/// serialized end-to-end while different ids proceed in parallel. The map
/// itself is only touched briefly and never across an await.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn builder() -> SessionRegistryBuilder {
        SessionRegistryBuilder::new()
    }

    fn slot(&self, session_id: &str) -> Slot {
        self.inner
            .slots
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    fn is_current(&self, session_id: &str, slot: &Slot) -> bool {
        self.inner
            .slots
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    fn remove_slot(&self, session_id: &str, slot: &Slot) {
        self.inner
            .slots
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Returns the resident session for `session_id`, starting one if needed.
    ///
    /// With `force_reinit` any resident session is stopped first and a fresh
    /// one is built from the stored credentials.
    pub async fn acquire(&self, session_id: &str, force_reinit: bool) -> Result<Arc<SessionHandle>> {
        validate_session_id(session_id)?;

        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(GatewayError::ShuttingDown);
            }

            let slot = self.slot(session_id);
            let mut guard = slot.lock().await;
            if !self.is_current(session_id, &slot) {
                // Released and removed while we waited; start over on the new slot.
                continue;
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(GatewayError::ShuttingDown);
            }

            if let Some(existing) = guard.clone() {
                if !force_reinit && !existing.is_stopped() {
                    return Ok(existing);
                }
                if force_reinit {
                    info!(target: "Gateway/Registry", "[{}] Forcing re-initialization", session_id);
                }
                existing.shutdown().await;
                *guard = None;
            }

            return match SessionHandle::start(session_id, self.inner.ctx.clone()).await {
                Ok(handle) => {
                    info!(target: "Gateway/Registry", "[{}] Session registered", session_id);
                    *guard = Some(handle.clone());
                    Ok(handle)
                }
                Err(e) => {
                    warn!(target: "Gateway/Registry", "[{}] Failed to start session: {}", session_id, e);
                    self.remove_slot(session_id, &slot);
                    drop(guard);
                    Err(e)
                }
            };
        }
    }

    /// The resident session for `session_id`, without starting one.
    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let slot = self.inner.slots.get(session_id)?.value().clone();
        slot.lock().await.clone()
    }

    /// Snapshots of every resident session, sorted by id.
    pub async fn list(&self) -> Vec<(String, SessionSnapshot)> {
        let slots: Vec<(String, Slot)> = self
            .inner
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut sessions = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            if let Some(handle) = slot.lock().await.as_ref() {
                sessions.push((id, handle.snapshot()));
            }
        }
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    /// Stops the resident session without touching its credentials or status.
    pub async fn release(&self, session_id: &str) {
        let Some(slot) = self.inner.slots.get(session_id).map(|e| e.value().clone()) else {
            return;
        };
        let mut guard = slot.lock().await;
        if let Some(handle) = guard.take() {
            handle.shutdown().await;
            info!(target: "Gateway/Registry", "[{}] Session released", session_id);
        }
        // Unlink while locked so a waiting acquire moves on to a fresh slot.
        self.remove_slot(session_id, &slot);
        drop(guard);
    }

    /// Stops the session, wipes its credentials and marks it disconnected.
    ///
    /// The final status is written even when the wipe fails; the wipe error
    /// is returned afterwards.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;

        let slot = self.slot(session_id);
        let mut guard = slot.lock().await;
        if let Some(handle) = guard.take() {
            handle.shutdown().await;
        }

        let wiped = self.inner.ctx.store.wipe(session_id).await;
        if let Err(e) = &wiped {
            warn!(target: "Gateway/Registry", "[{}] Failed to wipe credentials: {}", session_id, e);
        }
        publish_or_warn(
            self.inner.ctx.publisher.as_ref(),
            session_id,
            StatusUpdate::disconnected(),
        )
        .await;

        self.remove_slot(session_id, &slot);
        drop(guard);
        info!(target: "Gateway/Registry", "[{}] Session deleted", session_id);
        wiped.map_err(GatewayError::from)
    }

    /// Releases every resident session. Later acquisitions fail with
    /// [`GatewayError::ShuttingDown`].
    pub async fn shutdown_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self
            .inner
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        info!(target: "Gateway/Registry", "Draining {} session(s)", ids.len());
        futures_util::future::join_all(ids.iter().map(|id| self.release(id))).await;
        debug!(target: "Gateway/Registry", "Drain complete");
    }
}

pub struct SessionRegistryBuilder {
    store: Option<Arc<dyn CredentialStore>>,
    transports: Option<Arc<dyn TransportFactory>>,
    publisher: Option<Arc<dyn StatusPublisher>>,
    policy: ReconnectPolicy,
}

impl SessionRegistryBuilder {
    fn new() -> Self {
        Self {
            store: None,
            transports: None,
            publisher: None,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Durable credential store. Defaults to an in-memory store.
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Factory for transport clients. Required.
    pub fn with_transport_factory(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Status mirror. Defaults to [`LogStatusPublisher`].
    pub fn with_status_publisher(mut self, publisher: Arc<dyn StatusPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> anyhow::Result<SessionRegistry> {
        let transports = self
            .transports
            .ok_or_else(|| anyhow::anyhow!("A transport factory is required to build a registry"))?;
        let store = self.store.unwrap_or_else(|| {
            warn!(target: "Gateway/Registry", "No credential store configured; sessions will not survive a restart");
            Arc::new(MemoryCredentialStore::new())
        });
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(LogStatusPublisher));

        Ok(SessionRegistry {
            inner: Arc::new(RegistryInner {
                slots: DashMap::new(),
                ctx: SessionContext {
                    store,
                    transports,
                    publisher,
                    policy: self.policy,
                },
                closed: AtomicBool::new(false),
            }),
        })
    }
}
