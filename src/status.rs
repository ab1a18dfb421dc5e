use async_trait::async_trait;
use log::{info, warn};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use wacore::types::StatusUpdate;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("status mirror request failed: {0}")]
    Http(String),
    #[error("status mirror rejected the update with HTTP {0}")]
    Rejected(u16),
    #[error("failed to encode status update: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("status publish task failed: {0}")]
    Task(String),
}

/// Mirrors session transitions into the external account record.
///
/// Publishing is one-way: callers log failures and move on.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, session_id: &str, update: &StatusUpdate) -> Result<(), PublishError>;
}

pub(crate) async fn publish_or_warn(
    publisher: &dyn StatusPublisher,
    session_id: &str,
    update: StatusUpdate,
) {
    if let Err(e) = publisher.publish(session_id, &update).await {
        warn!(
            target: "Gateway/Status",
            "Failed to publish {:?} for session {}: {}", update.status, session_id, e
        );
    }
}

/// Writes updates to the log only. Used when no mirror endpoint is configured.
#[derive(Debug, Default, Clone)]
pub struct LogStatusPublisher;

#[async_trait]
impl StatusPublisher for LogStatusPublisher {
    async fn publish(&self, session_id: &str, update: &StatusUpdate) -> Result<(), PublishError> {
        info!(
            target: "Gateway/Status",
            "Session {} -> {:?} (qr: {}, phone: {:?})",
            session_id,
            update.status,
            update.qr_code.is_some(),
            update.phone_number
        );
        Ok(())
    }
}

/// Keeps every update in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemoryStatusPublisher {
    updates: Mutex<Vec<(String, StatusUpdate)>>,
}

impl MemoryStatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, StatusUpdate)>> {
        self.updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn updates(&self) -> Vec<(String, StatusUpdate)> {
        self.lock().clone()
    }

    pub fn updates_for(&self, session_id: &str) -> Vec<StatusUpdate> {
        self.lock()
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    pub fn latest(&self, session_id: &str) -> Option<StatusUpdate> {
        self.updates_for(session_id).pop()
    }
}

#[async_trait]
impl StatusPublisher for MemoryStatusPublisher {
    async fn publish(&self, session_id: &str, update: &StatusUpdate) -> Result<(), PublishError> {
        self.lock().push((session_id.to_string(), update.clone()));
        Ok(())
    }
}

/// PATCHes `{endpoint}/{session_id}` with the JSON update.
///
/// `ureq` is blocking, so each request runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct HttpStatusPublisher {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpStatusPublisher {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url_for(&self, session_id: &str) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(session_id))
    }
}

#[async_trait]
impl StatusPublisher for HttpStatusPublisher {
    async fn publish(&self, session_id: &str, update: &StatusUpdate) -> Result<(), PublishError> {
        let body = serde_json::to_vec(update)?;
        let url = self.url_for(session_id);
        let agent = self.agent.clone();
        let api_key = self.api_key.clone();

        tokio::task::spawn_blocking(move || {
            let mut req = agent.patch(&url).header("content-type", "application/json");
            if let Some(key) = &api_key {
                req = req.header("x-api-key", key);
            }
            match req.send(&body[..]) {
                Ok(_) => Ok(()),
                Err(ureq::Error::StatusCode(code)) => Err(PublishError::Rejected(code)),
                Err(e) => Err(PublishError::Http(e.to_string())),
            }
        })
        .await
        .map_err(|e| PublishError::Task(e.to_string()))?
    }
}
