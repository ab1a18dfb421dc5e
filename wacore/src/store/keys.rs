use crate::store::error::{Result, StoreError};
use crate::store::traits::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A session-scoped view of a [`CredentialStore`], handed to the transport.
///
/// Writes hold a shared guard on the open flag while they run; [`close`]
/// takes the exclusive guard, so it returns only after in-flight writes have
/// finished and every later write fails with [`StoreError::Closed`].
///
/// [`close`]: SessionKeys::close
#[derive(Clone)]
pub struct SessionKeys {
    session_id: Arc<str>,
    store: Arc<dyn CredentialStore>,
    open: Arc<RwLock<bool>>,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl SessionKeys {
    pub fn new(session_id: impl Into<Arc<str>>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            open: Arc::new(RwLock::new(true)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn get(
        &self,
        category: CredentialCategory,
        ids: &[String],
    ) -> Result<HashMap<String, Option<Vec<u8>>>> {
        self.store.get_many(&self.session_id, category, ids).await
    }

    pub async fn set(&self, updates: &CredentialUpdates) -> SetManyOutcome {
        let open = self.open.read().await;
        if !*open {
            return SetManyOutcome {
                applied: Vec::new(),
                failed: updates
                    .keys()
                    .map(|c| (*c, StoreError::Closed(self.session_id.to_string())))
                    .collect(),
            };
        }
        self.store.set_many(&self.session_id, updates).await
    }

    pub async fn load_creds(&self) -> Result<Option<Vec<u8>>> {
        self.store.load_creds(&self.session_id).await
    }

    pub async fn save_creds(&self, creds: &[u8]) -> Result<()> {
        let open = self.open.read().await;
        if !*open {
            return Err(StoreError::Closed(self.session_id.to_string()));
        }
        self.store.save_creds(&self.session_id, creds).await
    }

    pub async fn close(&self) {
        *self.open.write().await = false;
    }

    pub async fn is_closed(&self) -> bool {
        !*self.open.read().await
    }
}
