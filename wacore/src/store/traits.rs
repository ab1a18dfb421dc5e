use crate::store::error::{Result, StoreError};
use async_trait::async_trait;
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Item id of the top-level identity record inside [`CredentialCategory::Creds`].
pub const CREDS_ITEM_ID: &str = "creds";

/// The closed set of credential partitions the transport reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialCategory {
    Creds,
    PreKey,
    Session,
    SenderKey,
    SenderKeyMemory,
    AppStateSyncKey,
    AppStateSyncVersion,
    LidMapping,
    DeviceList,
    IdentityKey,
}

impl CredentialCategory {
    pub const ALL: [CredentialCategory; 10] = [
        Self::Creds,
        Self::PreKey,
        Self::Session,
        Self::SenderKey,
        Self::SenderKeyMemory,
        Self::AppStateSyncKey,
        Self::AppStateSyncVersion,
        Self::LidMapping,
        Self::DeviceList,
        Self::IdentityKey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creds => "creds",
            Self::PreKey => "pre-key",
            Self::Session => "session",
            Self::SenderKey => "sender-key",
            Self::SenderKeyMemory => "sender-key-memory",
            Self::AppStateSyncKey => "app-state-sync-key",
            Self::AppStateSyncVersion => "app-state-sync-version",
            Self::LidMapping => "lid-mapping",
            Self::DeviceList => "device-list",
            Self::IdentityKey => "identity-key",
        }
    }
}

impl fmt::Display for CredentialCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialCategory {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| StoreError::UnknownCategory(s.to_string()))
    }
}

/// Item id to new value. `None` is a tombstone and deletes the item.
pub type CategoryUpdates = HashMap<String, Option<Vec<u8>>>;

/// A batch of writes spanning several categories.
pub type CredentialUpdates = BTreeMap<CredentialCategory, CategoryUpdates>;

/// Per-category result of [`CredentialStore::set_many`].
///
/// Categories are written independently, so a batch can be partially applied.
#[derive(Debug, Default)]
pub struct SetManyOutcome {
    pub applied: Vec<CredentialCategory>,
    pub failed: Vec<(CredentialCategory, StoreError)>,
}

impl SetManyOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapses the outcome into the first failure, if any.
    pub fn into_result(self) -> Result<()> {
        match self.failed.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(StoreError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// Durable key-value persistence for per-session authentication material.
///
/// Values are opaque and written whole. An absent item is distinct from an
/// item holding an empty value.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns one entry per requested id; ids with no stored value map to `None`.
    async fn get_many(
        &self,
        session_id: &str,
        category: CredentialCategory,
        ids: &[String],
    ) -> Result<HashMap<String, Option<Vec<u8>>>>;

    /// Applies upserts and tombstones for a single category atomically.
    async fn apply_category(
        &self,
        session_id: &str,
        category: CredentialCategory,
        updates: &CategoryUpdates,
    ) -> Result<()>;

    /// Removes every entry of the session, `creds` included.
    async fn wipe(&self, session_id: &str) -> Result<()>;

    async fn set_many(&self, session_id: &str, updates: &CredentialUpdates) -> SetManyOutcome {
        let mut outcome = SetManyOutcome::default();
        for (category, items) in updates {
            if items.is_empty() {
                continue;
            }
            match self.apply_category(session_id, *category, items).await {
                Ok(()) => outcome.applied.push(*category),
                Err(e) => {
                    warn!(
                        target: "Gateway/Store",
                        "[{}] Failed to write {} item(s) of category {}: {}",
                        session_id,
                        items.len(),
                        category,
                        e
                    );
                    outcome.failed.push((*category, e));
                }
            }
        }
        outcome
    }

    async fn load_creds(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let ids = [CREDS_ITEM_ID.to_string()];
        let mut found = self
            .get_many(session_id, CredentialCategory::Creds, &ids)
            .await?;
        Ok(found.remove(CREDS_ITEM_ID).flatten())
    }

    async fn save_creds(&self, session_id: &str, creds: &[u8]) -> Result<()> {
        let mut updates = CategoryUpdates::new();
        updates.insert(CREDS_ITEM_ID.to_string(), Some(creds.to_vec()));
        self.apply_category(session_id, CredentialCategory::Creds, &updates)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names_parse_back() {
        for category in CredentialCategory::ALL {
            let parsed: CredentialCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!(matches!(
            "signed-pre-key".parse::<CredentialCategory>(),
            Err(StoreError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_blank_session_ids_are_rejected() {
        assert!(validate_session_id("acct-1").is_ok());
        assert!(matches!(
            validate_session_id(""),
            Err(StoreError::InvalidSessionId(_))
        ));
        assert!(matches!(
            validate_session_id("   "),
            Err(StoreError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn test_outcome_reports_first_failure() {
        let mut outcome = SetManyOutcome::default();
        outcome.applied.push(CredentialCategory::PreKey);
        assert!(outcome.is_complete());

        outcome.failed.push((
            CredentialCategory::Session,
            StoreError::Database("disk full".into()),
        ));
        assert!(!outcome.is_complete());
        assert!(matches!(outcome.into_result(), Err(StoreError::Database(_))));
    }
}
