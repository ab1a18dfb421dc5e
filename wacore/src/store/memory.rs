use crate::store::error::Result;
#[cfg(any(test, feature = "test-utils"))]
use crate::store::error::StoreError;
use crate::store::traits::*;
use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use std::collections::HashSet;
use std::collections::HashMap;
use tokio::sync::Mutex;

type Partition = HashMap<String, Vec<u8>>;

/// Process-local credential store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    partitions: Mutex<HashMap<(String, CredentialCategory), Partition>>,
    #[cfg(any(test, feature = "test-utils"))]
    failing: Mutex<HashSet<CredentialCategory>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items held for `session_id` across all categories.
    pub async fn item_count(&self, session_id: &str) -> usize {
        self.partitions
            .lock()
            .await
            .iter()
            .filter(|((sid, _), _)| sid == session_id)
            .map(|(_, items)| items.len())
            .sum()
    }

    /// Makes every subsequent write to `category` fail.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn fail_writes_for(&self, category: CredentialCategory) {
        self.failing.lock().await.insert(category);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_many(
        &self,
        session_id: &str,
        category: CredentialCategory,
        ids: &[String],
    ) -> Result<HashMap<String, Option<Vec<u8>>>> {
        let partitions = self.partitions.lock().await;
        let partition = partitions.get(&(session_id.to_string(), category));
        Ok(ids
            .iter()
            .map(|id| (id.clone(), partition.and_then(|p| p.get(id).cloned())))
            .collect())
    }

    async fn apply_category(
        &self,
        session_id: &str,
        category: CredentialCategory,
        updates: &CategoryUpdates,
    ) -> Result<()> {
        #[cfg(any(test, feature = "test-utils"))]
        if self.failing.lock().await.contains(&category) {
            return Err(StoreError::Database(format!(
                "injected write failure for {category}"
            )));
        }

        let mut partitions = self.partitions.lock().await;
        let partition = partitions
            .entry((session_id.to_string(), category))
            .or_default();
        for (id, value) in updates {
            match value {
                Some(bytes) => {
                    partition.insert(id.clone(), bytes.clone());
                }
                None => {
                    partition.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn wipe(&self, session_id: &str) -> Result<()> {
        self.partitions
            .lock()
            .await
            .retain(|(sid, _), _| sid != session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_tombstones_delete_and_values_upsert() {
        let store = MemoryCredentialStore::new();
        let mut batch = CredentialUpdates::new();
        batch.insert(
            CredentialCategory::PreKey,
            HashMap::from([
                ("1".to_string(), Some(vec![1])),
                ("2".to_string(), Some(vec![])),
            ]),
        );
        assert!(store.set_many("acct", &batch).await.is_complete());

        let mut batch = CredentialUpdates::new();
        batch.insert(
            CredentialCategory::PreKey,
            HashMap::from([("1".to_string(), None), ("3".to_string(), Some(vec![3]))]),
        );
        assert!(store.set_many("acct", &batch).await.is_complete());

        let found = store
            .get_many("acct", CredentialCategory::PreKey, &ids(&["1", "2", "3", "4"]))
            .await
            .unwrap();
        assert_eq!(found.len(), 4);
        assert_eq!(found["1"], None);
        assert_eq!(found["2"], Some(vec![]));
        assert_eq!(found["3"], Some(vec![3]));
        assert_eq!(found["4"], None);
    }

    #[tokio::test]
    async fn test_wipe_only_touches_one_session() {
        let store = MemoryCredentialStore::new();
        store.save_creds("a", b"alice").await.unwrap();
        store.save_creds("b", b"bob").await.unwrap();

        store.wipe("a").await.unwrap();
        store.wipe("a").await.unwrap();
        store.wipe("never-seen").await.unwrap();

        assert_eq!(store.load_creds("a").await.unwrap(), None);
        assert_eq!(store.load_creds("b").await.unwrap(), Some(b"bob".to_vec()));
        assert_eq!(store.item_count("a").await, 0);
    }

    #[tokio::test]
    async fn test_failing_category_does_not_abort_batch() {
        let store = MemoryCredentialStore::new();
        store.fail_writes_for(CredentialCategory::Session).await;

        let mut batch = CredentialUpdates::new();
        batch.insert(
            CredentialCategory::Session,
            HashMap::from([("peer".to_string(), Some(vec![9]))]),
        );
        batch.insert(
            CredentialCategory::SenderKey,
            HashMap::from([("group".to_string(), Some(vec![7]))]),
        );

        let outcome = store.set_many("acct", &batch).await;
        assert_eq!(outcome.applied, vec![CredentialCategory::SenderKey]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, CredentialCategory::Session);

        let found = store
            .get_many("acct", CredentialCategory::SenderKey, &ids(&["group"]))
            .await
            .unwrap();
        assert_eq!(found["group"], Some(vec![7]));
    }
}
