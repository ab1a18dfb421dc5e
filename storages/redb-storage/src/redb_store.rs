use crate::schema::table_for;
use async_trait::async_trait;
use log::debug;
use redb::{
    Builder, Database, ReadableDatabase, ReadableTable, TableError, backends::InMemoryBackend,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use wacore::store::error::{Result, StoreError};
use wacore::store::traits::*;

macro_rules! open_table_or_default {
    ($txn:expr, $table:expr, $default:expr) => {
        match $txn.open_table($table) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok($default),
            Err(e) => return Err(StoreError::Database(e.to_string())),
        }
    };
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Database(e.to_string())
}

/// Credential store backed by a single redb file shared by all sessions.
#[derive(Clone)]
pub struct RedbCredentialStore {
    db: Arc<Database>,
}

impl RedbCredentialStore {
    pub async fn new<P: AsRef<Path> + Send + 'static>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let db = tokio::task::spawn_blocking(move || -> Result<Database> {
            Database::create(&path).map_err(db_err)
        })
        .await
        .map_err(db_err)??;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Builder::new()
            .create_with_backend(InMemoryBackend::new())
            .map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl CredentialStore for RedbCredentialStore {
    async fn get_many(
        &self,
        session_id: &str,
        category: CredentialCategory,
        ids: &[String],
    ) -> Result<HashMap<String, Option<Vec<u8>>>> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        let ids = ids.to_vec();

        tokio::task::spawn_blocking(move || -> Result<HashMap<String, Option<Vec<u8>>>> {
            let read_txn = db.begin_read().map_err(db_err)?;
            let absent = ids.iter().map(|id| (id.clone(), None)).collect();
            let table = open_table_or_default!(read_txn, table_for(category), absent);

            let mut found = HashMap::with_capacity(ids.len());
            for id in ids {
                let value = table
                    .get((session_id.as_str(), id.as_str()))
                    .map_err(db_err)?
                    .map(|guard| guard.value().to_vec());
                found.insert(id, value);
            }
            Ok(found)
        })
        .await
        .map_err(db_err)?
    }

    async fn apply_category(
        &self,
        session_id: &str,
        category: CredentialCategory,
        updates: &CategoryUpdates,
    ) -> Result<()> {
        let db = self.db.clone();
        let session_id = session_id.to_string();
        let updates = updates.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(db_err)?;
            {
                let mut table = write_txn.open_table(table_for(category)).map_err(db_err)?;
                for (id, value) in &updates {
                    let key = (session_id.as_str(), id.as_str());
                    match value {
                        Some(bytes) => {
                            table.insert(key, bytes.as_slice()).map_err(db_err)?;
                        }
                        None => {
                            table.remove(key).map_err(db_err)?;
                        }
                    }
                }
            }
            write_txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
        .map_err(db_err)??;

        Ok(())
    }

    async fn wipe(&self, session_id: &str) -> Result<()> {
        let db = self.db.clone();
        let owner_id = session_id.to_string();

        let removed = tokio::task::spawn_blocking(move || -> Result<usize> {
            let session_id = owner_id;
            let write_txn = db.begin_write().map_err(db_err)?;
            let mut removed = 0;
            for category in CredentialCategory::ALL {
                let mut table = write_txn.open_table(table_for(category)).map_err(db_err)?;
                let doomed: Vec<String> = {
                    let mut ids = Vec::new();
                    for entry in table.range((session_id.as_str(), "")..).map_err(db_err)? {
                        let (key, _) = entry.map_err(db_err)?;
                        let (owner, item) = key.value();
                        if owner != session_id {
                            break;
                        }
                        ids.push(item.to_string());
                    }
                    ids
                };
                for id in &doomed {
                    table
                        .remove((session_id.as_str(), id.as_str()))
                        .map_err(db_err)?;
                }
                removed += doomed.len();
            }
            write_txn.commit().map_err(db_err)?;
            Ok(removed)
        })
        .await
        .map_err(db_err)??;

        debug!(target: "Gateway/Store", "[{session_id}] Wiped {removed} credential entries");
        Ok(())
    }
}
