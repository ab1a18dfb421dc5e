mod redb_store;
mod schema;

pub use redb_store::RedbCredentialStore;
