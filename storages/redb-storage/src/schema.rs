use redb::TableDefinition;
use wacore::store::CredentialCategory;

/// Every credential table is keyed by `(session_id, item_id)`.
pub type CredentialTable = TableDefinition<'static, (&'static str, &'static str), &'static [u8]>;

pub const CREDS: CredentialTable = TableDefinition::new("creds");

pub const PRE_KEYS: CredentialTable = TableDefinition::new("pre_keys");

pub const SESSIONS: CredentialTable = TableDefinition::new("sessions");

pub const SENDER_KEYS: CredentialTable = TableDefinition::new("sender_keys");

pub const SENDER_KEY_MEMORY: CredentialTable = TableDefinition::new("sender_key_memory");

pub const APP_STATE_SYNC_KEYS: CredentialTable = TableDefinition::new("app_state_sync_keys");

pub const APP_STATE_VERSIONS: CredentialTable = TableDefinition::new("app_state_versions");

pub const LID_MAPPINGS: CredentialTable = TableDefinition::new("lid_mappings");

pub const DEVICE_LISTS: CredentialTable = TableDefinition::new("device_lists");

pub const IDENTITY_KEYS: CredentialTable = TableDefinition::new("identity_keys");

pub fn table_for(category: CredentialCategory) -> CredentialTable {
    match category {
        CredentialCategory::Creds => CREDS,
        CredentialCategory::PreKey => PRE_KEYS,
        CredentialCategory::Session => SESSIONS,
        CredentialCategory::SenderKey => SENDER_KEYS,
        CredentialCategory::SenderKeyMemory => SENDER_KEY_MEMORY,
        CredentialCategory::AppStateSyncKey => APP_STATE_SYNC_KEYS,
        CredentialCategory::AppStateSyncVersion => APP_STATE_VERSIONS,
        CredentialCategory::LidMapping => LID_MAPPINGS,
        CredentialCategory::DeviceList => DEVICE_LISTS,
        CredentialCategory::IdentityKey => IDENTITY_KEYS,
    }
}
