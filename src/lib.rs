// Core building blocks live in wacore so storage backends can depend on them alone
pub use wacore::{reconnect, store, transport};

pub mod types {
    pub use wacore::types::*;
}

pub mod config;
pub mod error;
pub mod gateway;
pub mod qrcode;
pub mod registry;
pub mod server;
pub mod session;
pub mod status;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use registry::{SessionRegistry, SessionRegistryBuilder};
pub use session::SessionHandle;
pub use status::{HttpStatusPublisher, LogStatusPublisher, StatusPublisher};
pub use whatsapp_gateway_redb_storage::RedbCredentialStore;
