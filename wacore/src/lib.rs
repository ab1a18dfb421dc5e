pub mod reconnect;
pub mod store;
pub mod transport;
pub mod types;
