pub mod error;
pub mod keys;
pub mod memory;
pub mod traits;

pub use keys::SessionKeys;
pub use memory::MemoryCredentialStore;
pub use traits::*;
