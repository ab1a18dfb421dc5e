pub mod events;
pub mod jid;
pub mod session;

pub use events::DisconnectReason;
pub use session::{SessionSnapshot, SessionState, SessionStatus, StatusUpdate};
