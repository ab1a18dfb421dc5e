use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Lifecycle state of one session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    AwaitingScan,
    Connected,
    Closing,
    LoggedOut,
    Conflict,
}

impl SessionState {
    /// States from which the handle never reconnects on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::Conflict)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingScan => "awaiting_scan",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::LoggedOut => "logged_out",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status value written to the external account record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Scanning,
    Connected,
    Disconnected,
    Conflict,
}

/// One projection of the session into the account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub status: SessionStatus,
    pub qr_code: Option<String>,
    #[serde(rename = "phoneNumber", skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(rename = "pushName", skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

impl StatusUpdate {
    fn bare(status: SessionStatus) -> Self {
        Self {
            status,
            qr_code: None,
            phone_number: None,
            push_name: None,
        }
    }

    pub fn initializing() -> Self {
        Self::bare(SessionStatus::Initializing)
    }

    pub fn scanning(qr_code: String) -> Self {
        Self {
            qr_code: Some(qr_code),
            ..Self::bare(SessionStatus::Scanning)
        }
    }

    pub fn connected(phone_number: String, push_name: Option<String>) -> Self {
        Self {
            phone_number: Some(phone_number),
            push_name,
            ..Self::bare(SessionStatus::Connected)
        }
    }

    pub fn disconnected() -> Self {
        Self::bare(SessionStatus::Disconnected)
    }

    pub fn conflict() -> Self {
        Self::bare(SessionStatus::Conflict)
    }
}

/// Point-in-time view of a session handle, published on every transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub qr_image: Option<String>,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
    pub reconnect_pending: bool,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            qr_image: None,
            phone_number: None,
            display_name: None,
            reconnect_pending: false,
            generation: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
