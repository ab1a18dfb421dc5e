use serde::Serialize;
use std::fmt;

/// Why the transport closed a connection, keyed by the numeric status code
/// the transport reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    BadSession,
    RestartRequired,
    MultideviceMismatch,
    Forbidden,
    UnavailableService,
    ClientOutdated,
    Unknown(u16),
}

impl From<u16> for DisconnectReason {
    fn from(code: u16) -> Self {
        match code {
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            411 => Self::MultideviceMismatch,
            403 => Self::Forbidden,
            503 => Self::UnavailableService,
            405 => Self::ClientOutdated,
            _ => Self::Unknown(code),
        }
    }
}

impl DisconnectReason {
    pub fn code(&self) -> u16 {
        match self {
            Self::ConnectionClosed => 428,
            Self::ConnectionLost => 408,
            Self::ConnectionReplaced => 440,
            Self::LoggedOut => 401,
            Self::BadSession => 500,
            Self::RestartRequired => 515,
            Self::MultideviceMismatch => 411,
            Self::Forbidden => 403,
            Self::UnavailableService => 503,
            Self::ClientOutdated => 405,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionLost => "connection lost",
            Self::ConnectionReplaced => "connection replaced by another client",
            Self::LoggedOut => "logged out from the primary device",
            Self::BadSession => "bad session",
            Self::RestartRequired => "restart required",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::Forbidden => "forbidden",
            Self::UnavailableService => "service unavailable",
            Self::ClientOutdated => "client outdated",
            Self::Unknown(_) => "unknown reason",
        };
        write!(f, "{}: {}", self.code(), msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_codes_keep_their_value() {
        let reason = DisconnectReason::from(499);
        assert_eq!(reason, DisconnectReason::Unknown(499));
        assert_eq!(reason.code(), 499);
        assert_eq!(DisconnectReason::from(515), DisconnectReason::RestartRequired);
        assert_eq!(DisconnectReason::LoggedOut.to_string(), "401: logged out from the primary device");
    }
}
