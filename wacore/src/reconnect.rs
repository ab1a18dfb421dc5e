use crate::types::events::DisconnectReason;
use std::collections::HashSet;
use std::time::Duration;

/// Delay before reconnecting after an ordinary transient close.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The primary device revoked this session. Credentials are kept.
    LoggedOut,
    /// Another client took the session over. Needs a forced re-init.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry(Duration),
    Terminal(TerminalReason),
}

/// Maps transport close reasons to what the session handle does next.
///
/// This is the only place that interprets close codes. Codes that are neither
/// logout nor conflict are transient, unknown codes included. Operators can
/// promote additional codes (e.g. bans) to terminal handling.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delay: Duration,
    restart_delay: Duration,
    logout_codes: HashSet<u16>,
    conflict_codes: HashSet<u16>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            restart_delay: Duration::ZERO,
            logout_codes: HashSet::from([DisconnectReason::LoggedOut.code()]),
            conflict_codes: HashSet::from([
                DisconnectReason::ClientOutdated.code(),
                DisconnectReason::ConnectionReplaced.code(),
            ]),
        }
    }
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay used after `515 restart required`, which the transport emits
    /// right after a successful pairing.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_logout_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.logout_codes.extend(codes);
        self
    }

    pub fn with_conflict_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.conflict_codes.extend(codes);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn classify(&self, reason: DisconnectReason) -> ReconnectDecision {
        let code = reason.code();
        if self.logout_codes.contains(&code) {
            ReconnectDecision::Terminal(TerminalReason::LoggedOut)
        } else if self.conflict_codes.contains(&code) {
            ReconnectDecision::Terminal(TerminalReason::Conflict)
        } else if reason == DisconnectReason::RestartRequired {
            ReconnectDecision::Retry(self.restart_delay)
        } else {
            ReconnectDecision::Retry(self.delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.classify(DisconnectReason::LoggedOut),
            ReconnectDecision::Terminal(TerminalReason::LoggedOut)
        );
        assert_eq!(
            policy.classify(DisconnectReason::from(405)),
            ReconnectDecision::Terminal(TerminalReason::Conflict)
        );
        assert_eq!(
            policy.classify(DisconnectReason::ConnectionReplaced),
            ReconnectDecision::Terminal(TerminalReason::Conflict)
        );
        assert_eq!(
            policy.classify(DisconnectReason::ConnectionLost),
            ReconnectDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            policy.classify(DisconnectReason::from(499)),
            ReconnectDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            policy.classify(DisconnectReason::RestartRequired),
            ReconnectDecision::Retry(Duration::ZERO)
        );
    }

    #[test]
    fn test_operator_codes_become_terminal() {
        let policy = ReconnectPolicy::new()
            .with_delay(Duration::from_millis(500))
            .with_logout_codes([403])
            .with_conflict_codes([411]);

        assert_eq!(
            policy.classify(DisconnectReason::Forbidden),
            ReconnectDecision::Terminal(TerminalReason::LoggedOut)
        );
        assert_eq!(
            policy.classify(DisconnectReason::MultideviceMismatch),
            ReconnectDecision::Terminal(TerminalReason::Conflict)
        );
        assert_eq!(
            policy.classify(DisconnectReason::BadSession),
            ReconnectDecision::Retry(Duration::from_millis(500))
        );
    }
}
