use crate::status::{HttpStatusPublisher, LogStatusPublisher, StatusPublisher};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wacore::reconnect::ReconnectPolicy;

pub const API_KEY_ENV: &str = "WA_GATEWAY_API_KEY";
pub const BIND_ENV: &str = "WA_GATEWAY_BIND";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Path of the redb credential database.
    pub db_path: String,
    pub reconnect: ReconnectConfig,
    /// How long commands wait for a session to connect.
    pub ready_timeout_ms: u64,
    pub status_mirror: StatusMirrorConfig,
    pub server: ServerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_path: "whatsapp-gateway.redb".to_string(),
            reconnect: ReconnectConfig::default(),
            ready_timeout_ms: 10_000,
            status_mirror: StatusMirrorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub delay_ms: u64,
    /// Delay after `515 restart required`.
    pub restart_delay_ms: u64,
    /// Close codes treated as a logout on top of 401.
    pub extra_logout_codes: Vec<u16>,
    /// Close codes treated as a conflict on top of 405 and 440.
    pub extra_conflict_codes: Vec<u16>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 2_000,
            restart_delay_ms: 0,
            extra_logout_codes: Vec::new(),
            extra_conflict_codes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StatusMirrorConfig {
    /// Base URL of the account collection; updates go to `{endpoint}/{session_id}`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for StatusMirrorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// When unset every request is accepted.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            api_key: None,
        }
    }
}

impl GatewayConfig {
    /// Reads a TOML file, expanding `${VAR}` placeholders, then applies the
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&substitute_env(&raw))
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.server.api_key = Some(key);
        }
        if let Some(bind) = lookup(BIND_ENV).filter(|b| !b.is_empty()) {
            self.server.bind = bind;
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new()
            .with_delay(Duration::from_millis(self.reconnect.delay_ms))
            .with_restart_delay(Duration::from_millis(self.reconnect.restart_delay_ms))
            .with_logout_codes(self.reconnect.extra_logout_codes.iter().copied())
            .with_conflict_codes(self.reconnect.extra_conflict_codes.iter().copied())
    }

    pub fn status_publisher(&self) -> Arc<dyn StatusPublisher> {
        match &self.status_mirror.endpoint {
            Some(endpoint) if !endpoint.is_empty() => Arc::new(HttpStatusPublisher::new(
                endpoint.clone(),
                self.status_mirror.api_key.clone(),
                Duration::from_millis(self.status_mirror.timeout_ms),
            )),
            _ => Arc::new(LogStatusPublisher),
        }
    }
}

/// Replaces `${ENV_VAR}` placeholders with environment values.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }

        match (closed && !name.is_empty()).then(|| lookup(&name)).flatten() {
            Some(value) => result.push_str(&value),
            None => {
                result.push_str("${");
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use wacore::reconnect::{ReconnectDecision, TerminalReason};
    use wacore::types::events::DisconnectReason;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.db_path, "whatsapp-gateway.redb");
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert!(config.server.api_key.is_none());
        assert_eq!(
            config.reconnect_policy().classify(DisconnectReason::ConnectionLost),
            ReconnectDecision::Retry(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_reconnect_section_shapes_policy() {
        let config = GatewayConfig::from_toml_str(
            r#"
            db_path = "/var/lib/gateway/creds.redb"
            ready_timeout_ms = 2500

            [reconnect]
            delay_ms = 750
            restart_delay_ms = 100
            extra_logout_codes = [403]

            [status_mirror]
            endpoint = "https://accounts.example.com/v1/sessions"
            "#,
        )
        .unwrap();

        let policy = config.reconnect_policy();
        assert_eq!(
            policy.classify(DisconnectReason::Forbidden),
            ReconnectDecision::Terminal(TerminalReason::LoggedOut)
        );
        assert_eq!(
            policy.classify(DisconnectReason::RestartRequired),
            ReconnectDecision::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            policy.classify(DisconnectReason::BadSession),
            ReconnectDecision::Retry(Duration::from_millis(750))
        );
        assert_eq!(config.ready_timeout(), Duration::from_millis(2500));
        assert_eq!(config.status_mirror.timeout_ms, 10_000);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = GatewayConfig::from_toml_str(
            r#"
            [server]
            bind = "127.0.0.1:8080"
            api_key = "from-file"
            "#,
        )
        .unwrap();

        config.apply_overrides_from(|name| match name {
            API_KEY_ENV => Some("from-env".to_string()),
            BIND_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.server.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_placeholder_substitution() {
        let lookup = |name: &str| (name == "MIRROR_KEY").then(|| "s3cret".to_string());
        assert_eq!(
            substitute_with(r#"api_key = "${MIRROR_KEY}""#, lookup),
            r#"api_key = "s3cret""#
        );
        assert_eq!(substitute_with("${MISSING_VAR}", lookup), "${MISSING_VAR}");
        assert_eq!(substitute_with("cost: $5 ${unterminated", lookup), "cost: $5 ${unterminated");
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "ready_timeout_ms = 1234\n").unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.ready_timeout(), Duration::from_millis(1234));
        assert!(GatewayConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
