//! Configuration for the homelink agent.
//!
//! Layered loading (built-in defaults, TOML file, `HOMELINK_*` environment),
//! credential resolution (env var, system keyring, plaintext), and
//! translation to `homelink_core::AgentConfig`. The binary applies CLI flag
//! overrides on top of the loaded [`Config`] before resolving it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use homelink_core::{AgentConfig, BackoffPolicy, CoreError, TlsVerification};

/// Keyring service name under which tokens are stored.
pub const KEYRING_SERVICE: &str = "homelink";

/// Keyring account holding the agent token.
pub const SERVER_TOKEN_ACCOUNT: &str = "server/token";

/// Keyring account holding the local API token.
pub const LOCAL_TOKEN_ACCOUNT: &str = "local/token";

const REDACTED: &str = "<redacted>";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {credential} configured")]
    NoCredentials { credential: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub local: LocalSection,

    #[serde(default)]
    pub agent: AgentSection,
}

/// The remote AI service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Base URL, e.g. "https://relay.example.com".
    pub url: Option<String>,
    /// Agent token (plaintext; prefer `token_env` or the keyring).
    pub token: Option<String>,
    /// Environment variable holding the agent token.
    pub token_env: Option<String>,
    pub connect_timeout: String,
    pub auth_timeout: String,
    pub heartbeat_interval: String,
    pub heartbeat_grace: String,
    pub max_auth_rejections: u32,
    pub backoff_base: String,
    pub backoff_max: String,
    pub backoff_jitter: f64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            token_env: Some("HOMELINK_AGENT_TOKEN".into()),
            connect_timeout: "15s".into(),
            auth_timeout: "10s".into(),
            heartbeat_interval: "30s".into(),
            heartbeat_grace: "10s".into(),
            max_auth_rejections: 5,
            backoff_base: "1s".into(),
            backoff_max: "60s".into(),
            backoff_jitter: 0.2,
        }
    }
}

/// The local Home Assistant API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalSection {
    pub url: String,
    /// Long-lived access token (plaintext; prefer `token_env` or the keyring).
    pub token: Option<String>,
    /// Environment variable holding the access token.
    pub token_env: Option<String>,
    /// PEM file with a custom CA for the local API.
    pub ca_cert: Option<PathBuf>,
    /// Skip certificate verification entirely.
    pub insecure: bool,
    pub timeout: String,
    pub retries: u32,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            url: "http://supervisor/core".into(),
            token: None,
            token_env: Some("SUPERVISOR_TOKEN".into()),
            ca_cert: None,
            insecure: false,
            timeout: "10s".into(),
            retries: 2,
        }
    }
}

/// Command handling and inventory tunables.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSection {
    pub command_timeout: String,
    pub max_concurrent_commands: usize,
    pub result_cache_size: usize,
    pub result_cache_ttl: String,
    pub inventory_poll_interval: String,
    pub shutdown_grace: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command_timeout: "30s".into(),
            max_concurrent_commands: 4,
            result_cache_size: 512,
            result_cache_ttl: "15m".into(),
            inventory_poll_interval: "60s".into(),
            shutdown_grace: "10s".into(),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "homelink", "homelink").map_or_else(
        || PathBuf::from(".").join("homelink.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load defaults, then `path` (or the platform path), then `HOMELINK_*`.
///
/// A missing file is not an error. Nested keys use `__` in the
/// environment: `HOMELINK_SERVER__URL`, `HOMELINK_AGENT__COMMAND_TIMEOUT`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("HOMELINK_").split("__"))
        .extract()?;
    Ok(config)
}

/// Parse a config document without consulting disk or environment.
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::string(toml))
        .extract()?;
    Ok(config)
}

// ── Credential resolution ───────────────────────────────────────────

/// Where tokens are looked up, besides the file itself.
pub trait SecretSource {
    fn env(&self, name: &str) -> Option<String>;
    fn keyring(&self, account: &str) -> Option<String>;
}

/// Process environment and the OS keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSecrets;

impl SecretSource for SystemSecrets {
    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn keyring(&self, account: &str) -> Option<String> {
        keyring::Entry::new(KEYRING_SERVICE, account)
            .ok()?
            .get_password()
            .ok()
    }
}

/// Env var named by `token_env`, then keyring `account`, then plaintext.
fn resolve_secret(
    source: &impl SecretSource,
    credential: &str,
    token_env: Option<&str>,
    account: &str,
    plaintext: Option<&str>,
) -> Result<SecretString, ConfigError> {
    let usable = |value: &String| !value.trim().is_empty();

    if let Some(value) = token_env.and_then(|name| source.env(name)).filter(usable) {
        return Ok(SecretString::from(value));
    }
    if let Some(value) = source.keyring(account).filter(usable) {
        return Ok(SecretString::from(value));
    }
    if let Some(value) = plaintext.map(str::to_owned).filter(usable) {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::NoCredentials {
        credential: credential.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Resolve credentials from the system and build the runtime config.
    pub fn to_agent_config(&self) -> Result<AgentConfig, ConfigError> {
        self.to_agent_config_with(&SystemSecrets)
    }

    pub fn to_agent_config_with(
        &self,
        secrets: &impl SecretSource,
    ) -> Result<AgentConfig, ConfigError> {
        let server = &self.server;
        let local = &self.local;
        let agent = &self.agent;

        let server_url = parse_url(
            "server.url",
            server.url.as_deref().ok_or_else(|| ConfigError::Validation {
                field: "server.url".into(),
                reason: "a server address is required".into(),
            })?,
        )?;
        let agent_token = resolve_secret(
            secrets,
            "agent token",
            server.token_env.as_deref(),
            SERVER_TOKEN_ACCOUNT,
            server.token.as_deref(),
        )?;
        let local_url = parse_url("local.url", &local.url)?;
        let local_token = resolve_secret(
            secrets,
            "local API token",
            local.token_env.as_deref(),
            LOCAL_TOKEN_ACCOUNT,
            local.token.as_deref(),
        )?;

        let mut cfg = AgentConfig::new(server_url, agent_token, local_url, local_token);
        cfg.connect_timeout = duration("server.connect_timeout", &server.connect_timeout)?;
        cfg.auth_timeout = duration("server.auth_timeout", &server.auth_timeout)?;
        cfg.heartbeat_interval = duration("server.heartbeat_interval", &server.heartbeat_interval)?;
        cfg.heartbeat_grace = duration("server.heartbeat_grace", &server.heartbeat_grace)?;
        cfg.max_auth_rejections = server.max_auth_rejections;
        cfg.backoff = BackoffPolicy {
            base: duration("server.backoff_base", &server.backoff_base)?,
            max: duration("server.backoff_max", &server.backoff_max)?,
            jitter: server.backoff_jitter,
        };

        cfg.tls = if local.insecure {
            TlsVerification::DangerAcceptInvalid
        } else if let Some(ref ca) = local.ca_cert {
            TlsVerification::CustomCa(ca.clone())
        } else {
            TlsVerification::SystemDefaults
        };
        cfg.local_timeout = duration("local.timeout", &local.timeout)?;
        cfg.local_retries = local.retries;

        cfg.command_timeout = duration("agent.command_timeout", &agent.command_timeout)?;
        cfg.max_concurrent_commands = agent.max_concurrent_commands;
        cfg.result_cache_capacity = agent.result_cache_size;
        cfg.result_cache_ttl = duration("agent.result_cache_ttl", &agent.result_cache_ttl)?;
        cfg.inventory_poll_interval =
            duration("agent.inventory_poll_interval", &agent.inventory_poll_interval)?;
        cfg.shutdown_grace = duration("agent.shutdown_grace", &agent.shutdown_grace)?;

        cfg.validate().map_err(|e| match e {
            CoreError::Config { message } => ConfigError::Validation {
                field: "config".into(),
                reason: message,
            },
            other => ConfigError::Validation {
                field: "config".into(),
                reason: other.to_string(),
            },
        })?;
        Ok(cfg)
    }

    /// Copy with every plaintext token masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.server.token.is_some() {
            copy.server.token = Some(REDACTED.into());
        }
        if copy.local.token.is_some() {
            copy.local.token = Some(REDACTED.into());
        }
        copy
    }

    /// Redacted config rendered as TOML.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self.redacted())?)
    }
}

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}' is not a duration ({e})"),
    })
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    value.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}' is not a valid URL ({e})"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    #[derive(Default)]
    struct FakeSecrets {
        env: HashMap<String, String>,
        keyring: HashMap<String, String>,
    }

    impl SecretSource for FakeSecrets {
        fn env(&self, name: &str) -> Option<String> {
            self.env.get(name).cloned()
        }

        fn keyring(&self, account: &str) -> Option<String> {
            self.keyring.get(account).cloned()
        }
    }

    fn minimal() -> Config {
        parse_config(
            r#"
            [server]
            url = "https://relay.example.com"
            token = "plain-agent"

            [local]
            token = "plain-local"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn sections_default_when_absent() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.local.url, "http://supervisor/core");
        assert_eq!(cfg.local.token_env.as_deref(), Some("SUPERVISOR_TOKEN"));
    }

    #[test]
    fn durations_are_human_strings() {
        let mut cfg = minimal();
        cfg.server.heartbeat_interval = "45s".into();
        cfg.agent.result_cache_ttl = "1h 30m".into();

        let agent = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap();
        assert_eq!(agent.heartbeat_interval, Duration::from_secs(45));
        assert_eq!(agent.result_cache_ttl, Duration::from_secs(90 * 60));
        assert_eq!(agent.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let mut cfg = minimal();
        cfg.agent.command_timeout = "soon".into();
        let err = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap_err();
        assert!(err.to_string().contains("agent.command_timeout"), "{err}");
    }

    #[test]
    fn env_token_beats_keyring_and_plaintext() {
        let secrets = FakeSecrets {
            env: HashMap::from([("HOMELINK_AGENT_TOKEN".into(), "from-env".into())]),
            keyring: HashMap::from([("server/token".into(), "from-keyring".into())]),
        };
        let agent = minimal().to_agent_config_with(&secrets).unwrap();
        assert_eq!(agent.agent_token.expose_secret(), "from-env");
    }

    #[test]
    fn keyring_beats_plaintext() {
        let secrets = FakeSecrets {
            keyring: HashMap::from([("local/token".into(), "from-keyring".into())]),
            ..FakeSecrets::default()
        };
        let agent = minimal().to_agent_config_with(&secrets).unwrap();
        assert_eq!(agent.local_token.expose_secret(), "from-keyring");
        assert_eq!(agent.agent_token.expose_secret(), "plain-agent");
    }

    #[test]
    fn supervisor_token_is_picked_up() {
        let mut cfg = minimal();
        cfg.local.token = None;
        let secrets = FakeSecrets {
            env: HashMap::from([("SUPERVISOR_TOKEN".into(), "supervisor".into())]),
            ..FakeSecrets::default()
        };
        let agent = cfg.to_agent_config_with(&secrets).unwrap();
        assert_eq!(agent.local_token.expose_secret(), "supervisor");
    }

    #[test]
    fn missing_agent_token_is_an_error() {
        let mut cfg = minimal();
        cfg.server.token = Some("   ".into());
        let err = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }), "{err}");
        assert!(err.to_string().contains("agent token"));
    }

    #[test]
    fn missing_server_url_is_an_error() {
        let mut cfg = minimal();
        cfg.server.url = None;
        let err = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap_err();
        assert!(err.to_string().contains("server.url"), "{err}");
    }

    #[test]
    fn tls_mode_follows_local_section() {
        let mut cfg = minimal();
        cfg.local.ca_cert = Some(PathBuf::from("/etc/ssl/ha.pem"));
        let agent = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap();
        assert!(matches!(agent.tls, TlsVerification::CustomCa(_)));

        cfg.local.insecure = true;
        let agent = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap();
        assert!(matches!(agent.tls, TlsVerification::DangerAcceptInvalid));
    }

    #[test]
    fn core_validation_is_surfaced() {
        let mut cfg = minimal();
        cfg.agent.max_concurrent_commands = 0;
        let err = cfg.to_agent_config_with(&FakeSecrets::default()).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_commands"), "{err}");
    }

    #[test]
    fn redacted_output_hides_tokens() {
        let rendered = minimal().to_redacted_toml().unwrap();
        assert!(!rendered.contains("plain-agent"));
        assert!(!rendered.contains("plain-local"));
        assert!(rendered.contains(REDACTED));
        assert!(rendered.contains("https://relay.example.com"));
    }
}
