// ── Runtime configuration for the agent ──
//
// Built by the config crate (or directly by tests) and handed to `Agent`.
// No file I/O or environment lookups happen here.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::error::CoreError;
use crate::local::RetryPolicy;

/// TLS verification for the local HTTP client.
#[derive(Debug, Clone, Default)]
pub enum TlsVerification {
    /// Use system CA roots.
    #[default]
    SystemDefaults,
    /// Use a custom CA certificate file.
    CustomCa(PathBuf),
    /// Accept any certificate. Self-signed local installs only.
    DangerAcceptInvalid,
}

/// Everything the agent needs to run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // ── Remote service ───────────────────────────────────────────────
    pub server_url: Url,
    pub agent_token: SecretString,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// How long to wait for a `pong` after each `ping`.
    pub heartbeat_grace: Duration,
    /// Consecutive `auth_reject`s before giving up. `0` retries forever.
    pub max_auth_rejections: u32,
    pub backoff: BackoffPolicy,

    // ── Local control surface ────────────────────────────────────────
    pub local_url: Url,
    pub local_token: SecretString,
    pub tls: TlsVerification,
    pub local_timeout: Duration,
    /// Extra attempts for transient local failures.
    pub local_retries: u32,

    // ── Commands ─────────────────────────────────────────────────────
    pub command_timeout: Duration,
    pub max_concurrent_commands: usize,
    pub result_cache_capacity: usize,
    pub result_cache_ttl: Duration,

    // ── Inventory ────────────────────────────────────────────────────
    pub inventory_poll_interval: Duration,

    // ── Lifecycle ────────────────────────────────────────────────────
    /// Time allowed for in-flight commands to finish on shutdown.
    pub shutdown_grace: Duration,
}

impl AgentConfig {
    /// Config with default tunables for the given endpoints and credentials.
    pub fn new(
        server_url: Url,
        agent_token: SecretString,
        local_url: Url,
        local_token: SecretString,
    ) -> Self {
        Self {
            server_url,
            agent_token,
            connect_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_grace: Duration::from_secs(10),
            max_auth_rejections: 5,
            backoff: BackoffPolicy::default(),
            local_url,
            local_token,
            tls: TlsVerification::default(),
            local_timeout: Duration::from_secs(10),
            local_retries: 2,
            command_timeout: Duration::from_secs(30),
            max_concurrent_commands: 4,
            result_cache_capacity: 512,
            result_cache_ttl: Duration::from_secs(15 * 60),
            inventory_poll_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    pub fn local_retry(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.local_retries,
            ..RetryPolicy::default()
        }
    }

    /// Upper bound on one local API read, retries included.
    pub fn local_budget(&self) -> Duration {
        self.local_retry().budget(self.local_timeout)
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::Config {
                message: message.to_owned(),
            })
        };

        if self.agent_token.expose_secret().trim().is_empty() {
            return invalid("agent token is empty");
        }
        if self.local_token.expose_secret().trim().is_empty() {
            return invalid("local API token is empty");
        }
        if self.max_concurrent_commands == 0 {
            return invalid("max_concurrent_commands must be at least 1");
        }
        if self.result_cache_capacity == 0 {
            return invalid("result_cache_size must be at least 1");
        }
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("heartbeat_grace", self.heartbeat_grace),
            ("auth_timeout", self.auth_timeout),
            ("connect_timeout", self.connect_timeout),
            ("local_timeout", self.local_timeout),
            ("command_timeout", self.command_timeout),
            ("inventory_poll_interval", self.inventory_poll_interval),
            ("backoff_base", self.backoff.base),
        ] {
            if value.is_zero() {
                return Err(CoreError::Config {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        if self.backoff.max < self.backoff.base {
            return invalid("backoff_max must not be below backoff_base");
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return invalid("backoff_jitter must be between 0.0 and 1.0");
        }
        // A retried command must still find its cached result after a full
        // reconnect cycle at maximum backoff.
        if self.result_cache_ttl < self.backoff.max + self.connect_timeout + self.auth_timeout {
            return invalid("result_cache_ttl must outlast one reconnect at maximum backoff");
        }
        Ok(())
    }
}
