//! CLI-aware configuration: file + env from `homelink-config`, then flags.

use std::path::PathBuf;

use homelink_config::{
    Config, LOCAL_TOKEN_ACCOUNT, SERVER_TOKEN_ACCOUNT, SecretSource, SystemSecrets,
};
use homelink_core::AgentConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The file that was (or would be) read.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(homelink_config::config_path)
}

/// Load the layered config and apply flag overrides.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = homelink_config::load_config(global.config.as_deref())?;

    if let Some(ref url) = global.server {
        cfg.server.url = Some(url.clone());
    }
    if let Some(ref token) = global.token {
        cfg.server.token = Some(token.clone());
        cfg.server.token_env = None;
    }
    if let Some(ref url) = global.local_url {
        cfg.local.url.clone_from(url);
    }
    if let Some(ref token) = global.local_token {
        cfg.local.token = Some(token.clone());
        cfg.local.token_env = None;
    }
    Ok(cfg)
}

/// Resolve credentials and build the runtime config. Tokens given on the
/// command line win over the keyring.
pub fn resolve(global: &GlobalOpts, cfg: &Config) -> Result<AgentConfig, CliError> {
    let secrets = FlagSecrets { global };
    Ok(cfg.to_agent_config_with(&secrets)?)
}

struct FlagSecrets<'a> {
    global: &'a GlobalOpts,
}

impl SecretSource for FlagSecrets<'_> {
    fn env(&self, name: &str) -> Option<String> {
        SystemSecrets.env(name)
    }

    fn keyring(&self, account: &str) -> Option<String> {
        let overridden = match account {
            SERVER_TOKEN_ACCOUNT => self.global.token.is_some(),
            LOCAL_TOKEN_ACCOUNT => self.global.local_token.is_some(),
            _ => false,
        };
        if overridden {
            None
        } else {
            SystemSecrets.keyring(account)
        }
    }
}
