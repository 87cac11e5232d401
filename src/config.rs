// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

use crate::core::DEFAULT_NAMESPACE;

/// Settings for the on-disk keyspace.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the sled database files.
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> String {
    "stratadb_data".to_string()
}

/// The full server configuration, deserialized from a TOML file.
///
/// Every field carries a default so a minimal (or empty) file is a valid
/// configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Port served by the normal worker pool.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Port served by the replication worker pool.
    #[serde(default = "default_repl_port")]
    pub repl_port: u16,
    /// Addresses every normal worker binds; all of them share `port`.
    #[serde(default = "default_binds")]
    pub binds: Vec<String>,
    /// Addresses every replication worker binds on `repl_port`.
    #[serde(default = "default_binds")]
    pub repl_binds: Vec<String>,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Seconds a client may sit idle before the cron evicts it. 0 disables.
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Advisory cap on concurrently connected clients, across all workers.
    #[serde(default = "default_max_clients")]
    pub max_clients: i64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub repl_workers: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Password granting the default (administrative) namespace.
    /// When set, clients must AUTH before issuing commands.
    #[serde(default)]
    pub requirepass: Option<String>,
    /// AUTH token -> namespace. Tokens scope clients to a keyspace and to
    /// the monitor traffic of that namespace.
    #[serde(default)]
    pub namespace_tokens: HashMap<String, String>,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_port() -> u16 {
    6666
}
fn default_repl_port() -> u16 {
    6667
}
fn default_binds() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}
fn default_backlog() -> u32 {
    511
}
fn default_max_clients() -> i64 {
    10000
}
fn default_workers() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            repl_port: default_repl_port(),
            binds: default_binds(),
            repl_binds: default_binds(),
            backlog: default_backlog(),
            timeout_seconds: 0,
            max_clients: default_max_clients(),
            workers: default_workers(),
            repl_workers: 0,
            log_level: default_log_level(),
            requirepass: None,
            namespace_tokens: HashMap::new(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read config file '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("could not parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("'workers' must be at least 1");
        }
        if self.binds.is_empty() {
            bail!("'binds' must name at least one address");
        }
        if self.repl_workers > 0 && self.repl_binds.is_empty() {
            bail!("'repl_binds' must name at least one address when repl_workers > 0");
        }
        if self.repl_workers > 0 && self.repl_port == self.port {
            bail!("'repl_port' must differ from 'port'");
        }
        if self.max_clients <= 0 {
            bail!("'max_clients' must be positive");
        }
        for (token, namespace) in &self.namespace_tokens {
            if token.is_empty() || namespace.is_empty() {
                bail!("namespace tokens and namespaces must be non-empty");
            }
            if namespace == DEFAULT_NAMESPACE {
                bail!(
                    "namespace token '{token}' maps to the reserved namespace \
                     '{DEFAULT_NAMESPACE}'; use 'requirepass' for administrative access"
                );
            }
        }
        Ok(())
    }
}
