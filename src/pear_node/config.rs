use crate::error::{PearError, PearResult};
use crate::grantee::Did;
use crate::logging::LogConfig;
use crate::network::DidDocument;
use crate::pear::PearConfig;
use crate::schema::CollectionSchema;
use crate::{log_node_error, log_node_info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "PEAR_CONFIG";

/// Configuration file used when neither an argument nor the variable names one.
pub const DEFAULT_CONFIG_PATH: &str = "config/pear_config.json";

/// An identity this node hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedIdentityConfig {
    pub did: Did,
    #[serde(default)]
    pub handle: Option<String>,
}

/// A static identity directory entry for an identity hosted elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub did: Did,
    #[serde(default)]
    pub handle: Option<String>,
    /// Base URL of the node hosting the identity
    pub endpoint: String,
    /// Base64 Ed25519 public key of that node
    #[serde(default)]
    pub signing_key: Option<String>,
}

impl DirectoryEntry {
    pub fn to_document(&self) -> DidDocument {
        let mut document = DidDocument::new(self.did.clone(), &self.endpoint);
        document.handle = self.handle.clone();
        document.signing_key = self.signing_key.clone();
        document
    }
}

/// Configuration for a PearNode instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path where the node will store its data
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// HTTP listening address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// URL other nodes reach this one at
    #[serde(default = "default_public_endpoint")]
    pub public_endpoint: String,
    #[serde(default)]
    pub hosted_identities: Vec<HostedIdentityConfig>,
    #[serde(default)]
    pub directory: Vec<DirectoryEntry>,
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    #[serde(default = "default_list_fetch_concurrency")]
    pub list_fetch_concurrency: usize,
    #[serde(default = "default_outbox_retry_interval_secs")]
    pub outbox_retry_interval_secs: u64,
    #[serde(default = "default_outbox_max_attempts")]
    pub outbox_max_attempts: u32,
    /// Accept the caller named by the `X-Pear-Caller` header of a fronting
    /// auth layer when no service assertion is present
    #[serde(default)]
    pub trust_caller_header: bool,
    #[serde(default)]
    pub schemas: Vec<CollectionSchema>,
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_bind_address() -> String {
    "127.0.0.1:9001".to_string()
}

fn default_public_endpoint() -> String {
    "http://127.0.0.1:9001".to_string()
}

fn default_remote_timeout_ms() -> u64 {
    5000
}

fn default_list_fetch_concurrency() -> usize {
    8
}

fn default_outbox_retry_interval_secs() -> u64 {
    30
}

fn default_outbox_max_attempts() -> u32 {
    20
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            bind_address: default_bind_address(),
            public_endpoint: default_public_endpoint(),
            hosted_identities: Vec::new(),
            directory: Vec::new(),
            remote_timeout_ms: default_remote_timeout_ms(),
            list_fetch_concurrency: default_list_fetch_concurrency(),
            outbox_retry_interval_secs: default_outbox_retry_interval_secs(),
            outbox_max_attempts: default_outbox_max_attempts(),
            trust_caller_header: false,
            schemas: Vec::new(),
            logging: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a new node configuration with the specified storage path
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            ..Default::default()
        }
    }

    pub fn with_hosted_identity(mut self, did: Did, handle: Option<&str>) -> Self {
        self.hosted_identities.push(HostedIdentityConfig {
            did,
            handle: handle.map(str::to_string),
        });
        self
    }

    /// Replaces the port of `bind_address`, keeping its host.
    pub fn with_port(mut self, port: u16) -> Self {
        let host = self
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        self.bind_address = format!("{}:{}", host, port);
        self
    }

    pub fn pear_config(&self) -> PearConfig {
        PearConfig {
            remote_timeout: Duration::from_millis(self.remote_timeout_ms),
            list_fetch_concurrency: self.list_fetch_concurrency.max(1),
            outbox_max_attempts: self.outbox_max_attempts.max(1),
        }
    }

    pub fn outbox_retry_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_retry_interval_secs.max(1))
    }
}

/// Load a node configuration from the given path, the `PEAR_CONFIG`
/// environment variable, or `config/pear_config.json`, in that order.
///
/// A missing file yields the default configuration; a present but malformed
/// one is an error. `port` overrides the port of the bind address.
pub fn load_node_config(path: Option<&str>, port: Option<u16>) -> PearResult<NodeConfig> {
    use std::fs;

    let config_path = path
        .map(|p| p.to_string())
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match fs::read_to_string(&config_path) {
        Ok(config_str) => serde_json::from_str::<NodeConfig>(&config_str).map_err(|e| {
            log_node_error!("Failed to parse node configuration {}: {}", config_path, e);
            PearError::Config(format!("{}: {}", config_path, e))
        })?,
        Err(_) => {
            log_node_info!("No configuration at {}, using defaults", config_path);
            NodeConfig::default()
        }
    };

    Ok(match port {
        Some(p) => config.with_port(p),
        None => config,
    })
}
