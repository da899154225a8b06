//! TOML file configuration structures.
//!
//! These structs directly map to the `qshop-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// QRIS provider configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// QR image generator endpoint.
    pub generator_url: String,
    /// The merchant's static QRIS payload the generator re-encodes.
    pub qris_code: String,
    /// Shared secret for verifying callback signatures. When unset,
    /// callbacks are accepted unverified (trusted-network deployments).
    #[serde(default)]
    pub callback_secret: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// Payment lifecycle configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// How long a payment request stays open.
    #[serde(default = "default_expiry_secs")]
    pub expiry_secs: u64,
    /// How often the expiry sweeper runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Smallest accepted deposit, in rupiah.
    #[serde(default = "default_min_deposit")]
    pub min_deposit: i64,
    /// How many disambiguator draws to attempt before giving up.
    #[serde(default = "default_open_retry_budget")]
    pub open_retry_budget: u32,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            expiry_secs: default_expiry_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            min_deposit: default_min_deposit(),
            open_retry_budget: default_open_retry_budget(),
        }
    }
}

fn default_expiry_secs() -> u64 {
    900
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_min_deposit() -> i64 {
    1_000
}

fn default_open_retry_budget() -> u32 {
    32
}

/// Storage configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the JSON store snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: std::path::PathBuf,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./data")
}

fn default_flush_interval_secs() -> u64 {
    60
}

/// Chat notification configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// HTTP relay that forwards messages into the chat platform. When
    /// unset, deliveries are logged instead.
    #[serde(default)]
    pub relay_url: Option<String>,
    /// Chat id that receives operator alerts.
    #[serde(default)]
    pub operator_chat_id: Option<i64>,
}
