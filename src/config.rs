//! Configuration management for the recovery pipeline.
//!
//! Supports loading from environment variables, a TOML config file, and CLI
//! overrides. Environment variables always win over file settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::ethereum::ValidatedAddress;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported chain ID: {chain_id}. Supported chains: {supported}")]
    UnsupportedChain { chain_id: u64, supported: String },

    #[error("Invalid target address format: {0}")]
    InvalidTarget(String),

    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    #[error("Invalid classification policy for {stage}: {reason}")]
    InvalidPolicy { stage: &'static str, reason: String },

    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Etherscan API key (ledger queries and code lookups)
    #[serde(default)]
    pub etherscan_api_key: String,

    /// Etherscan v2 multichain endpoint
    #[serde(default = "default_etherscan_url")]
    pub etherscan_base_url: String,

    /// Address whose inbound transfers are being recovered
    #[serde(default = "default_target_address")]
    pub target_address: String,

    #[serde(default)]
    pub denylist: DenylistConfig,

    /// Etherscan request budget shared by every call
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Policy for the address-type stage
    #[serde(default = "default_address_kind_policy")]
    pub address_kind: ClassificationPolicy,

    /// Policy for the denylist screening stage
    #[serde(default = "default_screening_policy")]
    pub screening: ClassificationPolicy,

    #[serde(default)]
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenylistConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub environment: DenylistEnvironment,

    /// Explicit base URL, overrides `environment`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_denylist_endpoint")]
    pub endpoint: String,
}

impl Default for DenylistConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            environment: DenylistEnvironment::default(),
            base_url: None,
            endpoint: default_denylist_endpoint(),
        }
    }
}

impl DenylistConfig {
    /// Full URL of the screening endpoint
    pub fn url(&self) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| self.environment.base_url().to_string());
        format!("{}{}", base.trim_end_matches('/'), self.endpoint)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DenylistEnvironment {
    #[default]
    Production,
    Development,
}

impl DenylistEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            DenylistEnvironment::Production => "https://naughty-list-query.cbhq.net:3000",
            DenylistEnvironment::Development => "https://naughty-list-query-dev.cbhq.net:3000",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum Etherscan requests per second
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,

    /// Results per `txlist` page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Safety cap on `txlist` pages per run
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// HTTP timeout for ledger queries (ms)
    #[serde(default = "default_ledger_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            request_timeout_ms: default_ledger_timeout_ms(),
        }
    }
}

/// What the classification engine does once an item exhausts its retries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop scheduling batches and return what was collected
    Abort,
    /// Leave the item unresolved and keep going
    Skip,
}

/// Batching, pacing and retry settings for one classification stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationPolicy {
    pub batch_size: usize,

    /// Pause after each batch (ms)
    pub inter_batch_delay_ms: u64,

    /// Attempts per address, including the first one
    pub max_retries: u32,

    /// Linear backoff unit (ms); attempt `n` waits `n * retry_backoff_ms`
    pub retry_backoff_ms: u64,

    /// Per-call timeout (ms)
    pub call_timeout_ms: u64,

    pub on_exhaustion: ExhaustionPolicy,
}

impl ClassificationPolicy {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self, stage: &'static str) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidPolicy {
                stage,
                reason: "batch_size must be > 0".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidPolicy {
                stage,
                reason: "max_retries must be > 0".to_string(),
            });
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::InvalidPolicy {
                stage,
                reason: "call_timeout_ms must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// JSON (`{"wallets": [...]}`) or CSV (`address,name`) custodian list
    #[serde(default = "default_custodian_directory")]
    pub custodian_directory: PathBuf,
}

impl PathConfig {
    /// Per-chain result directory, e.g. `output/base`
    pub fn chain_output_dir(&self, chain: &ChainConfig) -> PathBuf {
        self.output_dir.join(chain.slug)
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            custodian_directory: default_custodian_directory(),
        }
    }
}

/// Network context a run is executed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: &'static str,
    /// Output directory name
    pub slug: &'static str,
    pub start_block: u64,
    pub end_block: u64,
    pub native_symbol: &'static str,
    pub decimals: u8,
}

/// Networks the recovery analysis is defined for
pub const SUPPORTED_CHAINS: &[ChainConfig] = &[
    ChainConfig {
        chain_id: 42161,
        name: "Arbitrum One",
        slug: "arbitrum",
        start_block: 111_048_844,
        end_block: 337_674_580,
        native_symbol: "ETH",
        decimals: 18,
    },
    ChainConfig {
        chain_id: 10,
        name: "Optimism",
        slug: "optimism",
        start_block: 106_836_897,
        end_block: 134_080_874,
        native_symbol: "ETH",
        decimals: 18,
    },
    ChainConfig {
        chain_id: 8453,
        name: "Base",
        slug: "base",
        start_block: 1_261_624,
        end_block: 32_988_909,
        native_symbol: "ETH",
        decimals: 18,
    },
];

/// Look up a supported chain
pub fn chain_config(chain_id: u64) -> Result<&'static ChainConfig, ConfigError> {
    SUPPORTED_CHAINS
        .iter()
        .find(|c| c.chain_id == chain_id)
        .ok_or_else(|| ConfigError::UnsupportedChain {
            chain_id,
            supported: SUPPORTED_CHAINS
                .iter()
                .map(|c| c.chain_id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

// Default value functions
fn default_etherscan_url() -> String {
    "https://api.etherscan.io/v2/api".to_string()
}

fn default_target_address() -> String {
    "0x49048044D57e1C92A77f79988d21Fa8fAF74E97e".to_string()
}

fn default_denylist_endpoint() -> String {
    "/entities".to_string()
}

fn default_rps() -> u32 {
    5 // Etherscan free tier
}

fn default_page_size() -> usize {
    10_000
}

fn default_max_pages() -> u32 {
    100
}

fn default_ledger_timeout_ms() -> u64 {
    30_000
}

fn default_address_kind_policy() -> ClassificationPolicy {
    // 5 calls per second against Etherscan
    ClassificationPolicy {
        batch_size: 5,
        inter_batch_delay_ms: 1_000,
        max_retries: 3,
        retry_backoff_ms: 200,
        call_timeout_ms: 30_000,
        on_exhaustion: ExhaustionPolicy::Skip,
    }
}

fn default_screening_policy() -> ClassificationPolicy {
    ClassificationPolicy {
        batch_size: 10,
        inter_batch_delay_ms: 50,
        max_retries: 3,
        retry_backoff_ms: 50,
        call_timeout_ms: 10_000,
        on_exhaustion: ExhaustionPolicy::Abort,
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_custodian_directory() -> PathBuf {
    PathBuf::from("config/custodian-wallets.json")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            etherscan_api_key: String::new(),
            etherscan_base_url: default_etherscan_url(),
            target_address: default_target_address(),
            denylist: DenylistConfig::default(),
            rate_limits: RateLimitConfig::default(),
            address_kind: default_address_kind_policy(),
            screening: default_screening_policy(),
            paths: PathConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = ::toml::from_str(&contents)?;

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("ETHERSCAN_API_KEY") {
            self.etherscan_api_key = key;
        }
        if let Ok(url) = std::env::var("ETHERSCAN_BASE_URL") {
            self.etherscan_base_url = url;
        }
        if let Ok(key) = std::env::var("DENYLIST_API_KEY") {
            self.denylist.api_key = key;
        }
        if let Ok(url) = std::env::var("DENYLIST_BASE_URL") {
            self.denylist.base_url = Some(url);
        }
        if let Ok(env) = std::env::var("DENYLIST_ENV") {
            if env.eq_ignore_ascii_case("development") {
                self.denylist.environment = DenylistEnvironment::Development;
            }
        }
        if let Ok(target) = std::env::var("RECOVERY_TARGET_ADDRESS") {
            self.target_address = target;
        }
    }

    /// Check everything an `analyze` run needs before any network call is made
    pub fn validate_for_run(&self) -> Result<ValidatedAddress, ConfigError> {
        let target = ValidatedAddress::parse(&self.target_address)
            .map_err(|_| ConfigError::InvalidTarget(self.target_address.clone()))?;
        if target.is_zero() {
            return Err(ConfigError::InvalidTarget(self.target_address.clone()));
        }

        if self.etherscan_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("ETHERSCAN_API_KEY"));
        }
        if self.denylist.api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("DENYLIST_API_KEY"));
        }

        self.address_kind.validate("address_kind")?;
        self.screening.validate("screening")?;

        Ok(target)
    }

    /// Output directory for one chain
    pub fn chain_output_dir(&self, chain: &ChainConfig) -> PathBuf {
        self.paths.chain_output_dir(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable_config() -> PipelineConfig {
        PipelineConfig {
            etherscan_api_key: "etherscan".to_string(),
            denylist: DenylistConfig {
                api_key: "denylist".to_string(),
                ..DenylistConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_chain_lookup() {
        let chain = chain_config(42161).expect("arbitrum is supported");
        assert_eq!(chain.name, "Arbitrum One");
        assert_eq!(chain.slug, "arbitrum");
        assert!(chain.start_block < chain.end_block);

        let err = chain_config(1).unwrap_err();
        assert!(err.to_string().contains("42161, 10, 8453"));
    }

    #[test]
    fn test_default_policies() {
        let config = PipelineConfig::default();
        assert_eq!(config.address_kind.batch_size, 5);
        assert_eq!(config.address_kind.on_exhaustion, ExhaustionPolicy::Skip);
        assert_eq!(config.screening.batch_size, 10);
        assert_eq!(config.screening.on_exhaustion, ExhaustionPolicy::Abort);
        assert_eq!(config.screening.backoff_for(2), Duration::from_millis(100));
    }

    #[test]
    fn test_validate_for_run() {
        let target = runnable_config().validate_for_run().expect("valid config");
        assert_eq!(target.to_key(), "0x49048044d57e1c92a77f79988d21fa8faf74e97e");

        let mut missing_key = runnable_config();
        missing_key.etherscan_api_key.clear();
        assert!(matches!(
            missing_key.validate_for_run(),
            Err(ConfigError::MissingCredential("ETHERSCAN_API_KEY"))
        ));

        let mut missing_denylist = runnable_config();
        missing_denylist.denylist.api_key = "  ".to_string();
        assert!(matches!(
            missing_denylist.validate_for_run(),
            Err(ConfigError::MissingCredential("DENYLIST_API_KEY"))
        ));

        let mut bad_target = runnable_config();
        bad_target.target_address = "0x1234".to_string();
        assert!(matches!(
            bad_target.validate_for_run(),
            Err(ConfigError::InvalidTarget(_))
        ));

        let mut zero_target = runnable_config();
        zero_target.target_address = format!("0x{}", "0".repeat(40));
        assert!(matches!(
            zero_target.validate_for_run(),
            Err(ConfigError::InvalidTarget(_))
        ));

        let mut bad_policy = runnable_config();
        bad_policy.screening.batch_size = 0;
        assert!(matches!(
            bad_policy.validate_for_run(),
            Err(ConfigError::InvalidPolicy { stage: "screening", .. })
        ));
    }

    #[test]
    fn test_toml_partial_override() {
        let toml = r#"
            target_address = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"

            [screening]
            batch_size = 4
            inter_batch_delay_ms = 250
            max_retries = 5
            retry_backoff_ms = 100
            call_timeout_ms = 2000
            on_exhaustion = "abort"

            [paths]
            output_dir = "out"
        "#;
        let config: PipelineConfig = toml::from_str(toml).expect("parses");
        assert_eq!(config.screening.batch_size, 4);
        assert_eq!(config.screening.max_retries, 5);
        assert_eq!(config.address_kind, default_address_kind_policy());
        assert_eq!(config.paths.output_dir, PathBuf::from("out"));
        assert_eq!(
            config.paths.custodian_directory,
            PathBuf::from("config/custodian-wallets.json")
        );
        assert_eq!(config.etherscan_base_url, "https://api.etherscan.io/v2/api");
    }

    #[test]
    fn test_denylist_url() {
        let mut denylist = DenylistConfig::default();
        assert_eq!(
            denylist.url(),
            "https://naughty-list-query.cbhq.net:3000/entities"
        );
        denylist.environment = DenylistEnvironment::Development;
        assert_eq!(
            denylist.url(),
            "https://naughty-list-query-dev.cbhq.net:3000/entities"
        );
        denylist.base_url = Some("http://localhost:8080/".to_string());
        assert_eq!(denylist.url(), "http://localhost:8080/entities");
    }

    #[test]
    fn test_chain_output_dir() {
        let config = PipelineConfig::default();
        let chain = chain_config(8453).unwrap();
        assert_eq!(config.chain_output_dir(chain), PathBuf::from("output/base"));

        let paths = PathConfig {
            output_dir: PathBuf::from("/tmp/recovery"),
            ..PathConfig::default()
        };
        let arbitrum = chain_config(42161).unwrap();
        assert_eq!(
            paths.chain_output_dir(arbitrum),
            PathBuf::from("/tmp/recovery/arbitrum")
        );
    }
}
