//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Every chain this engine indexes, keyed by `name` within the list.
    pub chains: Vec<ChainSettings>,
    /// Every declared indexing source: a contract's events (plus optional
    /// factory-derived child addresses) on one or more chains.
    pub sources: Vec<SourceSettings>,
    /// Database configuration (`SyncStore`/`EntityStore` backend).
    pub database: DatabaseSettings,
    /// RPC result cache configuration.
    pub cache: CacheSettings,
    /// API server configuration.
    pub api: ApiSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Metrics configuration.
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `INDEXER_` prefix
    ///
    /// # Arguments
    /// * `environment` - Environment name (e.g., "development", "production")
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("database.backend", "postgres")?
            .set_default("database.url", "postgres://localhost/indexer")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.idle_timeout_ms", 600_000)?
            .set_default("api.host", "0.0.0.0")?
            .set_default("api.port", 8080)?
            .set_default("api.cors_origins", vec!["http://localhost:5173"])?
            .set_default("api.request_timeout_ms", 30000)?
            .set_default("cache.rpc_results_ttl_ms", 60_000)?
            .set_default("cache.rpc_results_max_capacity", 100_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.host", "0.0.0.0")?
            .set_default("metrics.port", 9090)?
            // Load default configuration file
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            // Load environment-specific file
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            // Override with environment variables (INDEXER_ prefix)
            .add_source(
                Environment::with_prefix("INDEXER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.chains.is_empty() {
            errors.push("at least one chain must be configured".into());
        }
        let mut seen_names = std::collections::HashSet::new();
        for chain in &self.chains {
            if chain.rpc_url.is_empty() {
                errors.push(format!("chains.{}.rpc_url cannot be empty", chain.name));
            }
            if chain.batch_size == 0 {
                errors.push(format!("chains.{}.batch_size must be non-zero", chain.name));
            }
            if !seen_names.insert(chain.name.clone()) {
                errors.push(format!("duplicate chain name: {}", chain.name));
            }
        }

        let chain_names: std::collections::HashSet<&str> =
            self.chains.iter().map(|c| c.name.as_str()).collect();
        for source in &self.sources {
            if source.contract_name.is_empty() {
                errors.push("sources[].contract_name cannot be empty".into());
            }
            if source.chains.is_empty() {
                errors.push(format!("sources.{}.chains cannot be empty", source.contract_name));
            }
            for chain_name in &source.chains {
                if !chain_names.contains(chain_name.as_str()) {
                    errors.push(format!(
                        "sources.{}.chains references unknown chain {chain_name}",
                        source.contract_name
                    ));
                }
            }
        }

        if self.database.url.is_empty() {
            errors.push("database.url cannot be empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }

        if self.api.port == 0 {
            errors.push("api.port must be non-zero".into());
        }

        if self.cache.rpc_results_max_capacity == 0 {
            errors.push("cache.rpc_results_max_capacity must be non-zero".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One configured EVM chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    /// Short name used to cross-reference this chain from `sources` and in
    /// logs/metrics (e.g. `"mainnet"`, `"arbitrum"`).
    pub name: String,
    /// Chain id, used as the second component of every `Checkpoint` minted
    /// for events on this chain.
    pub chain_id: u64,
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,
    /// WebSocket RPC endpoint URL, used for realtime subscriptions.
    pub ws_url: Option<String>,
    /// Polling interval in milliseconds, used when `ws_url` isn't set.
    pub poll_interval_ms: u64,
    /// Maximum retry attempts for failed RPC requests.
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    pub retry_delay_ms: u64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Number of blocks to fetch per historical batch.
    pub batch_size: u64,
    /// Number of confirmations before a block is treated as final.
    pub confirmation_blocks: u64,
}

impl ChainSettings {
    /// Get the polling interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the retry delay as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where a source's child-contract addresses come from, if not fixed.
#[derive(Debug, Clone, Deserialize)]
pub struct FactorySettings {
    /// Function key (`"{Contract}:{Event}"`) of the event that announces a
    /// new child contract.
    pub function_key: String,
    /// `topicN` or `dataOffsetN` location of the child address within that
    /// event, e.g. `"topic1"` or `"offset0"`.
    pub child_address_location: String,
}

/// One declared indexing source: a contract's events on some subset of
/// configured chains, either at a fixed address or behind a factory.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    /// Contract name, matching the key used in ABI registration and the
    /// `"{Contract}:{Event}"` function keys.
    pub contract_name: String,
    /// Path to the contract's ABI JSON, relative to the config directory.
    pub abi_path: String,
    /// Chain names (from `Settings::chains`) this source is active on.
    pub chains: Vec<String>,
    /// Block number to start indexing from on every chain in `chains`.
    pub start_block: u64,
    /// Fixed contract address, if this source isn't factory-derived.
    pub address: Option<String>,
    /// Factory that produces this source's addresses, if not fixed.
    pub factory: Option<FactorySettings>,
}

/// Database configuration (`SyncStore`/`EntityStore` backend).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Which backend to construct: `"postgres"` or `"sqlite"`.
    pub backend: String,
    /// Connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// API server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl ApiSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// RPC result cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// TTL for cached RPC results in milliseconds.
    pub rpc_results_ttl_ms: u64,
    /// Maximum in-memory cache capacity.
    pub rpc_results_max_capacity: u64,
}

impl CacheSettings {
    /// Get the RPC result TTL as a `Duration`.
    #[must_use]
    pub const fn rpc_results_ttl(&self) -> Duration {
        Duration::from_millis(self.rpc_results_ttl_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Host to bind metrics server to.
    pub host: String,
    /// Port for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Get the metrics socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn chain(name: &str, chain_id: u64) -> ChainSettings {
        ChainSettings {
            name: name.into(),
            chain_id,
            rpc_url: "http://localhost:8545".into(),
            ws_url: None,
            poll_interval_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 500,
            request_timeout_ms: 30000,
            batch_size: 100,
            confirmation_blocks: 12,
        }
    }

    fn create_valid_settings() -> Settings {
        Settings {
            chains: vec![chain("mainnet", 1)],
            sources: vec![SourceSettings {
                contract_name: "Pool".into(),
                abi_path: "abis/Pool.json".into(),
                chains: vec!["mainnet".into()],
                start_block: 0,
                address: Some("0x0000000000000000000000000000000000000001".into()),
                factory: None,
            }],
            database: DatabaseSettings {
                backend: "postgres".into(),
                url: "postgres://localhost/test".into(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout_ms: 5000,
                idle_timeout_ms: 600_000,
            },
            cache: CacheSettings {
                rpc_results_ttl_ms: 60_000,
                rpc_results_max_capacity: 100_000,
            },
            api: ApiSettings {
                host: "0.0.0.0".into(),
                port: 8080,
                cors_origins: vec![],
                request_timeout_ms: 30000,
            },
            logging: LoggingSettings {
                level: "info".into(),
                format: "json".into(),
                file_path: None,
            },
            metrics: MetricsSettings {
                enabled: true,
                host: "0.0.0.0".into(),
                port: 9090,
            },
        }
    }

    #[test]
    fn chain_durations() {
        let chain = chain("mainnet", 1);
        assert_eq!(chain.poll_interval(), Duration::from_millis(1000));
        assert_eq!(chain.retry_delay(), Duration::from_millis(500));
        assert_eq!(chain.request_timeout(), Duration::from_millis(30000));
    }

    #[test]
    fn api_socket_addr() {
        let api = ApiSettings {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origins: vec![],
            request_timeout_ms: 30000,
        };
        assert_eq!(api.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn validation_passes_for_well_formed_settings() {
        assert!(create_valid_settings().validate().is_ok());
    }

    #[test]
    fn validation_catches_zero_connections() {
        let mut settings = create_valid_settings();
        settings.database.max_connections = 0;
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_connections")));
    }

    #[test]
    fn validation_catches_min_exceeds_max() {
        let mut settings = create_valid_settings();
        settings.database.min_connections = 20;
        settings.database.max_connections = 10;
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_connections")));
    }

    #[test]
    fn validation_catches_source_referencing_unknown_chain() {
        let mut settings = create_valid_settings();
        settings.sources[0].chains = vec!["nonexistent".into()];
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown chain")));
    }

    #[test]
    fn validation_catches_duplicate_chain_names() {
        let mut settings = create_valid_settings();
        settings.chains.push(chain("mainnet", 2));
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate chain name")));
    }
}
