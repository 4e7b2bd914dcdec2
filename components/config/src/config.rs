use std::env;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 250;
pub const DEFAULT_RETRY_BLOCK_DELAY: u64 = 6;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 8;
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REMOTE_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_TIP_IDLE_SLEEP_SECS: u64 = 30;
pub const DEFAULT_ROYALTY_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_GATEWAY_RECOVERY_PAUSE_MS: u64 = 2_000;

/// Recognized configuration, read once at startup from the process
/// environment. An optional `.env` file is loaded first (see
/// [`Config::from_env`]) so local development doesn't require exporting
/// every variable by hand.
#[derive(Clone, Debug)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub indexing: IndexingConfig,
    pub network: NetworkConfig,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// `API_URL` - base URL of the Ordinals gateway (block/content/output lookups).
    pub api_url: String,
    /// `API_WALLET_URL` - base URL used for address-transaction history lookups.
    pub api_wallet_url: String,
    /// `MAX_RETRIES` - attempts per upstream call before surfacing a transient failure.
    pub max_retries: u32,
    /// `RETRY_DELAY` (ms) - base delay for the exponential backoff formula.
    pub retry_delay: Duration,
    /// Separate, smaller retry budget for the royalty-lookup 504 path (spec 4.1).
    pub royalty_retry_budget: u32,
    /// Pause observed after exhausting the royalty retry budget before surfacing "gateway unavailable".
    pub recovery_pause: Duration,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// `DB_PATH` - path to the SQLite database file.
    pub db_path: String,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// `REDIS_URL` - remote cache tier. When absent, the remote tier is disabled
    /// and the two-tier cache degrades to local-only (still correct, just slower
    /// after a process restart).
    pub redis_url: Option<String>,
    pub remote_ttl: Duration,
}

#[derive(Clone, Debug)]
pub struct IndexingConfig {
    /// `START_BLOCK` - historical height to begin catch-up from on a fresh database.
    pub start_block: u64,
    /// `RETRY_BLOCK_DELAY` (blocks) - cooldown before an error-block is retried.
    pub retry_block_delay: u64,
    /// `CONCURRENCY_LIMIT` - bulk-queue parallelism while catching up.
    pub concurrency_limit: usize,
    pub tip_idle_sleep: Duration,
}

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// `PORT` - bound by the (out-of-scope) read API; recorded here since it's
    /// one process reading one env block.
    pub port: u16,
    pub prometheus_port: Option<u16>,
}

impl Config {
    /// Loads configuration from the process environment, first merging in a
    /// `.env` file if one is present in the working directory. Missing
    /// optional variables fall back to documented defaults; missing required
    /// ones (`API_URL`, `DB_PATH`) fail fast.
    pub fn from_env() -> Result<Config, String> {
        let _ = dotenvy::dotenv();

        let api_url = require_env("API_URL")?;
        let api_wallet_url = env::var("API_WALLET_URL").unwrap_or_else(|_| api_url.clone());
        let db_path = require_env("DB_PATH")?;

        Ok(Config {
            gateway: GatewayConfig {
                api_url,
                api_wallet_url,
                max_retries: parse_env_or("MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                retry_delay: Duration::from_millis(parse_env_or(
                    "RETRY_DELAY",
                    DEFAULT_RETRY_DELAY_MS,
                )?),
                royalty_retry_budget: DEFAULT_ROYALTY_RETRY_BUDGET,
                recovery_pause: Duration::from_millis(DEFAULT_GATEWAY_RECOVERY_PAUSE_MS),
            },
            storage: StorageConfig { db_path },
            cache: CacheConfig {
                redis_url: env::var("REDIS_URL").ok(),
                remote_ttl: Duration::from_secs(DEFAULT_REMOTE_CACHE_TTL_SECS),
            },
            indexing: IndexingConfig {
                start_block: parse_env_or("START_BLOCK", 0u64)?,
                retry_block_delay: parse_env_or("RETRY_BLOCK_DELAY", DEFAULT_RETRY_BLOCK_DELAY)?,
                concurrency_limit: parse_env_or("CONCURRENCY_LIMIT", DEFAULT_CONCURRENCY_LIMIT)?,
                tip_idle_sleep: Duration::from_secs(DEFAULT_TIP_IDLE_SLEEP_SECS),
            },
            network: NetworkConfig {
                port: parse_env_or("PORT", DEFAULT_PORT)?,
                prometheus_port: env::var("PROMETHEUS_PORT").ok().and_then(|v| v.parse().ok()),
            },
        })
    }

    /// A config suitable for unit and integration tests: a temp-file SQLite
    /// database, no remote cache, and small retry budgets so failure-path
    /// tests don't sleep for seconds.
    pub fn test_default() -> Config {
        Config {
            gateway: GatewayConfig {
                api_url: "http://127.0.0.1:0".to_string(),
                api_wallet_url: "http://127.0.0.1:0".to_string(),
                max_retries: 2,
                retry_delay: Duration::from_millis(1),
                royalty_retry_budget: 2,
                recovery_pause: Duration::from_millis(1),
            },
            storage: StorageConfig {
                db_path: ":memory:".to_string(),
            },
            cache: CacheConfig {
                redis_url: None,
                remote_ttl: Duration::from_secs(DEFAULT_REMOTE_CACHE_TTL_SECS),
            },
            indexing: IndexingConfig {
                start_block: 0,
                retry_block_delay: 1,
                concurrency_limit: 2,
                tip_idle_sleep: Duration::from_millis(1),
            },
            network: NetworkConfig {
                port: DEFAULT_PORT,
                prometheus_port: None,
            },
        }
    }
}

fn require_env(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("missing required environment variable {key}"))
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
