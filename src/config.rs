use crate::domain::Address;
use crate::reduce::ReduceEngine;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub chain_rpc_url: String,
    pub reduce_engine: ReduceEngine,
    pub reduce_batch_size: usize,
    pub reduce_checkpoint_interval: Duration,
    pub max_concurrent_reductions: usize,
    pub reconcile_interval: Duration,
    /// Balances updated in the newest blocks are not checked yet.
    pub reconcile_confirmations: u64,
    /// Balances updated further back than this are never checked.
    pub reconcile_skip_blocks: u64,
    pub ignored_owners: Vec<Address>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    env_map
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

fn parsed<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
    default: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(name)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(name.to_string(), format!("must be {}", expected)))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parsed::<u16>(&env_map, "PORT", "8080", "a valid u16")?;
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let chain_rpc_url = required(&env_map, "CHAIN_RPC_URL")?;

        let reduce_engine = env_map
            .get("REDUCE_ENGINE")
            .map(|s| s.as_str())
            .unwrap_or("chain")
            .parse::<ReduceEngine>()
            .map_err(|e| ConfigError::InvalidValue("REDUCE_ENGINE".to_string(), e))?;

        let reduce_batch_size =
            parsed::<usize>(&env_map, "REDUCE_BATCH_SIZE", "1000", "a positive integer")?;
        if reduce_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "REDUCE_BATCH_SIZE".to_string(),
                "must be a positive integer".to_string(),
            ));
        }
        let checkpoint_ms = parsed::<u64>(
            &env_map,
            "REDUCE_CHECKPOINT_INTERVAL_MS",
            "5000",
            "milliseconds",
        )?;
        let max_concurrent_reductions = parsed::<usize>(
            &env_map,
            "MAX_CONCURRENT_REDUCTIONS",
            "16",
            "a positive integer",
        )?
        .max(1);
        let reconcile_ms =
            parsed::<u64>(&env_map, "RECONCILE_INTERVAL_MS", "60000", "milliseconds")?;
        if reconcile_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILE_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let reconcile_confirmations =
            parsed::<u64>(&env_map, "RECONCILE_CONFIRMATIONS", "12", "a block count")?;
        let reconcile_skip_blocks =
            parsed::<u64>(&env_map, "RECONCILE_SKIP_BLOCKS", "1000", "a block count")?;

        let ignored_owners = parse_ignored_owners_from_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            chain_rpc_url,
            reduce_engine,
            reduce_batch_size,
            reduce_checkpoint_interval: Duration::from_millis(checkpoint_ms),
            max_concurrent_reductions,
            reconcile_interval: Duration::from_millis(reconcile_ms),
            reconcile_confirmations,
            reconcile_skip_blocks,
            ignored_owners,
        })
    }
}

fn parse_ignored_owners_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Vec<Address>, ConfigError> {
    let raw: Vec<String> = if let Some(owners) = env_map.get("IGNORED_OWNERS") {
        owners.split(',').map(str::to_string).collect()
    } else if let Some(file_path) = env_map.get("IGNORED_OWNERS_FILE") {
        let content = std::fs::read_to_string(file_path).map_err(|_| {
            ConfigError::InvalidValue(
                "IGNORED_OWNERS_FILE".to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        content.lines().map(str::to_string).collect()
    } else {
        return Ok(Vec::new());
    };

    Ok(raw
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Address::new)
        .collect())
}
