use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::str::FromStr;

fn default_max_file_size() -> usize {
    // 10 MB in bytes
    10 * 1024 * 1024
}

fn default_progress_batch_size() -> usize {
    10
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: String,
    pub max_file_size: usize,
    pub progress_batch_size: usize,
    pub session_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_path: "inventory.db".to_string(),
            max_file_size: default_max_file_size(),
            progress_batch_size: default_progress_batch_size(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let defaults = Config::default();
        let progress_batch_size = env_or("PROGRESS_BATCH_SIZE", defaults.progress_batch_size)?;
        if progress_batch_size == 0 {
            anyhow::bail!("PROGRESS_BATCH_SIZE must be at least 1");
        }

        Ok(Config {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr)?,
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            max_file_size: env_or("MAX_FILE_SIZE", defaults.max_file_size)?,
            progress_batch_size,
            session_ttl_secs: env_or("SESSION_TTL_SECS", defaults.session_ttl_secs)?,
        })
    }
}

pub fn load_config() -> Result<Config> {
    let config = Config::new()?;
    tracing::info!(
        "Configuration loaded: bind={}, database={}, max_file_size={}B, batch={}",
        config.bind_addr,
        config.database_path,
        config.max_file_size,
        config.progress_batch_size
    );
    Ok(config)
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {}={}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = Config::default();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.progress_batch_size, 10);
        assert_eq!(config.bind_addr.port(), 3000);
    }

    #[test]
    fn env_or_falls_back_when_unset() {
        let value: usize = env_or("INVENTORY_IMPORT_SURELY_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }
}
