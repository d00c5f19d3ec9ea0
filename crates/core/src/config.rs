use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PrismError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub http_addr: String,
    pub grpc_addr: String,
    pub hub_url: String,
    pub completion_idle: Duration,
    pub completion_tick: Duration,
    pub subscriber_buffer: usize,
    /// Idle traces with no subscribers are dropped from the hub cache after this.
    pub hub_cache_ttl: Duration,
    pub retention_ttl: Duration,
    pub write_batch_size: usize,
    pub write_flush_ms: u64,
    pub render_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("prism/prism.duckdb"),
            http_addr: "127.0.0.1:7000".to_string(),
            grpc_addr: "127.0.0.1:4317".to_string(),
            hub_url: "http://127.0.0.1:7000".to_string(),
            completion_idle: Duration::from_secs(3),
            completion_tick: Duration::from_secs(1),
            subscriber_buffer: 50,
            hub_cache_ttl: Duration::from_secs(300),
            retention_ttl: Duration::from_secs(60 * 60 * 24 * 7),
            write_batch_size: 1000,
            write_flush_ms: 200,
            render_interval: Duration::from_millis(250),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    http_addr: Option<String>,
    grpc_addr: Option<String>,
    hub_url: Option<String>,
    completion_idle: Option<String>,
    completion_tick: Option<String>,
    subscriber_buffer: Option<usize>,
    hub_cache_ttl: Option<String>,
    retention_ttl: Option<String>,
    write_batch_size: Option<usize>,
    write_flush_ms: Option<u64>,
    render_interval: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("PRISM_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("prism/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| PrismError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| PrismError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(v) => v
            .parse::<usize>()
            .map(Some)
            .map_err(|e| PrismError::Config(format!("bad {key} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("PRISM_DB_PATH").ok().map(PathBuf::from),
        http_addr: env::var("PRISM_HTTP_ADDR").ok(),
        grpc_addr: env::var("PRISM_GRPC_ADDR").ok(),
        hub_url: env::var("PRISM_HUB_URL").ok(),
        completion_idle: env::var("PRISM_COMPLETION_IDLE").ok(),
        completion_tick: env::var("PRISM_COMPLETION_TICK").ok(),
        subscriber_buffer: env_usize("PRISM_SUBSCRIBER_BUFFER")?,
        hub_cache_ttl: env::var("PRISM_HUB_CACHE_TTL").ok(),
        retention_ttl: env::var("PRISM_RETENTION_TTL").ok(),
        write_batch_size: env_usize("PRISM_WRITE_BATCH_SIZE")?,
        write_flush_ms: None,
        render_interval: env::var("PRISM_RENDER_INTERVAL").ok(),
    })
}

fn parse_duration_field(name: &str, value: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| PrismError::Config(format!("bad {name} in {source}: {e} (value={value})")))
}

/// Timer periods must be non-zero; tokio intervals panic on zero.
fn parse_period_field(name: &str, value: &str, source: &str) -> Result<Duration> {
    let period = parse_duration_field(name, value, source)?;
    if period.is_zero() {
        return Err(PrismError::Config(format!(
            "{name} in {source} must be greater than zero"
        )));
    }
    Ok(period)
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.http_addr {
        cfg.http_addr = v;
    }
    if let Some(v) = overrides.grpc_addr {
        cfg.grpc_addr = v;
    }
    if let Some(v) = overrides.hub_url {
        cfg.hub_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = overrides.completion_idle {
        cfg.completion_idle = parse_duration_field("completion_idle", &v, source)?;
    }
    if let Some(v) = overrides.completion_tick {
        cfg.completion_tick = parse_period_field("completion_tick", &v, source)?;
    }
    if let Some(v) = overrides.subscriber_buffer {
        if v == 0 {
            return Err(PrismError::Config(format!(
                "subscriber_buffer in {source} must be at least 1"
            )));
        }
        cfg.subscriber_buffer = v;
    }
    if let Some(v) = overrides.hub_cache_ttl {
        cfg.hub_cache_ttl = parse_duration_field("hub_cache_ttl", &v, source)?;
    }
    if let Some(v) = overrides.retention_ttl {
        cfg.retention_ttl = parse_duration_field("retention_ttl", &v, source)?;
    }
    if let Some(v) = overrides.write_batch_size {
        cfg.write_batch_size = v;
    }
    if let Some(v) = overrides.write_flush_ms {
        cfg.write_flush_ms = v;
    }
    if let Some(v) = overrides.render_interval {
        cfg.render_interval = parse_period_field("render_interval", &v, source)?;
    }
    Ok(())
}
