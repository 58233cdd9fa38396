use crate::error::StoreResult;
use crate::store::{JsonFileStore, RedisStore, Stores};
use clap::{Parser, ValueEnum};
use humantime_serde::re::humantime;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const API_DB_FILE: &str = "api.json";
pub const LOGS_DB_FILE: &str = "logs.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "route-gateway")]
#[command(about = "HTTP gateway for plugin-registered routes with per-IP cooldowns")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:5000")]
    pub bind_addr: SocketAddr,

    /// Where route and visitor documents are kept
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value_t = StoreBackend::File)]
    pub store: StoreBackend,

    /// Directory holding api.json and logs.json (file backend)
    #[arg(long, env = "DATA_DIR", default_value = "db")]
    pub data_dir: PathBuf,

    /// Redis connection URL (redis backend)
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Key prefix for Redis collections
    #[arg(long, env = "REDIS_PREFIX", default_value = "gateway")]
    pub redis_prefix: String,

    /// Take the client IP from X-Forwarded-For / X-Real-IP
    #[arg(long, env = "TRUST_FORWARDED_HEADERS")]
    pub trust_forwarded_headers: bool,

    /// Drop visitor records idle for this long (e.g. "1h"); unset keeps them forever
    #[arg(long, env = "VISITOR_TTL", value_parser = humantime::parse_duration)]
    pub visitor_ttl: Option<Duration>,

    /// How often the visitor sweep runs
    #[arg(long, env = "SWEEP_INTERVAL", value_parser = humantime::parse_duration, default_value = "5m")]
    pub sweep_interval: Duration,

    /// Delete all stored route records before plugins register
    #[arg(long)]
    pub reset_routes: bool,

    /// Log level for this crate when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from command-line arguments and environment variables
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn open_stores(&self) -> StoreResult<Stores> {
        let stores = match self.store {
            StoreBackend::Memory => Stores::in_memory(),
            StoreBackend::File => Stores::new(
                Arc::new(JsonFileStore::open(self.data_dir.join(API_DB_FILE))?),
                Arc::new(JsonFileStore::open(self.data_dir.join(LOGS_DB_FILE))?),
            ),
            StoreBackend::Redis => {
                let redis = Arc::new(RedisStore::open(&self.redis_url, self.redis_prefix.clone())?);
                Stores::new(redis.clone(), redis)
            }
        };
        Ok(stores)
    }
}
