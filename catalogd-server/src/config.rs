//! Layered configuration: a `--config <path>` YAML file plus a handful of
//! deploy-time environment overrides, in the shape §10.2 of the design
//! describes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "catalogd-server")]
#[command(about = "Index-and-query service for a remote container registry")]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    pub config: PathBuf,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "CATALOGD_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Overrides `database.postgres.url`.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Overrides `registry.url`.
    #[arg(long, env = "CATALOGD_REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// Overrides `events.token`.
    #[arg(long, env = "CATALOGD_EVENTS_TOKEN")]
    pub events_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config file not found: {path}")]
    Missing { path: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub url: String,
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventsConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub postgres: PostgresConfig,
}

fn default_index_max_age_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_index_max_age_seconds")]
    pub index_max_age_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_max_age_seconds: default_index_max_age_seconds(),
        }
    }
}

fn default_fetch_all_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_garbage_collect_interval() -> Duration {
    Duration::from_secs(24 * 3600)
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntervalConfig {
    #[serde(with = "humantime_serde", default = "default_fetch_all_interval")]
    pub fetch_all: Duration,
    #[serde(
        with = "humantime_serde",
        default = "default_garbage_collect_interval"
    )]
    pub garbage_collect: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            fetch_all: default_fetch_all_interval(),
            garbage_collect: default_garbage_collect_interval(),
        }
    }
}

/// The YAML file's top-level shape (§10.2).
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub interval: IntervalConfig,
}

/// Fully resolved configuration: the YAML file with CLI/env overrides
/// applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub registry_url: String,
    pub registry_public_url: String,
    pub events_token: Option<String>,
    pub database_url: String,
    pub index_max_age_seconds: u64,
    pub fetch_all_interval: Duration,
    pub garbage_collect_interval: Duration,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file = read_file_config(&args.config)?;

        let registry_url = args
            .registry_url
            .clone()
            .unwrap_or(file.registry.url.clone());
        let registry_public_url = file
            .registry
            .public_url
            .clone()
            .unwrap_or_else(|| registry_url.clone());
        let database_url = args
            .database_url
            .clone()
            .unwrap_or(file.database.postgres.url.clone());
        let events_token = args.events_token.clone().or(file.events.token.clone());

        Ok(Self {
            listen_addr: args.listen_addr.clone(),
            registry_url,
            registry_public_url,
            events_token,
            database_url,
            index_max_age_seconds: file.cache.index_max_age_seconds,
            fetch_all_interval: file.interval.fetch_all,
            garbage_collect_interval: file.interval.garbage_collect,
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
