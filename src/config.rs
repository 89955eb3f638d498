use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use crate::tls::{self, TlsPaths};

/// Server settings, read from `PETSCHED_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsPaths>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "petsched".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Unparseable numbers fall back to the default rather than failing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            port: parse_or(lookup("PETSCHED_PORT"), defaults.port),
            bind: lookup("PETSCHED_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("PETSCHED_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("PETSCHED_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(lookup("PETSCHED_MAX_CONNECTIONS"), defaults.max_connections),
            compact_threshold: parse_or(lookup("PETSCHED_COMPACT_THRESHOLD"), defaults.compact_threshold),
            metrics_port: lookup("PETSCHED_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls: TlsPaths::from_pair(lookup(tls::CERT_ENV), lookup(tls::KEY_ENV))?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
