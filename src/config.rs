//! Daemon configuration, loadable from a TOML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind (IPv4, IPv6 or host name)
    pub address: String,
    pub port: u16,
    /// Directory every opened file name is resolved under; created on first open
    pub root: PathBuf,
    /// Optional session journal
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        toml::from_str(data).context("parse server config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("in {}", path.display()))
    }

    /// `address:port`, bracketing bare IPv6 literals.
    pub fn bind_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}
