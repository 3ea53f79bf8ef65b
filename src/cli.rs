//! Shared CLI helpers and small reusable Clap fragments

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::protocol::OpenMode;

/// Daemon options for rfiled; flags override the config file
#[derive(Clone, Debug, Parser)]
#[command(name = "rfiled", version, about = "Serve files under a root directory as remote streams")]
pub struct DaemonOpts {
    /// TOML config file (address, port, root, log_file)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    pub address: Option<String>,

    /// Bind port [default: 11000]
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory to serve [default: .]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Append session events to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl DaemonOpts {
    pub fn server_config(&self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(address) = &self.address {
            cfg.address = address.clone();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(root) = &self.root {
            cfg.root = root.clone();
        }
        if let Some(log_file) = &self.log_file {
            cfg.log_file = Some(log_file.clone());
        }
        Ok(cfg)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    Create,
    CreateNew,
    Open,
    OpenOrCreate,
    Truncate,
    Append,
}

impl From<ModeArg> for OpenMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Create => Self::Create,
            ModeArg::CreateNew => Self::CreateNew,
            ModeArg::Open => Self::Open,
            ModeArg::OpenOrCreate => Self::OpenOrCreate,
            ModeArg::Truncate => Self::Truncate,
            ModeArg::Append => Self::Append,
        }
    }
}

/// Client options for rfile; remote files are rfile://host[:port]/name
#[derive(Clone, Debug, Parser)]
#[command(name = "rfile", version, about = "Read and write files served by rfiled")]
pub struct ClientOpts {
    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Copy a local file to a remote file
    Put {
        local: PathBuf,
        remote: String,
        #[arg(long, value_enum, default_value = "create")]
        mode: ModeArg,
    },
    /// Copy a remote file to a local file
    Get { remote: String, local: PathBuf },
    /// Print the length of a remote file
    Len { remote: String },
    /// Set the length of a remote file
    Truncate { remote: String, length: u64 },
}

/// Install the stderr `tracing` subscriber; RUST_LOG overrides the default filter
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rfile=info,rfiled=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfiled.toml");
        std::fs::write(&path, "address = \"127.0.0.1\"\nport = 9000\n").unwrap();

        let opts = DaemonOpts::try_parse_from([
            "rfiled",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
            "--root",
            "/data",
        ])
        .unwrap();
        let cfg = opts.server_config().unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9100");
        assert_eq!(cfg.root, PathBuf::from("/data"));
    }

    #[test]
    fn test_defaults_without_config() {
        let opts = DaemonOpts::try_parse_from(["rfiled"]).unwrap();
        assert_eq!(opts.server_config().unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_client_put_mode() {
        let opts =
            ClientOpts::try_parse_from(["rfile", "put", "a.txt", "rfile://h/a.txt", "--mode", "append"])
                .unwrap();
        match opts.command {
            ClientCommand::Put { mode, .. } => assert_eq!(OpenMode::from(mode), OpenMode::Append),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
