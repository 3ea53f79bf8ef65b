use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rfile::cli::{init_tracing, DaemonOpts};
use rfile::net_async::server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_tracing();

    let mut config = opts.server_config()?;

    // The root may not exist yet (it is created on first open), but it must not be a file
    if config.root.exists() {
        if !config.root.is_dir() {
            anyhow::bail!("Error: Root path is not a directory: {}", config.root.display());
        }
        config.root = std::fs::canonicalize(&config.root).with_context(|| {
            format!("Failed to canonicalize root path: {}", config.root.display())
        })?;
    }

    println!("Starting rfile daemon:");
    println!("  Root: {}", config.root.display());
    println!("  Bind: {}", config.bind_addr());
    if let Some(log_file) = &config.log_file {
        println!("  Session log: {}", log_file.display());
    }

    if config.address == "0.0.0.0" || config.address == "::" {
        eprintln!("WARNING: Binding to all interfaces exposes the root to the network");
        eprintln!("   This protocol is UNENCRYPTED and UNAUTHENTICATED");
        eprintln!("   Only use on trusted networks (LAN)");
        eprintln!();
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let (handle, signal) = server::stop_channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, no longer accepting connections");
                handle.stop();
            }
        });
        server::serve(&config, signal).await
    })
}
