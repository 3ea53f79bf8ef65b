//! rfile - copy data to and from files served by rfiled

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use rfile::cli::{init_tracing, ClientCommand, ClientOpts};
use rfile::url::{parse_remote_url, RemoteFileUrl};
use rfile::{OpenMode, RemoteStream};

// One Read/Write frame per buffer fill instead of one per 8KB io::copy step
const COPY_BUF: usize = 1024 * 1024;

fn main() -> Result<()> {
    init_tracing();
    let opts = ClientOpts::parse();
    match opts.command {
        ClientCommand::Put { local, remote, mode } => put(&local, &remote, mode.into()),
        ClientCommand::Get { remote, local } => get(&remote, &local),
        ClientCommand::Len { remote } => {
            let mut stream = open(&remote, OpenMode::Open)?;
            println!("{}", stream.len()?);
            stream.close()?;
            Ok(())
        }
        ClientCommand::Truncate { remote, length } => {
            let mut stream = open(&remote, OpenMode::Open)?;
            stream.set_len(length)?;
            stream.close()?;
            Ok(())
        }
    }
}

fn target(url: &str) -> Result<RemoteFileUrl> {
    parse_remote_url(url).with_context(|| format!("not an rfile:// URL: {}", url))
}

fn open(url: &str, mode: OpenMode) -> Result<RemoteStream> {
    let t = target(url)?;
    RemoteStream::open(&t.host, t.port, &t.name, mode)
        .with_context(|| format!("open {} on {}:{}", t.name, t.host, t.port))
}

fn put(local: &Path, url: &str, mode: OpenMode) -> Result<()> {
    let mut src = File::open(local).with_context(|| format!("open {}", local.display()))?;
    let stream = open(url, mode)?;

    let mut writer = BufWriter::with_capacity(COPY_BUF, stream);
    let bytes = io::copy(&mut src, &mut writer).context("copy to remote")?;
    let mut stream = writer.into_inner().map_err(|e| e.into_error())?;
    stream.flush()?;
    stream.close().context("close remote file")?;

    println!("{} bytes -> {}", bytes, url);
    Ok(())
}

fn get(url: &str, local: &Path) -> Result<()> {
    let stream = open(url, OpenMode::Open)?;
    let mut dst = File::create(local).with_context(|| format!("create {}", local.display()))?;

    let mut reader = BufReader::with_capacity(COPY_BUF, stream);
    let bytes = io::copy(&mut reader, &mut dst).context("copy from remote")?;
    reader.into_inner().close().context("close remote file")?;
    dst.flush()?;

    println!("{} bytes <- {}", bytes, url);
    Ok(())
}
