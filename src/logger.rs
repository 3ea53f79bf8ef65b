//! Session journal: one line per session event, independent of `tracing`.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use uuid::Uuid;

use crate::protocol::OpenMode;

pub trait Logger: Send + Sync {
    fn connect(&self, _session: Uuid, _peer: SocketAddr) {}
    fn open(&self, _session: Uuid, _path: &Path, _mode: OpenMode) {}
    fn fault(&self, _session: Uuid, _msg: &str) {}
    fn close(&self, _session: Uuid, _requests: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn connect(&self, session: Uuid, peer: SocketAddr) {
        self.line(&format!("CONNECT session={} peer={}", session, peer));
    }
    fn open(&self, session: Uuid, path: &Path, mode: OpenMode) {
        self.line(&format!(
            "OPEN session={} path={} mode={:?}",
            session,
            path.display(),
            mode
        ));
    }
    fn fault(&self, session: Uuid, msg: &str) {
        self.line(&format!("FAULT session={} msg={}", session, msg));
    }
    fn close(&self, session: Uuid, requests: u64, seconds: f64) {
        self.line(&format!(
            "CLOSE session={session} requests={requests} seconds={seconds:.3}"
        ));
    }
}
