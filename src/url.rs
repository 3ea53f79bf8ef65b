//! URL parsing for rfile:// remote file names

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileUrl {
    pub host: String,
    pub port: u16,
    /// File name relative to the server root
    pub name: String,
}

pub fn parse_remote_url(s: &str) -> Option<RemoteFileUrl> {
    let s_trim = s.trim();
    let lower = s_trim.to_ascii_lowercase();
    let scheme_end = lower.find(':')?;
    if &lower[..=scheme_end] != "rfile:" {
        return None;
    }
    let mut rest = &s_trim[scheme_end + 1..];
    if let Some(r) = rest.strip_prefix("//") {
        rest = r;
    }
    let (hp, name) = rest.split_once('/')?;
    if hp.is_empty() || name.is_empty() {
        return None;
    }
    let (host, port) = match hp.split_once(':') {
        Some((h, pr)) => (h.to_string(), pr.parse().ok()?),
        None => (hp.to_string(), DEFAULT_PORT),
    };
    Some(RemoteFileUrl {
        host,
        port,
        name: name.to_string(),
    })
}
