//! rfile library
//!
//! Remote seekable file streams: one TCP connection per open file, one
//! synchronous request/reply exchange per stream operation.

pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod net_async;
pub mod protocol;
pub mod protocol_core;
pub mod stream;
pub mod url;

pub use error::{Error, Result};
pub use net_async::client::RemoteFile;
pub use protocol::{Message, OpenMode, Reply, SeekOrigin};
pub use stream::RemoteStream;
