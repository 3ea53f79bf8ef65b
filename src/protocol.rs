//! Wire types and shared protocol constants for the rfile framed transport

use serde::{Deserialize, Serialize};

// Frame header is a single little-endian u32 payload length
pub const FRAME_HEADER_LEN: usize = 4;

// Maximum frame payload size (64MB) - prevents DoS via memory exhaustion
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Largest data chunk carried by one Read or Write (8MB)
// Keeps every data frame well under MAX_FRAME_SIZE
pub const MAX_CHUNK: usize = 8 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 11000;

pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;
}

/// How the server opens the named file. Every mode opens for read and write.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file, truncating it if it already exists.
    Create,
    /// Create the file; fail if it already exists.
    CreateNew,
    /// Open an existing file.
    Open,
    OpenOrCreate,
    /// Open an existing file and cut it to zero length.
    Truncate,
    /// Open or create; writes always land at the end of the file.
    Append,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Begin,
    Current,
    End,
}

/// One remote file operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Open { name: String, mode: OpenMode },
    /// `offset` is the destination offset in the caller's buffer. The server
    /// only validates it; file reads start at the current position.
    Read { offset: i32, count: i32 },
    /// Writes `buffer[offset..offset + count]` at the current position.
    Write { offset: i32, count: i32, buffer: Vec<u8> },
    Seek { offset: i64, origin: SeekOrigin },
    Flush,
    SetPosition { position: i64 },
    GetPosition,
    SetLength { length: i64 },
    GetLength,
    Close,
}

impl Message {
    /// Whether the server answers this request with a reply frame.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Message::Read { .. } | Message::Seek { .. } | Message::GetPosition | Message::GetLength
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Open { .. } => "open",
            Message::Read { .. } => "read",
            Message::Write { .. } => "write",
            Message::Seek { .. } => "seek",
            Message::Flush => "flush",
            Message::SetPosition { .. } => "set_position",
            Message::GetPosition => "get_position",
            Message::SetLength { .. } => "set_length",
            Message::GetLength => "get_length",
            Message::Close => "close",
        }
    }
}

/// Server answer to the requests that carry a result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `buffer.len() == count`; zero means end of file.
    Read { count: i32, buffer: Vec<u8> },
    /// Answer to Seek and GetPosition.
    Position(i64),
    Length(i64),
}
