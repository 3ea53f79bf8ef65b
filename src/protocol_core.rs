//! Shared protocol logic for both the client and the server side
//!
//! Message/reply codec, frame header handling and the path rules the server
//! applies to requested file names.

use crate::error::{Error, Result};
use crate::protocol::{Message, Reply, FRAME_HEADER_LEN, MAX_FRAME_SIZE};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

// Fixed-width little-endian integers, u32 variant tags, u64 length prefixes.
// Trailing bytes after a message are a framing bug and get rejected.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_SIZE as u64)
        .with_little_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = codec().serialize(value)?;
    validate_frame_size(payload.len())?;
    Ok(payload)
}

fn decode_value<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    validate_frame_size(payload.len())?;
    if payload.is_empty() {
        return Err(Error::protocol("empty payload"));
    }
    Ok(codec().deserialize(payload)?)
}

/// Encode a request into a frame payload (no length prefix).
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    encode_value(message)
}

pub fn decode(payload: &[u8]) -> Result<Message> {
    decode_value(payload)
}

pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>> {
    encode_value(reply)
}

pub fn decode_reply(payload: &[u8]) -> Result<Reply> {
    decode_value(payload)
}

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(Error::protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Build frame header (4 bytes)
/// Format: LENGTH (u32 little-endian)
pub fn build_frame_header(payload_len: u32) -> [u8; FRAME_HEADER_LEN] {
    payload_len.to_le_bytes()
}

/// Parse frame header, returning the validated payload length
pub fn parse_frame_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<usize> {
    let len = u32::from_le_bytes(*header) as usize;
    validate_frame_size(len)?;
    Ok(len)
}

/// Header and payload in one buffer, ready for a single write.
pub fn frame_bytes(payload: &[u8]) -> Result<Vec<u8>> {
    validate_frame_size(payload.len())?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&build_frame_header(payload.len() as u32));
    out.extend_from_slice(payload);
    Ok(out)
}

/// Resolve a requested file name to a path safely under `root`.
/// Rejects:
/// 1. Empty names and names containing NUL bytes
/// 2. Absolute paths, parent directory components and root/prefix components
/// 3. On Windows, ':' in path components (ADS defense)
/// 4. Paths that escape the root through symlinks
///
/// `root` must already exist.
pub fn normalize_under_root(root: &Path, name: &str) -> Result<PathBuf> {
    let safe = validate_name(name)?;
    let canon_root = root.canonicalize().map_err(Error::io("canonicalize root"))?;
    let joined = canon_root.join(&safe);

    // Existing paths resolve symlinks fully; new files resolve their parent
    let final_path = if joined.exists() {
        joined.canonicalize().map_err(Error::io("canonicalize"))?
    } else {
        match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(file_name)) if parent.exists() => parent
                .canonicalize()
                .map_err(Error::io("canonicalize"))?
                .join(file_name),
            _ => joined,
        }
    };

    if !final_path.starts_with(&canon_root) {
        return Err(Error::protocol(format!("file name {:?} escapes root", name)));
    }
    Ok(final_path)
}

/// Check a client-supplied name without touching the filesystem and return
/// it as a relative path.
pub fn validate_name(name: &str) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if name.contains('\0') {
        return Err(Error::protocol("file name contains NUL byte"));
    }

    let mut safe = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            CurDir => {}
            Normal(s) => {
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err(Error::protocol("file name component contains colon"));
                }
                safe.push(s);
            }
            ParentDir | RootDir | Prefix(_) => {
                return Err(Error::protocol(format!(
                    "file name contains disallowed component: {:?}",
                    component
                )));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err(Error::protocol("empty file name"));
    }
    Ok(safe)
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(Error::io("create root directory"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OpenMode, SeekOrigin};
    use std::fs;
    use tempfile::TempDir;

    fn all_messages() -> Vec<Message> {
        vec![
            Message::Open { name: "a.txt".into(), mode: OpenMode::Create },
            Message::Open { name: String::new(), mode: OpenMode::Append },
            Message::Read { offset: 0, count: 0 },
            Message::Read { offset: -1, count: i32::MAX },
            Message::Write { offset: 0, count: 0, buffer: Vec::new() },
            Message::Write { offset: 2, count: 3, buffer: vec![9, 8, 7, 6, 5] },
            Message::Write { offset: i32::MAX, count: i32::MAX, buffer: vec![1] },
            Message::Write { offset: i32::MIN, count: i32::MIN, buffer: Vec::new() },
            Message::Seek { offset: i64::MAX, origin: SeekOrigin::Begin },
            Message::Seek { offset: i64::MIN, origin: SeekOrigin::Current },
            Message::Seek { offset: -1, origin: SeekOrigin::End },
            Message::Seek { offset: 0, origin: SeekOrigin::Current },
            Message::Flush,
            Message::SetPosition { position: 0 },
            Message::SetPosition { position: i64::MIN },
            Message::GetPosition,
            Message::SetLength { length: i64::MAX },
            Message::GetLength,
            Message::Close,
        ]
    }

    #[test]
    fn test_message_round_trip() {
        for m in all_messages() {
            let payload = encode(&m).unwrap();
            assert_eq!(decode(&payload).unwrap(), m);
        }
    }

    #[test]
    fn test_reply_round_trip() {
        let replies = vec![
            Reply::Read { count: 0, buffer: Vec::new() },
            Reply::Read { count: 3, buffer: vec![1, 2, 3] },
            Reply::Read { count: i32::MAX, buffer: vec![7] },
            Reply::Read { count: i32::MIN, buffer: Vec::new() },
            Reply::Position(-1),
            Reply::Position(i64::MAX),
            Reply::Length(0),
            Reply::Length(i64::MAX),
            Reply::Position(i64::MIN),
        ];
        for r in replies {
            let payload = encode_reply(&r).unwrap();
            assert_eq!(decode_reply(&payload).unwrap(), r);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        for m in all_messages() {
            assert_eq!(encode(&m).unwrap(), encode(&m).unwrap());
        }
    }

    #[test]
    fn test_fixed_width_layout() {
        // tag u32 | offset i32 | count i32
        let payload = encode(&Message::Read { offset: -1, count: 7 }).unwrap();
        assert_eq!(payload.len(), 12);
        assert_eq!(&payload[0..4], &1u32.to_le_bytes());
        assert_eq!(&payload[4..8], &(-1i32).to_le_bytes());
        assert_eq!(&payload[8..12], &7i32.to_le_bytes());

        // tag u32 | position i64
        let payload = encode(&Message::SetPosition { position: 1 }).unwrap();
        assert_eq!(payload.len(), 12);
        assert_eq!(&payload[4..12], &1i64.to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let payload = encode(&Message::Write { offset: 0, count: 4, buffer: vec![1, 2, 3, 4] }).unwrap();
        for cut in 0..payload.len() {
            let err = decode(&payload[..cut]).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "cut {} gave {:?}", cut, err);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_variant() {
        let payload = 99u32.to_le_bytes();
        assert!(matches!(decode(&payload), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut payload = encode(&Message::Flush).unwrap();
        payload.push(0);
        assert!(matches!(decode(&payload), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8_name() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes()); // Open
        payload.extend_from_slice(&2u64.to_le_bytes());
        payload.extend_from_slice(&[0xff, 0xfe]);
        payload.extend_from_slice(&0u32.to_le_bytes()); // Create
        assert!(matches!(decode(&payload), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_rejects_huge_declared_length() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes()); // Write
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode(&payload), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_frame_header_round_trip() {
        let header = build_frame_header(12345);
        assert_eq!(parse_frame_header(&header).unwrap(), 12345);
    }

    #[test]
    fn test_parse_frame_header_rejects_oversize() {
        let header = build_frame_header((MAX_FRAME_SIZE + 1) as u32);
        assert!(parse_frame_header(&header).is_err());
    }

    #[test]
    fn test_validate_frame_size_edge_cases() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE + 1).is_err());
        assert!(validate_frame_size(usize::MAX).is_err());
    }

    #[test]
    fn test_frame_bytes_prefixes_length() {
        let payload = encode(&Message::Close).unwrap();
        let frame = frame_bytes(&payload).unwrap();
        assert_eq!(&frame[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&frame[4..], &payload[..]);
    }

    #[test]
    fn test_normalize_under_root_safe_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("subdir")).unwrap();

        let result = normalize_under_root(root, "subdir/file.txt").unwrap();
        assert!(result.starts_with(root.canonicalize().unwrap()));
        assert!(result.ends_with("subdir/file.txt"));

        let result = normalize_under_root(root, "./subdir/./file.txt").unwrap();
        assert!(result.ends_with("subdir/file.txt"));
    }

    #[test]
    fn test_normalize_under_root_unsafe_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        assert!(normalize_under_root(root, "../etc/passwd").is_err());
        assert!(normalize_under_root(root, "subdir/../../etc/passwd").is_err());
        assert!(normalize_under_root(root, "/etc/passwd").is_err());
        assert!(normalize_under_root(root, "file\0.txt").is_err());
        assert!(normalize_under_root(root, "").is_err());
        assert!(normalize_under_root(root, ".").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(normalize_under_root(root, "link/file.txt").is_err());
    }

    #[test]
    fn test_ensure_dir_exists() {
        let temp_dir = TempDir::new().unwrap();
        let new_dir = temp_dir.path().join("new").join("nested");

        ensure_dir_exists(&new_dir).unwrap();
        assert!(new_dir.is_dir());

        // Should be idempotent
        ensure_dir_exists(&new_dir).unwrap();
    }
}
