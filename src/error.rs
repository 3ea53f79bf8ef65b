//! Error taxonomy shared by the client and the server side of a session.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or truncated frame, unknown variant, unexpected reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A local filesystem call failed on the serving side.
    #[error("{op} failed: {source}")]
    IoFault {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("session is closed")]
    SessionClosed,

    /// Connection reset, broken pipe or EOF in the middle of a frame.
    #[error("transport fault: {0}")]
    Transport(#[source] io::Error),

    #[error("no file has been opened on this session")]
    NotOpen,

    /// An earlier call failed; the connection state is unknown.
    #[error("session faulted by an earlier error")]
    Faulted,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::IoFault { op, source }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(io) => Error::Protocol(format!("truncated payload: {}", io)),
            other => Error::Protocol(other.to_string()),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::Protocol(_) => io::ErrorKind::InvalidData,
            Error::IoFault { source, .. } => source.kind(),
            Error::Transport(source) => source.kind(),
            Error::SessionClosed | Error::NotOpen | Error::Faulted => io::ErrorKind::NotConnected,
            Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let e: io::Error = Error::protocol("bad tag").into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);

        let e: io::Error = Error::SessionClosed.into();
        assert_eq!(e.kind(), io::ErrorKind::NotConnected);

        let e: io::Error =
            Error::Transport(io::Error::new(io::ErrorKind::ConnectionReset, "reset")).into();
        assert_eq!(e.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_io_fault_carries_operation() {
        let e = Error::io("open")(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(e.to_string().starts_with("open failed"));
    }
}
