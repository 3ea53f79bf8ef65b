//! Blocking `std::io` facade over [`RemoteFile`].
//!
//! Each `RemoteStream` drives its connection on a private current-thread
//! runtime, so it must not be used from inside another Tokio runtime.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};

use crate::error::{Error, Result};
use crate::net_async::client::{RemoteFile, State};
use crate::protocol::{OpenMode, SeekOrigin};

pub struct RemoteStream {
    runtime: Runtime,
    file: RemoteFile<TcpStream>,
}

impl RemoteStream {
    /// Connect to a server without opening a file yet.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Transport)?;
        let file = runtime.block_on(RemoteFile::connect(host, port))?;
        Ok(Self { runtime, file })
    }

    /// Connect and open `name` in one step.
    pub fn open(host: &str, port: u16, name: &str, mode: OpenMode) -> Result<Self> {
        let mut stream = Self::connect(host, port)?;
        stream.open_file(name, mode)?;
        Ok(stream)
    }

    pub fn open_file(&mut self, name: &str, mode: OpenMode) -> Result<()> {
        self.runtime.block_on(self.file.open(name, mode))
    }

    pub fn state(&self) -> State {
        self.file.state()
    }

    pub fn len(&mut self) -> Result<u64> {
        let len = self.runtime.block_on(self.file.length())?;
        u64::try_from(len).map_err(|_| Error::protocol(format!("negative length {}", len)))
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        let len = to_wire(len)?;
        self.runtime.block_on(self.file.set_length(len))
    }

    pub fn position(&mut self) -> Result<u64> {
        let pos = self.runtime.block_on(self.file.position())?;
        u64::try_from(pos).map_err(|_| Error::protocol(format!("negative position {}", pos)))
    }

    pub fn set_position(&mut self, pos: u64) -> Result<()> {
        let pos = to_wire(pos)?;
        self.runtime.block_on(self.file.set_position(pos))
    }

    /// Close the remote file and wait for the server to release it.
    pub fn close(mut self) -> Result<()> {
        self.runtime.block_on(self.file.close())
    }
}

fn to_wire(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::InvalidArgument(format!("{} exceeds i64", value)))
}

impl Read for RemoteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.runtime.block_on(self.file.read(buf))?)
    }
}

impl Write for RemoteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.runtime.block_on(self.file.write(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.runtime.block_on(self.file.flush())?)
    }
}

impl Seek for RemoteStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, origin) = match pos {
            SeekFrom::Start(n) => (to_wire(n)?, SeekOrigin::Begin),
            SeekFrom::Current(n) => (n, SeekOrigin::Current),
            SeekFrom::End(n) => (n, SeekOrigin::End),
        };
        let new_pos = self.runtime.block_on(self.file.seek(offset, origin))?;
        u64::try_from(new_pos).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "server returned a negative position")
        })
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        if matches!(self.file.state(), State::Connected | State::Open) {
            let _ = self.runtime.block_on(self.file.close());
        }
    }
}
