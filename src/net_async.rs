//! Async (Tokio) transport for the rfile daemon and client.
//!
//! `server` holds the frame I/O helpers, the per-connection `FileSession`
//! and the accept loop. `client` holds `RemoteFile`, the request/reply stub
//! that drives one session from the calling side.

use crate::error::{Error, Result};
use crate::protocol::{Message, Reply};
use crate::protocol_core;
use std::io;

pub mod server {
    use super::*;
    use crate::config::ServerConfig;
    use crate::logger::{Logger, NoopLogger, TextLogger};
    use crate::protocol::{OpenMode, SeekOrigin, FRAME_HEADER_LEN, MAX_CHUNK};
    use anyhow::Context;
    use std::future::Future;
    use std::io::SeekFrom;
    use std::net::SocketAddr;
    use std::ops::Range;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::fs::{File, OpenOptions};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::watch;
    use tokio::time::{sleep, Duration};
    use tracing::{debug, info, warn};
    use uuid::Uuid;

    /// Read one frame payload. `Ok(None)` means the peer closed the
    /// connection cleanly between frames.
    pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Vec<u8>>>
    where
        S: AsyncRead + Unpin,
    {
        let mut hdr = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < hdr.len() {
            let n = stream
                .read(&mut hdr[filled..])
                .await
                .map_err(Error::Transport)?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside frame header",
                )));
            }
            filled += n;
        }
        let len = protocol_core::parse_frame_header(&hdr)?;
        let mut payload = vec![0u8; len];
        if len > 0 {
            stream
                .read_exact(&mut payload)
                .await
                .map_err(Error::Transport)?;
        }
        Ok(Some(payload))
    }

    pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let frame = protocol_core::frame_bytes(payload)?;
        stream.write_all(&frame).await.map_err(Error::Transport)?;
        stream.flush().await.map_err(Error::Transport)
    }

    /// Services exactly one connection. Implementations own all session
    /// state; the listener builds a fresh one per accepted connection.
    pub trait SessionHandler: Send + 'static {
        fn serve<S>(self, stream: S) -> impl Future<Output = Result<()>> + Send
        where
            S: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    }

    /// One remote file session backed by the local filesystem under `root`.
    pub struct FileSession {
        id: Uuid,
        root: Arc<PathBuf>,
        logger: Arc<dyn Logger>,
        peer: Option<SocketAddr>,
        file: Option<File>,
        path: Option<PathBuf>,
        closed: bool,
        requests: u64,
    }

    impl FileSession {
        pub fn new(root: Arc<PathBuf>, logger: Arc<dyn Logger>) -> Self {
            Self {
                id: Uuid::new_v4(),
                root,
                logger,
                peer: None,
                file: None,
                path: None,
                closed: false,
                requests: 0,
            }
        }

        pub fn with_peer(mut self, peer: SocketAddr) -> Self {
            self.peer = Some(peer);
            self
        }

        pub fn id(&self) -> Uuid {
            self.id
        }

        async fn run<S>(mut self, mut stream: S) -> Result<()>
        where
            S: AsyncRead + AsyncWrite + Unpin + Send,
        {
            let started = Instant::now();
            if let Some(peer) = self.peer {
                self.logger.connect(self.id, peer);
            }

            let outcome = self.process(&mut stream).await;
            // Release the handle on every exit path before the socket goes away
            let released = self.release().await;
            let _ = stream.shutdown().await;
            let outcome = outcome.and(released);

            match &outcome {
                Ok(()) => info!(
                    session = %self.id,
                    requests = self.requests,
                    graceful = self.closed,
                    "session ended"
                ),
                Err(e) => {
                    warn!(session = %self.id, requests = self.requests, error = %e, "session terminated");
                    self.logger.fault(self.id, &e.to_string());
                }
            }
            self.logger
                .close(self.id, self.requests, started.elapsed().as_secs_f64());
            outcome
        }

        async fn process<S>(&mut self, stream: &mut S) -> Result<()>
        where
            S: AsyncRead + AsyncWrite + Unpin,
        {
            while !self.closed {
                let payload = match read_frame(stream).await? {
                    Some(p) => p,
                    None => {
                        debug!(session = %self.id, "peer disconnected without close");
                        return Ok(());
                    }
                };
                let message = protocol_core::decode(&payload)?;
                self.requests += 1;
                debug!(session = %self.id, op = message.name(), "request");

                let expects_reply = message.expects_reply();
                let reply = self.apply(message).await?;
                debug_assert_eq!(reply.is_some(), expects_reply);
                if let Some(reply) = reply {
                    let payload = protocol_core::encode_reply(&reply)?;
                    write_frame(stream, &payload).await?;
                }
            }
            Ok(())
        }

        fn file_mut(&mut self) -> Result<&mut File> {
            self.file.as_mut().ok_or(Error::NotOpen)
        }

        /// Apply one request to the session's file.
        pub(crate) async fn apply(&mut self, message: Message) -> Result<Option<Reply>> {
            match message {
                Message::Open { name, mode } => {
                    self.open(&name, mode).await?;
                    Ok(None)
                }
                Message::Close => {
                    self.closed = true;
                    Ok(None)
                }
                Message::Read { offset, count } => {
                    let file = self.file_mut()?;
                    if offset < 0 {
                        return Err(Error::protocol(format!("negative read offset {}", offset)));
                    }
                    let count = usize::try_from(count)
                        .ok()
                        .filter(|&c| c <= MAX_CHUNK)
                        .ok_or_else(|| Error::protocol(format!("invalid read count {}", count)))?;

                    let mut buffer = vec![0u8; count];
                    let mut filled = 0;
                    while filled < count {
                        let n = file
                            .read(&mut buffer[filled..])
                            .await
                            .map_err(Error::io("read"))?;
                        if n == 0 {
                            break;
                        }
                        filled += n;
                    }
                    buffer.truncate(filled);
                    Ok(Some(Reply::Read {
                        count: filled as i32,
                        buffer,
                    }))
                }
                Message::Write {
                    offset,
                    count,
                    buffer,
                } => {
                    let file = self.file_mut()?;
                    let range = write_range(offset, count, buffer.len())?;
                    file.write_all(&buffer[range])
                        .await
                        .map_err(Error::io("write"))?;
                    Ok(None)
                }
                Message::Seek { offset, origin } => {
                    let file = self.file_mut()?;
                    let target = seek_from(offset, origin)?;
                    let pos = file.seek(target).await.map_err(Error::io("seek"))?;
                    Ok(Some(Reply::Position(to_i64(pos)?)))
                }
                Message::Flush => {
                    self.file_mut()?
                        .flush()
                        .await
                        .map_err(Error::io("flush"))?;
                    Ok(None)
                }
                Message::SetPosition { position } => {
                    let file = self.file_mut()?;
                    let target = seek_from(position, SeekOrigin::Begin)?;
                    file.seek(target).await.map_err(Error::io("set_position"))?;
                    Ok(None)
                }
                Message::GetPosition => {
                    let file = self.file_mut()?;
                    let pos = file
                        .stream_position()
                        .await
                        .map_err(Error::io("get_position"))?;
                    Ok(Some(Reply::Position(to_i64(pos)?)))
                }
                Message::SetLength { length } => {
                    let file = self.file_mut()?;
                    let length = u64::try_from(length).map_err(|_| Error::IoFault {
                        op: "set_length",
                        source: io::Error::new(io::ErrorKind::InvalidInput, "negative length"),
                    })?;
                    file.set_len(length).await.map_err(Error::io("set_length"))?;
                    Ok(None)
                }
                Message::GetLength => {
                    let file = self.file_mut()?;
                    // Metadata does not wait for in-flight writes
                    file.flush().await.map_err(Error::io("flush"))?;
                    let meta = file.metadata().await.map_err(Error::io("get_length"))?;
                    Ok(Some(Reply::Length(to_i64(meta.len())?)))
                }
            }
        }

        async fn open(&mut self, name: &str, mode: OpenMode) -> Result<()> {
            if self.file.is_some() {
                return Err(Error::protocol("a file is already open on this session"));
            }
            protocol_core::validate_name(name)?;
            protocol_core::ensure_dir_exists(&self.root)?;
            let path = protocol_core::normalize_under_root(&self.root, name)?;
            let file = open_options(mode)
                .open(&path)
                .await
                .map_err(Error::io("open"))?;

            info!(session = %self.id, path = %path.display(), ?mode, "file opened");
            self.logger.open(self.id, &path, mode);
            self.file = Some(file);
            self.path = Some(path);
            Ok(())
        }

        async fn release(&mut self) -> Result<()> {
            let Some(mut file) = self.file.take() else {
                return Ok(());
            };
            let flushed = file.flush().await.map_err(Error::io("flush"));
            drop(file);
            if let Some(path) = self.path.take() {
                debug!(session = %self.id, path = %path.display(), "file released");
            }
            flushed
        }
    }

    impl SessionHandler for FileSession {
        fn serve<S>(self, stream: S) -> impl Future<Output = Result<()>> + Send
        where
            S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        {
            self.run(stream)
        }
    }

    fn open_options(mode: OpenMode) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(true);
        match mode {
            OpenMode::Create => opts.write(true).create(true).truncate(true),
            OpenMode::CreateNew => opts.write(true).create_new(true),
            OpenMode::Open => opts.write(true),
            OpenMode::OpenOrCreate => opts.write(true).create(true),
            OpenMode::Truncate => opts.write(true).truncate(true),
            OpenMode::Append => opts.append(true).create(true),
        };
        opts
    }

    fn write_range(offset: i32, count: i32, len: usize) -> Result<Range<usize>> {
        let bad = || {
            Error::protocol(format!(
                "write range offset={} count={} outside buffer of {} bytes",
                offset, count, len
            ))
        };
        let start = usize::try_from(offset).map_err(|_| bad())?;
        let count = usize::try_from(count)
            .ok()
            .filter(|&c| c <= MAX_CHUNK)
            .ok_or_else(bad)?;
        let end = start.checked_add(count).filter(|&e| e <= len).ok_or_else(bad)?;
        Ok(start..end)
    }

    fn seek_from(offset: i64, origin: SeekOrigin) -> Result<SeekFrom> {
        Ok(match origin {
            SeekOrigin::Begin => SeekFrom::Start(u64::try_from(offset).map_err(|_| {
                Error::IoFault {
                    op: "seek",
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "position before the beginning of the file",
                    ),
                }
            })?),
            SeekOrigin::Current => SeekFrom::Current(offset),
            SeekOrigin::End => SeekFrom::End(offset),
        })
    }

    fn to_i64(value: u64) -> Result<i64> {
        i64::try_from(value).map_err(|_| Error::protocol(format!("{} does not fit in i64", value)))
    }

    /// Cancels the accept loop. Running sessions are not affected.
    pub struct StopHandle {
        tx: watch::Sender<bool>,
    }

    impl StopHandle {
        pub fn stop(&self) {
            self.tx.send_replace(true);
        }
    }

    #[derive(Clone)]
    pub struct StopSignal {
        rx: watch::Receiver<bool>,
    }

    impl StopSignal {
        pub fn is_stopped(&self) -> bool {
            *self.rx.borrow()
        }

        /// Resolves once `stop` has been called. Never resolves if the
        /// handle is dropped without stopping.
        pub async fn stopped(&mut self) {
            loop {
                if *self.rx.borrow_and_update() {
                    return;
                }
                if self.rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    pub fn stop_channel() -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (StopHandle { tx }, StopSignal { rx })
    }

    pub struct Listener {
        inner: TcpListener,
    }

    impl Listener {
        pub async fn bind(addr: &str) -> anyhow::Result<Self> {
            let inner = TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {}", addr))?;
            Ok(Self { inner })
        }

        pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
            self.inner.local_addr().context("listener local address")
        }

        /// Accept connections until `stop` fires, running `factory(peer)`
        /// as an independent task for each one.
        pub async fn run<F, H>(self, factory: F, mut stop: StopSignal) -> anyhow::Result<()>
        where
            F: Fn(SocketAddr) -> H,
            H: SessionHandler,
        {
            info!(addr = %self.local_addr()?, "listening");
            loop {
                if stop.is_stopped() {
                    break;
                }
                let accepted = tokio::select! {
                    _ = stop.stopped() => break,
                    res = self.inner.accept() => res,
                };
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                debug!(%peer, "connection accepted");

                let handler = factory(peer);
                tokio::spawn(async move {
                    if let Err(e) = handler.serve(stream).await {
                        debug!(%peer, error = %e, "connection closed with error");
                    }
                });
            }
            info!("listener stopped");
            Ok(())
        }
    }

    /// Bind per `config` and serve files under its root until `stop` fires.
    pub async fn serve(config: &ServerConfig, stop: StopSignal) -> anyhow::Result<()> {
        let logger: Arc<dyn Logger> = match &config.log_file {
            Some(path) => Arc::new(
                TextLogger::new(path)
                    .with_context(|| format!("open session log {}", path.display()))?,
            ),
            None => Arc::new(NoopLogger),
        };
        let listener = Listener::bind(&config.bind_addr()).await?;
        info!(root = %config.root.display(), "serving files");

        let root = Arc::new(config.root.clone());
        listener
            .run(
                move |peer| FileSession::new(root.clone(), logger.clone()).with_peer(peer),
                stop,
            )
            .await
    }

}

pub mod client {
    use super::server::{read_frame, write_frame};
    use super::*;
    use crate::protocol::{OpenMode, SeekOrigin, MAX_CHUNK};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};

    use crate::protocol::timeouts::CONNECT_MS;

    pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let stream = match timeout(Duration::from_millis(CONNECT_MS), TcpStream::connect(&addr)).await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(Error::Transport(e)),
            Err(_) => {
                return Err(Error::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect {} timed out ({} ms)", addr, CONNECT_MS),
                )))
            }
        };
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum State {
        /// Transport up, no file opened yet.
        Connected,
        Open,
        Closed,
        /// A call failed; every later call fails with `Error::Faulted`.
        Faulted,
    }

    /// Client side of one remote file session.
    ///
    /// Every call completes its round trip before returning, so at most one
    /// request is ever outstanding. Requests without a result (open, write,
    /// flush, set_position, set_length) return once the frame is sent; a
    /// server-side failure on them shows up on the next call as a transport
    /// fault.
    pub struct RemoteFile<S = TcpStream> {
        stream: Option<S>,
        state: State,
    }

    impl RemoteFile<TcpStream> {
        pub async fn connect(host: &str, port: u16) -> Result<Self> {
            Ok(Self::from_stream(connect(host, port).await?))
        }
    }

    impl<S> RemoteFile<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        pub fn from_stream(stream: S) -> Self {
            Self {
                stream: Some(stream),
                state: State::Connected,
            }
        }

        pub fn state(&self) -> State {
            self.state
        }

        pub fn is_open(&self) -> bool {
            self.state == State::Open
        }

        fn check_open(&self) -> Result<()> {
            match self.state {
                State::Open => Ok(()),
                State::Connected => Err(Error::NotOpen),
                State::Closed => Err(Error::SessionClosed),
                State::Faulted => Err(Error::Faulted),
            }
        }

        fn fault<T>(&mut self, result: Result<T>) -> Result<T> {
            if result.is_err() {
                self.state = State::Faulted;
                // Dropping the socket lets the server release its file
                self.stream = None;
            }
            result
        }

        async fn send_inner(&mut self, message: &Message) -> Result<()> {
            let stream = self.stream.as_mut().ok_or(Error::Faulted)?;
            let payload = protocol_core::encode(message)?;
            write_frame(stream, &payload).await
        }

        /// Send a request that has no reply.
        async fn post(&mut self, message: &Message) -> Result<()> {
            let result = self.send_inner(message).await;
            self.fault(result)
        }

        async fn round_trip(&mut self, message: &Message) -> Result<Reply> {
            self.send_inner(message).await?;
            let stream = self.stream.as_mut().ok_or(Error::Faulted)?;
            match read_frame(stream).await? {
                Some(payload) => protocol_core::decode_reply(&payload),
                None => Err(Error::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                ))),
            }
        }

        /// Send a request and wait for its reply.
        async fn request(&mut self, message: &Message) -> Result<Reply> {
            let result = self.round_trip(message).await;
            self.fault(result)
        }

        fn unexpected<T>(&mut self, op: &str, reply: &Reply) -> Result<T> {
            let kind = match reply {
                Reply::Read { .. } => "read",
                Reply::Position(_) => "position",
                Reply::Length(_) => "length",
            };
            self.fault(Err(Error::protocol(format!(
                "unexpected {} reply to {}",
                kind, op
            ))))
        }

        pub async fn open(&mut self, name: &str, mode: OpenMode) -> Result<()> {
            match self.state {
                State::Connected => {}
                State::Open => {
                    return Err(Error::protocol("a file is already open on this session"))
                }
                State::Closed => return Err(Error::SessionClosed),
                State::Faulted => return Err(Error::Faulted),
            }
            self.post(&Message::Open {
                name: name.to_string(),
                mode,
            })
            .await?;
            self.state = State::Open;
            Ok(())
        }

        async fn read_request(&mut self, offset: i32, count: usize) -> Result<Vec<u8>> {
            let count = count.min(MAX_CHUNK);
            let reply = self
                .request(&Message::Read {
                    offset,
                    count: count as i32,
                })
                .await?;
            match reply {
                Reply::Read { count: n, buffer }
                    if usize::try_from(n).map_or(false, |n| n == buffer.len())
                        && buffer.len() <= count =>
                {
                    Ok(buffer)
                }
                other => self.unexpected("read", &other),
            }
        }

        /// Read up to `count` bytes from the current position. An empty
        /// vector means end of file. Counts above `MAX_CHUNK` are capped.
        pub async fn read_chunk(&mut self, count: usize) -> Result<Vec<u8>> {
            self.check_open()?;
            self.read_request(0, count).await
        }

        /// Read up to `count` bytes into `buf[offset..]`, returning how many
        /// bytes arrived.
        pub async fn read_into(&mut self, buf: &mut [u8], offset: usize, count: usize) -> Result<usize> {
            self.check_open()?;
            let end = offset
                .checked_add(count)
                .filter(|&e| e <= buf.len())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "offset {} + count {} exceeds buffer of {} bytes",
                        offset,
                        count,
                        buf.len()
                    ))
                })?;
            let wire_offset = i32::try_from(offset).map_err(|_| {
                Error::InvalidArgument(format!("offset {} does not fit in i32", offset))
            })?;

            let data = self.read_request(wire_offset, end - offset).await?;
            buf[offset..offset + data.len()].copy_from_slice(&data);
            Ok(data.len())
        }

        pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let len = buf.len();
            self.read_into(buf, 0, len).await
        }

        /// Write `buf[offset..offset + count]` at the current position.
        /// Large ranges are split into `MAX_CHUNK` frames.
        pub async fn write_from(&mut self, buf: &[u8], offset: usize, count: usize) -> Result<()> {
            self.check_open()?;
            let end = offset
                .checked_add(count)
                .filter(|&e| e <= buf.len())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "offset {} + count {} exceeds buffer of {} bytes",
                        offset,
                        count,
                        buf.len()
                    ))
                })?;
            let data = &buf[offset..end];
            if data.is_empty() {
                return self
                    .post(&Message::Write {
                        offset: 0,
                        count: 0,
                        buffer: Vec::new(),
                    })
                    .await;
            }
            for chunk in data.chunks(MAX_CHUNK) {
                self.post(&Message::Write {
                    offset: 0,
                    count: chunk.len() as i32,
                    buffer: chunk.to_vec(),
                })
                .await?;
            }
            Ok(())
        }

        pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
            self.write_from(buf, 0, buf.len()).await
        }

        /// Move the remote position; returns the new absolute position.
        pub async fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<i64> {
            self.check_open()?;
            match self.request(&Message::Seek { offset, origin }).await? {
                Reply::Position(p) => Ok(p),
                other => self.unexpected("seek", &other),
            }
        }

        pub async fn flush(&mut self) -> Result<()> {
            self.check_open()?;
            self.post(&Message::Flush).await
        }

        pub async fn set_position(&mut self, position: i64) -> Result<()> {
            self.check_open()?;
            if position < 0 {
                return Err(Error::InvalidArgument(format!("negative position {}", position)));
            }
            self.post(&Message::SetPosition { position }).await
        }

        pub async fn position(&mut self) -> Result<i64> {
            self.check_open()?;
            match self.request(&Message::GetPosition).await? {
                Reply::Position(p) => Ok(p),
                other => self.unexpected("get_position", &other),
            }
        }

        pub async fn set_length(&mut self, length: i64) -> Result<()> {
            self.check_open()?;
            if length < 0 {
                return Err(Error::InvalidArgument(format!("negative length {}", length)));
            }
            self.post(&Message::SetLength { length }).await
        }

        pub async fn length(&mut self) -> Result<i64> {
            self.check_open()?;
            match self.request(&Message::GetLength).await? {
                Reply::Length(l) => Ok(l),
                other => self.unexpected("get_length", &other),
            }
        }

        /// Send Close and wait for the server to hang up, so every earlier
        /// write has been applied when this returns. Closing twice is a no-op.
        ///
        /// An open session first does one round trip: a rejected request
        /// without a reply only shows up as the server hanging up, and that
        /// must surface here as a fault rather than a clean close.
        pub async fn close(&mut self) -> Result<()> {
            match self.state {
                State::Connected => {}
                State::Open => {
                    self.position().await?;
                }
                State::Closed => return Ok(()),
                State::Faulted => return Err(Error::Faulted),
            }
            let result = self.send_close().await;
            self.state = match result {
                Ok(()) => State::Closed,
                Err(_) => State::Faulted,
            };
            result
        }

        async fn send_close(&mut self) -> Result<()> {
            let mut stream = self.stream.take().ok_or(Error::Faulted)?;
            let payload = protocol_core::encode(&Message::Close)?;
            write_frame(&mut stream, &payload).await?;

            let mut byte = [0u8; 1];
            match stream.read(&mut byte).await {
                Ok(0) => {}
                Ok(_) => return Err(Error::protocol("server sent data after close")),
                Err(e) => return Err(Error::Transport(e)),
            }
            let _ = stream.shutdown().await;
            Ok(())
        }
    }

}
