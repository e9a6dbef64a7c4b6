//! Async driver that runs a [`Session`] over a tokio transport.
//!
//! The session is shared behind one `parking_lot::Mutex` that is only held
//! for synchronous protocol work, never across an `.await`. A single reader
//! loop feeds received bytes to the session; a single writer loop drains its
//! write queue. Waiters (stream handles, the writer) park on a `Notify`
//! that is signalled after every state change.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{ErrorCode, H2Error, Result};
use crate::handshake::{is_http2_protocol, ProtocolSelectionMonitor};
use crate::hpack::HeaderField;
use crate::session::{Role, Session, SessionEvent, SessionState};
use crate::stream::{HeaderBlock, StreamState};

const READ_BUF_SIZE: usize = 16 * 1024;

/// State shared by the driver and every handle.
struct Shared {
    session: Mutex<Session>,
    notify: Notify,
    cancel: CancellationToken,
    pongs: Mutex<HashMap<[u8; 8], oneshot::Sender<Duration>>>,
    /// Streams with a live [`StreamHandle`].
    handles: Mutex<HashSet<u32>>,
    /// Reset codes of handled streams, until their handle drops.
    resets: Mutex<HashMap<u32, ErrorCode>>,
    /// Peer-opened streams waiting for [`SessionHandle::accept`].
    incoming: Mutex<VecDeque<u32>>,
}

impl Shared {
    /// Run `f` under the session lock, route resulting events and wake waiters.
    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let result = {
            let mut session = self.session.lock();
            let result = f(&mut *session);
            self.route_events(&mut *session);
            result
        };
        self.notify.notify_waiters();
        result
    }

    fn route_events(&self, session: &mut Session) {
        while let Some(event) = session.poll_event() {
            trace!(?event, "session event");
            match event {
                SessionEvent::StreamOpened { stream_id }
                | SessionEvent::PushPromise {
                    promised_id: stream_id,
                    ..
                } => {
                    self.incoming.lock().push_back(stream_id);
                }
                SessionEvent::Pong { payload, rtt } => {
                    if let Some(tx) = self.pongs.lock().remove(&payload) {
                        let _ = tx.send(rtt);
                    }
                }
                SessionEvent::StreamReset {
                    stream_id,
                    error_code,
                    ..
                } => {
                    // Without a handle nobody will ask; forget the stream.
                    if self.handles.lock().contains(&stream_id) {
                        self.resets.lock().insert(stream_id, error_code);
                    } else {
                        self.incoming.lock().retain(|id| *id != stream_id);
                    }
                }
                SessionEvent::Closed { .. } => {
                    self.pongs.lock().clear();
                }
                _ => {}
            }
        }
    }

    /// Park until `poll` yields a value. `poll` runs under the session lock.
    async fn wait_for<T>(&self, mut poll: impl FnMut(&mut Session) -> Option<T>) -> T {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = {
                let mut session = self.session.lock();
                let ready = poll(&mut *session);
                if ready.is_some() {
                    self.route_events(&mut *session);
                }
                ready
            };
            // Only a successful poll may have changed state worth announcing.
            if let Some(value) = ready {
                self.notify.notify_waiters();
                return value;
            }
            notified.await;
        }
    }

    /// Resolves once a draining session has no active streams, or the drain
    /// timeout has elapsed since draining began.
    async fn drained(&self, drain_timeout: Duration) {
        self.wait_for(|s| (s.is_draining() || s.is_closed()).then_some(()))
            .await;
        let done = self.wait_for(|s| (s.is_drained() || s.is_closed()).then_some(()));
        match tokio::time::timeout(drain_timeout, done).await {
            Ok(()) => {
                debug!("all streams drained");
                self.with_session(|s| s.close(ErrorCode::NoError));
            }
            Err(_) => {
                warn!(?drain_timeout, "drain timeout elapsed, closing");
                self.with_session(|s| s.close(ErrorCode::Cancel));
            }
        }
    }

    /// Error seen by a handle whose stream is no longer in the table.
    fn stream_error(&self, session: &Session, stream_id: u32) -> H2Error {
        if let SessionState::Closed(code) = session.state() {
            return H2Error::SessionClosed(code);
        }
        match self.resets.lock().get(&stream_id) {
            Some(code) => H2Error::stream(stream_id, *code, "stream reset"),
            None => H2Error::StreamNotFound(stream_id),
        }
    }

    /// Register a handle for `stream_id`. Call under the session lock so a
    /// reset routed right after is recorded for it.
    fn adopt(self: &Arc<Self>, stream_id: u32) -> StreamHandle {
        self.handles.lock().insert(stream_id);
        StreamHandle {
            id: stream_id,
            shared: Arc::clone(self),
            eof: false,
        }
    }

    fn closed_error(&self) -> H2Error {
        match self.session.lock().state() {
            SessionState::Closed(code) => H2Error::SessionClosed(code),
            _ => H2Error::SessionClosed(ErrorCode::Cancel),
        }
    }
}

/// An HTTP/2 connection over transport `T`, ready to be driven by [`run`].
///
/// [`run`]: Connection::run
pub struct Connection<T> {
    io: T,
    shared: Arc<Shared>,
    drain_timeout: Duration,
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session", &*self.shared.session.lock())
            .finish()
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn client(io: T, config: SessionConfig) -> (SessionHandle, Self) {
        Self::new(Role::Client, io, config)
    }

    pub fn server(io: T, config: SessionConfig) -> (SessionHandle, Self) {
        Self::new(Role::Server, io, config)
    }

    pub fn new(role: Role, io: T, config: SessionConfig) -> (SessionHandle, Self) {
        let drain_timeout = config.drain_timeout;
        let shared = Arc::new(Shared {
            session: Mutex::new(Session::new(role, config)),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            pongs: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashSet::new()),
            resets: Mutex::new(HashMap::new()),
            incoming: Mutex::new(VecDeque::new()),
        });
        let handle = SessionHandle {
            shared: Arc::clone(&shared),
        };
        (
            handle,
            Self {
                io,
                shared,
                drain_timeout,
            },
        )
    }

    /// Build a connection for a negotiated protocol name, refusing anything
    /// that does not select HTTP/2.
    pub fn from_negotiated(
        protocol: &str,
        role: Role,
        io: T,
        config: SessionConfig,
    ) -> Result<(SessionHandle, Self)> {
        if !is_http2_protocol(protocol) {
            return Err(H2Error::UnsupportedProtocol(protocol.to_owned()));
        }
        debug!(protocol, ?role, "starting HTTP/2 connection");
        Ok(Self::new(role, io, config))
    }

    /// Wait (bounded by the handshake timeout) for the monitor to report
    /// the negotiated protocol, then build the connection.
    pub async fn from_monitor(
        monitor: &ProtocolSelectionMonitor,
        role: Role,
        io: T,
        config: SessionConfig,
    ) -> Result<(SessionHandle, Self)> {
        let protocol = monitor.wait_selected(config.handshake_timeout).await?;
        Self::from_negotiated(&protocol, role, io, config)
    }

    /// Drive the connection until the session closes, the transport fails,
    /// or the handle requests shutdown.
    pub async fn run(self) -> Result<()> {
        let Connection {
            io,
            shared,
            drain_timeout,
        } = self;
        let (reader, writer) = tokio::io::split(io);

        let (read, write) = tokio::join!(
            read_loop(&shared, reader, drain_timeout),
            write_loop(&shared, writer),
        );

        shared.with_session(|s| s.close(ErrorCode::Cancel));
        shared.cancel.cancel();
        shared.notify.notify_waiters();
        debug!("connection finished");
        read.and(write)
    }
}

async fn read_loop<R>(shared: &Shared, mut reader: R, drain_timeout: Duration) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
    let drained = shared.drained(drain_timeout);
    tokio::pin!(drained);

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_buf(&mut buf) => read,
            _ = shared.cancel.cancelled() => return Ok(()),
            _ = &mut drained => return Ok(()),
        };

        let n = match read {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "transport read failed");
                shared.with_session(|s| s.close(ErrorCode::InternalError));
                return Err(err.into());
            }
        };
        if n == 0 {
            debug!("peer closed the transport");
            shared.with_session(|s| s.close(ErrorCode::NoError));
            return Ok(());
        }

        trace!(bytes = n, "read from transport");
        // Fatal errors close the session; the writer still flushes GOAWAY.
        shared.with_session(|s| s.recv(&buf[..n]))?;
    }
}

async fn write_loop<W>(shared: &Shared, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let closed = {
            let mut session = shared.session.lock();
            session.poll_output(&mut buf);
            session.is_closed()
        };

        if !buf.is_empty() {
            trace!(bytes = buf.len(), "writing to transport");
            let written = tokio::select! {
                res = write_out(&mut writer, &buf) => res,
                _ = shared.cancel.cancelled() => return Ok(()),
            };
            if let Err(err) = written {
                warn!(error = %err, "transport write failed");
                shared.with_session(|s| s.close(ErrorCode::InternalError));
                return Err(err.into());
            }
            buf.clear();
        }

        if closed {
            let _ = writer.shutdown().await;
            return Ok(());
        }

        tokio::select! {
            _ = notified => {}
            _ = shared.cancel.cancelled() => return Ok(()),
        }
    }
}

async fn write_out<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> std::io::Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await
}

/// Cloneable control handle for a running connection.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    /// Open a request stream (client).
    pub fn send_request(&self, headers: &[HeaderField], end_stream: bool) -> Result<StreamHandle> {
        let shared = &self.shared;
        shared.with_session(|s| {
            let stream_id = s.send_request(headers, None, end_stream)?;
            Ok::<_, H2Error>(shared.adopt(stream_id))
        })
    }

    /// Next stream opened by the peer: requests on a server, pushed streams
    /// on a client. Streams reset before they are accepted are skipped.
    /// `None` once the connection has finished.
    pub async fn accept(&self) -> Option<StreamHandle> {
        let shared = &self.shared;
        shared
            .wait_for(|s| {
                if let Some(stream_id) = shared.incoming.lock().pop_front() {
                    return Some(Some(shared.adopt(stream_id)));
                }
                (shared.cancel.is_cancelled() || s.is_closed()).then_some(None)
            })
            .await
    }

    /// Peer-opened streams not yet taken by [`SessionHandle::accept`].
    pub fn pending_accepts(&self) -> usize {
        let _session = self.shared.session.lock();
        self.shared.incoming.lock().len()
    }

    /// Round-trip time of a PING.
    pub async fn ping(&self) -> Result<Duration> {
        let rx = self.shared.with_session(|s| {
            let payload = s.ping()?;
            let (tx, rx) = oneshot::channel();
            self.shared.pongs.lock().insert(payload, tx);
            Ok::<_, H2Error>(rx)
        })?;
        rx.await.map_err(|_| self.shared.closed_error())
    }

    /// Send GOAWAY; with `NoError` in-flight streams drain first.
    pub fn go_away(&self, code: ErrorCode, debug_data: Bytes) -> Result<()> {
        self.shared.with_session(|s| s.go_away(code, debug_data))
    }

    /// Abort the connection: both loops stop and pending operations fail
    /// with `SessionClosed`.
    pub fn shutdown(&self) {
        debug!("connection shutdown requested");
        self.shared.cancel.cancel();
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled() || self.shared.session.lock().is_closed()
    }

    /// Resolves once the session has closed.
    pub fn closed(&self) -> impl Future<Output = ()> + '_ {
        self.shared.wait_for(|s| s.is_closed().then_some(()))
    }

    /// Direct access to the session for operations without a handle method.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        self.shared.with_session(f)
    }
}

/// One stream of a running connection.
pub struct StreamHandle {
    id: u32,
    shared: Arc<Shared>,
    eof: bool,
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("eof", &self.eof)
            .finish()
    }
}

impl StreamHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Next header block: request/response headers, then trailers. On a
    /// pushed stream the promised request comes first.
    pub async fn headers(&self) -> Result<HeaderBlock> {
        let id = self.id;
        let shared = &self.shared;
        shared
            .wait_for(|s| match s.take_headers(id) {
                Ok(Some(block)) => Some(Ok(block)),
                Ok(None) => {
                    let finished = s.stream(id).map_or(true, |stream| {
                        matches!(
                            stream.state(),
                            StreamState::HalfClosedRemote | StreamState::Closed
                        )
                    });
                    finished.then(|| {
                        Err(H2Error::stream(
                            id,
                            ErrorCode::StreamClosed,
                            "peer sent no further headers",
                        ))
                    })
                }
                Err(_) => Some(Err(shared.stream_error(s, id))),
            })
            .await
    }

    /// Next body chunk; `None` after END_STREAM.
    pub async fn data(&mut self) -> Option<Result<Bytes>> {
        if self.eof {
            return None;
        }
        let id = self.id;
        let shared = &self.shared;
        let (chunk, end_stream) = shared
            .wait_for(|s| loop {
                match s.read_data(id) {
                    Ok(Some(chunk)) if chunk.data.is_empty() && !chunk.end_stream => continue,
                    Ok(Some(chunk)) => return Some((Ok(chunk.data), chunk.end_stream)),
                    Ok(None) => return None,
                    Err(_) => return Some((Err(shared.stream_error(s, id)), true)),
                }
            })
            .await;
        self.eof = end_stream;
        match chunk {
            Ok(data) if data.is_empty() => None,
            other => Some(other),
        }
    }

    pub fn send_headers(&self, headers: &[HeaderField], end_stream: bool) -> Result<()> {
        self.shared
            .with_session(|s| s.send_headers(self.id, headers, end_stream))
    }

    pub fn send_trailers(&self, trailers: &[HeaderField]) -> Result<()> {
        self.shared.with_session(|s| s.send_trailers(self.id, trailers))
    }

    /// Send body bytes, waiting for flow-control credit as needed.
    pub async fn send_data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        if data.is_empty() && !end_stream {
            return Ok(());
        }
        let id = self.id;
        let shared = &self.shared;
        let mut remaining = data;
        loop {
            let pending = remaining.clone();
            let sent = shared
                .wait_for(|s| match s.send_capacity(id) {
                    Err(_) => Some(Err(shared.stream_error(s, id))),
                    Ok(0) if !pending.is_empty() => None,
                    Ok(_) => Some(s.send_data(id, pending.clone(), end_stream)),
                })
                .await?;
            remaining.advance(sent);
            if remaining.is_empty() {
                return Ok(());
            }
            trace!(stream_id = id, remaining = remaining.len(), "waiting for send window");
        }
    }

    /// Send as much of `data` as the windows allow right now. Fails with
    /// `FlowControlBlocked` when nothing fits.
    pub fn try_send_data(&self, data: Bytes, end_stream: bool) -> Result<usize> {
        self.shared.with_session(|s| {
            let len = data.len();
            let sent = s.send_data(self.id, data, end_stream)?;
            if sent == 0 && len > 0 {
                return Err(H2Error::FlowControlBlocked(self.id));
            }
            Ok(sent)
        })
    }

    /// Reserve a pushed stream associated with this one (server).
    pub fn push_promise(&self, request: &[HeaderField]) -> Result<StreamHandle> {
        let shared = &self.shared;
        shared.with_session(|s| {
            let promised_id = s.push_promise(self.id, request)?;
            Ok::<_, H2Error>(shared.adopt(promised_id))
        })
    }

    pub fn reset(&self, code: ErrorCode) -> Result<()> {
        self.shared.with_session(|s| s.reset_stream(self.id, code))
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let id = self.id;
        let shared = &self.shared;
        shared.with_session(|s| {
            shared.handles.lock().remove(&id);
            shared.resets.lock().remove(&id);
            let open = s
                .stream(id)
                .is_some_and(|stream| stream.state() != StreamState::Closed);
            if open && !s.is_closed() {
                trace!(stream_id = id, "handle dropped, cancelling stream");
                let _ = s.reset_stream(id, ErrorCode::Cancel);
            } else {
                s.release_stream(id);
            }
        });
    }
}
