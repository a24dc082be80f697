//! Connection dispatch layer
//!
//! A [`Connection`] owns one transport. Its read loop decodes frames in
//! arrival order, validates them and hands each one to the handler
//! registered for its scope and type. Outbound frame groups are written
//! under a single writer lock so concurrent senders never interleave on the
//! wire.

use crate::handler::{DynHandler, Typed};
use crate::{ConnectionConfig, ConnectionError, Handler};
use rsocket_proto::{
    BufferPool, CancelFrame, ErrorCode, ErrorFrame, ExtFrame, FireAndForgetFrame, Frame,
    FrameCodec, FrameFlags, FrameHeader, FrameType, FrameView, KeepaliveFrame, LeaseFrame,
    MetadataPushFrame, PayloadFrame, PoolStats, ProtocolError, RequestChannelFrame,
    RequestNFrame, RequestResponseFrame, RequestStreamFrame, ResumeFrame, ResumeOkFrame,
    SetupFrame, WriteableFrame, CONNECTION_STREAM_ID, HEADER_LEN,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// ERROR frame fixed prefix: the error code
const ERROR_CODE_LEN: usize = 4;

/// Which side of the stream-id split a handler serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    /// Stream 0
    Connection,
    /// Any other stream
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HandlerKey {
    scope: Scope,
    frame_type: FrameType,
}

/// What to do with a frame that failed before reaching a handler
enum Rejection {
    /// Drop silently
    Dropped,
    /// Answer with an ERROR on the frame's stream and carry on
    Stream(ErrorCode, String),
    /// Answer with a connection ERROR and stop the read loop
    Connection(ConnectionError),
}

struct Inner {
    id: Uuid,
    config: ConnectionConfig,
    reader: std::sync::Mutex<Option<BoxedReader>>,
    writer: Mutex<BoxedWriter>,
    pool: BufferPool,
    handlers: RwLock<HashMap<HandlerKey, Arc<dyn DynHandler>>>,
    closed: CancellationToken,
    /// Set once the writer half has been shut down
    released: AtomicBool,
}

/// A multiplexed RSocket connection over one byte-stream transport.
///
/// Cloning is cheap; all clones share the transport, the handler registry
/// and the closed state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Create a connection over `io`. Nothing is read until [`Connection::start`].
    pub fn new<T>(io: T, config: ConnectionConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::from_parts(reader, writer, config)
    }

    /// Create a connection from separate read and write halves
    pub fn from_parts<R, W>(reader: R, writer: W, config: ConnectionConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = Uuid::new_v4();
        debug!(connection = %id, "Created connection");

        Self {
            inner: Arc::new(Inner {
                id,
                pool: BufferPool::new(config.pool.clone()),
                config,
                reader: std::sync::Mutex::new(Some(Box::new(reader))),
                writer: Mutex::new(Box::new(writer)),
                handlers: RwLock::new(HashMap::new()),
                closed: CancellationToken::new(),
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Connection identifier used in logs
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Connection settings
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Counters of the outbound scratch-buffer pool
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Whether [`Connection::close`] has been called or the connection failed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Spawn the read loop.
    ///
    /// The task ends with `Ok(())` when the peer closes the transport or
    /// [`Connection::close`] is called, and with the fatal error otherwise.
    /// The connection is closed in every case.
    pub fn start(&self) -> JoinHandle<Result<(), ConnectionError>> {
        let reader = self
            .inner
            .reader
            .lock()
            .ok()
            .and_then(|mut reader| reader.take());
        let connection = self.clone();

        tokio::spawn(async move {
            match reader {
                Some(reader) => connection.run(reader).await,
                None => Err(ConnectionError::AlreadyStarted),
            }
        })
    }

    /// Send a single frame. Returns the bytes written.
    pub async fn send(&self, frame: &WriteableFrame) -> Result<usize, ConnectionError> {
        self.send_group(frame, &[]).await
    }

    /// Send `first` and `others` as one contiguous group.
    ///
    /// No other send can put bytes on the transport between the frames of
    /// the group. Returns the bytes written. Size and encoding problems are
    /// detected before anything is written and leave the connection usable;
    /// any failure after the first byte closes the connection, since the
    /// peer can no longer find frame boundaries.
    pub async fn send_group(
        &self,
        first: &WriteableFrame,
        others: &[WriteableFrame],
    ) -> Result<usize, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::ConnectionClosed);
        }
        let frames: Vec<&WriteableFrame> = std::iter::once(first).chain(others).collect();
        // Write-only codec; a zero-capacity read buffer never allocates
        let codec = FrameCodec::with_limits(self.inner.config.max_frame_size, 0);

        let mut writer = tokio::select! {
            _ = self.inner.closed.cancelled() => return Err(ConnectionError::ConnectionClosed),
            writer = self.inner.writer.lock() => writer,
        };

        let report = tokio::select! {
            _ = self.inner.closed.cancelled() => return Err(ConnectionError::ConnectionClosed),
            report = codec.write_frames_pooled(&mut *writer, &frames, &self.inner.pool) => report,
        };
        drop(writer);

        match report.error {
            None => {
                trace!(
                    connection = %self.inner.id,
                    frames = 1 + others.len(),
                    bytes = report.written,
                    "Sent frame group"
                );
                Ok(report.written)
            }
            Some(err) if report.written == 0 && !matches!(err, ProtocolError::Io(_)) => {
                warn!(connection = %self.inner.id, "Rejected outbound frame group: {}", err);
                Err(ConnectionError::Protocol(err))
            }
            Some(err) => {
                error!(
                    connection = %self.inner.id,
                    written = report.written,
                    "Write failed, closing connection: {}",
                    err
                );
                self.inner.closed.cancel();
                Err(ConnectionError::write_failed(report.written, err))
            }
        }
    }

    /// Close the connection.
    ///
    /// Pending sends and the read loop are woken and stop; later sends fail
    /// with [`ConnectionError::ConnectionClosed`]. The transport's write half
    /// is shut down, including after a failed write already marked the
    /// connection closed. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if !self.is_closed() {
            info!(connection = %self.inner.id, "Closing connection");
        }
        self.shut_down().await
    }

    async fn shut_down(&self) -> Result<(), ConnectionError> {
        self.inner.closed.cancel();
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.inner.writer.lock().await;
        debug!(connection = %self.inner.id, "Shutting down transport");
        writer.shutdown().await?;
        Ok(())
    }

    async fn register<F, H>(&self, scope: Scope, handler: H)
    where
        F: FrameView + Send + 'static,
        H: Handler<F>,
    {
        let key = HandlerKey {
            scope,
            frame_type: F::FRAME_TYPE,
        };
        let mut handlers = self.inner.handlers.write().await;
        let action = if handlers.insert(key, Arc::new(Typed::<H, F>::new(handler))).is_some() {
            "Replaced"
        } else {
            "Registered"
        };
        debug!(
            connection = %self.inner.id,
            "{} {:?} handler for {}",
            action,
            scope,
            key.frame_type
        );
    }

    /// Handle SETUP frames
    pub async fn handle_setup(&self, handler: impl Handler<SetupFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle LEASE frames
    pub async fn handle_lease(&self, handler: impl Handler<LeaseFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle KEEPALIVE frames
    pub async fn handle_keepalive(&self, handler: impl Handler<KeepaliveFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle METADATA_PUSH frames
    pub async fn handle_metadata_push(&self, handler: impl Handler<MetadataPushFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle RESUME frames
    pub async fn handle_resume(&self, handler: impl Handler<ResumeFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle RESUME_OK frames
    pub async fn handle_resume_ok(&self, handler: impl Handler<ResumeOkFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle ERROR frames on stream 0
    pub async fn handle_connection_error(&self, handler: impl Handler<ErrorFrame>) {
        self.register(Scope::Connection, handler).await
    }

    /// Handle REQUEST_RESPONSE frames
    pub async fn handle_request_response(&self, handler: impl Handler<RequestResponseFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle REQUEST_FNF frames
    pub async fn handle_fire_and_forget(&self, handler: impl Handler<FireAndForgetFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle REQUEST_STREAM frames
    pub async fn handle_request_stream(&self, handler: impl Handler<RequestStreamFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle REQUEST_CHANNEL frames
    pub async fn handle_request_channel(&self, handler: impl Handler<RequestChannelFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle REQUEST_N frames
    pub async fn handle_request_n(&self, handler: impl Handler<RequestNFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle CANCEL frames
    pub async fn handle_cancel(&self, handler: impl Handler<CancelFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle PAYLOAD frames
    pub async fn handle_payload(&self, handler: impl Handler<PayloadFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle ERROR frames on non-zero streams
    pub async fn handle_error(&self, handler: impl Handler<ErrorFrame>) {
        self.register(Scope::Stream, handler).await
    }

    /// Handle EXT frames
    pub async fn handle_extension(&self, handler: impl Handler<ExtFrame>) {
        self.register(Scope::Stream, handler).await
    }

    async fn run(self, mut reader: BoxedReader) -> Result<(), ConnectionError> {
        let id = self.inner.id;
        let config = &self.inner.config;
        let mut codec = FrameCodec::with_limits(config.max_frame_size, config.read_buffer_capacity);

        info!(connection = %id, "Starting read loop");

        let result = loop {
            let frame_result = tokio::select! {
                _ = self.inner.closed.cancelled() => break Ok(()),
                frame_result = codec.read_frame(&mut reader) => frame_result,
            };

            match frame_result {
                Ok(Some(frame)) => {
                    if let Err(e) = self.dispatch(frame).await {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    info!(connection = %id, "Transport closed by peer");
                    break Ok(());
                }
                Err(ProtocolError::UnknownFrameType(code)) if !config.strict_frame_types => {
                    debug!(connection = %id, "Dropping frame of unknown type {:#04x}", code);
                }
                Err(e) => {
                    error!(connection = %id, "Failed to read frame: {}", e);
                    if !matches!(e, ProtocolError::Io(_)) {
                        self.send_connection_error(&e.to_string()).await;
                    }
                    break Err(e.into());
                }
            }
        };

        if let Err(e) = self.shut_down().await {
            debug!(connection = %id, "Transport shutdown failed: {}", e);
        }
        info!(connection = %id, "Read loop stopped");
        result
    }

    /// Validate one frame and route it to its handler
    async fn dispatch(&self, frame: Frame) -> Result<(), ConnectionError> {
        let header = *frame.header();
        trace!(connection = %self.inner.id, %header, "Received frame");

        let scope = match self.check_scope(&header) {
            Ok(scope) => scope,
            Err(rejection) => return self.reject(&header, rejection).await,
        };
        let typed = match frame.into_typed() {
            Ok(typed) => typed,
            Err(e) => {
                let rejection = match scope {
                    Scope::Stream => Rejection::Stream(ErrorCode::Invalid, e.to_string()),
                    Scope::Connection => Rejection::Connection(e.into()),
                };
                return self.reject(&header, rejection).await;
            }
        };

        let key = HandlerKey {
            scope,
            frame_type: header.frame_type(),
        };
        let handler = self.inner.handlers.read().await.get(&key).cloned();
        let Some(handler) = handler else {
            if header.flags().has_flag(FrameFlags::IGNORE) {
                trace!(connection = %self.inner.id, %header, "Ignoring frame without handler");
            } else {
                debug!(
                    connection = %self.inner.id,
                    %header,
                    "No handler registered, dropping frame"
                );
            }
            return Ok(());
        };

        if let Err(e) = handler.call(self, typed).await {
            warn!(connection = %self.inner.id, %header, "Handler failed: {}", e);
            self.send_error(header.stream_id(), e.code, &e.message).await?;
            if scope == Scope::Connection && e.code.is_connection_error() {
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn check_scope(&self, header: &FrameHeader) -> Result<Scope, Rejection> {
        let frame_type = header.frame_type();
        let stream_id = header.stream_id();

        if frame_type == FrameType::Reserved {
            return Err(if self.inner.config.strict_frame_types {
                Rejection::Connection(ProtocolError::UnknownFrameType(0).into())
            } else {
                Rejection::Dropped
            });
        }

        if stream_id == CONNECTION_STREAM_ID {
            if frame_type.is_connection_scoped() {
                Ok(Scope::Connection)
            } else {
                Err(Rejection::Connection(ConnectionError::InvalidStream {
                    stream_id,
                    frame_type,
                }))
            }
        } else if frame_type.is_stream_scoped() {
            Ok(Scope::Stream)
        } else {
            Err(Rejection::Stream(
                ErrorCode::Invalid,
                format!("{} frame not allowed on stream {}", frame_type, stream_id),
            ))
        }
    }

    async fn reject(
        &self,
        header: &FrameHeader,
        rejection: Rejection,
    ) -> Result<(), ConnectionError> {
        match rejection {
            Rejection::Dropped => {
                debug!(connection = %self.inner.id, %header, "Dropping frame of reserved type");
                Ok(())
            }
            Rejection::Stream(code, message) => {
                warn!(connection = %self.inner.id, %header, "Rejected frame: {}", message);
                self.send_error(header.stream_id(), code, &message).await
            }
            Rejection::Connection(e) => {
                error!(connection = %self.inner.id, %header, "Fatal frame: {}", e);
                self.send_connection_error(&e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Answer a frame with an ERROR on its stream.
    ///
    /// The message is cut to fit `max_frame_size`. Only a broken transport
    /// is returned as an error; an ERROR that cannot be sent is logged and
    /// the read loop keeps going.
    async fn send_error(
        &self,
        stream_id: u32,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), ConnectionError> {
        let limit = self
            .inner
            .config
            .max_frame_size
            .saturating_sub(HEADER_LEN + ERROR_CODE_LEN);
        let frame = WriteableFrame::error(stream_id, code, truncate_message(message, limit));

        match self.send(&frame).await {
            Ok(_) => Ok(()),
            Err(e @ (ConnectionError::Transport(_) | ConnectionError::PartialWrite { .. })) => {
                Err(e)
            }
            Err(e) => {
                warn!(connection = %self.inner.id, stream_id, "Could not send ERROR: {}", e);
                Ok(())
            }
        }
    }

    /// Best-effort connection ERROR before the read loop gives up
    async fn send_connection_error(&self, message: &str) {
        let frame =
            WriteableFrame::error(CONNECTION_STREAM_ID, ErrorCode::ConnectionError, message);
        if let Err(e) = self.send(&frame).await {
            debug!(connection = %self.inner.id, "Could not send connection error: {}", e);
        }
    }
}

/// Longest prefix of `message` within `max` bytes, cut on a char boundary
fn truncate_message(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
