//! Frame handlers for the echo responder

use async_trait::async_trait;
use rsocket::proto::{
    CancelFrame, FireAndForgetFrame, FrameFlags, FrameView, KeepaliveFrame, MetadataPushFrame,
    PayloadRegion, RequestResponseFrame, RequestStreamFrame, SetupFrame, Version,
    WriteableFrame,
};
use rsocket::{Connection, ConnectionError, Handler, HandlerError};
use tracing::{debug, info};

/// Most PAYLOAD frames sent for one REQUEST_STREAM
pub const MAX_STREAM_ITEMS: u32 = 64;

fn send_failed(e: ConnectionError) -> HandlerError {
    HandlerError::application(format!("Failed to send reply: {}", e))
}

/// Accepts SETUP frames for protocol 1.x
pub struct SetupHandler;

#[async_trait]
impl Handler<SetupFrame> for SetupHandler {
    async fn handle(&self, connection: &Connection, frame: SetupFrame) -> Result<(), HandlerError> {
        let version = frame.version();
        if version.major != Version::V1_0.major {
            return Err(HandlerError::new(
                rsocket::proto::ErrorCode::UnsupportedSetup,
                format!("Unsupported protocol version {}", version),
            ));
        }

        info!(
            connection = %connection.id(),
            %version,
            data_mime_type = %frame.data_mime_type(),
            keepalive = ?frame.keepalive_interval(),
            "Accepted setup"
        );
        Ok(())
    }
}

/// Answers KEEPALIVE frames that ask for a response
pub struct KeepaliveHandler;

#[async_trait]
impl Handler<KeepaliveFrame> for KeepaliveHandler {
    async fn handle(
        &self,
        connection: &Connection,
        frame: KeepaliveFrame,
    ) -> Result<(), HandlerError> {
        if !frame.respond() {
            return Ok(());
        }
        let reply = WriteableFrame::keepalive(0, frame.data(), false);
        connection.send(&reply).await.map_err(send_failed)?;
        Ok(())
    }
}

/// Replies to each request with its own payload
pub struct EchoHandler;

#[async_trait]
impl Handler<RequestResponseFrame> for EchoHandler {
    async fn handle(
        &self,
        connection: &Connection,
        frame: RequestResponseFrame,
    ) -> Result<(), HandlerError> {
        debug!(stream_id = frame.stream_id(), bytes = frame.data().len(), "Echoing request");
        let reply = WriteableFrame::payload(
            frame.stream_id(),
            frame.data(),
            frame.metadata(),
            FrameFlags::NEXT | FrameFlags::COMPLETE,
        );
        connection.send(&reply).await.map_err(send_failed)?;
        Ok(())
    }
}

/// Repeats the request payload once per requested item, then completes.
///
/// The whole stream goes out as one frame group.
pub struct RepeatHandler;

#[async_trait]
impl Handler<RequestStreamFrame> for RepeatHandler {
    async fn handle(
        &self,
        connection: &Connection,
        frame: RequestStreamFrame,
    ) -> Result<(), HandlerError> {
        let stream_id = frame.stream_id();
        let count = frame.initial_request_n().min(MAX_STREAM_ITEMS);
        if count == 0 {
            return Err(HandlerError::invalid("Initial request count must be positive"));
        }

        let (data, metadata) = (frame.data(), frame.metadata());
        let mut items: Vec<WriteableFrame> = (1..count)
            .map(|_| {
                WriteableFrame::payload(stream_id, data.clone(), metadata.clone(), FrameFlags::NEXT)
            })
            .collect();
        items.push(WriteableFrame::payload(
            stream_id,
            data,
            metadata,
            FrameFlags::NEXT | FrameFlags::COMPLETE,
        ));

        let first = items.remove(0);
        connection.send_group(&first, &items).await.map_err(send_failed)?;
        debug!(stream_id, count, "Completed stream");
        Ok(())
    }
}

/// Logs REQUEST_FNF frames
pub struct FireAndForgetLogger;

#[async_trait]
impl Handler<FireAndForgetFrame> for FireAndForgetLogger {
    async fn handle(
        &self,
        connection: &Connection,
        frame: FireAndForgetFrame,
    ) -> Result<(), HandlerError> {
        info!(
            connection = %connection.id(),
            stream_id = frame.stream_id(),
            "Fire-and-forget: {}",
            frame.data_utf8()
        );
        Ok(())
    }
}

/// Logs METADATA_PUSH frames
pub struct MetadataPushLogger;

#[async_trait]
impl Handler<MetadataPushFrame> for MetadataPushLogger {
    async fn handle(
        &self,
        connection: &Connection,
        frame: MetadataPushFrame,
    ) -> Result<(), HandlerError> {
        info!(connection = %connection.id(), "Metadata push: {}", frame.metadata_utf8());
        Ok(())
    }
}

/// Logs CANCEL frames; every stream is answered in full before the next frame is read
pub struct CancelLogger;

#[async_trait]
impl Handler<CancelFrame> for CancelLogger {
    async fn handle(
        &self,
        connection: &Connection,
        frame: CancelFrame,
    ) -> Result<(), HandlerError> {
        debug!(
            connection = %connection.id(),
            stream_id = frame.stream_id(),
            "Cancel for finished stream"
        );
        Ok(())
    }
}

/// Register every echo handler on `connection`
pub async fn register_all(connection: &Connection) {
    connection.handle_setup(SetupHandler).await;
    connection.handle_keepalive(KeepaliveHandler).await;
    connection.handle_metadata_push(MetadataPushLogger).await;
    connection.handle_request_response(EchoHandler).await;
    connection.handle_request_stream(RepeatHandler).await;
    connection.handle_fire_and_forget(FireAndForgetLogger).await;
    connection.handle_cancel(CancelLogger).await;
}
