//! Server configuration and accept loop

use crate::handlers;
use anyhow::{Context, Result};
use rsocket::{Connection, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Environment variable overriding [`EchoConfig::bind`]
pub const BIND_ENV: &str = "RSOCKET_ECHO_BIND";

/// Echo server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Listen address
    pub bind: String,
    /// Settings applied to every accepted connection
    pub connection: ConnectionConfig,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7878".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl EchoConfig {
    /// Load settings from an optional JSON file, then apply the environment
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let path = path.as_ref();
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_json(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(bind) = std::env::var(BIND_ENV) {
            config.bind = bind;
        }
        Ok(config)
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Accepts TCP connections and serves the echo handlers on each
pub struct EchoServer {
    listener: TcpListener,
    config: EchoConfig,
}

impl EchoServer {
    /// Bind the listener
    pub async fn bind(config: EchoConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;
        Ok(Self { listener, config })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn serve(self) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);

        loop {
            let (socket, peer) = self.listener.accept().await.context("Accept failed")?;
            if let Err(e) = socket.set_nodelay(true) {
                debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
            }

            let connection = Connection::new(socket, self.config.connection.clone());
            info!(connection = %connection.id(), "Accepted {}", peer);
            handlers::register_all(&connection).await;

            let task = connection.start();
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(())) => {
                        info!(connection = %connection.id(), "Connection from {} finished", peer)
                    }
                    Ok(Err(e)) => warn!(
                        connection = %connection.id(),
                        "Connection from {} failed: {}",
                        peer,
                        e
                    ),
                    Err(e) => warn!(connection = %connection.id(), "Read loop panicked: {}", e),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rsocket::proto::{
        FrameCodec, FrameFlags, FrameView, PayloadRegion, TypedFrame, WriteableFrame,
    };
    use tokio::net::TcpStream;

    #[test]
    fn test_config_defaults() {
        let config = EchoConfig::from_json("{}").unwrap();
        assert_eq!(config.bind, "127.0.0.1:7878");
        assert!(!config.connection.strict_frame_types);
    }

    #[test]
    fn test_config_overrides() {
        let config = EchoConfig::from_json(
            r#"{"bind": "0.0.0.0:9000", "connection": {"strict_frame_types": true}}"#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert!(config.connection.strict_frame_types);
    }

    #[test]
    fn test_config_rejects_bad_json() {
        assert!(EchoConfig::from_json("{\"bind\": 7}").is_err());
    }

    #[tokio::test]
    async fn test_echo_over_tcp() {
        let config = EchoConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let server = EchoServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let mut socket = TcpStream::connect(addr).await.unwrap();
        let mut codec = FrameCodec::new();
        let request = WriteableFrame::request_response(
            1,
            Bytes::from_static(b"over tcp"),
            None,
            FrameFlags::NONE,
        );
        codec.write_frame(&mut socket, &request).await.into_result().unwrap();

        let reply = codec.read_frame(&mut socket).await.unwrap().unwrap();
        match reply.into_typed().unwrap() {
            TypedFrame::Payload(payload) => {
                assert_eq!(payload.stream_id(), 1);
                assert_eq!(payload.data_utf8(), "over tcp");
            }
            other => panic!("expected PAYLOAD, got {:?}", other),
        }
    }
}
