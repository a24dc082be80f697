//! Connection configuration

use rsocket_proto::codec::DEFAULT_READ_BUFFER_CAPACITY;
use rsocket_proto::{PoolConfig, MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest frame accepted or sent, capped by the 3-byte length prefix
    pub max_frame_size: usize,
    /// Initial capacity of the read buffer
    pub read_buffer_capacity: usize,
    /// Treat unknown frame types as fatal instead of dropping them
    pub strict_frame_types: bool,
    /// Scratch-buffer pool used for outbound frame groups
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
            strict_frame_types: false,
            pool: PoolConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Set the maximum frame size
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(MAX_FRAME_SIZE);
        self
    }

    /// Set the initial read buffer capacity
    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    /// Reject unknown frame types
    pub fn with_strict_frame_types(mut self, strict: bool) -> Self {
        self.strict_frame_types = strict;
        self
    }

    /// Set the buffer pool configuration
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "strict_frame_types": true, "pool": { "max_idle": 2 } }"#)
                .unwrap();

        assert!(config.strict_frame_types);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
        assert_eq!(config.pool.max_idle, 2);
        assert_eq!(config.pool.buffer_capacity, PoolConfig::default().buffer_capacity);
    }

    #[test]
    fn test_max_frame_size_is_capped() {
        let config = ConnectionConfig::default().with_max_frame_size(usize::MAX);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
    }
}
