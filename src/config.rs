//! Session and stream tuning.

use std::time::Duration;

/// Default inbound ring buffer capacity per stream (64 KiB).
pub const DEFAULT_INBOUND_BUFFER_SIZE: usize = 64 * 1024;

/// Default outbound DATA frame buffer per stream, header included (8 KiB).
pub const DEFAULT_OUTBOUND_BUFFER_SIZE: usize = 8 * 1024;

/// Maximum header block size accepted by the reader (256 KB).
/// Prevents a single SYN_STREAM from forcing an unbounded allocation.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Whether this side opened the connection. Clients use odd stream and
    /// ping ids, servers even ones.
    pub client: bool,
    pub inbound_buffer_size: usize,
    pub outbound_buffer_size: usize,
    /// Applied to every new stream; `None` blocks reads indefinitely.
    pub read_timeout: Option<Duration>,
    pub max_header_block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: true,
            inbound_buffer_size: DEFAULT_INBOUND_BUFFER_SIZE,
            outbound_buffer_size: DEFAULT_OUTBOUND_BUFFER_SIZE,
            read_timeout: None,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
        }
    }
}

impl Config {
    pub fn client() -> Self {
        Self::default()
    }

    pub fn server() -> Self {
        Self {
            client: false,
            ..Self::default()
        }
    }

    pub fn with_inbound_buffer_size(mut self, size: usize) -> Self {
        self.inbound_buffer_size = size;
        self
    }

    /// Clamped so there is always room for the DATA header plus one byte.
    pub fn with_outbound_buffer_size(mut self, size: usize) -> Self {
        self.outbound_buffer_size = size.max(crate::frame::FRAME_HEADER_LENGTH + 1);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }
}
