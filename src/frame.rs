//! SPDY/3 frame layout: type and flag constants, the 8-byte frame header, and
//! the [`Frame`] sum type shared by the reader and the writer.
//!
//! ```text
//! Control frame:                       DATA frame:
//! +-+-------------+---------------+    +-+-----------------------------+
//! |1|  version(15)|    type(16)   |    |0|       stream id (31)        |
//! +-+-------------+---------------+    +-+-----------------------------+
//! |  flags (8)  |   length (24)   |    |  flags (8)  |   length (24)   |
//! +-------------+-----------------+    +-------------+-----------------+
//! ```

use crate::header_block::Header;
use crate::settings::Settings;
use crate::ErrorCode;

/// The only protocol version this codec speaks.
pub const VERSION: u16 = 3;

/// Size of every frame header, control or DATA.
pub const FRAME_HEADER_LENGTH: usize = 8;

/// Largest body the 24-bit length field can describe.
pub const MAX_FRAME_LENGTH: usize = 0xFF_FFFF;

/// Control frame types
pub mod frame_type {
    pub const SYN_STREAM: u16 = 0x1;
    pub const SYN_REPLY: u16 = 0x2;
    pub const RST_STREAM: u16 = 0x3;
    pub const SETTINGS: u16 = 0x4;
    pub const PING: u16 = 0x6;
    pub const GOAWAY: u16 = 0x7;
    pub const HEADERS: u16 = 0x8;
    pub const WINDOW_UPDATE: u16 = 0x9;
}

/// Frame flags
pub mod flags {
    pub const FIN: u8 = 0x1;
    pub const UNIDIRECTIONAL: u8 = 0x2;
    /// SETTINGS frames only
    pub const CLEAR_PREVIOUSLY_PERSISTED_SETTINGS: u8 = 0x1;
}

pub(crate) const CONTROL_BIT: u32 = 0x8000_0000;
pub(crate) const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// A decoded 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Control {
        version: u16,
        frame_type: u16,
        flags: u8,
        length: u32,
    },
    Data {
        stream_id: u32,
        flags: u8,
        length: u32,
    },
}

impl FrameHeader {
    /// Parse an 8-byte frame header
    pub fn parse(data: &[u8; FRAME_HEADER_LENGTH]) -> Self {
        let w1 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let w2 = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let flags = (w2 >> 24) as u8;
        let length = w2 & 0xFF_FFFF;

        if w1 & CONTROL_BIT != 0 {
            FrameHeader::Control {
                version: ((w1 & 0x7FFF_0000) >> 16) as u16,
                frame_type: (w1 & 0xFFFF) as u16,
                flags,
                length,
            }
        } else {
            FrameHeader::Data {
                stream_id: w1 & STREAM_ID_MASK,
                flags,
                length,
            }
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LENGTH] {
        let (w1, flags, length) = match *self {
            FrameHeader::Control {
                version,
                frame_type,
                flags,
                length,
            } => (
                CONTROL_BIT | ((version as u32 & 0x7FFF) << 16) | frame_type as u32,
                flags,
                length,
            ),
            FrameHeader::Data {
                stream_id,
                flags,
                length,
            } => (stream_id & STREAM_ID_MASK, flags, length),
        };
        let w2 = ((flags as u32) << 24) | (length & 0xFF_FFFF);

        let mut out = [0u8; FRAME_HEADER_LENGTH];
        out[..4].copy_from_slice(&w1.to_be_bytes());
        out[4..].copy_from_slice(&w2.to_be_bytes());
        out
    }

    pub fn flags(&self) -> u8 {
        match *self {
            FrameHeader::Control { flags, .. } | FrameHeader::Data { flags, .. } => flags,
        }
    }

    pub fn length(&self) -> u32 {
        match *self {
            FrameHeader::Control { length, .. } | FrameHeader::Data { length, .. } => length,
        }
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LENGTH + self.length() as usize
    }
}

/// Every frame this codec can read or write.
///
/// DATA is read as a bounded byte range handed to the handler (see
/// [`FrameHandler::data`](crate::FrameHandler::data)); the `Data` variant is
/// what the writer emits and what tests collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        fin: bool,
        data: Vec<u8>,
    },
    SynStream {
        stream_id: u32,
        associated_stream_id: u32,
        /// 3 bits
        priority: u8,
        slot: u8,
        /// FLAG_FIN: the sender will not send data on this stream
        in_finished: bool,
        /// FLAG_UNIDIRECTIONAL: the receiver may not send data on this stream
        out_finished: bool,
        headers: Vec<Header>,
    },
    SynReply {
        stream_id: u32,
        in_finished: bool,
        headers: Vec<Header>,
    },
    RstStream {
        stream_id: u32,
        code: ErrorCode,
    },
    Settings {
        clear_previous: bool,
        settings: Settings,
    },
    Ping {
        /// True when this ping answers one we sent.
        reply: bool,
        id: u32,
    },
    GoAway {
        last_good_stream_id: u32,
        code: ErrorCode,
    },
    Headers {
        stream_id: u32,
        headers: Vec<Header>,
    },
    WindowUpdate {
        stream_id: u32,
        delta_window_size: u32,
    },
}

impl Frame {
    /// Stream this frame belongs to, or `None` for connection-level frames.
    pub fn stream_id(&self) -> Option<u32> {
        match *self {
            Frame::Data { stream_id, .. }
            | Frame::SynStream { stream_id, .. }
            | Frame::SynReply { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::Headers { stream_id, .. } => Some(stream_id),
            Frame::WindowUpdate { stream_id, .. } if stream_id != 0 => Some(stream_id),
            Frame::WindowUpdate { .. }
            | Frame::Settings { .. }
            | Frame::Ping { .. }
            | Frame::GoAway { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::SynStream { .. } => "SYN_STREAM",
            Frame::SynReply { .. } => "SYN_REPLY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::Headers { .. } => "HEADERS",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
        }
    }
}
