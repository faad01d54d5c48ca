//! spdy-mux: a blocking SPDY/3 frame codec and stream multiplexer
//!
//! This crate reads and writes SPDY/3 frames over any `std::io` byte stream
//! and multiplexes independent bidirectional streams over one connection.
//! Each stream exposes plain `Read` / `Write` handles backed by a bounded
//! inbound ring buffer and a chunked outbound frame buffer.
//!
//! # Features
//!
//! - **Frame codec**: DATA, SYN_STREAM, SYN_REPLY, RST_STREAM, SETTINGS, PING,
//!   GOAWAY, HEADERS and WINDOW_UPDATE, with strict length validation
//! - **Blocking streams**: `Mutex` + `Condvar` per stream, optional read
//!   deadlines, half-close and reset semantics
//! - **Pluggable header blocks**: HPACK via fluke-hpack out of the box
//! - **No async runtime**: one reader thread per connection, any number of
//!   application threads
//!
//! # Quick Start
//!
//! ```rust
//! use std::io::Cursor;
//! use spdy_mux::{Config, FrameReader, FrameWriter, Header, Session};
//!
//! // Bytes a server would send: a reply to stream 1, then a body with FIN
//! let mut peer = FrameWriter::new(Vec::new());
//! peer.syn_reply(0, 1, &[Header::new("status", "200")]).unwrap();
//! peer.data(spdy_mux::flags::FIN, 1, b"hello").unwrap();
//!
//! let session = Session::new(Vec::new(), Config::client());
//! let stream = session
//!     .new_stream(vec![Header::new("method", "GET")], false, true)
//!     .unwrap();
//!
//! session
//!     .run(FrameReader::new(Cursor::new(peer.into_inner()), true))
//!     .unwrap();
//! assert_eq!(stream.response_headers().unwrap()[0].value, "200");
//! ```
//!
//! # Architecture
//!
//! - [`FrameReader`] decodes one frame per call into a [`FrameHandler`]
//! - [`FrameWriter`] encodes one frame per call onto a `Write`
//! - [`Stream`] holds per-stream state; [`StreamReader`] / [`StreamWriter`]
//!   are its I/O handles
//! - [`Session`] owns the stream table and routes frames to streams
//!
//! Flow control is limited to the inbound capacity check: WINDOW_UPDATE
//! frames are decoded and validated but grant no credit.

pub mod config;
pub mod error;
pub mod frame;
pub mod header_block;
pub mod reader;
pub mod session;
pub mod settings;
pub mod stream;
pub mod writer;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};
pub use frame::{flags, frame_type, Frame, FrameHeader, FRAME_HEADER_LENGTH, MAX_FRAME_LENGTH, VERSION};
pub use header_block::{Header, HeaderBlockDecoder, HeaderBlockEncoder, HpackDecoder, HpackEncoder};
pub use reader::{FrameHandler, FrameReader};
pub use session::Session;
pub use settings::{settings_flags, settings_id, Settings};
pub use stream::{Stream, StreamReader, StreamSink, StreamWriter};
pub use writer::FrameWriter;
