//! Error types and the RST_STREAM / GOAWAY status code table.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the frame codec, streams and session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input that invalidates the whole connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The header block collaborator rejected a block.
    #[error("header block error: {0}")]
    HeaderBlock(String),

    #[error("stream {stream_id} was reset: {code}")]
    StreamReset { stream_id: u32, code: ErrorCode },

    /// The peer sent more bytes than the inbound buffer can hold.
    #[error("flow control violation on stream {stream_id}")]
    FlowControl { stream_id: u32 },

    #[error("stream closed")]
    StreamClosed,

    #[error("stream finished")]
    StreamFinished,

    #[error("read timed out")]
    Timeout,

    #[error("frame too large ({0} bytes)")]
    FrameTooLarge(usize),

    /// Local API misuse, reported at the call site.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("session is shut down")]
    Shutdown,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// True for errors after which the read loop must stop and every stream
    /// on the connection is torn down.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::HeaderBlock(_) | Self::Io(_) | Self::ConnectionClosed
        )
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, e),
            Error::StreamReset { .. } => io::Error::new(io::ErrorKind::ConnectionReset, e),
            Error::StreamClosed | Error::StreamFinished | Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, e)
            }
            Error::IllegalState(_) | Error::FrameTooLarge(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Stream and session status codes.
///
/// RST_STREAM and GOAWAY use different numeric spaces; a variant may exist in
/// one, the other, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// GOAWAY only: the session closed normally.
    NoError,
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    Cancel,
    InternalError,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
    InvalidCredentials,
    FrameTooLarge,
}

/// RST_STREAM status codes indexed by wire value. Index 0 is reserved.
const RST_CODES: [Option<ErrorCode>; 12] = [
    None,
    Some(ErrorCode::ProtocolError),
    Some(ErrorCode::InvalidStream),
    Some(ErrorCode::RefusedStream),
    Some(ErrorCode::UnsupportedVersion),
    Some(ErrorCode::Cancel),
    Some(ErrorCode::InternalError),
    Some(ErrorCode::FlowControlError),
    Some(ErrorCode::StreamInUse),
    Some(ErrorCode::StreamAlreadyClosed),
    Some(ErrorCode::InvalidCredentials),
    Some(ErrorCode::FrameTooLarge),
];

/// GOAWAY status codes indexed by wire value.
const GOAWAY_CODES: [ErrorCode; 3] = [
    ErrorCode::NoError,
    ErrorCode::ProtocolError,
    ErrorCode::InternalError,
];

impl ErrorCode {
    pub fn from_rst_code(code: u32) -> Option<Self> {
        RST_CODES.get(code as usize).copied().flatten()
    }

    pub fn rst_code(self) -> Option<u32> {
        RST_CODES
            .iter()
            .position(|c| *c == Some(self))
            .map(|i| i as u32)
    }

    pub fn from_goaway_code(code: u32) -> Option<Self> {
        GOAWAY_CODES.get(code as usize).copied()
    }

    pub fn goaway_code(self) -> Option<u32> {
        GOAWAY_CODES
            .iter()
            .position(|c| *c == self)
            .map(|i| i as u32)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InvalidStream => "INVALID_STREAM",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::Cancel => "CANCEL",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::StreamInUse => "STREAM_IN_USE",
            Self::StreamAlreadyClosed => "STREAM_ALREADY_CLOSED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::FrameTooLarge => "FRAME_TOO_LARGE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
