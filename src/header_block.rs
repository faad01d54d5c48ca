//! Header blocks: the name/value lists carried by SYN_STREAM, SYN_REPLY and
//! HEADERS frames.
//!
//! The frame codec treats a block as opaque bytes and only needs its length.
//! Compression is delegated to a [`HeaderBlockEncoder`] / [`HeaderBlockDecoder`]
//! pair; [`HpackEncoder`] and [`HpackDecoder`] are the implementations shipped
//! with the crate, thin wrappers around `fluke-hpack`.

use crate::{Error, Result};

/// A single header name/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Compresses header lists into blocks.
///
/// Implementations may keep per-connection state, so blocks must be encoded
/// in the same order they are written to the wire.
pub trait HeaderBlockEncoder {
    fn encode(&mut self, headers: &[Header]) -> Result<Vec<u8>>;
}

/// Decompresses blocks produced by the peer's [`HeaderBlockEncoder`].
pub trait HeaderBlockDecoder {
    fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>>;
}

/// HPACK decoder for header blocks.
/// Wraps `fluke_hpack::Decoder` which maintains dynamic table state per-connection.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }
}

impl HeaderBlockDecoder for HpackDecoder {
    fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>> {
        let pairs = self
            .inner
            .decode(block)
            .map_err(|e| Error::HeaderBlock(format!("HPACK decode error: {:?}", e)))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

/// HPACK encoder for header blocks.
/// Wraps `fluke_hpack::Encoder` which maintains dynamic table state per-connection.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }
}

impl HeaderBlockEncoder for HpackEncoder {
    fn encode(&mut self, headers: &[Header]) -> Result<Vec<u8>> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        Ok(self.inner.encode(pairs))
    }
}

// ============================================================================
// Tests
// ============================================================================
