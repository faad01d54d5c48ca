//! Frame decoding: pulls one frame at a time from a byte source and hands it
//! to a [`FrameHandler`].

use std::io::{self, Read};

use tracing::trace;

use crate::config::MAX_HEADER_BLOCK_SIZE;
use crate::frame::{flags, frame_type, Frame, FrameHeader, FRAME_HEADER_LENGTH, STREAM_ID_MASK, VERSION};
use crate::header_block::{HeaderBlockDecoder, Header, HpackDecoder};
use crate::settings::Settings;
use crate::{Error, ErrorCode, Result};

/// Receives decoded frames from a [`FrameReader`].
pub trait FrameHandler {
    /// A DATA frame. `source` yields exactly `length` bytes of payload; any
    /// bytes the handler leaves unread are discarded by the reader.
    fn data(
        &mut self,
        in_finished: bool,
        stream_id: u32,
        source: &mut dyn Read,
        length: usize,
    ) -> Result<()>;

    /// Any control frame. Never called with [`Frame::Data`].
    fn frame(&mut self, frame: Frame) -> Result<()>;
}

/// Decodes frames from `source`.
///
/// `client` is the local role; it decides which PING ids are replies.
pub struct FrameReader<R, D = HpackDecoder> {
    source: R,
    decoder: D,
    client: bool,
    max_header_block_size: usize,
}

impl<R: Read> FrameReader<R, HpackDecoder> {
    pub fn new(source: R, client: bool) -> Self {
        Self::with_decoder(source, HpackDecoder::new(), client)
    }
}

impl<R: Read, D: HeaderBlockDecoder> FrameReader<R, D> {
    pub fn with_decoder(source: R, decoder: D, client: bool) -> Self {
        Self {
            source,
            decoder,
            client,
            max_header_block_size: MAX_HEADER_BLOCK_SIZE,
        }
    }

    pub fn with_max_header_block_size(mut self, size: usize) -> Self {
        self.max_header_block_size = size;
        self
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Read and dispatch one frame.
    ///
    /// Returns `Ok(false)` when the source is exhausted at a frame boundary.
    /// Length and status code checks happen before `handler` sees the frame,
    /// so a malformed frame is never partially applied.
    pub fn read_next<H: FrameHandler + ?Sized>(&mut self, handler: &mut H) -> Result<bool> {
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        if !self.read_header(&mut header)? {
            return Ok(false);
        }

        match FrameHeader::parse(&header) {
            FrameHeader::Data {
                stream_id,
                flags,
                length,
            } => {
                trace!(stream_id, length, flags, "DATA frame");
                self.read_data(handler, stream_id, flags, length as usize)?;
            }
            FrameHeader::Control {
                version,
                frame_type,
                flags,
                length,
            } => {
                if version != VERSION {
                    return Err(Error::protocol(format!("unsupported version {}", version)));
                }
                let length = length as usize;
                let frame = match frame_type {
                    frame_type::SYN_STREAM => self.read_syn_stream(flags, length)?,
                    frame_type::SYN_REPLY => self.read_syn_reply(flags, length)?,
                    frame_type::RST_STREAM => self.read_rst_stream(length)?,
                    frame_type::SETTINGS => self.read_settings(flags, length)?,
                    frame_type::PING => self.read_ping(length)?,
                    frame_type::GOAWAY => self.read_go_away(length)?,
                    frame_type::HEADERS => self.read_headers(length)?,
                    frame_type::WINDOW_UPDATE => self.read_window_update(length)?,
                    unknown => {
                        // Unknown control frame - skip it
                        trace!(frame_type = unknown, length, "skipping unknown control frame");
                        self.skip(length)?;
                        return Ok(true);
                    }
                };
                trace!(frame = frame.name(), stream_id = ?frame.stream_id(), "control frame");
                handler.frame(frame)?;
            }
        }

        Ok(true)
    }

    /// Fill `buf` with the next frame header. `Ok(false)` on a clean EOF.
    fn read_header(&mut self, buf: &mut [u8; FRAME_HEADER_LENGTH]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated frame header",
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn read_data<H: FrameHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        stream_id: u32,
        flags: u8,
        length: usize,
    ) -> Result<()> {
        let in_finished = flags & flags::FIN != 0;
        let mut payload = (&mut self.source).take(length as u64);
        handler.data(in_finished, stream_id, &mut payload, length)?;

        // Keep framing intact whatever the handler consumed
        io::copy(&mut payload, &mut io::sink())?;
        if payload.limit() != 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated DATA frame",
            )));
        }
        Ok(())
    }

    fn read_syn_stream(&mut self, flags: u8, length: usize) -> Result<Frame> {
        if length < 10 {
            return Err(Error::protocol(format!(
                "SYN_STREAM frame length {} < 10",
                length
            )));
        }
        let stream_id = self.read_u32()? & STREAM_ID_MASK;
        let associated_stream_id = self.read_u32()? & STREAM_ID_MASK;
        let s3 = self.read_u16()?;
        let priority = ((s3 & 0xE000) >> 13) as u8;
        let slot = (s3 & 0xFF) as u8;
        let headers = self.read_header_block(length - 10)?;

        Ok(Frame::SynStream {
            stream_id,
            associated_stream_id,
            priority,
            slot,
            in_finished: flags & flags::FIN != 0,
            out_finished: flags & flags::UNIDIRECTIONAL != 0,
            headers,
        })
    }

    fn read_syn_reply(&mut self, flags: u8, length: usize) -> Result<Frame> {
        if length < 4 {
            return Err(Error::protocol(format!("SYN_REPLY frame length {} < 4", length)));
        }
        let stream_id = self.read_u32()? & STREAM_ID_MASK;
        let headers = self.read_header_block(length - 4)?;

        Ok(Frame::SynReply {
            stream_id,
            in_finished: flags & flags::FIN != 0,
            headers,
        })
    }

    fn read_headers(&mut self, length: usize) -> Result<Frame> {
        if length < 4 {
            return Err(Error::protocol(format!("HEADERS frame length {} < 4", length)));
        }
        let stream_id = self.read_u32()? & STREAM_ID_MASK;
        let headers = self.read_header_block(length - 4)?;

        Ok(Frame::Headers { stream_id, headers })
    }

    fn read_rst_stream(&mut self, length: usize) -> Result<Frame> {
        if length != 8 {
            return Err(Error::protocol(format!(
                "RST_STREAM frame length {} != 8",
                length
            )));
        }
        let stream_id = self.read_u32()? & STREAM_ID_MASK;
        let raw = self.read_u32()?;
        let code = ErrorCode::from_rst_code(raw).ok_or_else(|| {
            Error::protocol(format!("RST_STREAM unexpected error code: {}", raw))
        })?;

        Ok(Frame::RstStream { stream_id, code })
    }

    fn read_settings(&mut self, flags: u8, length: usize) -> Result<Frame> {
        if length < 4 {
            return Err(Error::protocol(format!("SETTINGS frame length {} < 4", length)));
        }
        let count = self.read_u32()?;
        if length as u64 != 4 + 8 * count as u64 {
            return Err(Error::protocol(format!(
                "SETTINGS frame length {} != 4 + 8 * {}",
                length, count
            )));
        }

        let mut settings = Settings::new();
        for _ in 0..count {
            let w1 = self.read_u32()?;
            let value = self.read_u32()?;
            let id_flags = ((w1 & 0xFF00_0000) >> 24) as u8;
            let id = w1 & 0xFF_FFFF;
            settings.set(id, id_flags, value);
        }

        Ok(Frame::Settings {
            clear_previous: flags & flags::CLEAR_PREVIOUSLY_PERSISTED_SETTINGS != 0,
            settings,
        })
    }

    fn read_ping(&mut self, length: usize) -> Result<Frame> {
        if length != 4 {
            return Err(Error::protocol(format!("PING frame length {} != 4", length)));
        }
        let id = self.read_u32()?;
        // Clients send odd ping ids, servers even ones
        let reply = self.client == (id % 2 == 1);

        Ok(Frame::Ping { reply, id })
    }

    fn read_go_away(&mut self, length: usize) -> Result<Frame> {
        if length != 8 {
            return Err(Error::protocol(format!("GOAWAY frame length {} != 8", length)));
        }
        let last_good_stream_id = self.read_u32()? & STREAM_ID_MASK;
        let raw = self.read_u32()?;
        let code = ErrorCode::from_goaway_code(raw).ok_or_else(|| {
            Error::protocol(format!("GOAWAY unexpected error code: {}", raw))
        })?;

        Ok(Frame::GoAway {
            last_good_stream_id,
            code,
        })
    }

    fn read_window_update(&mut self, length: usize) -> Result<Frame> {
        if length != 8 {
            return Err(Error::protocol(format!(
                "WINDOW_UPDATE frame length {} != 8",
                length
            )));
        }
        let stream_id = self.read_u32()? & STREAM_ID_MASK;
        let delta_window_size = self.read_u32()? & 0x7FFF_FFFF;
        if delta_window_size == 0 {
            return Err(Error::protocol("WINDOW_UPDATE increment was 0"));
        }

        Ok(Frame::WindowUpdate {
            stream_id,
            delta_window_size,
        })
    }

    fn read_header_block(&mut self, length: usize) -> Result<Vec<Header>> {
        if length > self.max_header_block_size {
            return Err(Error::protocol(format!(
                "Header block too large ({} bytes, max {})",
                length, self.max_header_block_size
            )));
        }
        let mut block = vec![0u8; length];
        self.source.read_exact(&mut block)?;
        self.decoder.decode(&block)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.source.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.source.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn skip(&mut self, length: usize) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.source).take(length as u64), &mut io::sink())?;
        if skipped != length as u64 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated control frame",
            )));
        }
        Ok(())
    }
}
