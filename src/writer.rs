//! Frame encoding onto a byte sink.
//!
//! Every method emits exactly one complete frame with a single `write_all`
//! and flushes, so frames never interleave when the writer is shared behind
//! a lock.

use std::io::Write;

use tracing::trace;

use crate::frame::{
    flags, frame_type, Frame, FrameHeader, FRAME_HEADER_LENGTH, MAX_FRAME_LENGTH,
    STREAM_ID_MASK, VERSION,
};
use crate::header_block::{Header, HeaderBlockEncoder, HpackEncoder};
use crate::settings::Settings;
use crate::{Error, ErrorCode, Result};

pub struct FrameWriter<W, E = HpackEncoder> {
    sink: W,
    encoder: E,
}

impl<W: Write> FrameWriter<W, HpackEncoder> {
    pub fn new(sink: W) -> Self {
        Self::with_encoder(sink, HpackEncoder::new())
    }
}

impl<W: Write, E: HeaderBlockEncoder> FrameWriter<W, E> {
    pub fn with_encoder(sink: W, encoder: E) -> Self {
        Self { sink, encoder }
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Encode any [`Frame`]; dispatches to the per-type methods.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        match frame {
            Frame::Data {
                stream_id,
                fin,
                data,
            } => self.data(fin_flag(*fin), *stream_id, data),
            Frame::SynStream {
                stream_id,
                associated_stream_id,
                priority,
                slot,
                in_finished,
                out_finished,
                headers,
            } => {
                let mut f = fin_flag(*in_finished);
                if *out_finished {
                    f |= flags::UNIDIRECTIONAL;
                }
                self.syn_stream(f, *stream_id, *associated_stream_id, *priority, *slot, headers)
            }
            Frame::SynReply {
                stream_id,
                in_finished,
                headers,
            } => self.syn_reply(fin_flag(*in_finished), *stream_id, headers),
            Frame::RstStream { stream_id, code } => self.rst_stream(*stream_id, *code),
            Frame::Settings {
                clear_previous,
                settings,
            } => {
                let f = match clear_previous {
                    true => flags::CLEAR_PREVIOUSLY_PERSISTED_SETTINGS,
                    false => 0,
                };
                self.settings(f, settings)
            }
            // The reply bit is implied by the id's parity
            Frame::Ping { id, .. } => self.ping(0, *id),
            Frame::GoAway {
                last_good_stream_id,
                code,
            } => self.go_away(0, *last_good_stream_id, *code),
            Frame::Headers { stream_id, headers } => self.headers(0, *stream_id, headers),
            Frame::WindowUpdate {
                stream_id,
                delta_window_size,
            } => self.window_update(*stream_id, *delta_window_size),
        }
    }

    pub fn syn_stream(
        &mut self,
        flags: u8,
        stream_id: u32,
        associated_stream_id: u32,
        priority: u8,
        slot: u8,
        headers: &[Header],
    ) -> Result<()> {
        let block = self.encoder.encode(headers)?;
        let mut body = Vec::with_capacity(10 + block.len());
        body.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
        body.extend_from_slice(&(associated_stream_id & STREAM_ID_MASK).to_be_bytes());
        let s3 = ((priority as u16 & 0x7) << 13) | slot as u16;
        body.extend_from_slice(&s3.to_be_bytes());
        body.extend_from_slice(&block);
        self.control_frame(frame_type::SYN_STREAM, flags, &body)
    }

    pub fn syn_reply(&mut self, flags: u8, stream_id: u32, headers: &[Header]) -> Result<()> {
        self.stream_headers(frame_type::SYN_REPLY, flags, stream_id, headers)
    }

    pub fn headers(&mut self, flags: u8, stream_id: u32, headers: &[Header]) -> Result<()> {
        self.stream_headers(frame_type::HEADERS, flags, stream_id, headers)
    }

    pub fn rst_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<()> {
        let raw = code
            .rst_code()
            .ok_or(Error::IllegalState("status code has no RST_STREAM value"))?;
        let mut body = [0u8; 8];
        body[..4].copy_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
        body[4..].copy_from_slice(&raw.to_be_bytes());
        self.control_frame(frame_type::RST_STREAM, 0, &body)
    }

    pub fn settings(&mut self, flags: u8, settings: &Settings) -> Result<()> {
        let mut body = Vec::with_capacity(4 + 8 * settings.len());
        body.extend_from_slice(&(settings.len() as u32).to_be_bytes());
        for (id, id_flags, value) in settings.iter() {
            let w1 = ((id_flags as u32) << 24) | (id & 0xFF_FFFF);
            body.extend_from_slice(&w1.to_be_bytes());
            body.extend_from_slice(&value.to_be_bytes());
        }
        self.control_frame(frame_type::SETTINGS, flags, &body)
    }

    pub fn ping(&mut self, flags: u8, id: u32) -> Result<()> {
        self.control_frame(frame_type::PING, flags, &id.to_be_bytes())
    }

    pub fn go_away(&mut self, flags: u8, last_good_stream_id: u32, code: ErrorCode) -> Result<()> {
        let raw = code
            .goaway_code()
            .ok_or(Error::IllegalState("status code has no GOAWAY value"))?;
        let mut body = [0u8; 8];
        body[..4].copy_from_slice(&(last_good_stream_id & STREAM_ID_MASK).to_be_bytes());
        body[4..].copy_from_slice(&raw.to_be_bytes());
        self.control_frame(frame_type::GOAWAY, flags, &body)
    }

    pub fn window_update(&mut self, stream_id: u32, delta_window_size: u32) -> Result<()> {
        if delta_window_size == 0 || delta_window_size > 0x7FFF_FFFF {
            return Err(Error::IllegalState(
                "window size increment must be in 1..=0x7fffffff",
            ));
        }
        let mut body = [0u8; 8];
        body[..4].copy_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
        body[4..].copy_from_slice(&delta_window_size.to_be_bytes());
        self.control_frame(frame_type::WINDOW_UPDATE, 0, &body)
    }

    pub fn data(&mut self, flags: u8, stream_id: u32, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_LENGTH {
            return Err(Error::FrameTooLarge(data.len()));
        }
        let header = FrameHeader::Data {
            stream_id,
            flags,
            length: data.len() as u32,
        };
        let mut frame = Vec::with_capacity(FRAME_HEADER_LENGTH + data.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(data);
        self.write_prepared_data(&frame)
    }

    /// Write a DATA frame whose header has already been laid out at the front
    /// of `frame`, as stream output buffers do.
    pub fn write_prepared_data(&mut self, frame: &[u8]) -> Result<()> {
        trace!(length = frame.len().saturating_sub(FRAME_HEADER_LENGTH), "writing DATA frame");
        self.sink.write_all(frame)?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    fn stream_headers(
        &mut self,
        frame_type: u16,
        flags: u8,
        stream_id: u32,
        headers: &[Header],
    ) -> Result<()> {
        let block = self.encoder.encode(headers)?;
        let mut body = Vec::with_capacity(4 + block.len());
        body.extend_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
        body.extend_from_slice(&block);
        self.control_frame(frame_type, flags, &body)
    }

    fn control_frame(&mut self, frame_type: u16, flags: u8, body: &[u8]) -> Result<()> {
        if body.len() > MAX_FRAME_LENGTH {
            return Err(Error::FrameTooLarge(body.len()));
        }
        let header = FrameHeader::Control {
            version: VERSION,
            frame_type,
            flags,
            length: body.len() as u32,
        };
        trace!(frame_type, flags, length = body.len(), "writing control frame");

        let mut frame = Vec::with_capacity(FRAME_HEADER_LENGTH + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(body);
        self.sink.write_all(&frame)?;
        self.sink.flush()?;
        Ok(())
    }
}

fn fin_flag(fin: bool) -> u8 {
    match fin {
        true => flags::FIN,
        false => 0,
    }
}
