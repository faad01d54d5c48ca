//! A single multiplexed stream: blocking inbound reads from a ring buffer,
//! chunked outbound writes, and the reset/half-close state machine.
//!
//! All mutable state lives in one `Mutex<StreamState>` paired with a
//! `Condvar`. The stream never calls back into the session while holding that
//! lock.

use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::frame::{flags, FrameHeader, FRAME_HEADER_LENGTH, MAX_FRAME_LENGTH};
use crate::header_block::Header;
use crate::{Error, ErrorCode, Result};

/// The connection side of a stream.
///
/// Streams hold a `Weak` reference to their sink; once the session is
/// dropped, operations that need to write fail with
/// [`Error::ConnectionClosed`].
pub trait StreamSink: Send + Sync {
    fn write_syn_reply(&self, stream_id: u32, flags: u8, headers: &[Header]) -> Result<()>;

    /// `frame` is a complete DATA frame, header included.
    fn write_data_frame(&self, frame: &[u8]) -> Result<()>;

    fn write_rst_stream(&self, stream_id: u32, code: ErrorCode) -> Result<()>;

    /// Queue an RST_STREAM to be written by the read loop. Used from contexts
    /// that must not block on the writer.
    fn write_rst_stream_later(&self, stream_id: u32, code: ErrorCode);

    /// Drop the stream from the session's table. Called at most once per
    /// stream, when it stops being open.
    fn remove_stream(&self, stream_id: u32);
}

pub struct Stream {
    id: u32,
    priority: u8,
    locally_initiated: bool,
    request_headers: Vec<Header>,
    sink: Weak<dyn StreamSink>,
    state: Mutex<StreamState>,
    cond: Condvar,
    outbound: Mutex<OutboundBuffer>,
}

struct StreamState {
    response_headers: Option<Vec<Header>>,
    reset: Option<ErrorCode>,
    inbound: InboundBuffer,
    out_finished: bool,
    out_closed: bool,
    read_timeout: Option<Duration>,
    removed: bool,
}

impl StreamState {
    fn is_open(&self) -> bool {
        self.reset.is_none()
            && !((self.inbound.finished || self.inbound.closed)
                && (self.out_finished || self.out_closed))
    }

    /// True exactly once: the first time the stream is seen not open.
    fn take_removal(&mut self) -> bool {
        if self.removed || self.is_open() {
            return false;
        }
        self.removed = true;
        true
    }
}

/// Ring buffer of received bytes. `pos` is the next byte to read and is
/// `None` when the buffer is empty; `limit` is the next byte to write.
struct InboundBuffer {
    buffer: Box<[u8]>,
    pos: Option<usize>,
    limit: usize,
    /// The peer sent FIN.
    finished: bool,
    /// The application closed its reader.
    closed: bool,
}

impl InboundBuffer {
    fn new(capacity: usize, finished: bool) -> Self {
        Self {
            buffer: vec![0; capacity].into_boxed_slice(),
            pos: None,
            limit: 0,
            finished,
            closed: false,
        }
    }

    fn available(&self) -> usize {
        match self.pos {
            None => 0,
            Some(pos) if self.limit > pos => self.limit - pos,
            Some(pos) => self.limit + (self.buffer.len() - pos),
        }
    }

    fn free(&self) -> usize {
        self.buffer.len() - self.available()
    }

    /// Append `data` to the free region. The caller has checked capacity.
    fn publish(&mut self, data: &[u8]) {
        let capacity = self.buffer.len();
        let first_new_byte = self.limit;
        let mut limit = self.limit;
        let mut remaining = data;

        // Free space runs to the end of the buffer before wrapping
        if self.pos.map_or(true, |pos| pos < limit) {
            let n = remaining.len().min(capacity - limit);
            self.buffer[limit..limit + n].copy_from_slice(&remaining[..n]);
            limit += n;
            remaining = &remaining[n..];
            if limit == capacity {
                limit = 0;
            }
        }

        if !remaining.is_empty() {
            self.buffer[limit..limit + remaining.len()].copy_from_slice(remaining);
            limit += remaining.len();
        }

        self.limit = limit;
        if self.pos.is_none() {
            self.pos = Some(first_new_byte);
        }
    }

    /// Copy out up to `out.len()` bytes. The buffer must not be empty.
    fn take(&mut self, mut pos: usize, out: &mut [u8]) -> usize {
        let capacity = self.buffer.len();
        let mut copied = 0;

        // Readable bytes wrap: drain [pos, capacity) first
        if self.limit <= pos {
            let n = out.len().min(capacity - pos);
            out[..n].copy_from_slice(&self.buffer[pos..pos + n]);
            copied += n;
            pos += n;
            if pos == capacity {
                pos = 0;
            }
        }

        if copied < out.len() {
            let n = (self.limit - pos).min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&self.buffer[pos..pos + n]);
            copied += n;
            pos += n;
        }

        if pos == self.limit {
            self.pos = None;
            self.limit = 0;
        } else {
            self.pos = Some(pos);
        }
        copied
    }
}

/// Outgoing bytes, laid out behind room for one DATA frame header.
struct OutboundBuffer {
    buffer: Box<[u8]>,
    pos: usize,
}

impl Stream {
    /// Create a stream from the flags byte of its SYN_STREAM.
    ///
    /// For a stream we opened, FLAG_UNIDIRECTIONAL means we will never
    /// receive data and FLAG_FIN means we sent none. For a stream the peer
    /// opened the meanings swap.
    pub fn new(
        id: u32,
        flags: u8,
        priority: u8,
        request_headers: Vec<Header>,
        config: &Config,
        sink: Weak<dyn StreamSink>,
    ) -> Self {
        let locally_initiated = (id % 2 == 1) == config.client;
        let fin = flags & flags::FIN != 0;
        let unidirectional = flags & flags::UNIDIRECTIONAL != 0;
        let (in_finished, out_finished) = match locally_initiated {
            true => (unidirectional, fin),
            false => (fin, unidirectional),
        };

        let outbound_size = config
            .outbound_buffer_size
            .clamp(FRAME_HEADER_LENGTH + 1, FRAME_HEADER_LENGTH + MAX_FRAME_LENGTH);

        Self {
            id,
            priority,
            locally_initiated,
            request_headers,
            sink,
            state: Mutex::new(StreamState {
                response_headers: None,
                reset: None,
                inbound: InboundBuffer::new(config.inbound_buffer_size.max(1), in_finished),
                out_finished,
                out_closed: false,
                read_timeout: config.read_timeout.filter(|t| !t.is_zero()),
                removed: false,
            }),
            cond: Condvar::new(),
            outbound: Mutex::new(OutboundBuffer {
                buffer: vec![0; outbound_size].into_boxed_slice(),
                pos: FRAME_HEADER_LENGTH,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn request_headers(&self) -> &[Header] {
        &self.request_headers
    }

    pub fn is_locally_initiated(&self) -> bool {
        self.locally_initiated
    }

    /// False once the stream has been reset or both halves are done. Never
    /// becomes true again.
    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub fn reset_code(&self) -> Option<ErrorCode> {
        self.lock().reset
    }

    /// Bytes buffered and not yet read.
    pub fn available(&self) -> usize {
        self.lock().inbound.available()
    }

    /// Block until the peer's reply arrives or the stream is reset.
    pub fn response_headers(&self) -> Result<Vec<Header>> {
        let mut state = self.lock();
        loop {
            if let Some(headers) = &state.response_headers {
                return Ok(headers.clone());
            }
            if let Some(code) = state.reset {
                return Err(self.reset_error(code));
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Send response headers on a stream the peer opened.
    pub fn reply(&self, headers: Vec<Header>, keep_output_open: bool) -> Result<()> {
        let (reply_flags, remove) = {
            let mut state = self.lock();
            if self.locally_initiated {
                return Err(Error::IllegalState("cannot reply to a locally initiated stream"));
            }
            if state.response_headers.is_some() {
                return Err(Error::IllegalState("reply already sent"));
            }
            state.response_headers = Some(headers.clone());
            let mut reply_flags = 0;
            if !keep_output_open {
                state.out_finished = true;
                reply_flags |= flags::FIN;
            }
            self.cond.notify_all();
            (reply_flags, state.take_removal())
        };

        debug!(stream_id = self.id, fin = reply_flags != 0, "replying");
        let result = self.sink()?.write_syn_reply(self.id, reply_flags, &headers);
        if remove {
            self.remove_from_session();
        }
        result
    }

    /// Reset the stream and write RST_STREAM now. Returns `Ok(false)` if the
    /// stream was already reset or had finished both halves.
    pub fn close(&self, code: ErrorCode) -> Result<bool> {
        if !self.close_internal(code) {
            return Ok(false);
        }
        self.sink()?.write_rst_stream(self.id, code)?;
        Ok(true)
    }

    /// Like [`close`](Self::close) but the RST_STREAM is queued for the read
    /// loop to write.
    pub fn close_later(&self, code: ErrorCode) -> bool {
        if !self.close_internal(code) {
            return false;
        }
        if let Some(sink) = self.sink.upgrade() {
            sink.write_rst_stream_later(self.id, code);
        }
        true
    }

    /// `None` or a zero duration blocks reads indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.lock().read_timeout = timeout.filter(|t| !t.is_zero());
    }

    pub fn reader(self: &Arc<Self>) -> StreamReader {
        StreamReader {
            stream: Arc::clone(self),
        }
    }

    /// Fails until a remote-initiated stream has been replied to.
    pub fn writer(self: &Arc<Self>) -> Result<StreamWriter> {
        let state = self.lock();
        if state.response_headers.is_none() && !self.locally_initiated {
            return Err(Error::IllegalState(
                "reply before requesting the output stream",
            ));
        }
        Ok(StreamWriter {
            stream: Arc::clone(self),
        })
    }

    pub fn receive_reply(&self, headers: Vec<Header>) {
        let outcome = {
            let mut state = self.lock();
            if self.locally_initiated && state.response_headers.is_none() {
                state.response_headers = Some(headers);
                self.cond.notify_all();
                Some(state.take_removal())
            } else {
                None
            }
        };

        match outcome {
            Some(remove) => {
                debug!(stream_id = self.id, "reply received");
                if remove {
                    self.remove_from_session();
                }
            }
            None => {
                warn!(stream_id = self.id, "unexpected SYN_REPLY");
                self.close_later(ErrorCode::StreamInUse);
            }
        }
    }

    pub fn receive_headers(&self, headers: Vec<Header>) {
        let appended = {
            let mut state = self.lock();
            match state.response_headers.as_mut() {
                Some(existing) => {
                    existing.extend(headers);
                    true
                }
                None => false,
            }
        };
        if !appended {
            warn!(stream_id = self.id, "HEADERS before SYN_REPLY");
            self.close_later(ErrorCode::ProtocolError);
        }
    }

    /// Buffer `length` bytes of a DATA frame from `source`.
    ///
    /// A frame larger than the free capacity is drained, the stream is reset
    /// with FLOW_CONTROL_ERROR and `Error::FlowControl` is returned; bytes
    /// already buffered stay readable.
    pub fn receive_data(&self, source: &mut dyn Read, length: usize) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        let (finished, free) = {
            let state = self.lock();
            (state.inbound.finished, state.inbound.free())
        };

        if length > free {
            drain(source, length)?;
            warn!(stream_id = self.id, length, free, "inbound buffer overflow");
            self.close_later(ErrorCode::FlowControlError);
            return Err(Error::FlowControl { stream_id: self.id });
        }

        if finished {
            drain(source, length)?;
            trace!(stream_id = self.id, length, "discarding data after FIN");
            return Ok(());
        }

        // Only the reader thread adds bytes, so `free` cannot shrink meanwhile
        let mut staging = vec![0u8; length];
        source.read_exact(&mut staging)?;

        let mut state = self.lock();
        state.inbound.publish(&staging);
        self.cond.notify_all();
        Ok(())
    }

    pub fn receive_fin(&self) {
        let remove = {
            let mut state = self.lock();
            state.inbound.finished = true;
            self.cond.notify_all();
            state.take_removal()
        };
        trace!(stream_id = self.id, "FIN received");
        if remove {
            self.remove_from_session();
        }
    }

    /// Record a reset from the peer. The first code wins.
    pub fn receive_rst_stream(&self, code: ErrorCode) {
        let remove = {
            let mut state = self.lock();
            if state.reset.is_none() {
                state.reset = Some(code);
                self.cond.notify_all();
            }
            state.take_removal()
        };
        debug!(stream_id = self.id, %code, "stream reset by peer");
        if remove {
            self.remove_from_session();
        }
    }

    fn read_inbound(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = self.lock();
        let mut state = self.wait_until_readable(state)?;

        if state.inbound.closed {
            return Err(Error::StreamClosed);
        }
        if let Some(code) = state.reset {
            return Err(self.reset_error(code));
        }
        let Some(pos) = state.inbound.pos else {
            // Empty and finished
            return Ok(0);
        };
        Ok(state.inbound.take(pos, buf))
    }

    fn wait_until_readable<'a>(
        &self,
        mut state: MutexGuard<'a, StreamState>,
    ) -> Result<MutexGuard<'a, StreamState>> {
        let deadline = state.read_timeout.map(|timeout| Instant::now() + timeout);
        while state.inbound.pos.is_none()
            && !state.inbound.finished
            && !state.inbound.closed
            && state.reset.is_none()
        {
            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        Ok(state)
    }

    fn close_inbound(&self) -> Result<()> {
        {
            let mut state = self.lock();
            state.inbound.closed = true;
            self.cond.notify_all();
        }
        self.cancel_if_necessary()
    }

    fn write_outbound(&self, mut data: &[u8]) -> Result<()> {
        self.check_out_writable()?;
        let mut out = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        while !data.is_empty() {
            let start = out.pos;
            let n = data.len().min(out.buffer.len() - start);
            out.buffer[start..start + n].copy_from_slice(&data[..n]);
            out.pos += n;
            data = &data[n..];
            if out.pos == out.buffer.len() {
                self.emit_data_frame(&mut out, false)?;
            }
        }
        Ok(())
    }

    fn flush_outbound(&self) -> Result<()> {
        self.check_out_writable()?;
        let mut out = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if out.pos > FRAME_HEADER_LENGTH {
            self.emit_data_frame(&mut out, false)?;
        }
        Ok(())
    }

    fn close_outbound(&self) -> Result<()> {
        let send_fin = {
            let mut state = self.lock();
            if state.out_closed {
                return Ok(());
            }
            state.out_closed = true;
            !state.out_finished && state.reset.is_none()
        };
        if send_fin {
            let mut out = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
            self.emit_data_frame(&mut out, true)?;
        }
        self.cancel_if_necessary()
    }

    fn check_out_writable(&self) -> Result<()> {
        let state = self.lock();
        if state.out_closed {
            return Err(Error::StreamClosed);
        }
        if state.out_finished {
            return Err(Error::StreamFinished);
        }
        if let Some(code) = state.reset {
            return Err(self.reset_error(code));
        }
        Ok(())
    }

    fn emit_data_frame(&self, out: &mut OutboundBuffer, fin: bool) -> Result<()> {
        let header = FrameHeader::Data {
            stream_id: self.id,
            flags: if fin { flags::FIN } else { 0 },
            length: (out.pos - FRAME_HEADER_LENGTH) as u32,
        };
        out.buffer[..FRAME_HEADER_LENGTH].copy_from_slice(&header.encode());
        let end = out.pos;
        out.pos = FRAME_HEADER_LENGTH;
        self.sink()?.write_data_frame(&out.buffer[..end])
    }

    /// Runs after either half is closed locally.
    ///
    /// With nothing left to send, an unfinished inbound half is only worth
    /// keeping if we opened the stream and are still reading the response.
    fn cancel_if_necessary(&self) -> Result<()> {
        let (cancel, remove) = {
            let mut state = self.lock();
            let cancel = !state.inbound.finished
                && (state.out_finished || state.out_closed)
                && (state.inbound.closed || !self.locally_initiated);
            match cancel {
                true => (true, false),
                false => (false, state.take_removal()),
            }
        };

        if cancel {
            debug!(stream_id = self.id, "cancelling half-closed stream");
            self.close(ErrorCode::Cancel)?;
        } else if remove {
            self.remove_from_session();
        }
        Ok(())
    }

    /// Set the reset status if none is set yet. Returns false for a no-op.
    fn close_internal(&self, code: ErrorCode) -> bool {
        let remove = {
            let mut state = self.lock();
            if state.reset.is_some() {
                return false;
            }
            if state.inbound.finished && state.out_finished {
                return false;
            }
            state.reset = Some(code);
            self.cond.notify_all();
            state.take_removal()
        };
        debug!(stream_id = self.id, %code, "stream reset locally");
        if remove {
            self.remove_from_session();
        }
        true
    }

    fn remove_from_session(&self) {
        debug!(stream_id = self.id, "stream no longer open");
        if let Some(sink) = self.sink.upgrade() {
            sink.remove_stream(self.id);
        }
    }

    fn sink(&self) -> Result<Arc<dyn StreamSink>> {
        self.sink.upgrade().ok_or(Error::ConnectionClosed)
    }

    fn reset_error(&self, code: ErrorCode) -> Error {
        Error::StreamReset {
            stream_id: self.id,
            code,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("locally_initiated", &self.locally_initiated)
            .field("open", &self.is_open())
            .finish()
    }
}

fn drain(source: &mut dyn Read, length: usize) -> Result<()> {
    let drained = io::copy(&mut source.take(length as u64), &mut io::sink())?;
    if drained != length as u64 {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated DATA frame",
        )));
    }
    Ok(())
}

/// The inbound half as [`std::io::Read`].
pub struct StreamReader {
    stream: Arc<Stream>,
}

impl StreamReader {
    /// Stop reading. Buffered bytes are discarded and later reads fail with
    /// [`Error::StreamClosed`].
    pub fn close(&self) -> Result<()> {
        self.stream.close_inbound()
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.stream.read_inbound(buf)?)
    }
}

/// The outbound half as [`std::io::Write`].
pub struct StreamWriter {
    stream: Arc<Stream>,
}

impl StreamWriter {
    /// Send any buffered bytes with FLAG_FIN. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.stream.close_outbound()
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write_outbound(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.stream.flush_outbound()?)
    }
}
