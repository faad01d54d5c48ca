//! A connection that owns the stream table and routes decoded frames to
//! streams.
//!
//! One thread drives [`Session::run`] (or [`Session::read_next`]) over the
//! read half of a socket; any thread may open streams and write through them.
//! Frames are written through one [`FrameWriter`] behind a mutex.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::frame::{flags, Frame};
use crate::header_block::{Header, HeaderBlockDecoder, HeaderBlockEncoder, HpackEncoder};
use crate::reader::{FrameHandler, FrameReader};
use crate::settings::Settings;
use crate::stream::{Stream, StreamSink};
use crate::writer::FrameWriter;
use crate::{Error, ErrorCode, Result};

pub struct Session<W, E = HpackEncoder> {
    config: Config,
    me: Weak<Self>,
    writer: Mutex<FrameWriter<W, E>>,
    inner: Mutex<Inner>,
}

struct Inner {
    streams: HashMap<u32, Arc<Stream>>,
    incoming: VecDeque<Arc<Stream>>,
    next_stream_id: u32,
    next_ping_id: u32,
    pings: HashMap<u32, Instant>,
    peer_settings: Settings,
    /// Highest stream id the peer opened that we accepted.
    last_good_stream_id: u32,
    shutdown: bool,
    deferred: VecDeque<Deferred>,
}

/// Writes queued from contexts that must not block on the writer.
enum Deferred {
    RstStream(u32, ErrorCode),
    Ping(u32),
}

impl<W: Write + Send + 'static> Session<W, HpackEncoder> {
    pub fn new(sink: W, config: Config) -> Arc<Self> {
        Self::with_encoder(sink, HpackEncoder::new(), config)
    }
}

impl<W, E> Session<W, E>
where
    W: Write + Send + 'static,
    E: HeaderBlockEncoder + Send + 'static,
{
    pub fn with_encoder(sink: W, encoder: E, config: Config) -> Arc<Self> {
        let first_id = if config.client { 1 } else { 2 };
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            writer: Mutex::new(FrameWriter::with_encoder(sink, encoder)),
            inner: Mutex::new(Inner {
                streams: HashMap::new(),
                incoming: VecDeque::new(),
                next_stream_id: first_id,
                next_ping_id: first_id,
                pings: HashMap::new(),
                peer_settings: Settings::new(),
                last_good_stream_id: 0,
                shutdown: false,
                deferred: VecDeque::new(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A reader over the connection's read half, set up for this session's
    /// role and header block limit.
    pub fn frame_reader<R: Read>(&self, source: R) -> FrameReader<R> {
        FrameReader::new(source, self.config.client)
            .with_max_header_block_size(self.config.max_header_block_size)
    }

    /// Open a stream and send its SYN_STREAM.
    ///
    /// `out` keeps our half open for a request body; `in_` asks the peer for
    /// a response body.
    pub fn new_stream(&self, headers: Vec<Header>, out: bool, in_: bool) -> Result<Arc<Stream>> {
        let mut syn_flags = 0;
        if !out {
            syn_flags |= flags::FIN;
        }
        if !in_ {
            syn_flags |= flags::UNIDIRECTIONAL;
        }

        // Hold the writer so SYN_STREAMs go out in id order
        let mut writer = self.writer();
        let stream = {
            let mut inner = self.inner();
            if inner.shutdown {
                return Err(Error::Shutdown);
            }
            let id = inner.next_stream_id;
            inner.next_stream_id += 2;
            let stream = Arc::new(Stream::new(
                id,
                syn_flags,
                0,
                headers.clone(),
                &self.config,
                self.sink_ref(),
            ));
            if stream.is_open() {
                inner.streams.insert(id, Arc::clone(&stream));
            }
            stream
        };

        debug!(stream_id = stream.id(), flags = syn_flags, "opening stream");
        writer.syn_stream(syn_flags, stream.id(), 0, 0, 0, &headers)?;
        Ok(stream)
    }

    /// Decode and dispatch one frame, then write anything that was deferred.
    ///
    /// A connection-fatal error resets every stream with PROTOCOL_ERROR
    /// before it is returned.
    pub fn read_next<R: Read, D: HeaderBlockDecoder>(
        &self,
        reader: &mut FrameReader<R, D>,
    ) -> Result<bool> {
        let mut dispatch = Dispatch { session: self };
        match reader.read_next(&mut dispatch) {
            Ok(more) => {
                self.flush_deferred()?;
                Ok(more)
            }
            Err(e) => {
                warn!(error = %e, "read loop failed");
                if e.is_connection_fatal() {
                    self.fail_streams(ErrorCode::ProtocolError);
                }
                Err(e)
            }
        }
    }

    /// Read frames until the peer closes the connection.
    pub fn run<R: Read, D: HeaderBlockDecoder>(&self, mut reader: FrameReader<R, D>) -> Result<()> {
        while self.read_next(&mut reader)? {}
        debug!("connection closed by peer");
        self.fail_streams(ErrorCode::Cancel);
        Ok(())
    }

    /// Next stream opened by the peer, if any.
    pub fn accept_stream(&self) -> Option<Arc<Stream>> {
        self.inner().incoming.pop_front()
    }

    pub fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.inner().streams.get(&id).cloned()
    }

    pub fn open_stream_count(&self) -> usize {
        self.inner().streams.len()
    }

    pub fn peer_settings(&self) -> Settings {
        self.inner().peer_settings.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner().shutdown
    }

    /// Send a PING and return its id. The reply is matched by the read loop.
    pub fn ping(&self) -> Result<u32> {
        let id = {
            let mut inner = self.inner();
            let id = inner.next_ping_id;
            inner.next_ping_id += 2;
            inner.pings.insert(id, Instant::now());
            id
        };
        self.writer().ping(0, id)?;
        Ok(id)
    }

    /// Whether a ping we sent is still waiting for its reply.
    pub fn ping_outstanding(&self, id: u32) -> bool {
        self.inner().pings.contains_key(&id)
    }

    /// Send GOAWAY once and refuse new streams.
    pub fn shutdown(&self, code: ErrorCode) -> Result<()> {
        let last_good_stream_id = {
            let mut inner = self.inner();
            if inner.shutdown {
                return Ok(());
            }
            inner.shutdown = true;
            inner.last_good_stream_id
        };
        debug!(last_good_stream_id, %code, "sending GOAWAY");
        self.writer().go_away(0, last_good_stream_id, code)
    }

    pub fn write_settings(&self, settings: &Settings) -> Result<()> {
        self.writer().settings(0, settings)
    }

    fn flush_deferred(&self) -> Result<()> {
        let deferred: Vec<Deferred> = self.inner().deferred.drain(..).collect();
        if deferred.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer();
        for write in deferred {
            match write {
                Deferred::RstStream(stream_id, code) => writer.rst_stream(stream_id, code)?,
                Deferred::Ping(id) => writer.ping(0, id)?,
            }
        }
        Ok(())
    }

    /// Reset every stream locally so blocked readers and writers wake up.
    fn fail_streams(&self, code: ErrorCode) {
        let streams: Vec<Arc<Stream>> = {
            let mut inner = self.inner();
            inner.incoming.clear();
            inner.streams.drain().map(|(_, stream)| stream).collect()
        };
        for stream in streams {
            stream.receive_rst_stream(code);
        }
    }

    fn defer(&self, write: Deferred) {
        self.inner().deferred.push_back(write);
    }

    fn sink_ref(&self) -> Weak<dyn StreamSink> {
        self.me.clone()
    }

    fn writer(&self) -> MutexGuard<'_, FrameWriter<W, E>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_syn_stream(
        &self,
        stream_id: u32,
        priority: u8,
        syn_flags: u8,
        headers: Vec<Header>,
    ) -> Result<()> {
        let mut inner = self.inner();
        if inner.shutdown {
            debug!(stream_id, "ignoring SYN_STREAM after GOAWAY");
            return Ok(());
        }
        if let Some(previous) = inner.streams.get(&stream_id).cloned() {
            drop(inner);
            warn!(stream_id, "SYN_STREAM for a stream id in use");
            if !previous.close_later(ErrorCode::ProtocolError) {
                self.defer(Deferred::RstStream(stream_id, ErrorCode::ProtocolError));
            }
            return Ok(());
        }

        let stream = Arc::new(Stream::new(
            stream_id,
            syn_flags,
            priority,
            headers,
            &self.config,
            self.sink_ref(),
        ));
        inner.last_good_stream_id = inner.last_good_stream_id.max(stream_id);
        if stream.is_open() {
            inner.streams.insert(stream_id, Arc::clone(&stream));
        }
        inner.incoming.push_back(stream);
        debug!(stream_id, priority, "accepted stream");
        Ok(())
    }

    fn on_go_away(&self, last_good_stream_id: u32, code: ErrorCode) {
        let refused: Vec<Arc<Stream>> = {
            let mut inner = self.inner();
            inner.shutdown = true;
            inner
                .streams
                .values()
                .filter(|s| s.id() > last_good_stream_id && s.is_locally_initiated())
                .cloned()
                .collect()
        };
        debug!(last_good_stream_id, %code, refused = refused.len(), "GOAWAY received");
        for stream in refused {
            stream.receive_rst_stream(ErrorCode::RefusedStream);
        }
    }

    /// Look up a stream, queueing INVALID_STREAM when it is unknown.
    fn known_stream(&self, stream_id: u32, frame: &'static str) -> Option<Arc<Stream>> {
        let stream = self.stream(stream_id);
        if stream.is_none() {
            warn!(stream_id, frame, "frame for unknown stream");
            self.defer(Deferred::RstStream(stream_id, ErrorCode::InvalidStream));
        }
        stream
    }
}

impl<W, E> StreamSink for Session<W, E>
where
    W: Write + Send + 'static,
    E: HeaderBlockEncoder + Send + 'static,
{
    fn write_syn_reply(&self, stream_id: u32, flags: u8, headers: &[Header]) -> Result<()> {
        self.writer().syn_reply(flags, stream_id, headers)
    }

    fn write_data_frame(&self, frame: &[u8]) -> Result<()> {
        self.writer().write_prepared_data(frame)
    }

    fn write_rst_stream(&self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.writer().rst_stream(stream_id, code)
    }

    fn write_rst_stream_later(&self, stream_id: u32, code: ErrorCode) {
        self.defer(Deferred::RstStream(stream_id, code));
    }

    fn remove_stream(&self, stream_id: u32) {
        if self.inner().streams.remove(&stream_id).is_some() {
            trace!(stream_id, "removed from stream table");
        }
    }
}

/// Routes decoded frames into the session's streams.
struct Dispatch<'a, W, E> {
    session: &'a Session<W, E>,
}

impl<W, E> FrameHandler for Dispatch<'_, W, E>
where
    W: Write + Send + 'static,
    E: HeaderBlockEncoder + Send + 'static,
{
    fn data(
        &mut self,
        in_finished: bool,
        stream_id: u32,
        source: &mut dyn Read,
        length: usize,
    ) -> Result<()> {
        // Unread bytes of an unknown stream are drained by the reader
        let Some(stream) = self.session.known_stream(stream_id, "DATA") else {
            return Ok(());
        };
        match stream.receive_data(source, length) {
            Ok(()) | Err(Error::FlowControl { .. }) => {}
            Err(e) => return Err(e),
        }
        if in_finished {
            stream.receive_fin();
        }
        Ok(())
    }

    fn frame(&mut self, frame: Frame) -> Result<()> {
        let session = self.session;
        match frame {
            Frame::SynStream {
                stream_id,
                priority,
                in_finished,
                out_finished,
                headers,
                ..
            } => {
                let mut syn_flags = 0;
                if in_finished {
                    syn_flags |= flags::FIN;
                }
                if out_finished {
                    syn_flags |= flags::UNIDIRECTIONAL;
                }
                session.on_syn_stream(stream_id, priority, syn_flags, headers)?;
            }
            Frame::SynReply {
                stream_id,
                in_finished,
                headers,
            } => {
                if let Some(stream) = session.known_stream(stream_id, "SYN_REPLY") {
                    stream.receive_reply(headers);
                    if in_finished {
                        stream.receive_fin();
                    }
                }
            }
            Frame::Headers { stream_id, headers } => {
                if let Some(stream) = session.known_stream(stream_id, "HEADERS") {
                    stream.receive_headers(headers);
                }
            }
            Frame::RstStream { stream_id, code } => match session.stream(stream_id) {
                Some(stream) => stream.receive_rst_stream(code),
                None => debug!(stream_id, %code, "RST_STREAM for unknown stream"),
            },
            Frame::Settings {
                clear_previous,
                settings,
            } => {
                let mut inner = session.inner();
                if clear_previous {
                    inner.peer_settings = settings;
                } else {
                    inner.peer_settings.merge(&settings);
                }
                debug!(count = inner.peer_settings.len(), clear_previous, "peer settings");
            }
            Frame::Ping { reply: true, id } => match session.inner().pings.remove(&id) {
                Some(sent) => debug!(id, rtt = ?sent.elapsed(), "ping reply"),
                None => warn!(id, "unexpected ping reply"),
            },
            Frame::Ping { reply: false, id } => session.defer(Deferred::Ping(id)),
            Frame::GoAway {
                last_good_stream_id,
                code,
            } => session.on_go_away(last_good_stream_id, code),
            Frame::WindowUpdate {
                stream_id,
                delta_window_size,
            } => {
                // No outbound flow control; the frame is validated and dropped
                trace!(stream_id, delta_window_size, "WINDOW_UPDATE ignored");
            }
            Frame::Data { stream_id, .. } => {
                return Err(Error::protocol(format!(
                    "DATA for stream {} delivered as a control frame",
                    stream_id
                )));
            }
        }
        Ok(())
    }
}
