//! Shared fixtures for the integration test targets

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use spdy_mux::{
    Config, ErrorCode, Frame, FrameHandler, FrameReader, FrameWriter, Header, Result, Stream,
    StreamSink,
};

/// Collects every decoded frame, reading DATA payloads eagerly.
#[derive(Default)]
pub struct Collector {
    pub frames: Vec<Frame>,
}

impl FrameHandler for Collector {
    fn data(
        &mut self,
        in_finished: bool,
        stream_id: u32,
        source: &mut dyn Read,
        length: usize,
    ) -> Result<()> {
        let mut data = vec![0; length];
        source.read_exact(&mut data)?;
        self.frames.push(Frame::Data {
            stream_id,
            fin: in_finished,
            data,
        });
        Ok(())
    }

    fn frame(&mut self, frame: Frame) -> Result<()> {
        self.frames.push(frame);
        Ok(())
    }
}

pub fn encode(frames: &[Frame]) -> Vec<u8> {
    let mut writer = FrameWriter::new(Vec::new());
    for frame in frames {
        writer.write_frame(frame).unwrap();
    }
    writer.into_inner()
}

/// Decode until EOF with a reader playing `client`.
pub fn decode_all(bytes: Vec<u8>, client: bool) -> Result<Vec<Frame>> {
    let mut reader = FrameReader::new(Cursor::new(bytes), client);
    let mut collector = Collector::default();
    while reader.read_next(&mut collector)? {}
    Ok(collector.frames)
}

/// A `Write` whose bytes stay inspectable after the session takes ownership.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Records every call a stream makes into its connection.
#[derive(Default)]
pub struct RecordingSink {
    pub replies: Mutex<Vec<(u32, u8, Vec<Header>)>>,
    pub data: Mutex<Vec<Vec<u8>>>,
    pub rst: Mutex<Vec<(u32, ErrorCode)>>,
    pub rst_later: Mutex<Vec<(u32, ErrorCode)>>,
    pub removed: Mutex<Vec<u32>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every RST_STREAM, immediate or deferred, in call order per kind.
    pub fn all_rst(&self) -> Vec<(u32, ErrorCode)> {
        let mut all = self.rst.lock().unwrap().clone();
        all.extend(self.rst_later.lock().unwrap().iter().copied());
        all
    }

    pub fn removed(&self) -> Vec<u32> {
        self.removed.lock().unwrap().clone()
    }
}

impl StreamSink for RecordingSink {
    fn write_syn_reply(&self, stream_id: u32, flags: u8, headers: &[Header]) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((stream_id, flags, headers.to_vec()));
        Ok(())
    }

    fn write_data_frame(&self, frame: &[u8]) -> Result<()> {
        self.data.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn write_rst_stream(&self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.rst.lock().unwrap().push((stream_id, code));
        Ok(())
    }

    fn write_rst_stream_later(&self, stream_id: u32, code: ErrorCode) {
        self.rst_later.lock().unwrap().push((stream_id, code));
    }

    fn remove_stream(&self, stream_id: u32) {
        self.removed.lock().unwrap().push(stream_id);
    }
}

pub fn stream(
    sink: &Arc<RecordingSink>,
    id: u32,
    flags: u8,
    request_headers: Vec<Header>,
    config: &Config,
) -> Arc<Stream> {
    let sink: Arc<dyn StreamSink> = sink.clone();
    Arc::new(Stream::new(
        id,
        flags,
        0,
        request_headers,
        config,
        Arc::downgrade(&sink),
    ))
}

pub fn headers(pairs: &[(&str, &str)]) -> Vec<Header> {
    pairs.iter().map(|(n, v)| Header::new(*n, *v)).collect()
}

/// Write end of an in-memory pipe. Dropping it signals EOF to the reader.
pub struct PipeWriter(std::sync::mpsc::Sender<Vec<u8>>);

/// Read end of an in-memory pipe; blocks until bytes arrive.
pub struct PipeReader {
    rx: std::sync::mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = std::sync::mpsc::channel();
    (
        PipeWriter(tx),
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
