//! Tests that any header block codec can stand in for HPACK

use std::io::Cursor;

use spdy_mux::{
    Config, Error, Frame, FrameReader, FrameWriter, Header, HeaderBlockDecoder,
    HeaderBlockEncoder, Result, Session,
};

use crate::support::{headers, Collector, SharedBuf};

/// `name=value` lines, uncompressed.
#[derive(Default)]
struct PlainText;

impl HeaderBlockEncoder for PlainText {
    fn encode(&mut self, headers: &[Header]) -> Result<Vec<u8>> {
        let mut out = String::new();
        for h in headers {
            out.push_str(&h.name);
            out.push('=');
            out.push_str(&h.value);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

impl HeaderBlockDecoder for PlainText {
    fn decode(&mut self, block: &[u8]) -> Result<Vec<Header>> {
        let text = std::str::from_utf8(block)
            .map_err(|e| Error::HeaderBlock(e.to_string()))?;
        text.lines()
            .map(|line| {
                line.split_once('=')
                    .map(|(n, v)| Header::new(n, v))
                    .ok_or_else(|| Error::HeaderBlock(format!("no '=' in {:?}", line)))
            })
            .collect()
    }
}

#[test]
fn test_frame_length_follows_block_length() {
    let mut writer = FrameWriter::with_encoder(Vec::new(), PlainText);
    writer.headers(0, 3, &headers(&[("a", "1"), ("bb", "22")])).unwrap();
    let bytes = writer.into_inner();

    // stream id (4) + "a=1\nbb=22\n" (10)
    assert_eq!(&bytes[5..8], &[0, 0, 14]);
    assert_eq!(&bytes[12..], b"a=1\nbb=22\n");
}

#[test]
fn test_reader_uses_supplied_decoder() {
    let mut writer = FrameWriter::with_encoder(Vec::new(), PlainText);
    writer.syn_reply(0, 1, &headers(&[("status", "200")])).unwrap();

    let mut reader = FrameReader::with_decoder(Cursor::new(writer.into_inner()), PlainText, true);
    let mut collector = Collector::default();
    reader.read_next(&mut collector).unwrap();

    assert_eq!(
        collector.frames,
        vec![Frame::SynReply {
            stream_id: 1,
            in_finished: false,
            headers: headers(&[("status", "200")]),
        }]
    );
}

#[test]
fn test_decoder_failure_surfaces_as_header_block_error() {
    let mut writer = FrameWriter::new(Vec::new());
    writer.headers(0, 1, &[]).unwrap();
    let mut bytes = writer.into_inner();
    bytes[7] += 6;
    bytes.extend_from_slice(b"broken");

    let mut reader = FrameReader::with_decoder(Cursor::new(bytes), PlainText, true);
    let result = reader.read_next(&mut Collector::default());
    assert!(matches!(result, Err(Error::HeaderBlock(_))));
}

#[test]
fn test_session_with_custom_encoder() {
    let out = SharedBuf::default();
    let session = Session::with_encoder(out.clone(), PlainText, Config::client());
    session
        .new_stream(headers(&[("method", "GET")]), false, true)
        .unwrap();

    let bytes = out.take();
    assert!(bytes.ends_with(b"method=GET\n"));
}
