//! Tests for the HPACK header block codec inside frames

use std::io::Cursor;

use spdy_mux::{
    Error, Frame, FrameReader, FrameWriter, Header, HeaderBlockDecoder, HeaderBlockEncoder,
    HpackDecoder, HpackEncoder,
};

use crate::support::{headers, Collector};

#[test]
fn test_encode_decode_roundtrip() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let list = headers(&[("status", "200"), ("content-type", "application/json")]);

    let encoded = encoder.encode(&list).unwrap();
    assert_eq!(decoder.decode(&encoded).unwrap(), list);
}

#[test]
fn test_empty_header_list() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    let encoded = encoder.encode(&[]).unwrap();
    assert!(decoder.decode(&encoded).unwrap().is_empty());
}

#[test]
fn test_large_header_value_survives_framing() {
    let big = "v".repeat(10_000);
    let list = vec![Header::new("x-large", big.clone())];

    let mut writer = FrameWriter::new(Vec::new());
    writer.syn_reply(0, 1, &list).unwrap();
    let mut reader = FrameReader::new(Cursor::new(writer.into_inner()), true);
    let mut collector = Collector::default();
    reader.read_next(&mut collector).unwrap();

    match &collector.frames[0] {
        Frame::SynReply { headers, .. } => assert_eq!(headers[0].value, big),
        other => panic!("Expected SynReply, got {:?}", other),
    }
}

#[test]
fn test_header_block_limit_applies_to_syn_stream() {
    let list = vec![Header::new("x-large", "v".repeat(4_000))];
    let mut writer = FrameWriter::new(Vec::new());
    writer.syn_stream(0, 1, 0, 0, 0, &list).unwrap();

    let mut reader =
        FrameReader::new(Cursor::new(writer.into_inner()), false).with_max_header_block_size(1024);
    let mut collector = Collector::default();
    match reader.read_next(&mut collector) {
        Err(Error::Protocol(msg)) => assert!(msg.contains("Header block too large")),
        other => panic!("Expected protocol error, got {:?}", other),
    }
    assert!(collector.frames.is_empty());
}

#[test]
fn test_corrupt_block_is_connection_fatal() {
    // SYN_REPLY for stream 1 whose block indexes past every table
    let mut bytes = vec![0x80, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x08];
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x0F]);

    let mut reader = FrameReader::new(Cursor::new(bytes), true);
    let err = reader.read_next(&mut Collector::default()).unwrap_err();
    assert!(matches!(err, Error::HeaderBlock(_)));
    assert!(err.is_connection_fatal());
}
