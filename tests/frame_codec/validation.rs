//! Tests for malformed control frames

use std::io::Cursor;

use spdy_mux::{frame_type, Error, FrameHeader, FrameReader};

use crate::support::Collector;

fn control(frame_type: u16, flags: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = FrameHeader::Control {
        version: 3,
        frame_type,
        flags,
        length: body.len() as u32,
    }
    .encode()
    .to_vec();
    frame.extend_from_slice(body);
    frame
}

/// Decode one frame, asserting it fails with a protocol error that names
/// `expected` and never reaches the handler.
fn assert_rejected(bytes: Vec<u8>, expected: &str) {
    let mut reader = FrameReader::new(Cursor::new(bytes), true);
    let mut collector = Collector::default();

    match reader.read_next(&mut collector) {
        Err(Error::Protocol(msg)) => assert!(msg.contains(expected), "Error: {}", msg),
        other => panic!("Expected protocol error mentioning {}, got {:?}", expected, other),
    }
    assert!(collector.frames.is_empty());
}

#[test]
fn test_fixed_length_frames_reject_other_lengths() {
    let cases = [
        (frame_type::RST_STREAM, "RST_STREAM", 8usize),
        (frame_type::PING, "PING", 4),
        (frame_type::GOAWAY, "GOAWAY", 8),
        (frame_type::WINDOW_UPDATE, "WINDOW_UPDATE", 8),
    ];
    for (frame_type, name, required) in cases {
        for length in [0usize, required - 1, required + 1, required + 8] {
            let mut body = vec![0u8; length];
            // Valid status code and increment where they would be read
            if length >= 8 {
                body[7] = 1;
            }
            assert_rejected(control(frame_type, 0, &body), name);
        }
    }
}

#[test]
fn test_window_update_zero_increment() {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(&0u32.to_be_bytes());
    assert_rejected(control(frame_type::WINDOW_UPDATE, 0, &body), "WINDOW_UPDATE");
}

#[test]
fn test_window_update_reserved_bit_only_is_zero() {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(&0x8000_0000u32.to_be_bytes());
    assert_rejected(control(frame_type::WINDOW_UPDATE, 0, &body), "WINDOW_UPDATE");
}

#[test]
fn test_settings_count_mismatch_rejected_before_entries() {
    // count = 2 but only one entry's worth of body (4 + 8 = 12 bytes)
    let mut body = 2u32.to_be_bytes().to_vec();
    body.extend_from_slice(&[0x00, 0x00, 0x00, 0x04]);
    body.extend_from_slice(&100u32.to_be_bytes());
    assert_eq!(body.len(), 12);

    assert_rejected(control(frame_type::SETTINGS, 0, &body), "SETTINGS");
}

#[test]
fn test_settings_shorter_than_count_field() {
    assert_rejected(control(frame_type::SETTINGS, 0, &[0, 0]), "SETTINGS");
}

#[test]
fn test_rst_stream_reserved_code_zero() {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(&0u32.to_be_bytes());
    assert_rejected(control(frame_type::RST_STREAM, 0, &body), "RST_STREAM");
}

#[test]
fn test_rst_stream_unknown_code() {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(&12u32.to_be_bytes());
    assert_rejected(control(frame_type::RST_STREAM, 0, &body), "RST_STREAM");
}

#[test]
fn test_goaway_unknown_code() {
    let mut body = 0u32.to_be_bytes().to_vec();
    body.extend_from_slice(&3u32.to_be_bytes());
    assert_rejected(control(frame_type::GOAWAY, 0, &body), "GOAWAY");
}

#[test]
fn test_syn_stream_too_short() {
    assert_rejected(control(frame_type::SYN_STREAM, 0, &[0u8; 9]), "SYN_STREAM");
}

#[test]
fn test_syn_reply_and_headers_too_short() {
    assert_rejected(control(frame_type::SYN_REPLY, 0, &[0u8; 3]), "SYN_REPLY");
    assert_rejected(control(frame_type::HEADERS, 0, &[0u8; 2]), "HEADERS");
}

#[test]
fn test_unsupported_version() {
    let mut bytes = FrameHeader::Control {
        version: 2,
        frame_type: frame_type::PING,
        flags: 0,
        length: 4,
    }
    .encode()
    .to_vec();
    bytes.extend_from_slice(&1u32.to_be_bytes());
    assert_rejected(bytes, "version");
}

#[test]
fn test_errors_are_connection_fatal() {
    let mut reader = FrameReader::new(Cursor::new(control(frame_type::PING, 0, &[0; 3])), true);
    let err = reader.read_next(&mut Collector::default()).unwrap_err();
    assert!(err.is_connection_fatal());
}
