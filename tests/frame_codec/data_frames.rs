//! Tests for DATA frame delivery and unknown control frames

use std::io::{Cursor, Read};

use spdy_mux::{flags, Frame, FrameHandler, FrameHeader, FrameReader, FrameWriter, Result};

use crate::support::Collector;

#[test]
fn test_handler_sees_bounded_payload() {
    struct Greedy(Vec<u8>);
    impl FrameHandler for Greedy {
        fn data(&mut self, _: bool, _: u32, source: &mut dyn Read, _: usize) -> Result<()> {
            source.read_to_end(&mut self.0)?;
            Ok(())
        }
        fn frame(&mut self, _: Frame) -> Result<()> {
            Ok(())
        }
    }

    let mut writer = FrameWriter::new(Vec::new());
    writer.data(0, 1, b"first").unwrap();
    writer.data(0, 1, b"second").unwrap();

    let mut reader = FrameReader::new(Cursor::new(writer.into_inner()), true);
    let mut greedy = Greedy(Vec::new());
    assert!(reader.read_next(&mut greedy).unwrap());
    assert_eq!(greedy.0, b"first");
}

#[test]
fn test_partially_read_data_keeps_framing() {
    struct OneByte;
    impl FrameHandler for OneByte {
        fn data(&mut self, _: bool, _: u32, source: &mut dyn Read, _: usize) -> Result<()> {
            let mut b = [0u8; 1];
            source.read_exact(&mut b)?;
            Ok(())
        }
        fn frame(&mut self, _: Frame) -> Result<()> {
            Ok(())
        }
    }

    let mut writer = FrameWriter::new(Vec::new());
    writer.data(0, 3, b"abcdefgh").unwrap();
    writer.data(flags::FIN, 3, b"xyz").unwrap();
    let mut reader = FrameReader::new(Cursor::new(writer.into_inner()), true);

    assert!(reader.read_next(&mut OneByte).unwrap());
    let mut collector = Collector::default();
    assert!(reader.read_next(&mut collector).unwrap());
    assert_eq!(
        collector.frames,
        vec![Frame::Data {
            stream_id: 3,
            fin: true,
            data: b"xyz".to_vec(),
        }]
    );
}

#[test]
fn test_truncated_data_payload_is_error() {
    let mut bytes = FrameHeader::Data {
        stream_id: 1,
        flags: 0,
        length: 10,
    }
    .encode()
    .to_vec();
    bytes.extend_from_slice(b"abc");

    let mut reader = FrameReader::new(Cursor::new(bytes), true);
    assert!(reader.read_next(&mut Collector::default()).is_err());
}

#[test]
fn test_unknown_control_frame_skipped() {
    // Type 5 (NOOP in older drafts) is not handled
    let mut bytes = FrameHeader::Control {
        version: 3,
        frame_type: 5,
        flags: 0,
        length: 6,
    }
    .encode()
    .to_vec();
    bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);

    let mut writer = FrameWriter::new(Vec::new());
    writer.ping(0, 2).unwrap();
    bytes.extend(writer.into_inner());

    let mut reader = FrameReader::new(Cursor::new(bytes), true);
    let mut collector = Collector::default();
    assert!(reader.read_next(&mut collector).unwrap());
    assert!(collector.frames.is_empty());

    assert!(reader.read_next(&mut collector).unwrap());
    assert_eq!(collector.frames, vec![Frame::Ping { reply: false, id: 2 }]);
    assert!(!reader.read_next(&mut collector).unwrap());
}

#[test]
fn test_oversized_data_rejected_by_writer() {
    let mut writer = FrameWriter::new(Vec::new());
    let payload = vec![0u8; spdy_mux::MAX_FRAME_LENGTH + 1];

    let result = writer.data(0, 1, &payload);
    assert!(matches!(result, Err(spdy_mux::Error::FrameTooLarge(_))));
    assert!(writer.get_ref().is_empty());
}
