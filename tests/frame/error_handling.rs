//! Tests for frame-level validation errors

use h2_engine::{flags, Decoded, ErrorCode, Frame, H2Codec};

fn decode_err(bytes: &[u8]) -> h2_engine::H2Error {
    match Frame::decode(bytes, 16_384) {
        Err(err) => err,
        Ok(Decoded::Frame { frame, .. }) => panic!("decoded {:?}", frame),
        Ok(Decoded::Incomplete { needed }) => panic!("incomplete, needed {}", needed),
    }
}

#[test]
fn test_oversized_frame_is_frame_size_error() {
    let err = decode_err(&[0, 0x40, 0x01, 0, 0, 0, 0, 0, 1]);
    assert_eq!(err.code(), ErrorCode::FrameSizeError);
    assert!(err.is_fatal());
}

#[test]
fn test_larger_max_frame_size_accepts_frame() {
    let mut data = vec![0, 0x40, 0x01, 0, 0, 0, 0, 0, 1];
    data.resize(9 + 0x4001, 0);
    assert!(matches!(
        Frame::decode(&data, 1 << 20).unwrap(),
        Decoded::Frame { .. }
    ));
}

#[test]
fn test_window_update_too_short_returns_error() {
    let err = decode_err(&[0, 0, 2, 8, 0, 0, 0, 0, 1, 0, 0]);
    assert!(err.to_string().contains("WINDOW_UPDATE"));
}

#[test]
fn test_ping_too_short_returns_error() {
    let err = decode_err(&[0, 0, 4, 6, 0, 0, 0, 0, 0, 1, 2, 3, 4]);
    assert!(err.to_string().contains("PING"));
}

#[test]
fn test_goaway_too_short_returns_error() {
    let err = decode_err(&[0, 0, 4, 7, 0, 0, 0, 0, 0, 0, 0, 0, 5]);
    assert!(err.to_string().contains("GOAWAY"));
}

#[test]
fn test_rst_stream_too_short_returns_error() {
    let err = decode_err(&[0, 0, 2, 3, 0, 0, 0, 0, 1, 0, 0]);
    assert!(err.to_string().contains("RST_STREAM"));
}

#[test]
fn test_settings_length_not_multiple_of_six() {
    let err = decode_err(&[0, 0, 5, 4, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
    assert_eq!(err.code(), ErrorCode::FrameSizeError);
}

#[test]
fn test_data_on_stream_zero_is_protocol_error() {
    let err = decode_err(&[0, 0, 1, 0, 0, 0, 0, 0, 0, b'x']);
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_ping_on_stream_is_protocol_error() {
    let err = decode_err(&[0, 0, 8, 6, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_padding_longer_than_payload() {
    let err = decode_err(&[0, 0, 2, 0, flags::PADDED, 0, 0, 0, 1, 5, b'x']);
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_priority_wrong_size_is_stream_error() {
    let err = decode_err(&[0, 0, 4, 2, 0, 0, 0, 0, 3, 0, 0, 0, 1]);
    assert_eq!(err.code(), ErrorCode::FrameSizeError);
    assert!(!err.is_fatal());
}

#[test]
fn test_codec_surfaces_frame_errors() {
    let mut codec = H2Codec::new();
    let result = codec.process(&[0, 0, 2, 8, 0, 0, 0, 0, 1, 0, 0]);
    assert!(result.is_err());
}
