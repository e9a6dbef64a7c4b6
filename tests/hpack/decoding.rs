//! Tests for HPACK decoding

use h2_engine::{ErrorCode, HeaderField, HpackDecoder, Indexing};

#[test]
fn test_decode_indexed_header() {
    let mut decoder = HpackDecoder::new();

    // 0x82 = indexed header, index 2 = :method: GET
    let headers = decoder.decompress(&[0x82]).unwrap();

    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].name, ":method");
    assert_eq!(headers[0].value, "GET");
}

#[test]
fn test_decode_multiple_indexed_headers() {
    let mut decoder = HpackDecoder::new();

    // 0x82 = :method: GET, 0x86 = :scheme: http, 0x84 = :path: /
    let headers = decoder.decompress(&[0x82, 0x86, 0x84]).unwrap();

    assert_eq!(
        headers,
        vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":path", "/"),
        ]
    );
}

#[test]
fn test_decode_literal_with_indexing_adds_entry() {
    let mut decoder = HpackDecoder::new();

    // RFC 7541 C.2.1: custom-key: custom-header
    let mut data = vec![0x40, 0x0a];
    data.extend_from_slice(b"custom-key");
    data.push(0x0d);
    data.extend_from_slice(b"custom-header");

    let headers = decoder.decompress(&data).unwrap();
    assert_eq!(headers[0], HeaderField::new("custom-key", "custom-header"));
    assert_eq!(decoder.table().len(), 1);
    assert_eq!(decoder.table().size(), 55);

    // Index 62 now refers to the new entry.
    let again = decoder.decompress(&[0xbe]).unwrap();
    assert_eq!(again[0], HeaderField::new("custom-key", "custom-header"));
}

#[test]
fn test_decode_never_indexed_keeps_directive() {
    let mut decoder = HpackDecoder::new();

    // RFC 7541 C.2.3: password: secret
    let mut data = vec![0x10, 0x08];
    data.extend_from_slice(b"password");
    data.push(0x06);
    data.extend_from_slice(b"secret");

    let headers = decoder.decompress(&data).unwrap();
    assert_eq!(headers[0].indexing, Indexing::NeverIndexed);
    assert!(decoder.table().is_empty());
}

#[test]
fn test_decode_huffman_request() {
    let mut decoder = HpackDecoder::new();

    // RFC 7541 C.4.1
    let data = [
        0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90,
        0xf4, 0xff,
    ];
    let headers = decoder.decompress(&data).unwrap();
    assert_eq!(headers[3], HeaderField::new(":authority", "www.example.com"));
}

#[test]
fn test_decode_invalid_index() {
    let mut decoder = HpackDecoder::new();
    let err = decoder.decompress(&[0xff, 0x00]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
    assert!(err.is_fatal());
}

#[test]
fn test_decode_index_zero() {
    let mut decoder = HpackDecoder::new();
    assert!(decoder.decompress(&[0x80]).is_err());
}

#[test]
fn test_decode_truncated_string() {
    let mut decoder = HpackDecoder::new();
    let err = decoder.decompress(&[0x40, 0x0a, b'a', b'b']).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
}

#[test]
fn test_size_update_above_allowed() {
    let mut decoder = HpackDecoder::new();
    decoder.set_allowed_table_size(100);
    // 0x3f 0xe1 0x1f = size update to 4096
    assert!(decoder.decompress(&[0x3f, 0xe1, 0x1f]).is_err());
}

#[test]
fn test_size_update_after_field_rejected() {
    let mut decoder = HpackDecoder::new();
    assert!(decoder.decompress(&[0x82, 0x20]).is_err());
}

#[test]
fn test_size_update_to_zero_clears_table() {
    let mut decoder = HpackDecoder::new();
    decoder
        .decompress(&[0x41, 0x03, b'f', b'o', b'o'])
        .unwrap();
    assert_eq!(decoder.table().len(), 1);

    decoder.decompress(&[0x20]).unwrap();
    assert!(decoder.table().is_empty());
    assert_eq!(decoder.table().max_size(), 0);
}
