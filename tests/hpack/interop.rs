//! Interoperability with an independent HPACK implementation (fluke-hpack)

use h2_engine::{HeaderField, HpackDecoder, HpackEncoder};

fn request_headers(i: usize) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", format!("/resource/{}", i)),
        HeaderField::new(":authority", "www.example.com"),
        HeaderField::new("user-agent", "h2-engine-test"),
        HeaderField::new("x-sequence", i.to_string()),
    ]
}

fn as_pairs(headers: &[HeaderField]) -> Vec<(Vec<u8>, Vec<u8>)> {
    headers
        .iter()
        .map(|h| (h.name.as_bytes().to_vec(), h.value.as_bytes().to_vec()))
        .collect()
}

#[test]
fn test_fluke_decodes_our_blocks() {
    let mut encoder = HpackEncoder::new();
    let mut fluke = fluke_hpack::Decoder::new();

    for i in 0..20 {
        let headers = request_headers(i);
        let block = encoder.compress(&headers);
        let decoded = fluke.decode(&block).unwrap();
        assert_eq!(decoded, as_pairs(&headers));
    }
}

#[test]
fn test_we_decode_fluke_blocks() {
    let mut fluke = fluke_hpack::Encoder::new();
    let mut decoder = HpackDecoder::new();

    for i in 0..20 {
        let headers = request_headers(i);
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        let block = fluke.encode(pairs);
        assert_eq!(decoder.decompress(&block).unwrap(), headers);
    }
}

#[test]
fn test_fluke_decodes_without_huffman() {
    let mut encoder = HpackEncoder::new();
    encoder.set_use_huffman(false);
    let mut fluke = fluke_hpack::Decoder::new();

    let headers = vec![
        HeaderField::new(":status", "404"),
        HeaderField::new("content-type", "text/plain"),
        HeaderField::sensitive("set-cookie", "id=42"),
    ];
    let block = encoder.compress(&headers);
    assert_eq!(fluke.decode(&block).unwrap(), as_pairs(&headers));
}
