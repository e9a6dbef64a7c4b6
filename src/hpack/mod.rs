//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! One [`HpackEncoder`] and one [`HpackDecoder`] exist per connection
//! direction. Each owns a dynamic table that must stay in lock-step with the
//! peer's, so header blocks have to be compressed in the exact order they
//! are written and decompressed in the exact order they arrive.

pub mod huffman;
pub mod integer;
pub mod table;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{H2Error, Result};
use integer::{decode_integer, encode_integer};
use table::{DynamicTable, DEFAULT_MAX_TABLE_SIZE, STATIC_TABLE_LEN};

pub use table::ENTRY_OVERHEAD;

/// How a field may be stored in the peer's dynamic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indexing {
    /// Literal with incremental indexing (or an indexed reference).
    #[default]
    Incremental,
    /// Literal without indexing.
    WithoutIndexing,
    /// Literal never indexed; intermediaries must not index it either.
    NeverIndexed,
}

/// A single HTTP/2 header field.
///
/// Equality compares name and value only: the indexing directive is an
/// encoding hint and does not survive a round trip when an indexed
/// reference is used.
#[derive(Debug, Clone, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
    pub indexing: Indexing,
}

impl PartialEq for HeaderField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            indexing: Indexing::Incremental,
        }
    }

    /// A field that must never enter a compression table (credentials, cookies).
    pub fn sensitive(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value).with_indexing(Indexing::NeverIndexed)
    }

    pub fn with_indexing(mut self, indexing: Indexing) -> Self {
        self.indexing = indexing;
        self
    }

    /// RFC 7541 entry size: name + value + 32.
    pub fn size(&self) -> usize {
        table::entry_size(self.name.as_bytes(), self.value.as_bytes())
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }

    fn from_raw(name: &[u8], value: &[u8], indexing: Indexing) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
            indexing,
        }
    }
}

/// Ordered list of header fields, as carried by one header block.
pub type HeadersList = Vec<HeaderField>;

/// SETTINGS_MAX_HEADER_LIST_SIZE accounting for a list.
pub fn header_list_size(headers: &[HeaderField]) -> usize {
    headers.iter().map(HeaderField::size).sum()
}

/// HPACK encoder: one per connection, used for every header block we send.
#[derive(Debug, Clone)]
pub struct HpackEncoder {
    table: DynamicTable,
    use_huffman: bool,
    /// Smallest bound set since the last block, when the bound changed.
    pending_size_update: Option<usize>,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(DEFAULT_MAX_TABLE_SIZE),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    pub fn set_use_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Re-bound the dynamic table (peer's SETTINGS_HEADER_TABLE_SIZE).
    /// The change is signalled at the start of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size == self.table.max_size() && self.pending_size_update.is_none() {
            return;
        }
        let smallest = self.pending_size_update.map_or(size, |s| s.min(size));
        self.pending_size_update = Some(smallest);
        self.table.set_max_size(size);
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Compress a header list into a header block fragment.
    pub fn compress(&mut self, headers: &[HeaderField]) -> Bytes {
        let mut dst = BytesMut::new();
        self.compress_into(headers, &mut dst);
        dst.freeze()
    }

    pub fn compress_into(&mut self, headers: &[HeaderField], dst: &mut BytesMut) {
        if let Some(smallest) = self.pending_size_update.take() {
            let current = self.table.max_size();
            if smallest < current {
                encode_integer(dst, smallest, 5, 0x20);
            }
            encode_integer(dst, current, 5, 0x20);
        }

        for field in headers {
            self.encode_field(field, dst);
        }
    }

    fn encode_field(&mut self, field: &HeaderField, dst: &mut BytesMut) {
        let name = field.name.as_bytes();
        let value = field.value.as_bytes();

        if field.indexing != Indexing::NeverIndexed {
            if let Some(index) = self.find(name, value) {
                encode_integer(dst, index, 7, 0x80);
                return;
            }
        }

        let name_index = self.find_name(name);
        let (prefix_bits, flags) = match field.indexing {
            Indexing::Incremental => (6, 0x40),
            Indexing::WithoutIndexing => (4, 0x00),
            Indexing::NeverIndexed => (4, 0x10),
        };

        match name_index {
            Some(index) => encode_integer(dst, index, prefix_bits, flags),
            None => {
                encode_integer(dst, 0, prefix_bits, flags);
                self.encode_string(name, dst);
            }
        }
        self.encode_string(value, dst);

        if field.indexing == Indexing::Incremental {
            let evicted = self
                .table
                .insert(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
            if evicted > 0 {
                trace!(evicted, size = self.table.size(), "hpack encoder evicted entries");
            }
        }
    }

    fn find(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        table::find_static(name, value).or_else(|| {
            self.table
                .find(name, value)
                .map(|i| STATIC_TABLE_LEN + i + 1)
        })
    }

    fn find_name(&self, name: &[u8]) -> Option<usize> {
        table::find_static_name(name)
            .or_else(|| self.table.find_name(name).map(|i| STATIC_TABLE_LEN + i + 1))
    }

    fn encode_string(&self, value: &[u8], dst: &mut BytesMut) {
        if self.use_huffman {
            let len = huffman::encoded_len(value);
            if len < value.len() {
                // High bit (0x80) signals Huffman-encoded string.
                encode_integer(dst, len, 7, 0x80);
                huffman::encode(value, dst);
                return;
            }
        }
        encode_integer(dst, value.len(), 7, 0x00);
        dst.extend_from_slice(value);
    }
}

/// HPACK decoder: one per connection, fed every header block we receive.
#[derive(Debug, Clone)]
pub struct HpackDecoder {
    table: DynamicTable,
    /// Upper bound a dynamic table size update may request.
    allowed_table_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(DEFAULT_MAX_TABLE_SIZE),
            allowed_table_size: DEFAULT_MAX_TABLE_SIZE,
        }
    }

    /// Our advertised SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_allowed_table_size(&mut self, size: usize) {
        self.allowed_table_size = size;
    }

    pub fn allowed_table_size(&self) -> usize {
        self.allowed_table_size
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decompress a complete header block. Any error leaves the context
    /// unusable and must be treated as a COMPRESSION_ERROR connection error.
    pub fn decompress(&mut self, block: &[u8]) -> Result<HeadersList> {
        let mut src = block;
        let mut headers = Vec::new();

        while let Some(&first) = src.first() {
            if first & 0x80 != 0 {
                // Indexed header field
                let index = decode_integer(&mut src, 7)?;
                if index == 0 {
                    return Err(H2Error::compression("indexed header field with index 0"));
                }
                let (name, value) = self.lookup(index)?;
                headers.push(HeaderField::from_raw(&name, &value, Indexing::Incremental));
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing
                let (name, value) = self.decode_literal(&mut src, 6)?;
                headers.push(HeaderField::from_raw(&name, &value, Indexing::Incremental));
                self.table.insert(name, value);
            } else if first & 0x20 != 0 {
                // Dynamic table size update
                if !headers.is_empty() {
                    return Err(H2Error::compression(
                        "dynamic table size update after header field",
                    ));
                }
                let size = decode_integer(&mut src, 5)?;
                if size > self.allowed_table_size {
                    return Err(H2Error::compression(format!(
                        "table size update {} exceeds allowed {}",
                        size, self.allowed_table_size
                    )));
                }
                self.table.set_max_size(size);
            } else {
                // Literal without indexing (0x00) or never indexed (0x10)
                let indexing = if first & 0x10 != 0 {
                    Indexing::NeverIndexed
                } else {
                    Indexing::WithoutIndexing
                };
                let (name, value) = self.decode_literal(&mut src, 4)?;
                headers.push(HeaderField::from_raw(&name, &value, indexing));
            }
        }

        Ok(headers)
    }

    fn lookup(&self, index: usize) -> Result<(Bytes, Bytes)> {
        if let Some((name, value)) = table::static_entry(index) {
            return Ok((Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes())));
        }
        self.table
            .get(index - STATIC_TABLE_LEN - 1)
            .map(|e| (e.name.clone(), e.value.clone()))
            .ok_or_else(|| H2Error::compression(format!("invalid table index {}", index)))
    }

    fn decode_literal(&self, src: &mut &[u8], prefix_bits: u8) -> Result<(Bytes, Bytes)> {
        let name_index = decode_integer(src, prefix_bits)?;
        let name = if name_index == 0 {
            decode_string(src)?
        } else {
            self.lookup(name_index)?.0
        };
        let value = decode_string(src)?;
        Ok((name, value))
    }
}

/// Decode a string literal (RFC 7541 Section 5.2).
fn decode_string(src: &mut &[u8]) -> Result<Bytes> {
    let huffman = src.first().is_some_and(|b| b & 0x80 != 0);
    let length = decode_integer(src, 7)?;
    if src.len() < length {
        return Err(H2Error::compression("string length exceeds buffer"));
    }
    let (data, rest) = src.split_at(length);
    *src = rest;

    if huffman {
        Ok(Bytes::from(huffman::decode(data)?))
    } else {
        Ok(Bytes::copy_from_slice(data))
    }
}
