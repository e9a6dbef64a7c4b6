//! HPACK integration tests

mod decoding;
mod dynamic_table;
mod interop;
