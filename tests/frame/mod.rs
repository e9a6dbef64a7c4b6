//! Frame layer integration tests

mod error_handling;
