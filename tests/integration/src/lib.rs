//! Integration test utilities for shardline
//!
//! Provides an in-process mock gateway (websocket, optional zlib-stream)
//! and a mock REST server for end-to-end tests.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
