//! Integration test entry point for lanfolder-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod handshake;
mod file_update;
mod http;
