//! Harmonic Hub: network front end for the shared harmonic field.
//!
//! Three listeners share one `FieldHub`:
//! - stream: persistent sessions exchanging newline-delimited JSON frames
//! - rpc: one-shot requests for polling and monitoring clients
//! - metrics: Prometheus text exposition over plain HTTP

pub mod config;
pub mod connection;
pub mod exposition;
pub mod rpc;
pub mod server;

pub use server::{serve, start, RunningHub};
