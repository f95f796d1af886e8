//! ibdesk-server: JSON-RPC tool server over an Interactive Brokers desk.
//!
//! Loads configuration, exposes the desk's operations as named tools, and
//! serves them as line-delimited JSON-RPC over stdio or TCP.

pub mod commands;
pub mod config;
pub mod error;
pub mod rpc;
pub mod tools;
