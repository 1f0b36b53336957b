//! MineOS App Market Proxy Library
//!
//! This module exposes the proxy's building blocks for use in integration tests.

pub mod cli;
pub mod config;
pub mod freshness;
pub mod proxy;
pub mod record;
pub mod server;
pub mod store;
pub mod upstream;
