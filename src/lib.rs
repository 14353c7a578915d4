//! Rota Relay - IP-rotating HTTP relay
//!
//! Relays client requests through a pool of remote forwarding endpoints so
//! that the apparent source IP of outbound traffic varies across the pool.
//!
//! ## Features
//!
//! - Target URL taken from the request path, a `url` query parameter or the
//!   `X-Target-URL` header
//! - Random and round-robin endpoint rotation
//! - Streaming pass-through of endpoint responses
//! - CONNECT tunnels
//! - Background process lifecycle (start/stop/status)
//! - Endpoint probing

pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, Result};
