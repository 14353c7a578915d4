//! Relay engine
//!
//! This module provides the relay functionality including:
//! - Target resolution from path, query or header
//! - Endpoint rotation strategies
//! - Forwarding through endpoints and streaming responses back
//! - CONNECT tunnels
//! - Endpoint probing

pub mod forwarder;
pub mod handler;
pub mod headers;
pub mod health;
pub mod response;
pub mod rotation;
pub mod server;
pub mod target;
pub mod tunnel;

pub use forwarder::{Forwarder, ForwarderConfig, InvocationConvention};
pub use handler::RelayHandler;
pub use health::EndpointProber;
pub use rotation::{create_selector, EndpointSelector, SelectionPolicy};
pub use server::RelayServer;
pub use tunnel::TunnelHandler;
