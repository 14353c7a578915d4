//! CONNECT tunnel implementation
//!
//! Tunnels are raw TCP passthrough to the requested authority; they are not
//! routed through endpoints.

use std::time::Duration;

use hyper::Uri;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::config::format_bind_addr;
use crate::error::{RelayError, Result};

/// Handles CONNECT tunnel requests
pub struct TunnelHandler;

impl TunnelHandler {
    /// Parse `host:port` from a CONNECT request target
    pub fn parse_authority(uri: &Uri) -> Result<(String, u16)> {
        let authority = uri
            .authority()
            .ok_or_else(|| RelayError::ConnectFailed(format!("invalid authority: {}", uri)))?;

        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(RelayError::ConnectFailed(format!(
                "missing host: {}",
                authority
            )));
        }

        let port = authority
            .port_u16()
            .ok_or_else(|| RelayError::ConnectFailed(format!("missing port: {}", authority)))?;

        Ok((host.to_string(), port))
    }

    /// Dial the target directly within `connect_timeout`
    ///
    /// Refusals and timeouts are both `UpstreamUnreachable`.
    #[instrument]
    pub async fn connect_direct(
        target_host: &str,
        target_port: u16,
        connect_timeout: Duration,
    ) -> Result<TcpStream> {
        let addr = format_bind_addr(target_host, target_port);
        debug!("Establishing direct tunnel to {}", addr);

        tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                RelayError::UpstreamUnreachable(format!(
                    "connect to {} timed out after {:?}",
                    addr, connect_timeout
                ))
            })?
            .map_err(|e| RelayError::UpstreamUnreachable(format!("connect to {} failed: {}", addr, e)))
    }

    /// Copy data bidirectionally between two streams until both sides close
    #[instrument(skip(client, server))]
    pub async fn copy_bidirectional<C, S>(mut client: C, mut server: S) -> Result<(u64, u64)>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (bytes_sent, bytes_received) =
            tokio::io::copy_bidirectional(&mut client, &mut server)
                .await
                .unwrap_or_else(|e| {
                    debug!("Tunnel copy ended: {}", e);
                    (0, 0)
                });

        debug!(
            bytes_sent = bytes_sent,
            bytes_received = bytes_received,
            "Tunnel closed"
        );

        Ok((bytes_sent, bytes_received))
    }
}
