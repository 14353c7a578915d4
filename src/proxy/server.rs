//! Relay server implementation using hyper
//!
//! Accepts inbound connections and hands every request to the relay handler.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::{format_bind_addr, RelayServerConfig};
use crate::error::{RelayError, Result};
use crate::proxy::forwarder::{Forwarder, ForwarderConfig};
use crate::proxy::handler::RelayHandler;
use crate::proxy::rotation::EndpointSelector;

/// Relay server
pub struct RelayServer {
    config: RelayServerConfig,
    handler: Arc<RelayHandler>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayServerConfig, selector: Arc<dyn EndpointSelector>) -> Result<Self> {
        let forwarder = Forwarder::new(ForwarderConfig {
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            convention: config.convention,
            egress_proxy: config.egress_proxy.clone(),
        })?;

        let handler = Arc::new(RelayHandler::new(selector, forwarder));

        Ok(Self { config, handler })
    }

    pub fn config(&self) -> &RelayServerConfig {
        &self.config
    }

    /// Selector shared with the handler, for pool refreshes
    pub fn selector(&self) -> Arc<dyn EndpointSelector> {
        self.handler.selector().clone()
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format_bind_addr(&self.config.host, self.config.port);
        TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Lifecycle(format!("failed to bind {}: {}", addr, e))
        })
    }

    /// Bind and serve until shutdown is signalled
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until shutdown is signalled
    #[instrument(skip(self, listener, shutdown))]
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(
            addr = %listener.local_addr()?,
            selection = %self.handler.selector().policy_name(),
            convention = %self.config.convention,
            endpoints = self.handler.selector().available_count(),
            "Relay server listening"
        );

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, client_addr, handler).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Relay server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        handler: Arc<RelayHandler>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req, client_addr).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await?;

        Ok(())
    }
}
