//! The per-segment proxy server.
//!
//! One [`ProxyServer`] serves exactly one network segment: it binds that
//! segment's fixed internal address, owns that segment's [`HostFilter`], and
//! nothing else. Running a second segment means running a second process with
//! its own configuration — instances never share filters or upstream
//! credentials at runtime.
//!
//! Each accepted connection is handled in its own task; the filter is
//! read-only, so decisions are independent and stateless across connections.
//! Shutdown is signalled through a `watch` channel.

use super::connect::{UpstreamProxy, handle_connect, handle_http};
use super::error::ProxyError;
use super::filter::HostFilter;
use crate::allowlist::DomainPattern;
use crate::telemetry::{AuditEvent, AuditLogger};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything a connection handler needs, shared read-only.
pub struct ProxyContext {
    /// Segment this instance serves.
    pub segment: String,
    /// The instance's own hostname filter.
    pub filter: Arc<HostFilter>,
    /// Optional chained upstream proxy.
    pub upstream: Option<UpstreamProxy>,
    /// Hosts that bypass the upstream and connect directly.
    pub no_upstream: Vec<DomainPattern>,
    /// Audit logger.
    pub audit: Arc<AuditLogger>,
}

/// Configuration for one proxy instance.
pub struct ProxySettings {
    /// Segment name (for logs and audit events).
    pub segment: String,
    /// Address to listen on.
    pub listen: SocketAddr,
    /// The segment's hostname filter.
    pub filter: Arc<HostFilter>,
    /// Optional chained upstream proxy.
    pub upstream: Option<UpstreamProxy>,
    /// Patterns excluded from upstream chaining.
    pub no_upstream: Vec<DomainPattern>,
    /// Audit logger.
    pub audit: Arc<AuditLogger>,
}

/// The filtering forward proxy for one segment.
pub struct ProxyServer {
    ctx: Arc<ProxyContext>,
    listen: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Create a server from settings and a shutdown receiver.
    pub fn new(settings: ProxySettings, shutdown_rx: watch::Receiver<bool>) -> Self {
        let ctx = Arc::new(ProxyContext {
            segment: settings.segment,
            filter: settings.filter,
            upstream: settings.upstream,
            no_upstream: settings.no_upstream,
            audit: settings.audit,
        });

        Self {
            ctx,
            listen: settings.listen,
            shutdown_rx,
        }
    }

    /// Run the accept loop until the shutdown signal fires.
    pub async fn run(self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(self.listen).await?;
        let local = listener.local_addr()?;

        self.ctx.audit.log(AuditEvent::ProxyStart {
            segment: self.ctx.segment.clone(),
            listen: local.to_string(),
            patterns: self.ctx.filter.len(),
        });
        info!(
            "[{}] Proxy listening on {} with {} filter patterns",
            self.ctx.segment,
            local,
            self.ctx.filter.len()
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("[{}] Accepted connection from {}", self.ctx.segment, peer);
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) => {
                            warn!("[{}] Failed to accept connection: {}", self.ctx.segment, e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("[{}] Proxy shutting down", self.ctx.segment);
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle one client connection in its own task.
    fn spawn_connection_handler(&self, stream: tokio::net::TcpStream) {
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            let segment = ctx.segment.clone();
            if let Err(e) = handle_connection(stream, ctx).await {
                // Resets and broken pipes are routine client behavior.
                let text = e.to_string();
                if text.contains("reset") || text.contains("broken pipe") {
                    debug!("[{}] Connection ended: {}", segment, e);
                } else {
                    warn!("[{}] Connection error: {}", segment, e);
                }
            }
        });
    }
}

/// Serve HTTP/1.1 with upgrade support on one connection.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    ctx: Arc<ProxyContext>,
) -> Result<(), ProxyError> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { proxy_request(req, ctx).await }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Dispatch one request to the CONNECT or plain-HTTP path.
async fn proxy_request(
    req: Request<Incoming>,
    ctx: Arc<ProxyContext>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ProxyError> {
    if req.method() == Method::CONNECT {
        handle_connect(req, ctx).await
    } else {
        handle_http(req, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::{DomainSource, SourceTier, merge};

    fn test_settings() -> (ProxySettings, watch::Receiver<bool>) {
        let merged = merge(&[DomainSource {
            name: "test".to_string(),
            tier: SourceTier::Project,
            lines: vec!["github.com".to_string()],
        }]);

        let settings = ProxySettings {
            segment: "workspace".to_string(),
            listen: "127.0.0.1:0".parse().unwrap(),
            filter: Arc::new(HostFilter::from_merged(&merged)),
            upstream: None,
            no_upstream: Vec::new(),
            audit: Arc::new(AuditLogger::new_null()),
        };

        let (_tx, rx) = watch::channel(false);
        (settings, rx)
    }

    #[test]
    fn test_server_creation() {
        let (settings, rx) = test_settings();
        let server = ProxyServer::new(settings, rx);

        assert_eq!(server.ctx.segment, "workspace");
        assert_eq!(server.ctx.filter.len(), 1);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let (settings, _rx) = test_settings();
        let (tx, rx) = watch::channel(false);
        let server = ProxyServer::new(settings, rx);

        let handle = tokio::spawn(server.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("server should stop after shutdown signal")
            .unwrap();
        assert!(result.is_ok());
    }
}
