//! Request handling: CONNECT tunnels and plain HTTP forwarding.
//!
//! The flow for CONNECT is:
//!
//! 1. Client sends `CONNECT files.pypi.org:443 HTTP/1.1`
//! 2. The hostname is checked against the instance's [`HostFilter`]
//! 3. Allowed: `200 Connection Established`, upgrade, then opaque
//!    bidirectional forwarding to the destination (directly or through the
//!    segment's chained upstream proxy)
//! 4. Denied: `403 Forbidden` and an audit event
//!
//! The tunnel payload is never inspected or re-encrypted; admission is
//! decided on destination identity alone.
//!
//! Plain HTTP requests arrive in absolute form; the host is checked the same
//! way and the request is forwarded over a fresh client connection.

use super::error::{ProxyError, ProxyResult};
use super::filter::FilterDecision;
use super::server::ProxyContext;
use crate::telemetry::AuditEvent;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Upper bound on a chained proxy's CONNECT response headers.
const MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

/// A chained upstream HTTP proxy for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxy {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl UpstreamProxy {
    /// Parse an `http://host:port` upstream URL.
    ///
    /// Only plain HTTP upstreams are supported; anything else is a
    /// configuration error, not a silent downgrade.
    pub fn parse(url: &str) -> ProxyResult<Self> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| ProxyError::InvalidUpstream {
                url: url.to_string(),
                message: "only http:// upstream proxies are supported".to_string(),
            })?;
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| ProxyError::InvalidUpstream {
                    url: url.to_string(),
                    message: format!("invalid port '{}'", port),
                })?;
                (host, port)
            }
            None => (rest, 80),
        };

        if host.is_empty() {
            return Err(ProxyError::InvalidUpstream {
                url: url.to_string(),
                message: "missing host".to_string(),
            });
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Handle an HTTP CONNECT request.
///
/// Evaluates the filter for the target hostname, then either establishes an
/// opaque tunnel or refuses with 403. Every decision is audited.
pub async fn handle_connect(
    req: Request<Incoming>,
    ctx: Arc<ProxyContext>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let target = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::InvalidConnect("missing authority".into()))?
        .to_string();

    let (host, port) = parse_host_port(&target)?;
    debug!("[{}] CONNECT {}:{}", ctx.segment, host, port);

    match ctx.filter.evaluate(&host) {
        FilterDecision::Allow { pattern, tier } => {
            ctx.audit.log(AuditEvent::ProxyAllow {
                segment: ctx.segment.clone(),
                host: host.clone(),
                pattern: pattern.clone(),
                tier: tier.label().to_string(),
            });
            info!(
                "[{}] Allowing CONNECT to {}:{} (pattern: {})",
                ctx.segment, host, port, pattern
            );
            establish_tunnel(req, host, port, ctx).await
        }
        FilterDecision::Deny => {
            ctx.audit.log(AuditEvent::ProxyDeny {
                segment: ctx.segment.clone(),
                host: host.clone(),
            });
            info!("[{}] Denying CONNECT to {}:{}", ctx.segment, host, port);
            Ok(forbidden_response(&format!(
                "Connection to {} is not whitelisted",
                host
            )))
        }
    }
}

/// Handle a plain (non-CONNECT) HTTP request.
pub async fn handle_http(
    mut req: Request<Incoming>,
    ctx: Arc<ProxyContext>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let host = match request_host(&req) {
        Some(host) => host,
        None => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "Proxy request carries no host",
            ));
        }
    };
    let port = req.uri().port_u16().unwrap_or(80);

    match ctx.filter.evaluate(&host) {
        FilterDecision::Allow { pattern, tier } => {
            ctx.audit.log(AuditEvent::ProxyAllow {
                segment: ctx.segment.clone(),
                host: host.clone(),
                pattern,
                tier: tier.label().to_string(),
            });

            // A chained upstream speaks absolute-form proxy HTTP itself;
            // a direct origin connection expects origin-form.
            let stream = if use_upstream(&ctx, &host) {
                let upstream = ctx.upstream.as_ref().expect("checked by use_upstream");
                let addr = format!("{}:{}", upstream.host, upstream.port);
                TcpStream::connect(&addr)
                    .await
                    .map_err(|e| ProxyError::UpstreamConnect {
                        addr,
                        message: e.to_string(),
                    })?
            } else {
                let path = req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str().to_string())
                    .unwrap_or_else(|| "/".to_string());
                *req.uri_mut() = path
                    .parse::<Uri>()
                    .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

                let addr = format!("{}:{}", host, port);
                TcpStream::connect(&addr)
                    .await
                    .map_err(|e| ProxyError::UpstreamConnect {
                        addr,
                        message: e.to_string(),
                    })?
            };

            forward_http(req, stream).await
        }
        FilterDecision::Deny => {
            ctx.audit.log(AuditEvent::ProxyDeny {
                segment: ctx.segment.clone(),
                host: host.clone(),
            });
            info!("[{}] Denying HTTP request for {}", ctx.segment, host);
            Ok(forbidden_response(&format!(
                "Requests to {} are not whitelisted",
                host
            )))
        }
    }
}

/// Host of a plain proxy request: absolute-form URI first, Host header second.
fn request_host(req: &Request<Incoming>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(':').next().unwrap_or(v).to_string())
}

/// Respond 200 and forward bytes opaquely once the client upgrades.
async fn establish_tunnel(
    req: Request<Incoming>,
    host: String,
    port: u16,
    ctx: Arc<ProxyContext>,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = tunnel(upgraded, &host, port, &ctx).await {
                    // Connection resets are routine at tunnel teardown.
                    debug!("[{}] Tunnel ended for {}:{}: {}", ctx.segment, host, port, e);
                }
            }
            Err(e) => {
                warn!(
                    "[{}] HTTP upgrade failed for {}:{}: {}",
                    ctx.segment, host, port, e
                );
            }
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(empty_body())
        .expect("static response"))
}

/// Copy bytes between the upgraded client connection and the destination.
async fn tunnel(
    upgraded: hyper::upgrade::Upgraded,
    host: &str,
    port: u16,
    ctx: &ProxyContext,
) -> ProxyResult<()> {
    let mut server = open_target_stream(ctx, host, port).await?;
    let mut client = TokioIo::new(upgraded);

    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    debug!(
        "[{}] Tunnel to {}:{} closed ({} bytes out, {} bytes in)",
        ctx.segment, host, port, sent, received
    );
    Ok(())
}

/// Whether this host should be reached through the chained upstream proxy.
fn use_upstream(ctx: &ProxyContext, host: &str) -> bool {
    ctx.upstream.is_some() && !ctx.no_upstream.iter().any(|p| p.matches(host))
}

/// Open a TCP stream to the destination, chaining through the segment's
/// upstream proxy when one is configured and the host is not excluded.
async fn open_target_stream(
    ctx: &ProxyContext,
    host: &str,
    port: u16,
) -> ProxyResult<TcpStream> {
    if use_upstream(ctx, host) {
        let upstream = ctx.upstream.as_ref().expect("checked by use_upstream");
        connect_via_upstream(upstream, host, port).await
    } else {
        let addr = format!("{}:{}", host, port);
        TcpStream::connect(&addr)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                addr,
                message: e.to_string(),
            })
    }
}

/// Establish a tunnel through the chained upstream proxy with a nested
/// CONNECT handshake.
async fn connect_via_upstream(
    upstream: &UpstreamProxy,
    host: &str,
    port: u16,
) -> ProxyResult<TcpStream> {
    let proxy_addr = format!("{}:{}", upstream.host, upstream.port);
    let mut stream =
        TcpStream::connect(&proxy_addr)
            .await
            .map_err(|e| ProxyError::UpstreamConnect {
                addr: proxy_addr.clone(),
                message: e.to_string(),
            })?;

    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    // Read until the end of the response headers, bounded.
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::UpstreamHandshake(
                "connection closed during handshake".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_HANDSHAKE_BYTES {
            return Err(ProxyError::UpstreamHandshake(
                "oversized handshake response".to_string(),
            ));
        }
    }

    let status_line = String::from_utf8_lossy(&buf);
    let status_line = status_line.lines().next().unwrap_or_default();
    if !connect_succeeded(status_line) {
        return Err(ProxyError::UpstreamHandshake(format!(
            "upstream proxy answered '{}'",
            status_line
        )));
    }

    Ok(stream)
}

/// Whether a CONNECT response status line reports success.
fn connect_succeeded(status_line: &str) -> bool {
    status_line
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code == "200")
}

/// Forward a plain HTTP request over an established stream.
async fn forward_http(
    req: Request<Incoming>,
    stream: TcpStream,
) -> ProxyResult<Response<BoxBody<Bytes, hyper::Error>>> {
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Client connection ended: {}", e);
        }
    });

    let response = sender.send_request(req).await?;
    Ok(response.map(|body| body.boxed()))
}

/// Split a CONNECT authority into host and port (default 443).
fn parse_host_port(target: &str) -> ProxyResult<(String, u16)> {
    // Bracketed IPv6 literal.
    if let Some(rest) = target.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| ProxyError::InvalidConnect(target.to_string()))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port
                .parse()
                .map_err(|_| ProxyError::InvalidConnect(target.to_string()))?,
            None => 443,
        };
        return Ok((host.to_string(), port));
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .map_err(|_| ProxyError::InvalidConnect(target.to_string()))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(ProxyError::InvalidConnect(target.to_string())),
        None => Ok((target.to_string(), 443)),
    }
}

/// An empty response body.
fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// A 403 response with a short explanation.
fn forbidden_response(message: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    error_response(StatusCode::FORBIDDEN, message)
}

/// A text/plain error response.
fn error_response(
    status: StatusCode,
    message: &str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(
            Full::new(Bytes::from(format!("{}\n", message)))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("static response")
}
