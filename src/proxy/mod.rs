//! Application-layer egress filtering.
//!
//! A forward HTTP(S) proxy that re-validates the destination hostname of
//! every request against its segment's whitelist, independently of the
//! packet filter. The two layers are deliberately separate: the firewall
//! matches resolved addresses, the proxy matches hostnames (including
//! wildcard patterns the firewall cannot express), and a hole in one does
//! not open the other.
//!
//! There is no TLS interception — CONNECT payloads are forwarded opaquely.
//! Admission is decided purely on destination identity.

mod connect;
mod error;
mod filter;
mod server;

pub use connect::UpstreamProxy;
pub use error::{ProxyError, ProxyResult};
pub use filter::{FilterDecision, HostFilter};
pub use server::{ProxyContext, ProxyServer, ProxySettings};
