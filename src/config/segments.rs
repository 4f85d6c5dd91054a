//! Static validation of segment isolation.
//!
//! Each network segment must have exactly one proxy endpoint, and nothing
//! may be shared between segments: not the listen address, not the filter
//! file, not the extra-domains variable. A service declared in one segment
//! routing through another segment's proxy is a configuration error, caught
//! here before anything starts — never a runtime-tolerated condition.

use super::schema::Config;
use crate::proxy::UpstreamProxy;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// One violation of the segment isolation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentViolation {
    /// A segment has no listen address.
    MissingListen {
        /// Segment name.
        segment: String,
    },
    /// A segment's listen address does not parse as `host:port`.
    InvalidListen {
        /// Segment name.
        segment: String,
        /// The offending value.
        value: String,
    },
    /// Two segments bind the same proxy endpoint.
    SharedEndpoint {
        /// First segment.
        first: String,
        /// Second segment.
        second: String,
        /// The shared address.
        addr: String,
    },
    /// Two segments read the same filter file.
    SharedFilterFile {
        /// First segment.
        first: String,
        /// Second segment.
        second: String,
        /// The shared path.
        path: String,
    },
    /// Two segments read the same extra-domains environment variable.
    SharedEnvVar {
        /// First segment.
        first: String,
        /// Second segment.
        second: String,
        /// The shared variable name.
        var: String,
    },
    /// A service routes through a proxy other than its own segment's.
    CrossSegmentProxy {
        /// Segment the service is declared in.
        segment: String,
        /// Service name.
        service: String,
        /// The proxy it references.
        referenced: String,
    },
    /// A segment's upstream proxy URL is unusable.
    InvalidUpstream {
        /// Segment name.
        segment: String,
        /// Why it was rejected.
        detail: String,
    },
}

impl fmt::Display for SegmentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentViolation::MissingListen { segment } => {
                write!(f, "segment '{}' has no listen address", segment)
            }
            SegmentViolation::InvalidListen { segment, value } => {
                write!(
                    f,
                    "segment '{}' has an invalid listen address '{}'",
                    segment, value
                )
            }
            SegmentViolation::SharedEndpoint {
                first,
                second,
                addr,
            } => {
                write!(
                    f,
                    "segments '{}' and '{}' share the proxy endpoint {}",
                    first, second, addr
                )
            }
            SegmentViolation::SharedFilterFile {
                first,
                second,
                path,
            } => {
                write!(
                    f,
                    "segments '{}' and '{}' share the filter file {}",
                    first, second, path
                )
            }
            SegmentViolation::SharedEnvVar {
                first,
                second,
                var,
            } => {
                write!(
                    f,
                    "segments '{}' and '{}' share the extra-domains variable {}",
                    first, second, var
                )
            }
            SegmentViolation::CrossSegmentProxy {
                segment,
                service,
                referenced,
            } => {
                write!(
                    f,
                    "service '{}' in segment '{}' routes through proxy '{}' \
                     instead of its own segment",
                    service, segment, referenced
                )
            }
            SegmentViolation::InvalidUpstream { segment, detail } => {
                write!(
                    f,
                    "segment '{}' has an unusable upstream proxy: {}",
                    segment, detail
                )
            }
        }
    }
}

/// Validate segment isolation across the merged configuration.
///
/// Returns every violation found (empty means the configuration is sound).
/// Segments are visited in sorted order so diagnostics are deterministic.
pub fn validate(config: &Config) -> Vec<SegmentViolation> {
    let mut violations = Vec::new();

    let mut endpoints: HashMap<SocketAddr, String> = HashMap::new();
    let mut filter_files: HashMap<String, String> = HashMap::new();
    let mut env_vars: HashMap<String, String> = HashMap::new();

    for name in config.segment_names() {
        let segment = &config.segments[name];

        if segment.listen.is_empty() {
            violations.push(SegmentViolation::MissingListen {
                segment: name.to_string(),
            });
        } else {
            match segment.listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    if let Some(owner) = endpoints.get(&addr) {
                        violations.push(SegmentViolation::SharedEndpoint {
                            first: owner.clone(),
                            second: name.to_string(),
                            addr: addr.to_string(),
                        });
                    } else {
                        endpoints.insert(addr, name.to_string());
                    }
                }
                Err(_) => {
                    violations.push(SegmentViolation::InvalidListen {
                        segment: name.to_string(),
                        value: segment.listen.clone(),
                    });
                }
            }
        }

        if let Some(ref path) = segment.filter_file {
            let key = path.display().to_string();
            if let Some(owner) = filter_files.get(&key) {
                violations.push(SegmentViolation::SharedFilterFile {
                    first: owner.clone(),
                    second: name.to_string(),
                    path: key,
                });
            } else {
                filter_files.insert(key, name.to_string());
            }
        }

        if let Some(ref var) = segment.extra_domains_env {
            if let Some(owner) = env_vars.get(var) {
                violations.push(SegmentViolation::SharedEnvVar {
                    first: owner.clone(),
                    second: name.to_string(),
                    var: var.clone(),
                });
            } else {
                env_vars.insert(var.clone(), name.to_string());
            }
        }

        if let Some(ref upstream) = segment.upstream
            && let Err(e) = UpstreamProxy::parse(upstream)
        {
            violations.push(SegmentViolation::InvalidUpstream {
                segment: name.to_string(),
                detail: e.to_string(),
            });
        }

        for service in &segment.services {
            if service.proxy != name {
                violations.push(SegmentViolation::CrossSegmentProxy {
                    segment: name.to_string(),
                    service: service.name.clone(),
                    referenced: service.proxy.clone(),
                });
            }
        }
    }

    violations
}
