//! Subcommand dispatch.
//!
//! This is the program edge: the only place that reads the environment and
//! the filesystem to assemble whitelist sources, builds the runtime each
//! command needs (current-thread for the batch firewall build, multi-thread
//! for the long-running proxy), and turns module errors into exit codes.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::allowlist::{DomainPattern, DomainSource, MergedList, SourceTier, merge};
use crate::cli::{Cli, Commands};
use crate::config::{Config, ConfigError, ConfigLoader, SegmentConfig, validate};
use crate::firewall::{Family, FirewallEngine, Ruleset};
use crate::proxy::{HostFilter, ProxyServer, ProxySettings, UpstreamProxy};
use crate::telemetry::{AuditEvent, AuditLogger, audit};

/// Handle the parsed command line.
pub fn handle_command(cli: Cli) -> Result<()> {
    let loader = ConfigLoader::new();
    let config = loader
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Firewall {
            whitelist,
            allow_domains,
            dry_run,
            uninstall,
        } => {
            if uninstall {
                run_uninstall(&config)
            } else {
                run_firewall(&loader, &config, &whitelist, &allow_domains, dry_run)
            }
        }
        Commands::Proxy { segment } => run_proxy(&loader, &config, &segment),
        Commands::Check => run_check(&config),
    }
}

/// Build the whitelist, resolve it, and commit the egress ruleset.
fn run_firewall(
    loader: &ConfigLoader,
    config: &Config,
    extra_files: &[PathBuf],
    allow_domains: &[String],
    dry_run: bool,
) -> Result<()> {
    let sources = firewall_sources(loader, config, extra_files, allow_domains);
    let merged = merge(&sources);
    info!(
        "Merged whitelist has {} patterns from {} sources",
        merged.len(),
        sources.len()
    );

    let opts = config.resolver.options();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let resolved = rt.block_on(crate::resolver::build(&merged, &opts));

    log_resolution(&merged, &resolved);

    let ruleset = Ruleset::build(
        &resolved,
        &opts.dns_servers,
        config.firewall.chain_name(),
        config.firewall.deny_action(),
    );

    if dry_run {
        print!("{}", ruleset.restore_payload(Family::V4));
        print!("{}", ruleset.restore_payload(Family::V6));
        return Ok(());
    }

    let mut engine = FirewallEngine::new();
    let summary = engine
        .install(&ruleset)
        .context("Failed to install egress ruleset")?;

    audit().log(AuditEvent::FirewallApplied {
        chain: summary.chain,
        domains: resolved.len(),
        v4_rules: summary.v4_rules,
        v6_rules: summary.v6_rules,
    });

    Ok(())
}

/// Remove the egress chain installed by a previous run.
fn run_uninstall(config: &Config) -> Result<()> {
    let mut engine = FirewallEngine::new();
    engine
        .uninstall(config.firewall.chain_name())
        .context("Failed to remove egress ruleset")?;
    Ok(())
}

/// Run the filtering proxy for one segment until interrupted.
fn run_proxy(loader: &ConfigLoader, config: &Config, segment_name: &str) -> Result<()> {
    // Refuse to start on any isolation violation, not only ones touching
    // this segment: a broken topology should be fixed, not half-served.
    let violations = validate(config);
    if !violations.is_empty() {
        for violation in &violations {
            warn!("{}", violation);
        }
        bail!(
            "Segment isolation validation failed with {} violation(s); \
             run 'agent-sbx check' for details",
            violations.len()
        );
    }

    let segment = config
        .segments
        .get(segment_name)
        .ok_or_else(|| ConfigError::UnknownSegment(segment_name.to_string()))?;

    let listen = segment
        .listen
        .parse()
        .map_err(|_| ConfigError::InvalidListenAddress {
            segment: segment_name.to_string(),
            value: segment.listen.clone(),
        })?;

    let sources = segment_sources(loader, config, segment);
    let merged = merge(&sources);
    let filter = Arc::new(HostFilter::from_merged(&merged));
    info!(
        "[{}] Filter built with {} patterns from {} sources",
        segment_name,
        filter.len(),
        sources.len()
    );

    let upstream = segment
        .upstream
        .as_deref()
        .map(UpstreamProxy::parse)
        .transpose()
        .context("Invalid upstream proxy configuration")?;
    let no_upstream = parse_patterns(&segment.no_upstream, segment_name);

    let audit = Arc::new(AuditLogger::new().unwrap_or_else(|e| {
        warn!("Audit logging disabled for this proxy: {}", e);
        AuditLogger::new_null()
    }));

    let settings = ProxySettings {
        segment: segment_name.to_string(),
        listen,
        filter,
        upstream,
        no_upstream,
        audit,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = ProxyServer::new(settings, shutdown_rx);

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
        });

        server.run().await
    })
    .context("Proxy server failed")?;

    Ok(())
}

/// Validate segment isolation and report every violation.
fn run_check(config: &Config) -> Result<()> {
    let violations = validate(config);

    if violations.is_empty() {
        println!(
            "Configuration OK: {} segment(s) with disjoint endpoints and sources",
            config.segments.len()
        );
        return Ok(());
    }

    for violation in &violations {
        eprintln!("violation: {}", violation);
        audit().log(AuditEvent::SegmentViolation {
            detail: violation.to_string(),
        });
    }
    bail!("{} segment isolation violation(s)", violations.len())
}

/// Whitelist sources for the firewall build, in tier order.
fn firewall_sources(
    loader: &ConfigLoader,
    config: &Config,
    extra_files: &[PathBuf],
    allow_domains: &[String],
) -> Vec<DomainSource> {
    let mut sources = vec![DomainSource::builtin()];

    if let Some(ref path) = config.whitelist.project_file {
        sources.push(DomainSource::from_file(path, SourceTier::Project));
    }
    for path in extra_files {
        sources.push(DomainSource::from_file(path, SourceTier::Project));
    }

    sources.push(DomainSource::from_file(
        loader.user_whitelist_path(),
        SourceTier::User,
    ));
    if !config.whitelist.domains.is_empty() {
        sources.push(DomainSource::from_entries(
            "config:whitelist.domains",
            SourceTier::User,
            &config.whitelist.domains,
        ));
    }
    sources.push(env_source(&config.whitelist.extra_domains_env));

    if !allow_domains.is_empty() {
        sources.push(DomainSource::from_entries(
            "cli:allow-domain",
            SourceTier::User,
            allow_domains,
        ));
    }

    sources
}

/// Whitelist sources scoped to one proxy segment, in tier order.
///
/// Builtin, project, and user tiers are shared inputs by design; the
/// segment-specific pieces are its own filter file and its own extra-domains
/// variable. Nothing from another segment is ever consulted.
fn segment_sources(
    loader: &ConfigLoader,
    config: &Config,
    segment: &SegmentConfig,
) -> Vec<DomainSource> {
    let mut sources = vec![DomainSource::builtin()];

    let project_file = segment
        .filter_file
        .as_ref()
        .or(config.whitelist.project_file.as_ref());
    if let Some(path) = project_file {
        sources.push(DomainSource::from_file(path, SourceTier::Project));
    }

    sources.push(DomainSource::from_file(
        loader.user_whitelist_path(),
        SourceTier::User,
    ));
    if !config.whitelist.domains.is_empty() {
        sources.push(DomainSource::from_entries(
            "config:whitelist.domains",
            SourceTier::User,
            &config.whitelist.domains,
        ));
    }

    let env_var = segment
        .extra_domains_env
        .as_deref()
        .unwrap_or(&config.whitelist.extra_domains_env);
    sources.push(env_source(env_var));

    sources
}

/// Read one extra-domains variable, here at the edge, into a source.
fn env_source(var: &str) -> DomainSource {
    let value = if var.is_empty() {
        None
    } else {
        std::env::var(var).ok()
    };
    DomainSource::from_env(var, value)
}

/// Parse configured patterns, dropping malformed entries with a warning.
fn parse_patterns(raw: &[String], segment: &str) -> Vec<DomainPattern> {
    raw.iter()
        .filter_map(|s| match DomainPattern::parse(s) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("[{}] Dropping malformed no_upstream entry: {}", segment, e);
                None
            }
        })
        .collect()
}

/// Log the resolved domain→address mapping and the delegations.
fn log_resolution(merged: &MergedList, resolved: &crate::resolver::ResolvedAddressSet) {
    for pattern in merged.wildcard_patterns() {
        audit().log(AuditEvent::WildcardDelegated {
            pattern: pattern.as_str().to_string(),
        });
    }

    for pattern in merged.exact_patterns() {
        let domain = pattern.host();
        match resolved.addresses_of(domain) {
            Some(addrs) => {
                let addresses: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
                info!("{} -> {}", domain, addresses.join(", "));
                audit().log(AuditEvent::DomainResolved {
                    domain: domain.to_string(),
                    addresses,
                });
            }
            None => {
                audit().log(AuditEvent::DomainUnresolved {
                    domain: domain.to_string(),
                    reason: "no addresses resolved".to_string(),
                });
            }
        }
    }
}
