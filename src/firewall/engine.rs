//! Committing staged rulesets to the kernel.
//!
//! The [`FirewallEngine`] owns the process-wide mutable filter table: every
//! mutation goes through it, and a commit is one `iptables-restore --noflush`
//! invocation fed the complete staged payload over stdin. The kernel applies
//! a restore payload transactionally, so the swap is atomic — there is no
//! window where the default-deny exists without its allow rules or where a
//! previous run's rules linger.
//!
//! # Privilege
//!
//! Mutating the filter table requires `CAP_NET_ADMIN`. [`preflight`]
//! (FirewallEngine::preflight) probes for it before anything is staged and
//! fails with an actionable diagnostic; the engine never falls back to an
//! open policy.

use super::error::FirewallError;
use super::ruleset::{Family, Ruleset};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Per-family userspace tool names.
fn tools(family: Family) -> (&'static str, &'static str) {
    match family {
        Family::V4 => ("iptables", "iptables-restore"),
        Family::V6 => ("ip6tables", "ip6tables-restore"),
    }
}

/// Outcome of a successful install, for the audit log.
#[derive(Debug, Clone)]
pub struct InstallSummary {
    /// Chain the rules were committed to.
    pub chain: String,
    /// Rule count committed for IPv4.
    pub v4_rules: usize,
    /// Rule count committed for IPv6.
    pub v6_rules: usize,
}

/// Coordinator for all kernel rule-table mutation.
///
/// Methods take `&mut self` so concurrent callers serialize through the one
/// owner instead of interleaving edits.
#[derive(Debug, Default)]
pub struct FirewallEngine {
    _private: (),
}

impl FirewallEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify the packet-filter tooling is present and usable.
    ///
    /// Probes both address families with a read-only listing. Distinguishes
    /// a missing binary from missing privilege so the diagnostic names the
    /// actual gap.
    pub fn preflight(&self) -> Result<(), FirewallError> {
        for family in [Family::V4, Family::V6] {
            let (iptables, _) = tools(family);
            run(iptables, &["-w", "-S", "OUTPUT"], None)?;
        }
        debug!("Packet-filter preflight passed for both address families");
        Ok(())
    }

    /// Commit a staged ruleset, replacing any previous contents wholesale.
    ///
    /// The restore payload flushes and repopulates the dedicated chain in one
    /// transaction per family, then the jump from OUTPUT is ensured
    /// idempotently. Re-installing an identical ruleset leaves the effective
    /// policy unchanged with no rule-count growth.
    pub fn install(&mut self, ruleset: &Ruleset) -> Result<InstallSummary, FirewallError> {
        self.preflight()?;

        for family in [Family::V4, Family::V6] {
            let (iptables, restore) = tools(family);
            let payload = ruleset.restore_payload(family);

            debug!("Committing {} payload:\n{}", restore, payload);
            run(restore, &["--noflush"], Some(&payload))?;
            ensure_jump(iptables, ruleset.chain())?;
        }

        let summary = InstallSummary {
            chain: ruleset.chain().to_string(),
            v4_rules: ruleset.rules(Family::V4).len(),
            v6_rules: ruleset.rules(Family::V6).len(),
        };
        info!(
            "Egress policy committed to chain {} ({} v4 rules, {} v6 rules)",
            summary.chain, summary.v4_rules, summary.v6_rules
        );
        Ok(summary)
    }

    /// Remove the jump and the dedicated chain for both families.
    ///
    /// Recovery path: leaves the host with no egress restrictions from this
    /// tool. Missing pieces are not errors, so repeated uninstalls are safe.
    pub fn uninstall(&mut self, chain: &str) -> Result<(), FirewallError> {
        self.preflight()?;

        for family in [Family::V4, Family::V6] {
            let (iptables, _) = tools(family);
            if jump_exists(iptables, chain) {
                run(iptables, &["-w", "-D", "OUTPUT", "-j", chain], None)?;
            }
            // Flush-then-delete only if the chain is actually there.
            if run(iptables, &["-w", "-S", chain], None).is_ok() {
                run(iptables, &["-w", "-F", chain], None)?;
                run(iptables, &["-w", "-X", chain], None)?;
            }
        }
        info!("Egress chain {} removed", chain);
        Ok(())
    }
}

/// Check whether OUTPUT already jumps to the chain.
fn jump_exists(iptables: &str, chain: &str) -> bool {
    run(iptables, &["-w", "-C", "OUTPUT", "-j", chain], None).is_ok()
}

/// Append the OUTPUT jump unless it is already present.
fn ensure_jump(iptables: &str, chain: &str) -> Result<(), FirewallError> {
    if jump_exists(iptables, chain) {
        debug!("OUTPUT jump to {} already present", chain);
        return Ok(());
    }
    run(iptables, &["-w", "-A", "OUTPUT", "-j", chain], None)
}

/// Run a packet-filter command, optionally feeding stdin.
///
/// Maps spawn failures and permission refusals onto the capability error
/// variants so callers surface the missing piece by name.
fn run(binary: &str, args: &[&str], stdin: Option<&str>) -> Result<(), FirewallError> {
    let cmd_str = format!("{} {}", binary, args.join(" "));
    debug!("Running: {}", cmd_str);

    let mut command = Command::new(binary);
    command.args(args).stdout(Stdio::null()).stderr(Stdio::piped());
    command.stdin(match stdin {
        Some(_) => Stdio::piped(),
        None => Stdio::null(),
    });

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FirewallError::MissingBinary {
                binary: binary.to_string(),
            }
        } else {
            FirewallError::CommandFailed {
                cmd: cmd_str.clone(),
                source: e,
            }
        }
    })?;

    if let Some(payload) = stdin {
        let mut pipe = child.stdin.take().ok_or_else(|| FirewallError::CommandFailed {
            cmd: cmd_str.clone(),
            source: std::io::Error::other("stdin pipe unavailable"),
        })?;
        pipe.write_all(payload.as_bytes())
            .map_err(|e| FirewallError::CommandFailed {
                cmd: cmd_str.clone(),
                source: e,
            })?;
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .map_err(|e| FirewallError::CommandFailed {
            cmd: cmd_str.clone(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_privilege_refusal(&stderr) {
            return Err(FirewallError::InsufficientPrivilege {
                binary: binary.to_string(),
                detail: stderr.lines().next().unwrap_or("permission denied").to_string(),
            });
        }
        return Err(FirewallError::CommandError {
            cmd: cmd_str,
            stderr,
        });
    }

    Ok(())
}

/// Whether a stderr blob looks like a privilege refusal rather than a
/// semantic rule error.
fn is_privilege_refusal(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("you must be root")
}
