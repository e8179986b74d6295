//! Single-pass reconciliation of log events against the rule ledger.

use crate::config::Config;
use crate::cursor::{self, SourceUnavailable};
use crate::extract;
use crate::ledger::{Ledger, Rule};
use crate::lock::PassLock;
use crate::provider::RuleProvider;
use chrono::{DateTime, Utc};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Counters reported at the end of a pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Authentication events extracted from new log bytes.
    pub events: u64,
    /// Marker lines that could not be parsed.
    pub malformed_lines: u64,
    /// Rules created at the provider.
    pub rules_created: u64,
    /// Existing grants whose expiry was pushed out.
    pub rules_refreshed: u64,
    /// Rules deleted after their TTL elapsed.
    pub rules_expired: u64,
    /// Failed create calls (retried only if the IP authenticates again).
    pub create_failures: u64,
    /// Failed delete calls (retried on every subsequent pass).
    pub delete_failures: u64,
    /// Rules active after the pass.
    pub active_rules: u64,
}

/// A pass-level failure.
#[derive(Debug)]
pub enum PassError {
    /// The log could not be opened or read; nothing was mutated.
    SourceUnavailable(SourceUnavailable),
    /// Another pass holds the lock; nothing was mutated.
    Locked(io::Error),
    /// The state file or its lock could not be written. When this happens
    /// after remote calls, the side effects stand uncommitted and the next
    /// pass may repeat a create call.
    Persistence(io::Error),
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassError::SourceUnavailable(e) => e.fmt(f),
            PassError::Locked(e) => write!(f, "pass already running: {}", e),
            PassError::Persistence(e) => write!(f, "failed to write state: {}", e),
        }
    }
}

impl std::error::Error for PassError {}

impl From<SourceUnavailable> for PassError {
    fn from(e: SourceUnavailable) -> Self {
        PassError::SourceUnavailable(e)
    }
}

/// Reconciliation engine: performs one run-to-completion batch pass.
pub struct Engine {
    log_path: PathBuf,
    marker: String,
    state_path: PathBuf,
    lock_path: PathBuf,
    ttl: chrono::Duration,
    provider: Box<dyn RuleProvider>,
}

impl Engine {
    /// Build an engine from configuration and a rule provider.
    pub fn new(config: &Config, provider: Box<dyn RuleProvider>) -> Self {
        Self {
            log_path: config.log.path.clone(),
            marker: config.log.marker.clone(),
            state_path: config.state.path.clone(),
            lock_path: config.state.lock_path(),
            ttl: config.ttl(),
            provider,
        }
    }

    /// Perform one pass using the current wall clock.
    pub async fn run_pass(&self) -> Result<PassSummary, PassError> {
        self.run_pass_at(Utc::now()).await
    }

    /// Perform one pass with an explicit clock.
    ///
    /// Load ledger, advance the cursor, extract events, upsert grants,
    /// retract expired rules, then persist atomically. Per-IP remote
    /// failures never abort the pass.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> Result<PassSummary, PassError> {
        // Only contention counts as "locked"; a missing lock directory or a
        // permission problem is a setup failure, not a concurrent pass.
        let _lock = PassLock::acquire(&self.lock_path).map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock => PassError::Locked(e),
            _ => PassError::Persistence(e),
        })?;

        let mut ledger = Ledger::load(&self.state_path);
        let (bytes, advanced) = cursor::advance(&self.log_path, &ledger.cursor)?;

        let extraction = extract::extract(&bytes, &self.marker, now);
        let mut summary = PassSummary {
            events: extraction.events.len() as u64,
            malformed_lines: extraction.malformed as u64,
            ..PassSummary::default()
        };

        for event in extraction.events {
            self.apply_event(&mut ledger, event, &mut summary).await;
        }

        self.retract_expired(&mut ledger, now, &mut summary).await;

        ledger.cursor = advanced;
        summary.active_rules = ledger.rules.len() as u64;
        ledger
            .save(&self.state_path)
            .map_err(PassError::Persistence)?;

        Ok(summary)
    }

    /// Upsert the grant for one authentication event.
    ///
    /// A tracked IP keeps its remote rule and only has its expiry pushed
    /// out, even when the entry is already past expiry: the remote rule is
    /// still live until a delete succeeds, and creating a second one would
    /// orphan it. Within one pass, later events for the same IP overwrite
    /// earlier refreshes, so the final observed time wins.
    async fn apply_event(
        &self,
        ledger: &mut Ledger,
        event: extract::AuthEvent,
        summary: &mut PassSummary,
    ) {
        let expires_at = event.observed_at + self.ttl;

        if let Some(rule) = ledger.rules.get_mut(&event.ip) {
            rule.expires_at = expires_at;
            summary.rules_refreshed += 1;
            debug!(ip = %event.ip, expires_at = %expires_at, "grant refreshed");
            return;
        }

        match self.provider.create_rule(event.ip).await {
            Ok(remote_rule_id) => {
                info!(
                    ip = %event.ip,
                    rule_id = %remote_rule_id,
                    expires_at = %expires_at,
                    "access granted"
                );
                ledger.rules.insert(
                    event.ip,
                    Rule {
                        remote_rule_id,
                        created_at: event.observed_at,
                        expires_at,
                    },
                );
                summary.rules_created += 1;
            }
            Err(e) => {
                warn!(ip = %event.ip, error = %e, "failed to create rule");
                summary.create_failures += 1;
            }
        }
    }

    /// Delete remote rules whose TTL has elapsed as of `cutoff`.
    ///
    /// Entries whose delete call fails stay in the ledger and are retried on
    /// the next pass.
    async fn retract_expired(
        &self,
        ledger: &mut Ledger,
        cutoff: DateTime<Utc>,
        summary: &mut PassSummary,
    ) {
        let expired: Vec<(IpAddr, String)> = ledger
            .rules
            .iter()
            .filter(|(_, rule)| rule.is_expired_at(cutoff))
            .map(|(ip, rule)| (*ip, rule.remote_rule_id.clone()))
            .collect();

        for (ip, rule_id) in expired {
            match self.provider.delete_rule(&rule_id).await {
                Ok(()) => {
                    info!(ip = %ip, rule_id = %rule_id, "access expired");
                    ledger.rules.remove(&ip);
                    summary.rules_expired += 1;
                }
                Err(e) => {
                    warn!(ip = %ip, rule_id = %rule_id, error = %e, "failed to delete rule");
                    summary.delete_failures += 1;
                }
            }
        }
    }
}
