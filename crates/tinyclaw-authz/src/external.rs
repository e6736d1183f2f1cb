//! External policy decision point integration.
//!
//! The external engine is untrusted and may hang. Each query runs on its own
//! worker thread while the caller waits on a channel with `recv_timeout`.
//! Anything other than an explicit allow inside the deadline becomes a
//! denial.
//!
//! A worker that misses its deadline keeps running until the engine answers.
//! Workers are counted, and once `max_in_flight` are outstanding further
//! calls are denied without spawning, so a hung engine cannot exhaust
//! threads.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use serde::Serialize;
use tracing::warn;

use tinyclaw_contracts::auth::{AuthDecision, PolicyQuery};
use tinyclaw_core::traits::PolicyDecisionPoint;

use crate::config::ExternalConfig;

/// What came back from the external engine, recorded verbatim in the
/// `CERBOS_DECISION` audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExternalOutcome {
    Allow { reason: String },
    Deny { reason: String },
    Timeout { after_ms: u64 },
    Error { reason: String },
    Saturated { limit: usize },
}

impl ExternalOutcome {
    /// Fail-closed conversion: only `Allow` authorizes.
    pub fn to_decision(&self) -> AuthDecision {
        match self {
            ExternalOutcome::Allow { .. } => AuthDecision::allow(),
            ExternalOutcome::Deny { reason } => {
                AuthDecision::deny(format!("denied by external policy: {}", reason))
            }
            ExternalOutcome::Timeout { after_ms } => AuthDecision::deny(format!(
                "external policy decision timed out after {}ms",
                after_ms
            )),
            ExternalOutcome::Error { reason } => {
                AuthDecision::deny(format!("external policy decision unavailable: {}", reason))
            }
            ExternalOutcome::Saturated { limit } => AuthDecision::deny(format!(
                "external policy engine busy: {} decisions already outstanding",
                limit
            )),
        }
    }
}

/// A policy decision point plus the tools it governs and its deadline.
pub struct ExternalPolicy {
    pdp: Arc<dyn PolicyDecisionPoint>,
    tools: HashSet<String>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

/// One reserved worker slot, released when the worker finishes.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExternalPolicy {
    pub fn new(pdp: Arc<dyn PolicyDecisionPoint>, config: &ExternalConfig) -> Self {
        Self {
            pdp,
            tools: config.tools.iter().cloned().collect(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_in_flight: config.max_in_flight,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn applies_to(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }

    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn reserve(&self) -> Option<Slot> {
        let limit = self.max_in_flight;
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Slot(Arc::clone(&self.in_flight)))
    }

    /// Ask the external engine, waiting at most the configured timeout.
    ///
    /// A worker that outlives the deadline is detached; its late answer is
    /// dropped with the channel and its slot freed when it returns.
    pub fn consult(&self, query: PolicyQuery) -> ExternalOutcome {
        let Some(slot) = self.reserve() else {
            warn!(limit = self.max_in_flight, "external policy engine saturated");
            return ExternalOutcome::Saturated {
                limit: self.max_in_flight,
            };
        };

        let (tx, rx) = mpsc::channel();
        let pdp = Arc::clone(&self.pdp);

        let spawned = thread::Builder::new()
            .name("tinyclaw-pdp".to_string())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(pdp.decide(&query));
            });
        if let Err(e) = spawned {
            return ExternalOutcome::Error {
                reason: format!("failed to spawn policy worker: {}", e),
            };
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(verdict)) if verdict.allow => ExternalOutcome::Allow {
                reason: verdict.reason,
            },
            Ok(Ok(verdict)) => ExternalOutcome::Deny {
                reason: verdict.reason,
            },
            Ok(Err(reason)) => ExternalOutcome::Error { reason },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = self.timeout_ms(), "external policy decision timed out");
                ExternalOutcome::Timeout {
                    after_ms: self.timeout_ms(),
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => ExternalOutcome::Error {
                reason: "policy worker exited without a verdict".to_string(),
            },
        }
    }
}
