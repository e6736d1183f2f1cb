//! Grants and the grant store.
//!
//! A grant lets one agent (optionally pinned to one session) call one tool
//! on one scope. Matching is exact: a grant on a main session does not
//! cover its thread sub-sessions, and scopes are compared as whole strings.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use tinyclaw_contracts::{error::TinyclawResult, route::ResolvedRoute};

use crate::config::config_error;

/// A stored authorization for an (agent/session, tool, scope) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Grant {
    pub agent_id: String,

    /// Pin the grant to one session. Absent means every session of the agent.
    #[serde(default)]
    pub session_key: Option<String>,

    pub tool: String,

    pub scope: String,

    /// Milliseconds on the audit clock after which the grant is inactive.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl Grant {
    pub fn new(
        agent_id: impl Into<String>,
        tool: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_key: None,
            tool: tool.into(),
            scope: scope.into(),
            expires_at: None,
        }
    }

    pub fn for_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn expiring_at(mut self, millis: u64) -> Self {
        self.expires_at = Some(millis);
        self
    }

    pub(crate) fn validate(&self) -> TinyclawResult<()> {
        let empty = |s: &str| s.trim().is_empty();
        if empty(&self.agent_id) || empty(&self.tool) || empty(&self.scope) {
            return Err(config_error(format!(
                "grant {:?} must name an agent, a tool and a scope",
                self
            )));
        }
        if self.session_key.as_deref().is_some_and(empty) {
            return Err(config_error(format!(
                "grant for agent '{}' has an empty session_key",
                self.agent_id
            )));
        }
        Ok(())
    }

    /// True if this grant names the route's agent/session, the tool and the
    /// scope, regardless of expiry.
    pub fn matches(&self, route: &ResolvedRoute, tool: &str, scope: &str) -> bool {
        self.agent_id == route.agent_id
            && self
                .session_key
                .as_deref()
                .map_or(true, |session| session == route.session_key)
            && self.tool == tool
            && self.scope == scope
    }

    pub fn is_active(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry)
    }
}

/// The result of looking a call up in a grant snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantLookup {
    Active,
    /// Only expired grants match; carries the latest expiry.
    Expired(u64),
    Missing,
}

/// Read-mostly grant storage.
///
/// Readers take an `Arc` snapshot; writers copy, modify and swap. A revocation
/// is visible to every decision that starts after it returns and never
/// disturbs a decision already holding a snapshot.
#[derive(Debug, Default)]
pub struct GrantStore {
    grants: RwLock<Arc<Vec<Grant>>>,
}

impl GrantStore {
    pub fn new(grants: Vec<Grant>) -> Self {
        Self {
            grants: RwLock::new(Arc::new(grants)),
        }
    }

    /// The current grant set.
    pub fn snapshot(&self) -> Arc<Vec<Grant>> {
        Arc::clone(&self.grants.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Add a grant. Returns `ConfigError` if it is malformed.
    pub fn grant(&self, grant: Grant) -> TinyclawResult<()> {
        grant.validate()?;
        let mut guard = self.grants.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.as_ref().clone();
        next.push(grant);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove every grant with exactly this subject, tool and scope.
    /// Returns true if anything was removed.
    pub fn revoke(&self, agent_id: &str, session_key: Option<&str>, tool: &str, scope: &str) -> bool {
        let mut guard = self.grants.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = guard.len();
        let next: Vec<Grant> = guard
            .iter()
            .filter(|g| {
                !(g.agent_id == agent_id
                    && g.session_key.as_deref() == session_key
                    && g.tool == tool
                    && g.scope == scope)
            })
            .cloned()
            .collect();
        let removed = next.len() != before;
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Look `route`/`tool`/`scope` up in `grants` at time `now`.
pub fn lookup(grants: &[Grant], route: &ResolvedRoute, tool: &str, scope: &str, now: u64) -> GrantLookup {
    let mut latest_expiry = None;
    for grant in grants.iter().filter(|g| g.matches(route, tool, scope)) {
        if grant.is_active(now) {
            return GrantLookup::Active;
        }
        latest_expiry = latest_expiry.max(grant.expires_at);
    }
    match latest_expiry {
        Some(expiry) => GrantLookup::Expired(expiry),
        None => GrantLookup::Missing,
    }
}
