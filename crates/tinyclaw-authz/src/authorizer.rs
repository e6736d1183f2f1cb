//! The tool authorizer.
//!
//! Decision table, evaluated in order:
//!
//! 1. `always-denied`  → deny, "tool is globally disabled". Grants are not
//!    consulted; a global deny overrides them.
//! 2. `always-allowed` → allow.
//! 3. `requires-grant` → allow only if an active grant covers the route's
//!    agent/session, the tool and the requested scope.
//! 4. If the local table allowed and the tool is governed by the external
//!    policy decision point, its verdict decides. The verdict (or timeout)
//!    is recorded as `CERBOS_DECISION` before the final event.
//!
//! Every call appends exactly one of `TOOL_AUTHORIZED` or `TOOL_DENIED`.

use std::{path::Path, sync::Arc};

use serde_json::json;
use tracing::{debug, warn};

use tinyclaw_contracts::{
    audit::{AuditEventType, AuditRecord},
    auth::{AuthDecision, AuthLevel, Authority, PolicyQuery, ToolCall},
    error::{TinyclawError, TinyclawResult},
    route::ResolvedRoute,
};
use tinyclaw_core::traits::{AuditSink, Clock, PolicyDecisionPoint, ToolAuthorizer};

use crate::{
    config::{config_error, AuthzConfig},
    external::ExternalPolicy,
    grant::{lookup, GrantLookup, GrantStore},
};

/// A `ToolAuthorizer` driven by a TOML level table and a grant store.
///
/// Construct via [`Authorizer::new`], [`Authorizer::from_toml_str`] or
/// [`Authorizer::from_file`].
pub struct Authorizer {
    config: AuthzConfig,
    grants: GrantStore,
    external: Option<ExternalPolicy>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl Authorizer {
    /// Build an authorizer from a validated config.
    ///
    /// `clock` must be the clock the audit log stamps with, so grant expiry
    /// and audit timestamps agree. `pdp` is required exactly when the config
    /// has an `[external]` section.
    pub fn new(
        config: AuthzConfig,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        pdp: Option<Arc<dyn PolicyDecisionPoint>>,
    ) -> TinyclawResult<Self> {
        config.validate()?;

        let external = match (&config.external, pdp) {
            (Some(ext), Some(pdp)) => Some(ExternalPolicy::new(pdp, ext)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(config_error(
                    "[external] is configured but no policy decision point was supplied"
                        .to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(config_error(
                    "a policy decision point was supplied but [external] is not configured"
                        .to_string(),
                ))
            }
        };

        let grants = GrantStore::new(config.grants.clone());

        Ok(Self {
            config,
            grants,
            external,
            audit,
            clock,
        })
    }

    /// Parse `s` as TOML and build an authorizer.
    pub fn from_toml_str(
        s: &str,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        pdp: Option<Arc<dyn PolicyDecisionPoint>>,
    ) -> TinyclawResult<Self> {
        Self::new(AuthzConfig::from_toml_str(s)?, audit, clock, pdp)
    }

    /// Read the file at `path` and parse it as TOML authorization config.
    pub fn from_file(
        path: &Path,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        pdp: Option<Arc<dyn PolicyDecisionPoint>>,
    ) -> TinyclawResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TinyclawError::ConfigError {
            reason: format!("failed to read authorization file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents, audit, clock, pdp)
    }

    /// Runtime grant management. Changes apply to decisions that start after
    /// the call returns.
    pub fn grants(&self) -> &GrantStore {
        &self.grants
    }

    pub fn level_for(&self, tool: &str) -> AuthLevel {
        self.config.level_for(tool)
    }

    /// Steps 1–3 of the decision table. Pure given the grant snapshot and `now`.
    fn decide_locally(&self, route: &ResolvedRoute, call: &ToolCall, level: AuthLevel, now: u64) -> AuthDecision {
        match level {
            AuthLevel::AlwaysDenied => AuthDecision::deny("tool is globally disabled"),
            AuthLevel::AlwaysAllowed => AuthDecision::allow(),
            AuthLevel::RequiresGrant => {
                let grants = self.grants.snapshot();
                match lookup(&grants, route, &call.tool_name, &call.scope, now) {
                    GrantLookup::Active => AuthDecision::allow(),
                    GrantLookup::Expired(at) => AuthDecision::deny(format!(
                        "grant for tool '{}' on scope '{}' for agent '{}' expired at {}",
                        call.tool_name, call.scope, route.agent_id, at
                    )),
                    GrantLookup::Missing => AuthDecision::deny(format!(
                        "missing grant: tool '{}' on scope '{}' for agent '{}' in session '{}'",
                        call.tool_name, call.scope, route.agent_id, route.session_key
                    )),
                }
            }
        }
    }
}

impl ToolAuthorizer for Authorizer {
    fn authorize(&self, route: &ResolvedRoute, call: &ToolCall) -> TinyclawResult<AuthDecision> {
        let ctx = route.context(call.request_id.as_deref());
        let level = self.level_for(&call.tool_name);
        let now = self.clock.now_millis();

        debug!(
            agent_id = %route.agent_id,
            tool = %call.tool_name,
            scope = %call.scope,
            level = %level.as_str(),
            "authorizing tool call"
        );

        let local = self.decide_locally(route, call, level, now);

        // ── Step 4: external authority, only on top of a local allow ─────────
        let (decision, authority) = match &self.external {
            Some(external) if local.authorized && external.applies_to(&call.tool_name) => {
                let outcome = external.consult(PolicyQuery {
                    agent_id: route.agent_id.clone(),
                    channel: route.channel.clone(),
                    session_key: route.session_key.clone(),
                    tool_name: call.tool_name.clone(),
                    scope: call.scope.clone(),
                });

                let detail = json!({
                    "tool": call.tool_name,
                    "scope": call.scope,
                    "timeout_ms": external.timeout_ms(),
                    "verdict": outcome,
                });
                self.audit.append(
                    AuditRecord::new(AuditEventType::CerbosDecision, detail.to_string())
                        .with_context(&ctx),
                )?;

                (outcome.to_decision(), Authority::External)
            }
            _ => (local, Authority::Local),
        };

        let event_type = if decision.authorized {
            AuditEventType::ToolAuthorized
        } else {
            AuditEventType::ToolDenied
        };
        let detail = json!({
            "tool": call.tool_name,
            "scope": call.scope,
            "level": level.as_str(),
            "authority": authority,
            "reason": decision.reason,
        });
        self.audit
            .append(AuditRecord::new(event_type, detail.to_string()).with_context(&ctx))?;

        if decision.authorized {
            debug!(tool = %call.tool_name, agent_id = %route.agent_id, "tool call authorized");
        } else {
            warn!(
                tool = %call.tool_name,
                agent_id = %route.agent_id,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "tool call denied"
            );
        }

        Ok(decision)
    }
}
