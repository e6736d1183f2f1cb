//! Core trait definitions for the TinyClaw decision core.
//!
//! These traits define the trust boundary of the gateway:
//!
//! - `RouteResolver`       — trusted, total mapping from message to agent/session
//! - `ToolAuthorizer`      — trusted gate evaluated before any tool runs
//! - `AuditSink`           — trusted, append-only, hash-chained record
//! - `PolicyDecisionPoint` — untrusted external authority, always behind a timeout
//! - `ToolRunner`          — untrusted tool execution
//! - `Clock`               — the single time source for audit stamps and grant expiry
//!
//! The gateway wires them together. `ToolRunner::run()` is never called
//! unless the authorizer allowed the call and its audit event was persisted.

use tinyclaw_contracts::{
    audit::{AuditEntry, AuditRecord},
    auth::{AuthDecision, ExternalVerdict, PolicyQuery, ToolCall},
    error::TinyclawResult,
    route::{ResolvedRoute, RouteRequest},
};

/// The audit chain: the single serialization point for every decision.
///
/// Implementations assign `sequence`, `timestamp` and `prev_hash` inside one
/// critical section so concurrent producers are totally ordered. A failed
/// append must return `Err`, never drop the record silently.
pub trait AuditSink: Send + Sync {
    /// Append one record and return the entry as stored.
    fn append(&self, record: AuditRecord) -> TinyclawResult<AuditEntry>;
}

/// Resolves an inbound message to exactly one route.
///
/// Resolution itself is total. The only error an implementation may return
/// is a failure to record its `ROUTE_RESOLVED` event.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, request: &RouteRequest) -> TinyclawResult<ResolvedRoute>;
}

/// Decides whether a tool call may proceed.
///
/// A denial is `Ok(AuthDecision { authorized: false, .. })`. `Err` is
/// reserved for audit failures, in which case the caller must not execute
/// the tool.
pub trait ToolAuthorizer: Send + Sync {
    fn authorize(&self, route: &ResolvedRoute, call: &ToolCall) -> TinyclawResult<AuthDecision>;
}

/// An independently deployed policy engine consulted for a subset of tools.
///
/// Implementations may block on network I/O. The authorizer runs them off
/// the calling thread with a hard deadline, so they need not enforce one
/// themselves. `Err` carries a description of why no verdict was produced.
pub trait PolicyDecisionPoint: Send + Sync {
    fn decide(&self, query: &PolicyQuery) -> Result<ExternalVerdict, String>;
}

/// Executes an authorized tool call.
pub trait ToolRunner: Send + Sync {
    fn run(&self, route: &ResolvedRoute, call: &ToolCall) -> TinyclawResult<serde_json::Value>;
}

/// Millisecond time source shared by the audit chain and grant expiry.
///
/// Implementations must be non-decreasing.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}
