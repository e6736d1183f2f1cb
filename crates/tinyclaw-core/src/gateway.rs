//! The TinyClaw gateway: the route → authorize → execute driver.
//!
//! The gateway enforces the decision model for every inbound message:
//!
//!   Route → (Session) → Authorize → [ToolRunner::run] → Executed → Processed
//!
//! The security invariant is absolute: `ToolRunner::run()` is NEVER called
//! unless the authorizer returned an allowing decision AND the audit event
//! for that decision was persisted. An audit failure surfaces as `Err`
//! before the runner is reached.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use serde_json::json;
use tracing::{debug, info, warn};

use tinyclaw_contracts::{
    audit::{AuditEventType, AuditRecord},
    auth::ToolCall,
    error::TinyclawResult,
    route::{ResolvedRoute, RouteRequest},
};

use crate::traits::{AuditSink, RouteResolver, ToolAuthorizer, ToolRunner};

/// What happened to a requested tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The authorizer refused the call. The runner was never invoked.
    Denied { reason: String },

    /// The call was authorized and the runner completed.
    Executed { output: serde_json::Value },
}

/// Caller-reported events that the gateway records on a route's behalf.
///
/// Authorization and routing events are deliberately absent: only the
/// router and authorizer may emit those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerEvent {
    LlmCallStarted,
    LlmCallCompleted,
    Metering,
}

impl CallerEvent {
    fn event_type(self) -> AuditEventType {
        match self {
            CallerEvent::LlmCallStarted => AuditEventType::LlmCallStarted,
            CallerEvent::LlmCallCompleted => AuditEventType::LlmCallCompleted,
            CallerEvent::Metering => AuditEventType::ApertureMetering,
        }
    }
}

/// How many session keys a gateway remembers before forgetting the oldest.
pub const DEFAULT_SESSION_CAPACITY: usize = 65_536;

/// Session keys already announced with `SESSION_CREATED`.
///
/// Bounded: past `capacity` the oldest key is evicted, and a message on an
/// evicted session announces it again.
struct SessionCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SessionCache {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Remember `key`. Returns true if it was not already known.
    fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    fn remove(&mut self, key: &str) {
        if self.seen.remove(key) {
            self.order.retain(|k| k != key);
        }
    }
}

/// Drives routing and tool authorization for inbound messages.
///
/// One gateway serves every concurrent request. The router and authorizer
/// are read-mostly and the audit sink is the only serialization point, so
/// `&Gateway` can be shared across threads freely.
pub struct Gateway {
    router: Box<dyn RouteResolver>,
    authorizer: Box<dyn ToolAuthorizer>,
    audit: Arc<dyn AuditSink>,
    known_sessions: Mutex<SessionCache>,
}

impl Gateway {
    /// Create a gateway over the given trusted components.
    ///
    /// `audit` should be the same sink the router and authorizer write to so
    /// that every event lands in one chain.
    pub fn new(
        router: Box<dyn RouteResolver>,
        authorizer: Box<dyn ToolAuthorizer>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            router,
            authorizer,
            audit,
            known_sessions: Mutex::new(SessionCache::new(DEFAULT_SESSION_CAPACITY)),
        }
    }

    /// Remember at most `capacity` session keys (minimum 1).
    pub fn with_session_capacity(mut self, capacity: usize) -> Self {
        self.known_sessions = Mutex::new(SessionCache::new(capacity));
        self
    }

    /// Resolve the route for an inbound message.
    ///
    /// The router emits `ROUTE_RESOLVED`. The first time a `session_key` is
    /// seen, the gateway follows it with `SESSION_CREATED`.
    pub fn route(&self, request: &RouteRequest) -> TinyclawResult<ResolvedRoute> {
        let route = self.router.resolve(request)?;

        let is_new = self
            .known_sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(&route.session_key);

        if is_new {
            let detail = json!({
                "session_key": route.session_key,
                "main_session_key": route.main_session_key,
                "channel": route.channel,
            });
            let record = AuditRecord::new(AuditEventType::SessionCreated, detail.to_string())
                .with_context(&route.context(request.request_id.as_deref()));

            if let Err(e) = self.audit.append(record) {
                // Forget the session so the next message retries the event.
                self.known_sessions
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&route.session_key);
                return Err(e);
            }

            info!(
                agent_id = %route.agent_id,
                session_key = %route.session_key,
                "session created"
            );
        }

        Ok(route)
    }

    /// Authorize and, if allowed, execute one tool call.
    ///
    /// # Pipeline
    ///
    /// 1. `authorizer.authorize()` — emits exactly one of `TOOL_AUTHORIZED`
    ///    or `TOOL_DENIED`. An `Err` here means that event was not persisted
    ///    and the call stops.
    /// 2. Denied → return `ToolOutcome::Denied` without touching the runner.
    /// 3. `runner.run()` — **only reachable after step 1 allowed**.
    /// 4. Append `TOOL_EXECUTED` with the run status, success or failure.
    ///
    /// # Errors
    ///
    /// Audit failures and tool failures. A denial is NOT an error.
    pub fn invoke_tool(
        &self,
        route: &ResolvedRoute,
        call: &ToolCall,
        runner: &dyn ToolRunner,
    ) -> TinyclawResult<ToolOutcome> {
        debug!(
            agent_id = %route.agent_id,
            tool = %call.tool_name,
            scope = %call.scope,
            "tool invocation requested"
        );

        // ── Step 1: Authorization ────────────────────────────────────────────
        let decision = self.authorizer.authorize(route, call)?;

        // ── Step 2: Denial short-circuit ─────────────────────────────────────
        if !decision.authorized {
            let reason = decision
                .reason
                .unwrap_or_else(|| "denied without reason".to_string());
            warn!(
                agent_id = %route.agent_id,
                tool = %call.tool_name,
                reason = %reason,
                "tool call denied"
            );
            return Ok(ToolOutcome::Denied { reason });
        }

        // ── Step 3: Execution ────────────────────────────────────────────────
        let ctx = route.context(call.request_id.as_deref());
        let result = runner.run(route, call);

        // ── Step 4: Record what actually ran ─────────────────────────────────
        let detail = match &result {
            Ok(_) => json!({ "tool": call.tool_name, "scope": call.scope, "status": "ok" }),
            Err(e) => json!({
                "tool": call.tool_name,
                "scope": call.scope,
                "status": "failed",
                "error": e.to_string(),
            }),
        };
        self.audit.append(
            AuditRecord::new(AuditEventType::ToolExecuted, detail.to_string()).with_context(&ctx),
        )?;

        let output = result?;
        Ok(ToolOutcome::Executed { output })
    }

    /// Record that the gateway finished handling a message.
    pub fn complete_message(
        &self,
        route: &ResolvedRoute,
        request_id: Option<&str>,
        tool_calls: usize,
    ) -> TinyclawResult<()> {
        let detail = json!({ "matched_by": route.matched_by, "tool_calls": tool_calls });
        self.audit.append(
            AuditRecord::new(AuditEventType::MessageProcessed, detail.to_string())
                .with_context(&route.context(request_id)),
        )?;
        Ok(())
    }

    /// Record an LLM or metering event on behalf of `route`.
    pub fn record(
        &self,
        route: &ResolvedRoute,
        event: CallerEvent,
        detail: impl Into<String>,
        request_id: Option<&str>,
    ) -> TinyclawResult<()> {
        self.audit.append(
            AuditRecord::new(event.event_type(), detail).with_context(&route.context(request_id)),
        )?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tinyclaw_contracts::{
        audit::{AuditEntry, AuditEventType, AuditRecord},
        auth::{AuthDecision, ToolCall},
        error::{TinyclawError, TinyclawResult},
        route::{MatchReason, ResolvedRoute, RouteRequest},
    };

    use crate::traits::{AuditSink, RouteResolver, ToolAuthorizer, ToolRunner};

    use super::{CallerEvent, Gateway, ToolOutcome};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    fn make_route(session_key: &str) -> ResolvedRoute {
        ResolvedRoute {
            agent_id: "test-agent".to_string(),
            channel: "slack".to_string(),
            account_id: "default".to_string(),
            session_key: session_key.to_string(),
            main_session_key: session_key.to_string(),
            matched_by: MatchReason::Default,
        }
    }

    /// A router that always returns the same route.
    struct MockRouter {
        route: ResolvedRoute,
    }

    impl RouteResolver for MockRouter {
        fn resolve(&self, _request: &RouteRequest) -> TinyclawResult<ResolvedRoute> {
            Ok(self.route.clone())
        }
    }

    /// An authorizer that returns a pre-configured decision, or fails as if
    /// its audit event could not be written.
    struct MockAuthorizer {
        decision: Option<AuthDecision>,
    }

    impl ToolAuthorizer for MockAuthorizer {
        fn authorize(&self, _route: &ResolvedRoute, _call: &ToolCall) -> TinyclawResult<AuthDecision> {
            self.decision.clone().ok_or_else(|| TinyclawError::AuditWriteFailed {
                reason: "disk full".to_string(),
            })
        }
    }

    /// An audit sink that records every append for later inspection.
    #[derive(Default)]
    struct MockAudit {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl MockAudit {
        fn kinds(&self) -> Vec<AuditEventType> {
            self.records.lock().unwrap().iter().map(|r| r.event_type).collect()
        }
    }

    impl AuditSink for MockAudit {
        fn append(&self, record: AuditRecord) -> TinyclawResult<AuditEntry> {
            let mut records = self.records.lock().unwrap();
            let entry = AuditEntry {
                sequence: records.len() as u32,
                timestamp: 0,
                event_type: record.event_type,
                event_detail: record.detail.clone(),
                agent_id: record.agent_id.clone(),
                session_key: record.session_key.clone(),
                prev_hash: AuditEntry::GENESIS_HASH.to_string(),
                request_id: record.request_id.clone(),
            };
            records.push(record);
            Ok(entry)
        }
    }

    /// A runner that counts invocations and optionally fails.
    #[derive(Default)]
    struct MockRunner {
        runs: Mutex<u32>,
        fail: bool,
    }

    impl ToolRunner for MockRunner {
        fn run(&self, _route: &ResolvedRoute, call: &ToolCall) -> TinyclawResult<serde_json::Value> {
            *self.runs.lock().unwrap() += 1;
            if self.fail {
                return Err(TinyclawError::ToolExecutionFailed {
                    tool: call.tool_name.clone(),
                    reason: "exit status 1".to_string(),
                });
            }
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn gateway(decision: Option<AuthDecision>, audit: Arc<MockAudit>) -> Gateway {
        Gateway::new(
            Box::new(MockRouter { route: make_route("s-1") }),
            Box::new(MockAuthorizer { decision }),
            audit,
        )
    }

    // ── Test cases ────────────────────────────────────────────────────────────

    /// Core security test: a denial must prevent the runner from being called.
    #[test]
    fn test_denial_blocks_runner() {
        let audit = Arc::new(MockAudit::default());
        let gw = gateway(Some(AuthDecision::deny("tool is globally disabled")), audit.clone());
        let runner = MockRunner::default();

        let outcome = gw
            .invoke_tool(&make_route("s-1"), &ToolCall::new("rm", "/"), &runner)
            .unwrap();

        assert_eq!(*runner.runs.lock().unwrap(), 0, "run() must not be called on deny");
        match outcome {
            ToolOutcome::Denied { reason } => assert_eq!(reason, "tool is globally disabled"),
            other => panic!("expected Denied, got {:?}", other),
        }
        assert!(audit.kinds().is_empty(), "no TOOL_EXECUTED for a denied call");
    }

    /// An allowed call runs once and is followed by exactly one TOOL_EXECUTED.
    #[test]
    fn test_allowed_call_executes_and_is_recorded() {
        let audit = Arc::new(MockAudit::default());
        let gw = gateway(Some(AuthDecision::allow()), audit.clone());
        let runner = MockRunner::default();
        let call = ToolCall::new("read_file", "docs").with_request_id("req-9");

        let outcome = gw.invoke_tool(&make_route("s-1"), &call, &runner).unwrap();

        assert_eq!(*runner.runs.lock().unwrap(), 1);
        assert!(matches!(outcome, ToolOutcome::Executed { .. }));
        assert_eq!(audit.kinds(), vec![AuditEventType::ToolExecuted]);

        let records = audit.records.lock().unwrap();
        assert_eq!(records[0].request_id.as_deref(), Some("req-9"));
        assert_eq!(records[0].session_key.as_deref(), Some("s-1"));
    }

    /// If the authorization event cannot be persisted, the tool never runs.
    #[test]
    fn test_audit_failure_aborts_before_execution() {
        let audit = Arc::new(MockAudit::default());
        let gw = gateway(None, audit);
        let runner = MockRunner::default();

        let result = gw.invoke_tool(&make_route("s-1"), &ToolCall::new("shell", "ws"), &runner);

        assert!(matches!(result, Err(TinyclawError::AuditWriteFailed { .. })));
        assert_eq!(*runner.runs.lock().unwrap(), 0);
    }

    /// A failing tool is still recorded as executed, with a failed status.
    #[test]
    fn test_tool_failure_is_recorded_then_returned() {
        let audit = Arc::new(MockAudit::default());
        let gw = gateway(Some(AuthDecision::allow()), audit.clone());
        let runner = MockRunner { fail: true, ..MockRunner::default() };

        let result = gw.invoke_tool(&make_route("s-1"), &ToolCall::new("shell", "ws"), &runner);

        assert!(matches!(result, Err(TinyclawError::ToolExecutionFailed { .. })));
        let records = audit.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, AuditEventType::ToolExecuted);
        assert!(records[0].detail.contains("\"failed\""));
    }

    /// SESSION_CREATED fires once per session key.
    #[test]
    fn test_session_created_once() {
        let audit = Arc::new(MockAudit::default());
        let gw = gateway(Some(AuthDecision::allow()), audit.clone());
        let req = RouteRequest::new("slack", "u-1");

        gw.route(&req).unwrap();
        gw.route(&req).unwrap();

        assert_eq!(audit.kinds(), vec![AuditEventType::SessionCreated]);
    }

    /// A router that gives every peer its own session.
    struct PeerRouter;

    impl RouteResolver for PeerRouter {
        fn resolve(&self, request: &RouteRequest) -> TinyclawResult<ResolvedRoute> {
            Ok(make_route(&request.peer_id))
        }
    }

    #[test]
    fn test_session_memory_is_bounded() {
        let audit = Arc::new(MockAudit::default());
        let gw = Gateway::new(
            Box::new(PeerRouter),
            Box::new(MockAuthorizer { decision: Some(AuthDecision::allow()) }),
            audit.clone(),
        )
        .with_session_capacity(2);

        for peer in ["a", "b", "b", "c"] {
            gw.route(&RouteRequest::new("slack", peer)).unwrap();
        }
        assert_eq!(audit.kinds().len(), 3);

        // "a" was evicted by "c" and is announced again; "c" is still known.
        gw.route(&RouteRequest::new("slack", "a")).unwrap();
        gw.route(&RouteRequest::new("slack", "c")).unwrap();
        assert_eq!(audit.kinds().len(), 4);
        assert_eq!(gw.known_sessions.lock().unwrap().seen.len(), 2);
    }

    /// Caller events map to their fixed audit kinds.
    #[test]
    fn test_record_caller_events() {
        let audit = Arc::new(MockAudit::default());
        let gw = gateway(Some(AuthDecision::allow()), audit.clone());
        let route = make_route("s-1");

        gw.record(&route, CallerEvent::LlmCallStarted, "model=x", None).unwrap();
        gw.record(&route, CallerEvent::LlmCallCompleted, "tokens=12", None).unwrap();
        gw.record(&route, CallerEvent::Metering, "units=3", None).unwrap();
        gw.complete_message(&route, Some("req-1"), 0).unwrap();

        assert_eq!(
            audit.kinds(),
            vec![
                AuditEventType::LlmCallStarted,
                AuditEventType::LlmCallCompleted,
                AuditEventType::ApertureMetering,
                AuditEventType::MessageProcessed,
            ]
        );
    }
}
