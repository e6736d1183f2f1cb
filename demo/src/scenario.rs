//! End-to-end gateway scenario.
//!
//! Routes messages from three channels, then pushes a mix of tool calls
//! through the authorizer: freely allowed, granted, missing a grant,
//! globally disabled, and delegated to a change-management policy engine
//! that answers, refuses, or hangs.

use std::{path::Path, sync::Arc, thread, time::Duration};

use serde_json::{json, Value};

use tinyclaw_audit::{AuditSnapshot, FileAuditLog, InMemoryAuditLog};
use tinyclaw_authz::Authorizer;
use tinyclaw_contracts::{
    auth::{ExternalVerdict, PolicyQuery, ToolCall},
    error::TinyclawResult,
    route::{ResolvedRoute, RouteRequest},
};
use tinyclaw_core::{
    traits::{AuditSink, Clock, PolicyDecisionPoint, ToolRunner},
    CallerEvent, Gateway, SystemClock, ToolOutcome,
};
use tinyclaw_routing::Router;

// ── Configuration ─────────────────────────────────────────────────────────────

const ROUTING: &str = include_str!("../config/routing.toml");
const AUTHZ: &str = include_str!("../config/authz.toml");

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Change-management stand-in: production deploys are frozen, and the
/// restart endpoint never answers in time.
struct ChangeFreezePdp;

impl PolicyDecisionPoint for ChangeFreezePdp {
    fn decide(&self, query: &PolicyQuery) -> Result<ExternalVerdict, String> {
        match (query.tool_name.as_str(), query.scope.as_str()) {
            ("restart_service", _) => {
                thread::sleep(Duration::from_millis(500));
                Ok(ExternalVerdict {
                    allow: true,
                    reason: "late approval".to_string(),
                })
            }
            (_, "prod") => Ok(ExternalVerdict {
                allow: false,
                reason: "production change freeze in effect".to_string(),
            }),
            _ => Ok(ExternalVerdict {
                allow: true,
                reason: "outside freeze window".to_string(),
            }),
        }
    }
}

/// Echoes the call back instead of doing anything.
struct EchoRunner;

impl ToolRunner for EchoRunner {
    fn run(&self, route: &ResolvedRoute, call: &ToolCall) -> TinyclawResult<Value> {
        Ok(json!({
            "agent": route.agent_id,
            "tool": call.tool_name,
            "scope": call.scope,
        }))
    }
}

/// The audit log backing a run: in memory, or a JSON-lines file.
enum DemoLog {
    Memory(Arc<InMemoryAuditLog>),
    File(Arc<FileAuditLog>),
}

impl DemoLog {
    fn open(path: Option<&Path>, clock: Arc<dyn Clock>) -> TinyclawResult<Self> {
        Ok(match path {
            Some(path) => DemoLog::File(Arc::new(FileAuditLog::open(path, clock)?)),
            None => DemoLog::Memory(Arc::new(InMemoryAuditLog::new(clock))),
        })
    }

    fn sink(&self) -> Arc<dyn AuditSink> {
        match self {
            DemoLog::Memory(log) => Arc::clone(log) as Arc<dyn AuditSink>,
            DemoLog::File(log) => Arc::clone(log) as Arc<dyn AuditSink>,
        }
    }

    fn snapshot(&self) -> TinyclawResult<AuditSnapshot> {
        match self {
            DemoLog::Memory(log) => log.snapshot(),
            DemoLog::File(log) => log.snapshot(),
        }
    }
}

// ── Scenario runner ───────────────────────────────────────────────────────────

/// Run the scenario, appending to `audit_file` if given.
pub fn run_scenario(audit_file: Option<&Path>) -> TinyclawResult<()> {
    println!("=== Scenario: multi-channel gateway ===");
    println!();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let log = DemoLog::open(audit_file, clock.clone())?;
    let starting_entries = log.snapshot()?.len();

    let router = Router::from_toml_str(ROUTING, log.sink())?;
    let authorizer =
        Authorizer::from_toml_str(AUTHZ, log.sink(), clock, Some(Arc::new(ChangeFreezePdp)))?;
    let gateway = Gateway::new(Box::new(router), Box::new(authorizer), log.sink());
    let runner = EchoRunner;

    // ── Routing ───────────────────────────────────────────────────────────────

    println!("  Routing");
    let requests = [
        RouteRequest::new("discord", "user-vip"),
        RouteRequest::new("discord", "reply-7").with_parent_peer("thread-incident"),
        RouteRequest::new("discord", "user-3").with_guild("guild-oss"),
        RouteRequest::new("slack", "U-42").with_team("T-OPS"),
        RouteRequest::new("telegram", "chat-9").with_account("sales-bot"),
        RouteRequest::new("whatsapp", "+15550100"),
    ];
    let mut routes = Vec::with_capacity(requests.len());
    for request in requests {
        let route = gateway.route(&request)?;
        println!(
            "    {:<9} {:<16} → {:<10} {:<12} {}",
            request.channel,
            request.peer_id,
            route.agent_id,
            route.matched_by.as_str(),
            route.session_key
        );
        routes.push(route);
    }
    println!();

    // ── Tool calls ────────────────────────────────────────────────────────────

    println!("  Tool calls");
    let ops = &routes[3];
    let vip = &routes[0];
    let calls = [
        (vip, ToolCall::new("web_search", "public")),
        (ops, ToolCall::new("shell_exec", "workspace/ops")),
        (vip, ToolCall::new("shell_exec", "workspace/ops")),
        (ops, ToolCall::new("format_disk", "/dev/sda")),
        (ops, ToolCall::new("deploy", "staging")),
        (ops, ToolCall::new("deploy", "prod")),
        (ops, ToolCall::new("restart_service", "api")),
    ];
    let mut executed = 0;
    for (route, call) in &calls {
        let outcome = gateway.invoke_tool(route, call, &runner)?;
        match outcome {
            ToolOutcome::Executed { .. } => {
                executed += 1;
                println!("    {:<10} {:<16} EXECUTED", route.agent_id, call.tool_name);
            }
            ToolOutcome::Denied { reason } => {
                println!("    {:<10} {:<16} DENIED   {}", route.agent_id, call.tool_name, reason);
            }
        }
    }
    println!();

    gateway.record(ops, CallerEvent::Metering, json!({ "tokens": 1234 }).to_string(), None)?;
    for route in &routes {
        let tool_calls = calls.iter().filter(|(r, _)| r.session_key == route.session_key).count();
        gateway.complete_message(route, None, tool_calls)?;
    }

    // ── Audit ─────────────────────────────────────────────────────────────────

    let snapshot = log.snapshot()?;
    let verified = snapshot.verify();
    println!("  Tool calls executed:    {} of {}", executed, calls.len());
    println!("  Audit events appended:  {}", snapshot.len() - starting_entries);
    println!(
        "  Audit chain integrity:  {}",
        if verified.is_ok() { "VERIFIED" } else { "FAILED" }
    );
    println!("  Audit head:             {}", snapshot.head_hash);
    if let DemoLog::File(file) = &log {
        println!("  Audit file:             {}", file.path().display());
    }
    println!();

    verified?;
    Ok(())
}
