//! Tool authorization types.
//!
//! The authorizer consumes a `ResolvedRoute` plus a `ToolCall` and produces
//! an `AuthDecision`. Denial is a first-class successful outcome.

use serde::{Deserialize, Serialize};

/// Policy classification for a tool.
///
/// Expressed in TOML as kebab-case strings:
/// ```toml
/// [tools]
/// read_file = "always-allowed"
/// shell_exec = "requires-grant"
/// format_disk = "always-denied"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthLevel {
    AlwaysAllowed,
    RequiresGrant,
    AlwaysDenied,
}

impl AuthLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthLevel::AlwaysAllowed => "ALWAYS_ALLOWED",
            AuthLevel::RequiresGrant => "REQUIRES_GRANT",
            AuthLevel::AlwaysDenied => "ALWAYS_DENIED",
        }
    }
}

/// The outcome of one authorization check.
///
/// `reason` is populated exactly when `authorized` is false; use the
/// constructors to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDecision {
    pub authorized: bool,
    pub reason: Option<String>,
}

impl AuthDecision {
    pub fn allow() -> Self {
        Self {
            authorized: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            reason: Some(reason.into()),
        }
    }
}

/// A requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    /// The resource scope the call wants to act on (e.g. `"workspace/docs"`).
    pub scope: String,
    /// Arguments forwarded to the tool runner. Never inspected by the core.
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub request_id: Option<String>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            scope: scope.into(),
            arguments: serde_json::Value::Null,
            request_id: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Which authority produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    Local,
    External,
}

/// What an external policy decision point is asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyQuery {
    pub agent_id: String,
    pub channel: String,
    pub session_key: String,
    pub tool_name: String,
    pub scope: String,
}

/// What an external policy decision point answers.
///
/// Treated as untrusted input: the authorizer records it verbatim and only
/// an explicit `allow = true` can let a call through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalVerdict {
    pub allow: bool,
    pub reason: String,
}
