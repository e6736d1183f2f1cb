//! Audit entry types.
//!
//! `AuditEntry` is the persisted, hash-linked record. `AuditRecord` is what
//! callers hand to an audit sink; the sink assigns `sequence`, `timestamp`
//! and `prev_hash` at append time.

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// The closed set of audit event kinds.
///
/// The discriminants are part of the wire format and must never be
/// renumbered. New kinds are appended at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum AuditEventType {
    RouteResolved = 0,
    ToolAuthorized = 1,
    ToolDenied = 2,
    ToolExecuted = 3,
    LlmCallStarted = 4,
    LlmCallCompleted = 5,
    SessionCreated = 6,
    MessageProcessed = 7,
    ApertureMetering = 8,
    CerbosDecision = 9,
}

impl AuditEventType {
    /// Every event kind, in discriminant order.
    pub const ALL: [AuditEventType; 10] = [
        AuditEventType::RouteResolved,
        AuditEventType::ToolAuthorized,
        AuditEventType::ToolDenied,
        AuditEventType::ToolExecuted,
        AuditEventType::LlmCallStarted,
        AuditEventType::LlmCallCompleted,
        AuditEventType::SessionCreated,
        AuditEventType::MessageProcessed,
        AuditEventType::ApertureMetering,
        AuditEventType::CerbosDecision,
    ];

    /// The fixed wire discriminant.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Stable upper-snake name used in logs and operator tooling.
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::RouteResolved => "ROUTE_RESOLVED",
            AuditEventType::ToolAuthorized => "TOOL_AUTHORIZED",
            AuditEventType::ToolDenied => "TOOL_DENIED",
            AuditEventType::ToolExecuted => "TOOL_EXECUTED",
            AuditEventType::LlmCallStarted => "LLM_CALL_STARTED",
            AuditEventType::LlmCallCompleted => "LLM_CALL_COMPLETED",
            AuditEventType::SessionCreated => "SESSION_CREATED",
            AuditEventType::MessageProcessed => "MESSAGE_PROCESSED",
            AuditEventType::ApertureMetering => "APERTURE_METERING",
            AuditEventType::CerbosDecision => "CERBOS_DECISION",
        }
    }
}

impl From<AuditEventType> for u8 {
    fn from(value: AuditEventType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for AuditEventType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        AuditEventType::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("unknown audit event type {value}"))
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable, hash-linked fact about the system's behavior.
///
/// Field order matches the persisted schema and the canonical hash encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 0, with no gaps.
    pub sequence: u32,

    /// Milliseconds since the Unix epoch; non-decreasing along the chain.
    pub timestamp: u64,

    pub event_type: AuditEventType,

    /// Free-form description. Opaque to the chain.
    pub event_detail: String,

    pub agent_id: Option<String>,

    pub session_key: Option<String>,

    /// SHA-256 (hex) of the canonical encoding of the previous entry, or
    /// `GENESIS_HASH` for entry 0.
    pub prev_hash: String,

    pub request_id: Option<String>,
}

impl AuditEntry {
    /// The `prev_hash` of the first entry in every chain: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// An append request: everything the caller knows about an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub detail: String,
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
    pub request_id: Option<String>,
}

impl AuditRecord {
    /// A record with no correlation ids.
    pub fn new(event_type: AuditEventType, detail: impl Into<String>) -> Self {
        Self {
            event_type,
            detail: detail.into(),
            agent_id: None,
            session_key: None,
            request_id: None,
        }
    }

    /// Attach the correlation ids from `ctx`. Absent ids stay absent.
    pub fn with_context(mut self, ctx: &RequestContext) -> Self {
        self.agent_id = ctx.agent_id.clone();
        self.session_key = ctx.session_key.clone();
        self.request_id = ctx.request_id.clone();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}
