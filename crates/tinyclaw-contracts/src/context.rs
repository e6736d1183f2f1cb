//! Request correlation identifiers shared by every subsystem.

use serde::{Deserialize, Serialize};

/// Unique identifier for one inbound request (a message or a tool call).
///
/// Appears in every audit entry the request produces so a forensic reader
/// can group them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new, random request id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The correlation context carried alongside every audit event.
///
/// All fields are optional because some events (for example a route
/// resolution that has not yet produced a session) only know part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub agent_id: Option<String>,
    pub channel: Option<String>,
    pub session_key: Option<String>,
    pub request_id: Option<String>,
}

impl RequestContext {
    /// A context that only knows which request it belongs to.
    pub fn for_request(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..Self::default()
        }
    }
}
