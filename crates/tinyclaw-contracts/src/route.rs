//! Routing inputs and outcomes.

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// Account id assumed when an inbound message does not carry one.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

/// The precedence rule that produced a route, most specific first.
///
/// Operators read this to explain why a message went to a given agent, so
/// it is recorded verbatim in the `ROUTE_RESOLVED` audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchReason {
    Peer,
    ParentPeer,
    Guild,
    Team,
    Account,
    ChannelWildcard,
    Default,
}

impl MatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchReason::Peer => "PEER",
            MatchReason::ParentPeer => "PARENT_PEER",
            MatchReason::Guild => "GUILD",
            MatchReason::Team => "TEAM",
            MatchReason::Account => "ACCOUNT",
            MatchReason::ChannelWildcard => "CHANNEL_WILDCARD",
            MatchReason::Default => "DEFAULT",
        }
    }
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the router looks at for one inbound message.
///
/// Built with [`RouteRequest::new`] and the `with_*` helpers:
///
/// ```rust
/// use tinyclaw_contracts::route::RouteRequest;
///
/// let req = RouteRequest::new("discord", "thread-9")
///     .with_parent_peer("channel-1")
///     .with_guild("guild-7");
/// assert_eq!(req.parent_peer_id.as_deref(), Some("channel-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub channel: String,
    pub peer_id: String,
    pub parent_peer_id: Option<String>,
    pub guild_id: Option<String>,
    pub team_id: Option<String>,
    pub account_id: Option<String>,
    pub request_id: Option<String>,
}

impl RouteRequest {
    pub fn new(channel: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            peer_id: peer_id.into(),
            parent_peer_id: None,
            guild_id: None,
            team_id: None,
            account_id: None,
            request_id: None,
        }
    }

    pub fn with_parent_peer(mut self, parent_peer_id: impl Into<String>) -> Self {
        self.parent_peer_id = Some(parent_peer_id.into());
        self
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The account id, falling back to [`DEFAULT_ACCOUNT_ID`].
    pub fn effective_account(&self) -> &str {
        self.account_id.as_deref().unwrap_or(DEFAULT_ACCOUNT_ID)
    }
}

/// The (agent, session) target for one inbound message.
///
/// Constructed fresh per message and never mutated. Only its audit event is
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedRoute {
    pub agent_id: String,
    pub channel: String,
    pub account_id: String,
    /// Conversation-scoped session for this message.
    pub session_key: String,
    /// Top-level session this one belongs to. Equal to `session_key` unless
    /// the message arrived in a thread.
    pub main_session_key: String,
    pub matched_by: MatchReason,
}

impl ResolvedRoute {
    /// Correlation context for audit events emitted on behalf of this route.
    pub fn context(&self, request_id: Option<&str>) -> RequestContext {
        RequestContext {
            agent_id: Some(self.agent_id.clone()),
            channel: Some(self.channel.clone()),
            session_key: Some(self.session_key.clone()),
            request_id: request_id.map(str::to_string),
        }
    }

    /// True when this route is a sub-session (thread) of a parent session.
    pub fn is_sub_session(&self) -> bool {
        self.session_key != self.main_session_key
    }
}
