//! Precedence-ordered route resolution.
//!
//! Resolution algorithm, first match wins:
//!
//! 1. `PEER`             — (channel, peer_id) has a binding
//! 2. `PARENT_PEER`      — (channel, parent_peer_id) has a binding
//! 3. `GUILD`            — (channel, guild_id) has a binding
//! 4. `TEAM`             — (channel, team_id) has a binding
//! 5. `ACCOUNT`          — (channel, account_id) has a binding
//! 6. `CHANNEL_WILDCARD` — the channel has a wildcard binding
//! 7. `DEFAULT`          — the configured default agent, always matches
//!
//! Session keys are derived from the matched scope:
//!
//!   agent:{agent}:{channel}:{account}:{scope}
//!
//! where `scope` is `peer:{id}`, `guild:{id}`, `team:{id}`, `account`,
//! `channel` or `main`. A `PARENT_PEER` match keys the main session on the
//! parent peer. Whenever the message carries a parent peer and the match was
//! not `PEER`, the message gets a thread sub-session
//! `{main_session_key}:thread:{peer_id}` anchored to that main session.
//!
//! Every id is percent-escaped (`%` → `%25`, `:` → `%3A`) before it goes into
//! a key, so distinct scopes always produce distinct keys.

use std::{
    borrow::Cow,
    path::Path,
    sync::{Arc, RwLock},
};

use serde_json::json;
use tracing::{debug, info};

use tinyclaw_contracts::{
    audit::{AuditEventType, AuditRecord},
    error::{TinyclawError, TinyclawResult},
    route::{MatchReason, ResolvedRoute, RouteRequest},
};
use tinyclaw_core::traits::{AuditSink, RouteResolver};

use crate::binding::{BindingTable, RoutingConfig};

impl BindingTable {
    /// Resolve `request` against this table. Pure and total.
    pub fn resolve(&self, request: &RouteRequest) -> ResolvedRoute {
        let channel = request.channel.as_str();
        let account = request.effective_account();
        let key = |id: &str| (channel.to_string(), id.to_string());

        let (agent_id, matched_by, scope) = if let Some(agent) = self.peers.get(&key(&request.peer_id)) {
            (agent, MatchReason::Peer, format!("peer:{}", key_part(&request.peer_id)))
        } else if let Some((parent, agent)) = request
            .parent_peer_id
            .as_deref()
            .and_then(|parent| self.peers.get(&key(parent)).map(|agent| (parent, agent)))
        {
            (agent, MatchReason::ParentPeer, format!("peer:{}", key_part(parent)))
        } else if let Some((guild, agent)) = request
            .guild_id
            .as_deref()
            .and_then(|guild| self.guilds.get(&key(guild)).map(|agent| (guild, agent)))
        {
            (agent, MatchReason::Guild, format!("guild:{}", key_part(guild)))
        } else if let Some((team, agent)) = request
            .team_id
            .as_deref()
            .and_then(|team| self.teams.get(&key(team)).map(|agent| (team, agent)))
        {
            (agent, MatchReason::Team, format!("team:{}", key_part(team)))
        } else if let Some(agent) = self.accounts.get(&key(account)) {
            (agent, MatchReason::Account, "account".to_string())
        } else if let Some(agent) = self.channels.get(channel) {
            (agent, MatchReason::ChannelWildcard, "channel".to_string())
        } else {
            (&self.default_agent, MatchReason::Default, "main".to_string())
        };

        let main_session_key = format!(
            "agent:{}:{}:{}:{}",
            key_part(agent_id),
            key_part(channel),
            key_part(account),
            scope
        );
        let session_key = match (&request.parent_peer_id, matched_by) {
            (Some(_), reason) if reason != MatchReason::Peer => {
                format!("{}:thread:{}", main_session_key, key_part(&request.peer_id))
            }
            _ => main_session_key.clone(),
        };

        ResolvedRoute {
            agent_id: agent_id.clone(),
            channel: channel.to_string(),
            account_id: account.to_string(),
            session_key,
            main_session_key,
            matched_by,
        }
    }
}

/// Escape `%` and `:` so an id can never spell out another key's separators.
fn key_part(id: &str) -> Cow<'_, str> {
    if !id.contains(|c| c == '%' || c == ':') {
        return Cow::Borrowed(id);
    }
    let mut out = String::with_capacity(id.len() + 8);
    for c in id.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// A `RouteResolver` backed by a TOML binding table.
///
/// The table is held as an `Arc` snapshot behind a `RwLock`. `reload()`
/// swaps it atomically; a resolution already in progress finishes against
/// the snapshot it started with.
pub struct Router {
    table: RwLock<Arc<BindingTable>>,
    audit: Arc<dyn AuditSink>,
}

impl Router {
    /// Validate `config` and build a router that records to `audit`.
    pub fn new(config: &RoutingConfig, audit: Arc<dyn AuditSink>) -> TinyclawResult<Self> {
        let table = BindingTable::build(config)?;
        info!(
            default_agent = %table.default_agent(),
            bindings = table.len(),
            "routing table loaded"
        );
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
            audit,
        })
    }

    /// Parse `s` as TOML and build a router.
    ///
    /// Returns `TinyclawError::ConfigError` if the TOML is malformed or the
    /// bindings fail validation.
    pub fn from_toml_str(s: &str, audit: Arc<dyn AuditSink>) -> TinyclawResult<Self> {
        let config = parse_config(s)?;
        Self::new(&config, audit)
    }

    /// Read the file at `path` and parse it as a TOML routing table.
    pub fn from_file(path: &Path, audit: Arc<dyn AuditSink>) -> TinyclawResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TinyclawError::ConfigError {
            reason: format!("failed to read routing file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents, audit)
    }

    /// Replace the binding table. On a validation error the current table
    /// stays in place.
    pub fn reload(&self, config: &RoutingConfig) -> TinyclawResult<()> {
        let table = Arc::new(BindingTable::build(config)?);
        let bindings = table.len();
        *self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = table;
        info!(bindings, "routing table reloaded");
        Ok(())
    }

    /// The table new resolutions will use.
    pub fn table(&self) -> Arc<BindingTable> {
        Arc::clone(&self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

/// Parse a routing TOML document without validating it.
pub fn parse_config(s: &str) -> TinyclawResult<RoutingConfig> {
    toml::from_str(s).map_err(|e| TinyclawError::ConfigError {
        reason: format!("failed to parse routing TOML: {}", e),
    })
}

impl RouteResolver for Router {
    /// Resolve the route and record a `ROUTE_RESOLVED` event.
    ///
    /// Every resolution is recorded, including the default fallback.
    fn resolve(&self, request: &RouteRequest) -> TinyclawResult<ResolvedRoute> {
        let route = self.table().resolve(request);

        debug!(
            channel = %request.channel,
            peer_id = %request.peer_id,
            agent_id = %route.agent_id,
            matched_by = %route.matched_by,
            "route resolved"
        );

        let detail = json!({
            "peer_id": request.peer_id,
            "parent_peer_id": request.parent_peer_id,
            "guild_id": request.guild_id,
            "team_id": request.team_id,
            "route": route,
        });
        self.audit.append(
            AuditRecord::new(AuditEventType::RouteResolved, detail.to_string())
                .with_context(&route.context(request.request_id.as_deref())),
        )?;

        Ok(route)
    }
}
