//! Binding table types and configuration schema.
//!
//! A `RoutingConfig` is deserialized from TOML. It names one default agent
//! and an unordered list of bindings; precedence comes from each binding's
//! scope, not from its position in the file.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tinyclaw_contracts::error::{TinyclawError, TinyclawResult};

/// A single binding loaded from TOML.
///
/// `channel` is always required. At most one of `peer`, `guild`, `team`,
/// `account` may be set; a binding with none of them (or with
/// `account = "*"`) applies to every peer on the channel.
///
/// ```toml
/// [[bindings]]
/// agent_id = "support"
/// channel = "discord"
/// guild = "guild-42"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub agent_id: String,
    pub channel: String,
    pub peer: Option<String>,
    pub guild: Option<String>,
    pub team: Option<String>,
    pub account: Option<String>,
    /// Operator note. Not used for matching.
    #[serde(default)]
    pub description: Option<String>,
}

/// What a binding matches on, once validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingScope {
    Peer(String),
    Guild(String),
    Team(String),
    Account(String),
    ChannelWildcard,
}

impl BindingConfig {
    /// Validate the binding and return its scope.
    pub fn scope(&self) -> TinyclawResult<BindingScope> {
        if self.agent_id.trim().is_empty() {
            return Err(config_error(format!(
                "binding on channel '{}' has an empty agent_id",
                self.channel
            )));
        }
        if self.channel.trim().is_empty() || self.channel == "*" {
            return Err(config_error(format!(
                "binding for agent '{}' must name a concrete channel",
                self.agent_id
            )));
        }

        let set: Vec<(&str, &String)> = [
            ("peer", &self.peer),
            ("guild", &self.guild),
            ("team", &self.team),
            ("account", &self.account),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| (name, v)))
        .collect();

        match set.as_slice() {
            [] => Ok(BindingScope::ChannelWildcard),
            [(name, value)] => {
                if value.trim().is_empty() {
                    return Err(config_error(format!(
                        "binding for agent '{}' has an empty {}",
                        self.agent_id, name
                    )));
                }
                let value = (*value).clone();
                Ok(match *name {
                    "peer" => BindingScope::Peer(value),
                    "guild" => BindingScope::Guild(value),
                    "team" => BindingScope::Team(value),
                    _ if value == "*" => BindingScope::ChannelWildcard,
                    _ => BindingScope::Account(value),
                })
            }
            many => Err(config_error(format!(
                "binding for agent '{}' on channel '{}' sets more than one scope: {}",
                self.agent_id,
                self.channel,
                many.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

/// The top-level structure deserialized from a TOML routing file.
///
/// ```toml
/// default_agent = "main"
///
/// [[bindings]]
/// agent_id = "ops"
/// channel = "slack"
/// team = "T0001"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Agent that handles anything no binding claims.
    pub default_agent: String,

    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

type ScopedKey = (String, String);

/// A validated, lookup-ready binding table.
///
/// Immutable once built. The router swaps whole tables on reload.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    pub(crate) default_agent: String,
    pub(crate) peers: HashMap<ScopedKey, String>,
    pub(crate) guilds: HashMap<ScopedKey, String>,
    pub(crate) teams: HashMap<ScopedKey, String>,
    pub(crate) accounts: HashMap<ScopedKey, String>,
    pub(crate) channels: HashMap<String, String>,
}

impl BindingTable {
    /// Validate `config` and index its bindings.
    ///
    /// Returns `ConfigError` for an empty default agent, a malformed binding,
    /// or two bindings claiming the same (channel, scope).
    pub fn build(config: &RoutingConfig) -> TinyclawResult<Self> {
        if config.default_agent.trim().is_empty() {
            return Err(config_error("default_agent must not be empty".to_string()));
        }

        let mut table = BindingTable {
            default_agent: config.default_agent.clone(),
            ..BindingTable::default()
        };

        for binding in &config.bindings {
            let scope = binding.scope()?;
            let channel = binding.channel.clone();
            let agent = binding.agent_id.clone();

            let previous = match &scope {
                BindingScope::Peer(id) => table.peers.insert((channel, id.clone()), agent),
                BindingScope::Guild(id) => table.guilds.insert((channel, id.clone()), agent),
                BindingScope::Team(id) => table.teams.insert((channel, id.clone()), agent),
                BindingScope::Account(id) => table.accounts.insert((channel, id.clone()), agent),
                BindingScope::ChannelWildcard => table.channels.insert(channel, agent),
            };

            if let Some(previous) = previous {
                return Err(config_error(format!(
                    "duplicate binding for {:?} on channel '{}' (agents '{}' and '{}')",
                    scope, binding.channel, previous, binding.agent_id
                )));
            }
        }

        Ok(table)
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Total number of bindings, excluding the default.
    pub fn len(&self) -> usize {
        self.peers.len()
            + self.guilds.len()
            + self.teams.len()
            + self.accounts.len()
            + self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn config_error(reason: String) -> TinyclawError {
    TinyclawError::ConfigError { reason }
}
