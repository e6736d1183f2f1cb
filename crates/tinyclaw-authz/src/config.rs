//! Authorization configuration schema.
//!
//! ```toml
//! default_level = "requires-grant"
//!
//! [tools]
//! read_file = "always-allowed"
//! shell_exec = "requires-grant"
//! format_disk = "always-denied"
//!
//! [[grants]]
//! agent_id = "ops"
//! tool = "shell_exec"
//! scope = "workspace/ops"
//!
//! [external]
//! tools = ["shell_exec"]
//! timeout_ms = 500
//! max_in_flight = 16
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tinyclaw_contracts::{
    auth::AuthLevel,
    error::{TinyclawError, TinyclawResult},
};

use crate::grant::Grant;

/// Deadline applied to the external policy decision point when the config
/// does not set one.
pub const DEFAULT_EXTERNAL_TIMEOUT_MS: u64 = 2_000;

/// How many external decisions may be outstanding at once, counting workers
/// still running after their deadline.
pub const DEFAULT_EXTERNAL_MAX_IN_FLIGHT: usize = 16;

fn default_level() -> AuthLevel {
    AuthLevel::RequiresGrant
}

fn default_timeout_ms() -> u64 {
    DEFAULT_EXTERNAL_TIMEOUT_MS
}

fn default_max_in_flight() -> usize {
    DEFAULT_EXTERNAL_MAX_IN_FLIGHT
}

/// Which tools are also checked by the external policy decision point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalConfig {
    #[serde(default)]
    pub tools: Vec<String>,

    /// Hard deadline for one decision. On expiry the call is denied.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Calls beyond this many outstanding decisions are denied without
    /// asking the engine.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// The top-level structure deserialized from a TOML authorization file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzConfig {
    /// Level for tools not listed in `tools`.
    #[serde(default = "default_level")]
    pub default_level: AuthLevel,

    #[serde(default)]
    pub tools: BTreeMap<String, AuthLevel>,

    /// Grants active from startup.
    #[serde(default)]
    pub grants: Vec<Grant>,

    pub external: Option<ExternalConfig>,
}

impl AuthzConfig {
    /// Parse `s` as TOML. Returns `ConfigError` on malformed input.
    pub fn from_toml_str(s: &str) -> TinyclawResult<Self> {
        let config: AuthzConfig = toml::from_str(s).map_err(|e| TinyclawError::ConfigError {
            reason: format!("failed to parse authorization TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject tables that would make decisions ambiguous.
    pub fn validate(&self) -> TinyclawResult<()> {
        if let Some(name) = self.tools.keys().find(|name| name.trim().is_empty()) {
            return Err(config_error(format!("tool name {:?} is empty", name)));
        }

        for grant in &self.grants {
            grant.validate()?;
        }

        if let Some(external) = &self.external {
            if external.timeout_ms == 0 {
                return Err(config_error(
                    "external.timeout_ms must be greater than zero".to_string(),
                ));
            }
            if external.max_in_flight == 0 {
                return Err(config_error(
                    "external.max_in_flight must be greater than zero".to_string(),
                ));
            }
            if external.tools.iter().any(|t| t.trim().is_empty()) {
                return Err(config_error("external.tools contains an empty name".to_string()));
            }
        }

        Ok(())
    }

    /// Level for `tool`, falling back to `default_level`.
    pub fn level_for(&self, tool: &str) -> AuthLevel {
        self.tools.get(tool).copied().unwrap_or(self.default_level)
    }
}

pub(crate) fn config_error(reason: String) -> TinyclawError {
    TinyclawError::ConfigError { reason }
}
