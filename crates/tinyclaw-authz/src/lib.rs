//! # tinyclaw-authz
//!
//! Fail-closed tool authorization for the TinyClaw decision core.
//!
//! ## Overview
//!
//! [`Authorizer`] implements
//! [`ToolAuthorizer`](tinyclaw_core::traits::ToolAuthorizer). Each tool has
//! an [`AuthLevel`](tinyclaw_contracts::auth::AuthLevel) from a TOML table;
//! `requires-grant` tools additionally need a matching, unexpired grant in
//! the [`GrantStore`]. A subset of tools can be delegated to an external
//! policy decision point, which is always called with a deadline and whose
//! silence means "deny".
//!
//! Denials are successful returns, never errors.

pub mod authorizer;
pub mod config;
pub mod external;
pub mod grant;

pub use authorizer::Authorizer;
pub use config::{
    AuthzConfig, ExternalConfig, DEFAULT_EXTERNAL_MAX_IN_FLIGHT, DEFAULT_EXTERNAL_TIMEOUT_MS,
};
pub use external::{ExternalOutcome, ExternalPolicy};
pub use grant::{lookup, Grant, GrantLookup, GrantStore};

// ── Tests ─────────────────────────────────────────────────────────────────────
