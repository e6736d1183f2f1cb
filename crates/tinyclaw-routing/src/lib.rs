//! # tinyclaw-routing
//!
//! Maps an inbound (channel, peer, guild/team/account) tuple to exactly one
//! agent and session.
//!
//! ## Overview
//!
//! [`Router`] implements
//! [`RouteResolver`](tinyclaw_core::traits::RouteResolver). Bindings are
//! declared in TOML; the most specific matching scope wins, and a configured
//! default agent guarantees every message resolves. Every resolution is
//! recorded as a `ROUTE_RESOLVED` audit event carrying the match reason.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tinyclaw_routing::Router;
//!
//! let router = Router::from_file(Path::new("routing.toml"), audit.clone())?;
//! let route = router.resolve(&RouteRequest::new("discord", "user-1"))?;
//! ```

pub mod binding;
pub mod router;

pub use binding::{BindingConfig, BindingScope, BindingTable, RoutingConfig};
pub use router::{parse_config, Router};

// ── Tests ─────────────────────────────────────────────────────────────────────
