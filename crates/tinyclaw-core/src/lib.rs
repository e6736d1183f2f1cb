//! # tinyclaw-core
//!
//! The decision-core runtime for the TinyClaw gateway.
//!
//! This crate provides:
//! - The trait seams (`RouteResolver`, `ToolAuthorizer`, `AuditSink`,
//!   `PolicyDecisionPoint`, `ToolRunner`, `Clock`)
//! - The `Gateway` that wires them together in the correct trust order
//! - `SystemClock` and `ManualClock`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tinyclaw_core::{Gateway, traits::{AuditSink, RouteResolver, ToolAuthorizer}};
//!
//! let gateway = Gateway::new(Box::new(router), Box::new(authorizer), audit.clone());
//! let route = gateway.route(&request)?;
//! let outcome = gateway.invoke_tool(&route, &call, &runner)?;
//! ```

pub mod clock;
pub mod gateway;
pub mod traits;

pub use clock::{ManualClock, SystemClock};
pub use gateway::{CallerEvent, Gateway, ToolOutcome, DEFAULT_SESSION_CAPACITY};
