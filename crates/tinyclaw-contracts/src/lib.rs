//! # tinyclaw-contracts
//!
//! Shared types and contracts for the TinyClaw gateway decision core.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod audit;
pub mod auth;
pub mod context;
pub mod error;
pub mod route;
