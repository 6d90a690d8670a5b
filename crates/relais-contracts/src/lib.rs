//! # relais-contracts
//!
//! Shared types, reason codes, and contracts for the relais orchestration
//! core.
//!
//! All crates in the workspace import from here. Apart from the parsing and
//! shape checks that keep each type's invariants, no business logic lives in
//! this crate.

pub mod context;
pub mod error;
pub mod execution;
pub mod known;
pub mod mode;
pub mod request;
pub mod tool;
