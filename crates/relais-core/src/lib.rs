//! # relais-core
//!
//! The orchestration pipeline for the relais runtime.
//!
//! This crate defines the trait seams (`LanguageModel`, `ToolHandler`,
//! `CallValidator`, `SafetyGuard`, `ConfirmationGate`, `AuditWriter`) and
//! the `Orchestrator` that drives them in the required order. No concrete
//! validation, policy or journal logic lives here; those come from
//! `relais-verify`, `relais-policy` and `relais-audit`.

pub mod assembler;
pub mod dispatcher;
pub mod model;
pub mod orchestrator;
pub mod supervisor;
pub mod traits;

pub use dispatcher::ToolDispatcher;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use supervisor::{Deadline, Supervisor, SupervisorSettings};
