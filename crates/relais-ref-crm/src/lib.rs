//! # relais-ref-crm
//!
//! CRM reference runtime for the relais orchestration core.
//!
//! Provides everything needed to run relais without external services:
//!
//! - [`REFERENCE_CATALOGUE`]: the tool catalogue (clients, contacts, deals,
//!   missions, quotes, proposals, invoices).
//! - [`mock_data::CrmStore`]: a fictional in-memory CRM.
//! - [`handlers::reference_dispatcher`]: a handler for every catalogue tool.
//! - [`model::ScriptedModel`] and [`model::KeywordModel`]: offline models.
//! - [`scenarios`]: end-to-end runs through the real verify, policy and
//!   audit components.
//!
//! All data is hardcoded and fictional. No external API calls are made.

pub mod handlers;
pub mod mock_data;
pub mod model;
pub mod scenarios;

/// The reference tool catalogue, as shipped in `config/tools.toml`.
pub const REFERENCE_CATALOGUE: &str = include_str!("../../../config/tools.toml");

pub use handlers::reference_dispatcher;
pub use mock_data::CrmStore;
pub use model::{KeywordModel, ScriptedModel};
