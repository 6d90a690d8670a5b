//! # relais-verify
//!
//! Tool catalogue and call validation for the relais runtime.
//!
//! This crate provides [`registry::ToolRegistry`], which implements the
//! [`relais_core::traits::CallValidator`] trait. It checks every proposed
//! tool call in three steps:
//!
//! 1. **Lookup**: The name must match a catalogue entry exactly.
//! 2. **Parse**: String arguments must be valid JSON.
//! 3. **Schema**: Arguments must satisfy the tool's JSON Schema.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use relais_verify::registry::ToolRegistry;
//!
//! let registry = ToolRegistry::from_file(Path::new("config/tools.toml"))?;
//! ```

pub mod arguments;
pub mod registry;

pub use registry::ToolRegistry;
