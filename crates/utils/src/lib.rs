//! Shared error types and file helpers for the dexcloak workspace.

pub mod errors;
pub mod files;
