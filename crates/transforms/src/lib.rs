//! Obfuscation passes over a decoded Android application and the pipeline that runs them.

pub mod arithmetic_branch;
pub mod call_indirection;
pub mod debug_removal;
pub mod encryption;
pub mod goto;
pub mod method_overload;
pub mod nop;
pub mod obfuscator;
pub mod pass;
pub mod random_manifest;
pub mod reflection;
pub mod registry;
pub mod rename;
pub mod reorder;
#[cfg(test)]
pub(crate) mod testing;
pub mod trivial;
pub mod util;

use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad grouping of passes, used for listing and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Trivial,
    Rename,
    Encryption,
    Code,
    Resources,
    Other,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trivial => "trivial",
            Self::Rename => "rename",
            Self::Encryption => "encryption",
            Self::Code => "code",
            Self::Resources => "resources",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Members a pass may add to the dex files, which makes it share the member budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    AddsFields,
    AddsMethods,
}

/// Trait for obfuscation passes.
pub trait Transform: Send + Sync {
    /// Returns the pass name used for selection and logging.
    fn name(&self) -> &'static str;

    fn category(&self) -> Category;

    /// Member kinds this pass may add. Most passes add none.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Applies the pass to the decoded application, returning whether anything changed.
    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError>;
}
