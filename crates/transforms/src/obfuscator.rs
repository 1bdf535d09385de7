use crate::{pass, registry};
use dexcloak_core::budget::MemberKind;
use dexcloak_core::{Session, SessionConfig, Toolchain};
use dexcloak_utils::errors::ObfuscateError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Configuration for the obfuscation pipeline
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Paths, signing and library filtering for the session
    #[serde(flatten)]
    pub session: SessionConfig,
    /// Pass names, run in this order
    pub passes: Vec<String>,
    /// Random seed for deterministic obfuscation
    pub seed: u64,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            passes: Vec::new(),
            seed: 42,
        }
    }
}

impl std::fmt::Debug for ObfuscationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfuscationConfig")
            .field("input", &self.session.input)
            .field("working_dir", &self.session.working_dir)
            .field("output", &self.session.output)
            .field("passes", &self.passes)
            .field("seed", &self.seed)
            .field("ignore_libs", &self.session.ignore_libs)
            .field("ignore_packages", &self.session.ignore_packages)
            .field("use_aapt2", &self.session.use_aapt2)
            .field("signing", &self.session.signing)
            .field("secret", &self.session.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Result of the obfuscation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationResult {
    /// Archive path the build step writes to
    pub output: PathBuf,
    /// Whether the output archive exists, i.e. a build pass ran
    pub built: bool,
    /// Metadata about the obfuscation process
    pub metadata: ObfuscationMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationMetadata {
    /// Names of passes that were applied
    pub passes_applied: Vec<String>,
    /// Seed used for the obfuscation
    pub seed_used: u64,
    pub multidex: bool,
    /// Smali files across all dex groups
    pub smali_files: usize,
    /// Field budget handed to each field-adding pass, per dex group
    pub fields_per_pass: Option<Vec<usize>>,
    /// Method budget handed to each method-adding pass, per dex group
    pub methods_per_pass: Option<Vec<usize>>,
}

/// Runs the configured passes over `config.session.input`.
///
/// Pass names are resolved before the session is created, so a misspelt pass never costs a
/// decode. A failing pass aborts the run with [`ObfuscateError::Pass`]; files already rewritten
/// stay on disk.
pub fn obfuscate_apk(
    config: ObfuscationConfig,
    toolchain: Box<dyn Toolchain>,
) -> Result<ObfuscationResult, ObfuscateError> {
    let passes = registry::resolve_all(&config.passes)?;

    debug!("Starting obfuscation pipeline:");
    debug!("  Input: {}", config.session.input.display());
    debug!("  Seed: 0x{:x}", config.seed);
    debug!("  Passes: {}", config.passes.join(", "));

    let mut session = Session::new(config.session, toolchain)?;
    pass::run(&mut session, &passes, config.seed)?;

    let result = report(&session, config.seed)?;
    info!(
        "applied {} pass(es) to {} smali file(s)",
        result.metadata.passes_applied.len(),
        result.metadata.smali_files
    );
    Ok(result)
}

fn report(session: &Session, seed: u64) -> Result<ObfuscationResult, ObfuscateError> {
    Ok(ObfuscationResult {
        output: session.output.clone(),
        built: session.output.is_file(),
        metadata: ObfuscationMetadata {
            passes_applied: session.applied_passes.clone(),
            seed_used: seed,
            multidex: session.is_multidex()?,
            smali_files: session.smali_files()?.len(),
            fields_per_pass: session.memoized_budget(MemberKind::Field).map(<[usize]>::to_vec),
            methods_per_pass: session.memoized_budget(MemberKind::Method).map(<[usize]>::to_vec),
        },
    })
}
