//! The state shared by every pass of one obfuscation run.

use crate::budget::{self, MemberKind};
use crate::crypto::KEY_SIZE;
use crate::inventory::{DecodedApk, DexGroup};
use crate::toolchain::{SigningCredentials, Toolchain};
use dexcloak_utils::errors::SessionError;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the working directory created next to the input when none is given.
pub const DEFAULT_WORKING_DIR: &str = "obfuscation_working_dir";

/// Container format of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Apk,
    Bundle,
}

impl ArchiveKind {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("aab") => Self::Bundle,
            _ => Self::Apk,
        }
    }
}

/// User-facing knobs of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Archive to obfuscate.
    pub input: PathBuf,
    /// Defaults to `obfuscation_working_dir` next to the input.
    pub working_dir: Option<PathBuf>,
    /// Defaults to `<working dir>/<stem>_obfuscated.<ext>`.
    pub output: Option<PathBuf>,
    /// Skip smali of well-known third-party libraries.
    pub ignore_libs: bool,
    /// Class prefixes, dotted or in descriptor form, that renaming leaves alone.
    pub ignore_packages: Vec<String>,
    /// Build with the alternative resource compiler.
    pub use_aapt2: bool,
    pub signing: Option<SigningCredentials>,
    /// Fixed 32 character secret; a random one is generated when absent.
    pub secret: Option<String>,
}

/// Code accumulated for one injected reflection helper.
///
/// Registries survive across passes so that a second pass targeting the same helper appends
/// to what the first one registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionRegistry {
    /// Static initializer lines that look up and register each method.
    pub code: Vec<String>,
    /// Number of registered methods; the next method gets this index.
    pub methods: usize,
    /// Code units injected so far.
    pub instructions: usize,
}

/// Shared mutable state of one obfuscation run.
pub struct Session {
    pub input: PathBuf,
    pub working_dir: PathBuf,
    pub output: PathBuf,
    pub kind: ArchiveKind,
    pub use_aapt2: bool,
    pub signing: Option<SigningCredentials>,

    ignore_libs: bool,
    ignore_packages: Vec<String>,
    secret: String,

    /// Scheduled passes that add fields or methods. Set before the first pass runs.
    pub passes_adding_fields: usize,
    pub passes_adding_methods: usize,
    fields_per_pass: Option<Vec<usize>>,
    methods_per_pass: Option<Vec<usize>>,

    pub decrypt_asset_injected: bool,
    pub decrypt_string_injected: bool,
    /// Keyed by helper class descriptor.
    pub reflection: BTreeMap<String, ReflectionRegistry>,

    /// Every pass that was started, including one that failed.
    pub applied_passes: Vec<String>,

    decoded: Option<DecodedApk>,
    toolchain: Box<dyn Toolchain>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("input", &self.input)
            .field("working_dir", &self.working_dir)
            .field("output", &self.output)
            .field("kind", &self.kind)
            .field("passes_adding_fields", &self.passes_adding_fields)
            .field("passes_adding_methods", &self.passes_adding_methods)
            .field("applied_passes", &self.applied_passes)
            .field("decoded", &self.decoded.is_some())
            .finish()
    }
}

/// `com.example.app` and `Lcom/example/app` both become `Lcom/example/app`.
pub fn normalize_package(name: &str) -> String {
    let name = name.trim().trim_end_matches(';');
    let slashed = name.replace('.', "/");
    if slashed.starts_with('L') && name.contains('/') {
        slashed
    } else {
        format!("L{slashed}")
    }
}

fn validate_signing(creds: &SigningCredentials) -> Result<(), SessionError> {
    if !creds.keystore.is_file() {
        return Err(SessionError::InvalidKeystore(format!(
            "keystore '{}' does not exist",
            creds.keystore.display()
        )));
    }
    if creds.keystore_password.is_empty() {
        return Err(SessionError::InvalidKeystore("keystore password is empty".into()));
    }
    if creds.key_alias.is_empty() {
        return Err(SessionError::InvalidKeystore("key alias is empty".into()));
    }
    Ok(())
}

fn random_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SIZE)
        .map(char::from)
        .collect()
}

impl Session {
    /// Validates `config` and prepares the working directory. Nothing is decoded yet.
    pub fn new(config: SessionConfig, toolchain: Box<dyn Toolchain>) -> Result<Self, SessionError> {
        if !config.input.is_file() {
            return Err(SessionError::InputNotFound(config.input));
        }

        let working_dir = config.working_dir.unwrap_or_else(|| {
            config
                .input
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_WORKING_DIR)
        });
        std::fs::create_dir_all(&working_dir).map_err(|source| SessionError::WorkingDir {
            path: working_dir.clone(),
            source,
        })?;

        let output = config.output.unwrap_or_else(|| {
            let stem = config
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let ext = config
                .input
                .extension()
                .map_or_else(|| "apk".to_string(), |e| e.to_string_lossy().into_owned());
            working_dir.join(format!("{stem}_obfuscated.{ext}"))
        });

        if let Some(creds) = &config.signing {
            validate_signing(creds)?;
        }

        let secret = match config.secret {
            Some(secret) if secret.len() == KEY_SIZE && secret.is_ascii() => {
                debug!("using the configured encryption secret");
                secret
            }
            Some(secret) => return Err(SessionError::InvalidSecret(secret.len())),
            None => {
                debug!("generated a random encryption secret");
                random_secret()
            }
        };

        let ignore_packages = config
            .ignore_packages
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| normalize_package(p))
            .collect();

        Ok(Self {
            kind: ArchiveKind::from_path(&config.input),
            input: config.input,
            working_dir,
            output,
            use_aapt2: config.use_aapt2,
            signing: config.signing,
            ignore_libs: config.ignore_libs,
            ignore_packages,
            secret,
            passes_adding_fields: 0,
            passes_adding_methods: 0,
            fields_per_pass: None,
            methods_per_pass: None,
            decrypt_asset_injected: false,
            decrypt_string_injected: false,
            reflection: BTreeMap::new(),
            applied_passes: Vec::new(),
            decoded: None,
            toolchain,
        })
    }

    /// Decodes the input on first call; later calls return the cached inventory.
    pub fn ensure_decoded(&mut self) -> Result<&DecodedApk, SessionError> {
        if self.decoded.is_none() {
            let stem = self
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "decoded".to_string());
            let target = self.working_dir.join(stem);

            let root = self.toolchain.decode(&self.input, &target, true)?;
            let decoded = DecodedApk::discover(&root, self.ignore_libs)?;
            info!(
                "decoded {} smali files in {} dex group(s)",
                decoded.groups.iter().map(|g| g.files.len()).sum::<usize>(),
                decoded.groups.len()
            );
            self.decoded = Some(decoded);
        }
        self.decoded()
    }

    pub fn decoded(&self) -> Result<&DecodedApk, SessionError> {
        self.decoded.as_ref().ok_or(SessionError::NotDecoded)
    }

    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    pub fn smali_files(&self) -> Result<Vec<PathBuf>, SessionError> {
        Ok(self.decoded()?.smali_files())
    }

    /// Smali files per dex, or an empty list for a single-dex application.
    pub fn multidex_smali_files(&self) -> Result<Vec<Vec<PathBuf>>, SessionError> {
        let decoded = self.decoded()?;
        if !decoded.multidex {
            return Ok(Vec::new());
        }
        Ok(decoded.groups.iter().map(|g| g.files.clone()).collect())
    }

    pub fn dex_groups(&self) -> Result<&[DexGroup], SessionError> {
        Ok(&self.decoded()?.groups)
    }

    /// Index of the dex group that holds `file`.
    pub fn group_of(&self, file: &Path) -> Result<usize, SessionError> {
        let groups = self.dex_groups()?;
        Ok(groups
            .iter()
            .position(|g| file.starts_with(&g.dir))
            .unwrap_or(0))
    }

    pub fn manifest_file(&self) -> Result<&Path, SessionError> {
        Ok(&self.decoded()?.manifest)
    }

    pub fn assets_directory(&self) -> Result<PathBuf, SessionError> {
        Ok(self.decoded()?.assets_dir())
    }

    pub fn resource_directory(&self) -> Result<PathBuf, SessionError> {
        Ok(self.decoded()?.resource_dir())
    }

    pub fn native_lib_files(&self) -> Result<&[PathBuf], SessionError> {
        Ok(&self.decoded()?.native_libs)
    }

    /// Drops `files` from the native library inventory after they were moved or removed.
    pub fn forget_native_libs(&mut self, files: &[PathBuf]) {
        if let Some(decoded) = self.decoded.as_mut() {
            decoded.native_libs.retain(|lib| !files.contains(lib));
        }
    }

    pub fn is_multidex(&self) -> Result<bool, SessionError> {
        Ok(self.decoded()?.multidex)
    }

    /// Directory where injected helper classes go.
    pub fn helper_root(&self) -> Result<&Path, SessionError> {
        Ok(self.decoded()?.helper_root())
    }

    /// Live count of unique member references, one entry per dex group.
    pub fn total_members(&self, kind: MemberKind) -> Result<Vec<usize>, SessionError> {
        self.dex_groups()?
            .iter()
            .map(|g| budget::count_members(&g.files, kind).map_err(SessionError::from))
            .collect()
    }

    /// Live count of still available member references, one entry per dex group.
    pub fn remaining_members(&self, kind: MemberKind) -> Result<Vec<usize>, SessionError> {
        Ok(self
            .total_members(kind)?
            .into_iter()
            .map(budget::remaining)
            .collect())
    }

    fn per_pass(&mut self, kind: MemberKind) -> Result<Vec<usize>, SessionError> {
        let cached = match kind {
            MemberKind::Field => &self.fields_per_pass,
            MemberKind::Method => &self.methods_per_pass,
        };
        if let Some(budget) = cached {
            return Ok(budget.clone());
        }

        let passes = match kind {
            MemberKind::Field => self.passes_adding_fields,
            MemberKind::Method => self.passes_adding_methods,
        };
        let budget: Vec<usize> = self
            .remaining_members(kind)?
            .into_iter()
            .map(|remaining| budget::share(remaining, passes))
            .collect();
        debug!("{:?} budget per pass: {:?}", kind, budget);

        match kind {
            MemberKind::Field => self.fields_per_pass = Some(budget.clone()),
            MemberKind::Method => self.methods_per_pass = Some(budget.clone()),
        }
        Ok(budget)
    }

    /// Fields each field-adding pass may add, one entry per dex group. Computed once per run.
    pub fn remaining_fields_per_pass(&mut self) -> Result<Vec<usize>, SessionError> {
        self.per_pass(MemberKind::Field)
    }

    /// Methods each method-adding pass may add, one entry per dex group. Computed once per run.
    pub fn remaining_methods_per_pass(&mut self) -> Result<Vec<usize>, SessionError> {
        self.per_pass(MemberKind::Method)
    }

    /// The per-pass budget computed so far, if any pass asked for it.
    pub fn memoized_budget(&self, kind: MemberKind) -> Option<&[usize]> {
        match kind {
            MemberKind::Field => self.fields_per_pass.as_deref(),
            MemberKind::Method => self.methods_per_pass.as_deref(),
        }
    }

    /// Normalized class prefixes excluded from renaming.
    pub fn ignore_package_names(&self) -> &[String] {
        &self.ignore_packages
    }

    /// Whether `class` falls under one of the ignored packages.
    pub fn is_ignored_class(&self, class: &str) -> bool {
        self.ignore_packages.iter().any(|p| class.starts_with(p.as_str()))
    }

    pub fn encryption_secret(&self) -> &str {
        &self.secret
    }

    /// Builds the decoded tree into the output archive.
    pub fn build_output(&self) -> Result<PathBuf, SessionError> {
        let root = &self.decoded()?.root;
        Ok(self.toolchain.build(root, &self.output, self.use_aapt2)?)
    }
}
