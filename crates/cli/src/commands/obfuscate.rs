/// Module for the `obfuscate` subcommand, which runs a pipeline of passes over an Android
/// application.
///
/// Options come from the command line, optionally layered over a JSON configuration file. The
/// run report can be written as JSON with `--emit`.
use clap::Args;
use dexcloak_core::{ExternalToolchain, SigningCredentials};
use dexcloak_transform::obfuscator::{obfuscate_apk, ObfuscationConfig};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for the `obfuscate` subcommand.
#[derive(Args, Debug)]
pub struct ObfuscateArgs {
    /// APK or app bundle to obfuscate (may come from `--config` instead).
    pub input: Option<PathBuf>,
    /// Pass to apply; repeat to build the pipeline, which runs in the given order.
    #[arg(short = 'o', long = "obfuscator", value_name = "PASS")]
    passes: Vec<String>,
    /// Directory for intermediate files (default: `obfuscation_working_dir` next to the input).
    #[arg(short, long)]
    working_dir: Option<PathBuf>,
    /// Path of the obfuscated archive.
    #[arg(short, long)]
    destination: Option<PathBuf>,
    /// Leave known third-party libraries untouched.
    #[arg(short, long)]
    ignore_libs: bool,
    /// File with one package name per line that renaming passes must not touch.
    #[arg(long)]
    ignore_packages_file: Option<PathBuf>,
    /// Build with aapt2 instead of aapt.
    #[arg(long)]
    use_aapt2: bool,
    #[arg(long, requires_all = ["keystore_password", "key_alias"])]
    keystore_file: Option<PathBuf>,
    #[arg(long)]
    keystore_password: Option<String>,
    #[arg(long)]
    key_alias: Option<String>,
    #[arg(long)]
    key_password: Option<String>,
    /// Random seed for pass randomness (default: 42).
    #[arg(long)]
    seed: Option<u64>,
    /// JSON configuration file; command-line options override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to write the run report as JSON.
    #[arg(long)]
    emit: Option<PathBuf>,
}

/// Package names from `path`, skipping blank lines and `#` comments.
fn read_package_list(path: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("cannot read ignore packages file '{}': {e}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

impl ObfuscateArgs {
    /// Merges the arguments over the configuration file, if any.
    fn into_config(self) -> Result<(ObfuscationConfig, Option<PathBuf>), Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str::<ObfuscationConfig>(&fs::read_to_string(path)?)?,
            None => ObfuscationConfig::default(),
        };

        if let Some(input) = self.input {
            config.session.input = input;
        }
        if config.session.input.as_os_str().is_empty() {
            return Err("no input archive given".into());
        }
        if !self.passes.is_empty() {
            config.passes = self.passes;
        }
        if config.passes.is_empty() {
            return Err("no obfuscator selected, use -o <PASS> (see `dexcloak list`)".into());
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.working_dir.is_some() {
            config.session.working_dir = self.working_dir;
        }
        if self.destination.is_some() {
            config.session.output = self.destination;
        }
        config.session.ignore_libs |= self.ignore_libs;
        config.session.use_aapt2 |= self.use_aapt2;
        if let Some(path) = &self.ignore_packages_file {
            config.session.ignore_packages.extend(read_package_list(path)?);
        }
        if let (Some(keystore), Some(keystore_password), Some(key_alias)) =
            (self.keystore_file, self.keystore_password, self.key_alias)
        {
            config.session.signing = Some(SigningCredentials {
                keystore,
                keystore_password,
                key_alias,
                key_password: self.key_password,
            });
        }
        Ok((config, self.emit))
    }
}

/// Executes the `obfuscate` subcommand.
impl super::Command for ObfuscateArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let (config, emit) = self.into_config()?;
        let toolchain = ExternalToolchain::from_env();
        let result = obfuscate_apk(config, Box::new(toolchain))?;

        println!("Applied: {}", result.metadata.passes_applied.join(", "));
        if result.built {
            println!("✅ Obfuscated archive written to {}", result.output.display());
        } else {
            println!("⚠️  No archive built; add -o Rebuild to produce {}", result.output.display());
        }

        if let Some(path) = emit {
            fs::write(&path, serde_json::to_string_pretty(&result)?)?;
            println!("📊 Wrote run report to {}", path.display());
        }
        Ok(())
    }
}
