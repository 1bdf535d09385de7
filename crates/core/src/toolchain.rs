//! The external collaborators that turn an archive into a source tree and back.
//!
//! The pipeline only talks to the [`Toolchain`] trait. [`ExternalToolchain`] shells out to
//! `apktool`, `apksigner` and `zipalign`; tests plug in their own implementation.

use dexcloak_utils::errors::ToolError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::{ZipArchive, ZipWriter};

/// Output markers that mean apktool failed even though it exited with status 0.
const FAILURE_BANNERS: &[&str] = &["Exception in thread ", "brut.directory.PathNotExist: "];

/// Keystore parameters used to re-sign the rebuilt archive.
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningCredentials {
    pub keystore: PathBuf,
    pub keystore_password: String,
    pub key_alias: String,
    pub key_password: Option<String>,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("keystore", &self.keystore)
            .field("keystore_password", &"***")
            .field("key_alias", &self.key_alias)
            .field("key_password", &self.key_password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// The four verbs the pipeline needs from the outside world.
pub trait Toolchain: Send + Sync {
    /// Decodes `archive` into `out_dir` and returns the decoded root.
    fn decode(&self, archive: &Path, out_dir: &Path, force: bool) -> Result<PathBuf, ToolError>;

    /// Builds `decoded` into `out_archive` and returns the produced archive path.
    fn build(&self, decoded: &Path, out_archive: &Path, use_aapt2: bool) -> Result<PathBuf, ToolError>;

    /// Replaces any existing signature of `archive` with one made from `credentials`.
    fn sign(&self, archive: &Path, credentials: &SigningCredentials) -> Result<(), ToolError>;

    /// Zip-aligns `archive` in place.
    fn align(&self, archive: &Path) -> Result<(), ToolError>;
}

/// Validates the preconditions shared by every `decode` implementation.
pub fn check_decode_paths(archive: &Path, out_dir: &Path, force: bool) -> Result<(), ToolError> {
    if !archive.is_file() {
        return Err(ToolError::MissingInput(archive.to_path_buf()));
    }
    let parent_missing = out_dir
        .parent()
        .is_some_and(|p| !p.as_os_str().is_empty() && !p.is_dir());
    if parent_missing {
        return Err(ToolError::MissingParent(out_dir.to_path_buf()));
    }
    if out_dir.exists() && !force {
        return Err(ToolError::OutputExists(out_dir.to_path_buf()));
    }
    Ok(())
}

/// Removes every `META-INF/` entry from `archive` by copying the remaining entries into a
/// fresh container and replacing the original. Returns whether anything was removed.
pub fn strip_signature(archive: &Path) -> Result<bool, ToolError> {
    let mut source = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    if !source.file_names().any(|name| name.starts_with("META-INF/")) {
        return Ok(false);
    }

    info!("removing existing signature from {}", archive.display());
    let dir = archive.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    let mut writer = ZipWriter::new(tmp.reopen()?);
    for index in 0..source.len() {
        let entry = source.by_index_raw(index)?;
        if entry.name().starts_with("META-INF/") {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }
    writer.finish()?;
    tmp.persist(archive).map_err(|e| ToolError::Io(e.error))?;
    Ok(true)
}

/// Runs `apktool`, `apksigner` and `zipalign` as child processes.
///
/// Executable paths default to the bare tool names and can be overridden with the
/// `APKTOOL_PATH`, `APKSIGNER_PATH` and `ZIPALIGN_PATH` environment variables.
#[derive(Debug, Clone)]
pub struct ExternalToolchain {
    pub apktool: PathBuf,
    pub apksigner: PathBuf,
    pub zipalign: PathBuf,
    /// Framework directory handed to apktool.
    pub frame_path: PathBuf,
}

impl Default for ExternalToolchain {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ExternalToolchain {
    pub fn from_env() -> Self {
        let tool = |var: &str, default: &str| {
            std::env::var_os(var)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };
        Self {
            apktool: tool("APKTOOL_PATH", "apktool"),
            apksigner: tool("APKSIGNER_PATH", "apksigner"),
            zipalign: tool("ZIPALIGN_PATH", "zipalign"),
            frame_path: std::env::temp_dir(),
        }
    }

    fn run(&self, tool: &Path, args: &[OsString]) -> Result<String, ToolError> {
        let name = tool.display().to_string();
        debug!("running {} {:?}", name, args);

        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ToolError::Launch {
                tool: name.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool: name,
                status: output.status.code().unwrap_or(-1),
                output: text,
            });
        }
        if FAILURE_BANNERS.iter().any(|b| text.contains(b)) {
            return Err(ToolError::Exception { tool: name, output: text });
        }
        Ok(text)
    }
}

impl Toolchain for ExternalToolchain {
    fn decode(&self, archive: &Path, out_dir: &Path, force: bool) -> Result<PathBuf, ToolError> {
        check_decode_paths(archive, out_dir, force)?;

        let mut args: Vec<OsString> = vec!["--frame-path".into(), self.frame_path.clone().into(), "d".into()];
        if force {
            args.push("--force".into());
        }
        args.extend([archive.into(), "-o".into(), out_dir.into()]);

        info!("decoding {}", archive.display());
        self.run(&self.apktool, &args)?;
        Ok(out_dir.to_path_buf())
    }

    fn build(&self, decoded: &Path, out_archive: &Path, use_aapt2: bool) -> Result<PathBuf, ToolError> {
        if !decoded.is_dir() {
            return Err(ToolError::MissingInput(decoded.to_path_buf()));
        }

        let mut args: Vec<OsString> = vec![
            "--frame-path".into(),
            self.frame_path.clone().into(),
            "b".into(),
            "--force-all".into(),
        ];
        if use_aapt2 {
            args.push("--use-aapt2".into());
        }
        args.extend([decoded.into(), "-o".into(), out_archive.into()]);

        info!("building {}", out_archive.display());
        let output = self.run(&self.apktool, &args)?;
        if !out_archive.is_file() {
            return Err(ToolError::MissingOutput {
                path: out_archive.to_path_buf(),
                output,
            });
        }
        Ok(out_archive.to_path_buf())
    }

    fn sign(&self, archive: &Path, credentials: &SigningCredentials) -> Result<(), ToolError> {
        if !archive.is_file() {
            return Err(ToolError::MissingInput(archive.to_path_buf()));
        }
        strip_signature(archive)?;

        let mut args: Vec<OsString> = vec![
            "sign".into(),
            "-v".into(),
            "--ks".into(),
            credentials.keystore.clone().into(),
            "--ks-key-alias".into(),
            credentials.key_alias.clone().into(),
            "--ks-pass".into(),
            format!("pass:{}", credentials.keystore_password).into(),
        ];
        if let Some(key_password) = &credentials.key_password {
            args.push("--key-pass".into());
            args.push(format!("pass:{key_password}").into());
        }
        args.push(archive.into());

        info!("signing {}", archive.display());
        self.run(&self.apksigner, &args)?;
        Ok(())
    }

    fn align(&self, archive: &Path) -> Result<(), ToolError> {
        if !archive.is_file() {
            return Err(ToolError::MissingInput(archive.to_path_buf()));
        }

        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let copy = archive.with_file_name(format!("{stem}.copy.apk"));
        fs::copy(archive, &copy)?;

        let args: Vec<OsString> = vec![
            "-p".into(),
            "-v".into(),
            "-f".into(),
            "4".into(),
            copy.clone().into(),
            archive.into(),
        ];
        info!("aligning {}", archive.display());
        let result = self.run(&self.zipalign, &args);

        if copy.is_file() {
            fs::remove_file(&copy)?;
        }
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[&str]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for name in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(name.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn strips_meta_inf_entries() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(
            &apk,
            &["AndroidManifest.xml", "classes.dex", "META-INF/CERT.RSA", "META-INF/MANIFEST.MF"],
        );

        assert!(strip_signature(&apk).unwrap());
        let archive = ZipArchive::new(File::open(&apk).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["AndroidManifest.xml", "classes.dex"]);

        assert!(!strip_signature(&apk).unwrap());
    }

    #[test]
    fn decode_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        let out = dir.path().join("out");

        assert!(matches!(
            check_decode_paths(&apk, &out, false),
            Err(ToolError::MissingInput(_))
        ));

        fs::write(&apk, b"PK").unwrap();
        assert!(check_decode_paths(&apk, &out, false).is_ok());
        assert!(matches!(
            check_decode_paths(&apk, &dir.path().join("missing/out"), true),
            Err(ToolError::MissingParent(_))
        ));

        fs::create_dir(&out).unwrap();
        assert!(matches!(
            check_decode_paths(&apk, &out, false),
            Err(ToolError::OutputExists(_))
        ));
        assert!(check_decode_paths(&apk, &out, true).is_ok());
    }

    #[test]
    fn credentials_debug_hides_passwords() {
        let creds = SigningCredentials {
            keystore: "ks.jks".into(),
            keystore_password: "hunter2".into(),
            key_alias: "key".into(),
            key_password: Some("hunter3".into()),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter"));
    }
}
