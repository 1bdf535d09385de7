//! Fixture sessions backed by a prepared directory instead of the real decoder.

use dexcloak_core::toolchain::check_decode_paths;
use dexcloak_core::{Session, SessionConfig, SigningCredentials, Toolchain};
use dexcloak_utils::errors::ToolError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const SECRET: &str = "0123456789abcdefghijklmnopqrstuv";

pub const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <application android:label="@string/app_name">
        <activity android:name=".MainActivity"/>
    </application>
</manifest>
"#;

/// "Decodes" by copying `source` and records the other verbs.
#[derive(Debug, Clone)]
pub struct DirToolchain {
    pub source: PathBuf,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Toolchain for DirToolchain {
    fn decode(&self, archive: &Path, out_dir: &Path, force: bool) -> Result<PathBuf, ToolError> {
        check_decode_paths(archive, out_dir, force)?;
        for entry in WalkDir::new(&self.source) {
            let entry = entry.map_err(|e| ToolError::Io(e.into()))?;
            let rel = entry.path().strip_prefix(&self.source).unwrap();
            let target = out_dir.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
        self.calls.lock().unwrap().push("decode".into());
        Ok(out_dir.to_path_buf())
    }

    fn build(&self, _: &Path, out_archive: &Path, _: bool) -> Result<PathBuf, ToolError> {
        fs::write(out_archive, b"PK")?;
        self.calls.lock().unwrap().push("build".into());
        Ok(out_archive.to_path_buf())
    }

    fn sign(&self, _: &Path, _: &SigningCredentials) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push("sign".into());
        Ok(())
    }

    fn align(&self, _: &Path) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push("align".into());
        Ok(())
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub session: Session,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    /// Path of `rel` inside the decoded tree.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.session.decoded().unwrap().root.join(rel)
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }
}

/// Writes `files` (relative path, contents) as a decoded tree and opens a decoded session.
pub fn fixture(files: &[(&str, &str)]) -> Fixture {
    fixture_with(files, |_| {})
}

pub fn fixture_with(files: &[(&str, &str)], configure: impl FnOnce(&mut SessionConfig)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("tree");
    for (rel, contents) in files {
        let path = source.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    if !source.join("AndroidManifest.xml").exists() {
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("AndroidManifest.xml"), MANIFEST).unwrap();
    }
    let input = dir.path().join("app.apk");
    fs::write(&input, b"PK").unwrap();

    let mut config = SessionConfig {
        input,
        working_dir: Some(dir.path().join("work")),
        secret: Some(SECRET.to_string()),
        ..Default::default()
    };
    configure(&mut config);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let toolchain = DirToolchain {
        source,
        calls: calls.clone(),
    };
    let mut session = Session::new(config, Box::new(toolchain)).unwrap();
    session.ensure_decoded().unwrap();
    Fixture { dir, session, calls }
}
