//! A decoded application laid out on disk, and a toolchain that "decodes" by copying it.

use dexcloak_core::toolchain::check_decode_paths;
use dexcloak_core::{SessionConfig, SigningCredentials, Toolchain};
use dexcloak_transform::obfuscator::ObfuscationConfig;
use dexcloak_utils::errors::ToolError;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const SECRET: &str = "ThisSecretIsExactly32Characters!";

pub const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <uses-permission android:name="android.permission.INTERNET"/>
    <application android:label="@string/app_name">
        <activity android:name=".MainActivity">
            <intent-filter>
                <action android:name="android.intent.action.MAIN"/>
                <category android:name="android.intent.category.LAUNCHER"/>
            </intent-filter>
        </activity>
    </application>
</manifest>
"#;

/// Records every verb; `build` writes a placeholder archive.
#[derive(Debug, Clone)]
pub struct FixtureToolchain {
    source: PathBuf,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FixtureToolchain {
    fn record(&self, verb: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(verb.to_string());
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Toolchain for FixtureToolchain {
    fn decode(&self, archive: &Path, out_dir: &Path, force: bool) -> Result<PathBuf, ToolError> {
        check_decode_paths(archive, out_dir, force)?;
        for entry in WalkDir::new(&self.source) {
            let entry = entry.map_err(|e| ToolError::Io(e.into()))?;
            let Ok(rel) = entry.path().strip_prefix(&self.source) else {
                continue;
            };
            let target = out_dir.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
        self.record("decode");
        Ok(out_dir.to_path_buf())
    }

    fn build(&self, decoded: &Path, out_archive: &Path, _use_aapt2: bool) -> Result<PathBuf, ToolError> {
        if !decoded.is_dir() {
            return Err(ToolError::MissingInput(decoded.to_path_buf()));
        }
        fs::write(out_archive, b"PK\x03\x04")?;
        self.record("build");
        Ok(out_archive.to_path_buf())
    }

    fn sign(&self, archive: &Path, _credentials: &SigningCredentials) -> Result<(), ToolError> {
        if !archive.is_file() {
            return Err(ToolError::MissingInput(archive.to_path_buf()));
        }
        self.record("sign");
        Ok(())
    }

    fn align(&self, archive: &Path) -> Result<(), ToolError> {
        if !archive.is_file() {
            return Err(ToolError::MissingInput(archive.to_path_buf()));
        }
        self.record("align");
        Ok(())
    }
}

/// An application tree under construction.
#[derive(Debug, Default)]
pub struct App {
    files: BTreeMap<String, String>,
}

impl App {
    pub fn new() -> Self {
        Self::default().file("AndroidManifest.xml", MANIFEST)
    }

    pub fn file(mut self, rel: &str, contents: &str) -> Self {
        self.files.insert(rel.to_string(), contents.to_string());
        self
    }

    /// Writes the tree and an input archive; the returned run decodes from the tree.
    pub fn prepare(&self, passes: &[&str]) -> Run {
        let dir = tempfile::tempdir().expect("temp dir");
        let tree = dir.path().join("tree");
        for (rel, contents) in &self.files {
            let path = tree.join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
            fs::write(path, contents).expect("write fixture file");
        }
        let input = dir.path().join("app.apk");
        fs::write(&input, b"PK\x03\x04").expect("write input");

        let config = ObfuscationConfig {
            session: SessionConfig {
                input,
                working_dir: Some(dir.path().join("work")),
                secret: Some(SECRET.to_string()),
                ..Default::default()
            },
            passes: passes.iter().map(|p| p.to_string()).collect(),
            seed: 42,
        };
        let toolchain = FixtureToolchain {
            source: tree,
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        Run { dir, config, toolchain }
    }
}

/// Everything needed for one `obfuscate_apk` call.
#[derive(Debug)]
pub struct Run {
    pub dir: TempDir,
    pub config: ObfuscationConfig,
    pub toolchain: FixtureToolchain,
}

impl Run {
    /// Where the session decodes the input.
    pub fn decoded_root(&self) -> PathBuf {
        self.dir.path().join("work").join("app")
    }

    /// Every decoded file with its contents, keyed by relative path.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let root = self.decoded_root();
        WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&root).ok()?.to_string_lossy().replace('\\', "/");
                let text = fs::read_to_string(e.path()).ok()?;
                Some((rel, text))
            })
            .collect()
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.decoded_root().join(rel)).expect("read decoded file")
    }
}

/// A class declaring `fields` static int fields and `methods` static void methods.
pub fn wide_class(descriptor: &str, fields: usize, methods: usize) -> String {
    let mut text = format!(".class public {descriptor}\n.super Ljava/lang/Object;\n\n\n# static fields\n");
    for i in 0..fields {
        let _ = writeln!(text, ".field private static field{i}:I\n");
    }
    text.push_str("\n# direct methods\n");
    for i in 0..methods {
        let _ = writeln!(
            text,
            ".method private static method{i}()V\n    .locals 0\n\n    return-void\n.end method\n"
        );
    }
    text
}

/// Installs a test-friendly subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
