//! Discovery of the decoded application tree.

use crate::resources;
use dexcloak_utils::errors::{FileError, SessionError};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Smali directories beyond `smali_classes14` are never produced by the decoder.
const MAX_DEX_INDEX: usize = 14;

/// The smali files that end up in one dex container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexGroup {
    /// Directory name, e.g. `smali` or `smali_classes2`.
    pub name: String,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// The decoded application as laid out by the decoder.
#[derive(Debug, Clone)]
pub struct DecodedApk {
    pub root: PathBuf,
    pub manifest: PathBuf,
    /// One group per dex file. A single-dex application has exactly one group.
    pub groups: Vec<DexGroup>,
    pub native_libs: Vec<PathBuf>,
    pub multidex: bool,
}

fn dex_index(name: &str) -> Option<usize> {
    if name == "smali" {
        return Some(1);
    }
    name.strip_prefix("smali_classes")?
        .parse()
        .ok()
        .filter(|n| (2..=MAX_DEX_INDEX).contains(n))
}

fn walk_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, FileError> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|source| FileError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let is_match = entry.file_type().is_file()
            && entry.path().extension().is_some_and(|e| e == extension);
        if is_match {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Whether `relative` (a path below a `smali*` directory) belongs to a bundled library.
fn is_ignored_lib(relative: &Path, libs: &[&str]) -> bool {
    let relative = relative.to_string_lossy().replace('\\', "/");
    libs.iter().any(|lib| relative.starts_with(lib))
}

impl DecodedApk {
    /// Scans a decoded tree rooted at `root`.
    ///
    /// With `ignore_libs` set, smali files of known third-party libraries are left out.
    pub fn discover(root: &Path, ignore_libs: bool) -> Result<Self, SessionError> {
        let manifest = root.join("AndroidManifest.xml");
        if !manifest.is_file() {
            return Err(SessionError::MissingManifest(manifest));
        }

        let mut dirs: Vec<(usize, String)> = Vec::new();
        for entry in std::fs::read_dir(root).map_err(|source| FileError::Read {
            path: root.to_path_buf(),
            source,
        })? {
            let entry = entry.map_err(|source| FileError::Read {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(index) = dex_index(&name) {
                dirs.push((index, name));
            }
        }
        dirs.sort();

        let libs = if ignore_libs {
            resources::libs_to_ignore()
        } else {
            Vec::new()
        };

        let mut groups = Vec::with_capacity(dirs.len());
        for (_, name) in dirs {
            let dir = root.join(&name);
            let mut files: Vec<PathBuf> = walk_files(&dir, "smali")?
                .into_iter()
                .filter(|f| {
                    f.strip_prefix(&dir)
                        .map_or(true, |rel| !is_ignored_lib(rel, &libs))
                })
                .collect();
            files.sort();
            debug!("{}: {} smali files", name, files.len());
            groups.push(DexGroup { name, dir, files });
        }

        let multidex = root.join("smali_classes2").is_dir();
        if !multidex && groups.len() > 1 {
            // Without a second dex every smali directory is treated as one container.
            let mut merged = groups.remove(0);
            for group in groups.drain(..) {
                merged.files.extend(group.files);
            }
            merged.files.sort();
            groups.push(merged);
        }
        if groups.is_empty() {
            groups.push(DexGroup {
                name: "smali".to_string(),
                dir: root.join("smali"),
                files: Vec::new(),
            });
        }

        let mut native_libs = walk_files(&root.join("lib"), "so")?;
        native_libs.sort();

        Ok(Self {
            root: root.to_path_buf(),
            manifest,
            groups,
            native_libs,
            multidex,
        })
    }

    /// Every smali file of every group, sorted.
    pub fn smali_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .groups
            .iter()
            .flat_map(|g| g.files.iter().cloned())
            .collect();
        files.sort();
        files
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn resource_dir(&self) -> PathBuf {
        self.root.join("res")
    }

    /// Directory where injected helper classes are written: the primary dex.
    pub fn helper_root(&self) -> &Path {
        self.groups
            .first()
            .map_or(self.root.as_path(), |g| g.dir.as_path())
    }
}
