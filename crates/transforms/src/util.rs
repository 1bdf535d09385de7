//! Helpers shared by the smali passes.

use dexcloak_core::smali::{classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::{FileError, TransformError};
use dexcloak_utils::files;
use rand::distr::Alphabetic;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Placeholder in the bundled helpers replaced by the session secret.
pub const SECRET_PLACEHOLDER: &str = "This-key-need-to-be-32-character";

/// A random ASCII letter string, used for labels and generated member names.
pub fn random_letters<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphabetic))).collect()
}

/// A helper class injected into the primary dex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Helper {
    pub descriptor: &'static str,
    /// Location below the primary smali directory.
    pub path: &'static str,
    template: &'static str,
}

impl Helper {
    pub const DECRYPT_ASSET: Helper = Helper {
        descriptor: "Lcom/decryptassetmanager/DecryptAsset;",
        path: "com/decryptassetmanager/DecryptAsset.smali",
        template: include_str!("../resources/DecryptAsset.smali"),
    };

    pub const DECRYPT_STRING: Helper = Helper {
        descriptor: "Lcom/decryptstringmanager/DecryptString;",
        path: "com/decryptstringmanager/DecryptString.smali",
        template: include_str!("../resources/DecryptString.smali"),
    };

    pub const API_REFLECTION: Helper = Helper {
        descriptor: "Lcom/apireflectionmanager/ApiReflection;",
        path: "com/apireflectionmanager/ApiReflection.smali",
        template: include_str!("../resources/ApiReflection.smali"),
    };

    pub const ADVANCED_API_REFLECTION: Helper = Helper {
        descriptor: "Lcom/advancedapireflectionmanager/AdvancedApiReflection;",
        path: "com/advancedapireflectionmanager/AdvancedApiReflection.smali",
        template: include_str!("../resources/ApiReflection.smali"),
    };

    /// The template with its class descriptor and secret filled in.
    pub fn source(&self, secret: &str) -> String {
        self.template
            .replace(Self::API_REFLECTION.descriptor, self.descriptor)
            .replace(SECRET_PLACEHOLDER, secret)
    }

    /// Writes `code` to the helper location of the session and returns the file path.
    pub fn write(&self, session: &Session, code: &str) -> Result<PathBuf, TransformError> {
        let path = session.helper_root()?.join(self.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FileError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        files::write_atomic(&path, code.as_bytes())?;
        debug!("  injected helper {}", self.descriptor);
        Ok(path)
    }

    /// Writes the template for the session secret.
    pub fn inject(&self, session: &Session) -> Result<PathBuf, TransformError> {
        let code = self.source(session.encryption_secret());
        self.write(session, &code)
    }
}

/// Runs `edit` over every file in `paths` and writes back the ones that changed.
///
/// Returns the number of rewritten files.
pub fn rewrite_all<F>(paths: &[PathBuf], mut edit: F) -> Result<usize, TransformError>
where
    F: FnMut(&Path, &[String]) -> Result<Vec<String>, TransformError>,
{
    let mut changed = 0;
    for path in paths {
        if files::rewrite_lines(path, |lines| edit(path, lines))? {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Whether `line` opens a method whose body can be rewritten.
pub fn enters_body(line: &str) -> bool {
    matches!(classify(line), SmaliLine::Method(decl) if decl.has_body())
}

/// Indents an instruction the way the decoder writes method bodies.
pub fn instr(text: impl AsRef<str>) -> String {
    format!("    {}", text.as_ref())
}

/// Smali files grouped per dex, in group order.
pub fn group_files(session: &Session) -> Result<Vec<Vec<PathBuf>>, TransformError> {
    Ok(session
        .dex_groups()?
        .iter()
        .map(|g| g.files.clone())
        .collect())
}

/// Position of the first `# direct methods` marker, or `None`.
pub fn direct_methods_marker(lines: &[String]) -> Option<usize> {
    lines.iter().position(|l| l.starts_with("# direct methods"))
}

/// Inserts `block` right after the `# direct methods` marker, appending the marker and the
/// block at the end when the class has none.
pub fn insert_direct_methods(lines: &mut Vec<String>, block: Vec<String>) {
    if block.is_empty() {
        return;
    }
    match direct_methods_marker(lines) {
        Some(at) => {
            let tail = lines.split_off(at + 1);
            lines.extend(block);
            lines.extend(tail);
        }
        None => {
            lines.push(String::new());
            lines.push("# direct methods".to_string());
            lines.extend(block);
        }
    }
}
