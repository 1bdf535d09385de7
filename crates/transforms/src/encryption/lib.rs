use super::{encrypt_file, inject_asset_helper, traced_string};
use crate::util::{instr, Helper};
use crate::{Category, Transform};
use dexcloak_core::smali::registers::split_list;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::{FileError, TransformError};
use dexcloak_utils::files;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Moves native libraries loaded from a static initializer into encrypted assets.
///
/// `System.loadLibrary(name)` becomes `DecryptAsset.loadEncryptedLibrary(Class, name)`, which
/// decrypts `assets/lib.<abi>.<name>.so` to a temporary file and loads it.
pub struct LibEncryption;

const LOAD_LIBRARY: &str = "Ljava/lang/System;->loadLibrary(Ljava/lang/String;)V";

/// A native library file, by library name (`libfoo.so` is `foo`).
struct NativeLib {
    abi: String,
    path: PathBuf,
}

fn index_libs(paths: &[PathBuf]) -> BTreeMap<String, Vec<NativeLib>> {
    let mut libs: BTreeMap<String, Vec<NativeLib>> = BTreeMap::new();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("lib"))
            .and_then(|n| n.strip_suffix(".so"));
        let abi = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str());
        if let (Some(name), Some(abi)) = (name, abi) {
            libs.entry(name.to_string()).or_default().push(NativeLib {
                abi: abi.to_string(),
                path: path.clone(),
            });
        }
    }
    libs
}

/// Rewrites library loads in `<clinit>` for libraries in `known`, recording their names.
fn rewrite_loads(
    lines: &[String],
    known: &BTreeMap<String, Vec<NativeLib>>,
    used: &mut HashSet<String>,
) -> Vec<String> {
    let Some(class) = smali::declared_class(lines) else {
        return lines.to_vec();
    };
    let Some(start) = lines.iter().position(|l| {
        matches!(classify(l), SmaliLine::Method(decl) if decl.is_static_constructor())
    }) else {
        return lines.to_vec();
    };
    let end = lines[start..]
        .iter()
        .position(|l| l.starts_with(".end method"))
        .map_or(lines.len(), |p| start + p);
    let Some((locals_at, locals)) = (start..end).find_map(|i| match classify(&lines[i]) {
        SmaliLine::Locals(n) => Some((i, n)),
        _ => None,
    }) else {
        return lines.to_vec();
    };
    // The class register must fit the 4-bit operand of the invoke.
    if locals > 15 {
        return lines.to_vec();
    }

    let class_register = format!("v{locals}");
    let mut out = Vec::with_capacity(lines.len() + 4);
    let mut rewritten = 0;
    for (i, line) in lines.iter().enumerate() {
        if i > start && i < end {
            if let SmaliLine::Invoke(invoke) = classify(line) {
                let registers = split_list(invoke.registers);
                let name = match registers.as_slice() {
                    [register] if invoke.kind == "invoke-static" && invoke.key() == LOAD_LIBRARY => {
                        traced_string(lines, i, register).filter(|n| known.contains_key(n))
                    }
                    _ => None,
                };
                if let Some(name) = name {
                    out.push(instr(format!("const-class {class_register}, {class}")));
                    out.push(String::new());
                    out.push(instr(format!(
                        "invoke-static {{{class_register}, {}}}, {}->loadEncryptedLibrary(Ljava/lang/Class;Ljava/lang/String;)V",
                        registers[0],
                        Helper::DECRYPT_ASSET.descriptor
                    )));
                    used.insert(name);
                    rewritten += 1;
                    continue;
                }
            }
        }
        out.push(line.clone());
    }

    if rewritten > 0 {
        // Nothing before the `.locals` line was expanded, so its index is unchanged.
        out[locals_at] = instr(format!(".locals {}", locals + 1));
    }
    out
}

impl Transform for LibEncryption {
    fn name(&self) -> &'static str {
        "LibEncryption"
    }

    fn category(&self) -> Category {
        Category::Encryption
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let known = index_libs(session.native_lib_files()?);
        if known.is_empty() {
            debug!("  no native libraries");
            return Ok(false);
        }

        let mut used = HashSet::new();
        for path in session.smali_files()? {
            files::rewrite_lines(&path, |lines| {
                Ok::<_, TransformError>(rewrite_loads(lines, &known, &mut used))
            })?;
        }
        if used.is_empty() {
            return Ok(false);
        }

        let assets = session.assets_directory()?;
        std::fs::create_dir_all(&assets).map_err(|source| FileError::Write {
            path: assets.clone(),
            source,
        })?;
        let mut removed = Vec::new();
        for (name, libs) in known.iter().filter(|(name, _)| used.contains(*name)) {
            for lib in libs {
                let target = assets.join(format!("lib.{}.{name}.so", lib.abi));
                encrypt_file(&lib.path, &target, session.encryption_secret())?;
                files::remove(&lib.path)?;
                removed.push(lib.path.clone());
            }
        }
        debug!("  moved {} native librar(ies) into assets", removed.len());
        session.forget_native_libs(&removed);

        inject_asset_helper(session)?;
        Ok(true)
    }
}
