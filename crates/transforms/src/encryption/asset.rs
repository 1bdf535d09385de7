use super::{encrypt_file, inject_asset_helper, traced_string};
use crate::util::{instr, Helper};
use crate::{Category, Transform};
use dexcloak_core::smali::registers::split_list;
use dexcloak_core::smali::{classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Encrypts assets opened by constant name and decrypts them when they are opened.
pub struct AssetEncryption;

const OPEN_ASSET: &str = "Landroid/content/res/AssetManager;->open(Ljava/lang/String;)Ljava/io/InputStream;";

struct AssetCalls<'a> {
    assets: &'a Path,
    secret: &'a str,
    encrypted: &'a mut HashSet<PathBuf>,
}

impl AssetCalls<'_> {
    fn rewrite(&mut self, lines: &[String]) -> Result<Vec<String>, TransformError> {
        let mut out = lines.to_vec();
        for (i, line) in lines.iter().enumerate() {
            let SmaliLine::Invoke(invoke) = classify(line) else {
                continue;
            };
            if invoke.kind != "invoke-virtual" || invoke.key() != OPEN_ASSET {
                continue;
            }
            let registers = split_list(invoke.registers);
            let [_, name_register] = registers.as_slice() else {
                continue;
            };
            let Some(name) = traced_string(lines, i, name_register) else {
                continue;
            };
            let asset = self.assets.join(&name);
            if !asset.is_file() {
                continue;
            }
            if !self.encrypted.contains(&asset) {
                encrypt_file(&asset, &asset, self.secret)?;
                self.encrypted.insert(asset);
            }
            out[i] = instr(format!(
                "invoke-static {{{}}}, {}->decryptAsset(Landroid/content/res/AssetManager;Ljava/lang/String;)Ljava/io/InputStream;",
                invoke.registers,
                Helper::DECRYPT_ASSET.descriptor
            ));
        }
        Ok(out)
    }
}

impl Transform for AssetEncryption {
    fn name(&self) -> &'static str {
        "AssetEncryption"
    }

    fn category(&self) -> Category {
        Category::Encryption
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let assets = session.assets_directory()?;
        if !assets.is_dir() {
            debug!("  no assets");
            return Ok(false);
        }

        let mut encrypted = HashSet::new();
        let mut calls = AssetCalls {
            assets: &assets,
            secret: session.encryption_secret(),
            encrypted: &mut encrypted,
        };
        for path in session.smali_files()? {
            files::rewrite_lines(&path, |lines| calls.rewrite(lines))?;
        }

        debug!("  encrypted {} asset(s)", encrypted.len());
        if encrypted.is_empty() {
            return Ok(false);
        }
        inject_asset_helper(session)?;
        Ok(true)
    }
}
