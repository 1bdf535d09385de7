//! Passes that encrypt payloads and route their loads through an injected decrypt helper.
//!
//! Assets and native libraries are encrypted with AES-256/ECB under the session secret.
//! Strings use a PBKDF2 derived key and are stored hex encoded. The helper class for each
//! payload family is injected at most once per run.

mod asset;
mod const_string;
mod lib;
mod res_string;

pub use asset::AssetEncryption;
pub use const_string::ConstStringEncryption;
pub use lib::LibEncryption;
pub use res_string::ResStringEncryption;

use crate::util::{instr, Helper};
use dexcloak_core::crypto;
use dexcloak_core::smali::descriptor::{count_registers, split_params};
use dexcloak_core::smali::strings::unescape;
use dexcloak_core::smali::{classify, MethodDecl, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::{FileError, TransformError};
use dexcloak_utils::files;
use std::path::Path;
use tracing::debug;

const DECRYPT_STRING: &str =
    "Lcom/decryptstringmanager/DecryptString;->decryptString(Ljava/lang/String;)Ljava/lang/String;";
const DECRYPT_STRING_ARRAY: &str =
    "Lcom/decryptstringmanager/DecryptString;->decryptStringArray([Ljava/lang/String;)[Ljava/lang/String;";

/// The string constant last loaded into `register` before line `before`, within the same
/// method.
fn traced_string(lines: &[String], before: usize, register: &str) -> Option<String> {
    for line in lines[..before].iter().rev() {
        if line.starts_with(".method ") {
            return None;
        }
        if let SmaliLine::ConstString(load) = classify(line) {
            if load.register == register {
                return Some(unescape(load.value));
            }
        }
    }
    None
}

/// Writes the encryption of `source` under `secret` to `target`, which may be `source`.
/// Total register count of a method declared with `.registers N` instead of `.locals`.
fn declared_registers(line: &str) -> Option<usize> {
    line.trim_start().strip_prefix(".registers ")?.trim().parse().ok()
}

/// Registers taken by the parameters of `decl`, including `this`.
fn param_registers(decl: &MethodDecl<'_>) -> usize {
    count_registers(&split_params(decl.params)) + usize::from(!decl.is_static())
}

fn encrypt_file(source: &Path, target: &Path, secret: &str) -> Result<(), TransformError> {
    let plain = std::fs::read(source).map_err(|e| FileError::Read {
        path: source.to_path_buf(),
        source: e,
    })?;
    let sealed = crypto::encrypt_ecb(secret.as_bytes(), &plain)?;
    files::write_atomic(target, &sealed)?;
    debug!("  encrypted {} ({} bytes)", target.display(), sealed.len());
    Ok(())
}

/// `invoke-static {register}, method` followed by `move-result-object register`.
fn decrypt_call(register: &str, method: &str) -> [String; 4] {
    [
        instr(format!("invoke-static {{{register}}}, {method}")),
        String::new(),
        instr(format!("move-result-object {register}")),
        String::new(),
    ]
}

fn inject_string_helper(session: &mut Session) -> Result<(), TransformError> {
    if !session.decrypt_string_injected {
        Helper::DECRYPT_STRING.inject(session)?;
        session.decrypt_string_injected = true;
    }
    Ok(())
}

fn inject_asset_helper(session: &mut Session) -> Result<(), TransformError> {
    if !session.decrypt_asset_injected {
        Helper::DECRYPT_ASSET.inject(session)?;
        session.decrypt_asset_injected = true;
    }
    Ok(())
}
