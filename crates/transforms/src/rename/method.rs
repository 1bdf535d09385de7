use super::is_renameable;
use crate::util::rewrite_all;
use crate::{Category, Transform};
use dexcloak_core::crypto::hashed_identifier;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use std::collections::HashSet;
use tracing::debug;

/// Renames direct methods.
///
/// Only methods declared before `# virtual methods` are touched. Those cannot be overridden,
/// so renaming their declaration and the direct or static calls to it is always consistent.
pub struct MethodRename;

const PREFIX: &str = "m";

fn rename_declarations(session: &Session, lines: &[String], renamed: &mut HashSet<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut class: Option<&str> = None;
    let mut done = false;

    for line in lines {
        if done {
            out.push(line.clone());
            continue;
        }
        if line.starts_with("# virtual methods") {
            done = true;
            out.push(line.clone());
            continue;
        }
        match classify(line) {
            SmaliLine::Class(decl) if class.is_none() => {
                if decl.is_enum() || !is_renameable(session, decl.name) {
                    return lines.to_vec();
                }
                class = Some(decl.name);
            }
            SmaliLine::Method(decl) if !decl.is_constructor() && decl.has_body() => {
                if let Some(owner) = class {
                    renamed.insert(decl.key(owner));
                    let new_name = hashed_identifier(PREFIX, decl.name);
                    out.push(smali::splice(line, decl.name_span.clone(), &new_name));
                    continue;
                }
            }
            _ => {}
        }
        out.push(line.clone());
    }
    out
}

fn rename_usage(line: &str, renamed: &HashSet<String>) -> Option<String> {
    match classify(line) {
        SmaliLine::Invoke(invoke) if invoke.is_direct_or_static() && renamed.contains(&invoke.key()) => {
            let new_name = hashed_identifier(PREFIX, invoke.method);
            Some(smali::splice(line, invoke.method_span.clone(), &new_name))
        }
        SmaliLine::AnnotationMethod(method) if renamed.contains(&method.key()) => {
            let old = format!("->{}(", method.name);
            let new = format!("->{}(", hashed_identifier(PREFIX, method.name));
            Some(line.replacen(&old, &new, 1))
        }
        _ => None,
    }
}

impl Transform for MethodRename {
    fn name(&self) -> &'static str {
        "MethodRename"
    }

    fn category(&self) -> Category {
        Category::Rename
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let files = session.smali_files()?;
        let mut renamed = HashSet::new();
        rewrite_all(&files, |_, lines| Ok(rename_declarations(session, lines, &mut renamed)))?;
        debug!("  renamed {} method declaration(s)", renamed.len());

        let changed = rewrite_all(&files, |_, lines| {
            Ok(lines
                .iter()
                .map(|l| rename_usage(l, &renamed).unwrap_or_else(|| l.clone()))
                .collect())
        })?;
        debug!("  updated invocations in {} file(s)", changed);
        Ok(!renamed.is_empty())
    }
}
