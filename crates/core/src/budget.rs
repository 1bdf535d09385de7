//! Field and method accounting against the dex reference limit.
//!
//! A dex file can reference at most 65536 fields and 65536 methods. Passes that add members
//! share what is left below [`DEX_MEMBER_LIMIT`], which keeps a safety margin under the
//! hard ceiling.

use crate::smali::{classify, SmaliLine};
use dexcloak_utils::errors::FileError;
use dexcloak_utils::files;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Usable member references per dex file.
pub const DEX_MEMBER_LIMIT: usize = 64000;

/// Which kind of member reference is being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Field,
    Method,
}

/// Collects the unique member keys declared or referenced by `paths`.
///
/// Fields are keyed as `class->name:type`, methods as `class->name(params)ret`. Declarations
/// before the `.class` line are ignored since their owner is unknown.
pub fn member_keys(paths: &[PathBuf], kind: MemberKind) -> Result<HashSet<String>, FileError> {
    let mut keys = HashSet::new();

    for file in paths {
        let text = files::read_text(file)?;
        let mut class: Option<&str> = None;

        for line in text.lines() {
            let event = classify(line);
            let Some(owner) = class else {
                if let SmaliLine::Class(decl) = event {
                    class = Some(decl.name);
                }
                continue;
            };

            match (kind, event) {
                (MemberKind::Field, SmaliLine::Field(decl)) => {
                    keys.insert(decl.key(owner));
                }
                (MemberKind::Field, SmaliLine::FieldAccess(access)) => {
                    keys.insert(access.key());
                }
                (MemberKind::Method, SmaliLine::Method(decl)) => {
                    keys.insert(decl.key(owner));
                }
                (MemberKind::Method, SmaliLine::Invoke(invoke)) => {
                    keys.insert(invoke.key());
                }
                (MemberKind::Method, SmaliLine::AnnotationMethod(method)) => {
                    keys.insert(method.key());
                }
                _ => {}
            }
        }
    }
    Ok(keys)
}

/// Number of unique member references in `paths`.
pub fn count_members(paths: &[PathBuf], kind: MemberKind) -> Result<usize, FileError> {
    Ok(member_keys(paths, kind)?.len())
}

/// References still available in a dex holding `count` of them.
pub const fn remaining(count: usize) -> usize {
    DEX_MEMBER_LIMIT.saturating_sub(count)
}

/// Share of `remaining` granted to each of `passes` member-adding passes.
pub const fn share(remaining: usize, passes: usize) -> usize {
    if passes > 1 {
        remaining / passes
    } else {
        remaining
    }
}
