use crate::util::{group_files, random_letters};
use crate::{Capability, Category, Transform};
use dexcloak_core::crypto::hashed_identifier;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Renames fields and declares a few decoy fields next to each renamed one.
///
/// Field usages are matched by `name:type`, so accesses through a subclass that inherits the
/// field are renamed as well.
pub struct FieldRename;

const PREFIX: &str = "f";
const DECOY_SUFFIX_LEN: usize = 8;

/// Classes declared in smali, and the subset whose fields must keep their names.
struct ClassIndex {
    declared: HashSet<String>,
    skipped: HashSet<String>,
}

impl ClassIndex {
    fn scan(session: &Session, paths: &[PathBuf]) -> Result<Self, TransformError> {
        let mut index = Self {
            declared: HashSet::new(),
            skipped: HashSet::new(),
        };
        for path in paths {
            let text = files::read_text(path)?;
            let decl = text.lines().find_map(|l| match classify(l) {
                SmaliLine::Class(decl) => Some((decl.name.to_string(), decl.is_enum())),
                _ => None,
            });
            if let Some((name, is_enum)) = decl {
                if is_enum || session.is_ignored_class(&name) {
                    index.skipped.insert(name.clone());
                }
                index.declared.insert(name);
            }
        }
        Ok(index)
    }

    fn renames_usage(&self, owner: &str) -> bool {
        !self.skipped.contains(owner)
            && (!smali::is_framework_class(owner) || self.declared.contains(owner))
    }
}

struct Declarations<'a> {
    index: &'a ClassIndex,
    rng: &'a mut StdRng,
    renamed: &'a mut HashSet<String>,
    added: usize,
    max: usize,
}

impl Declarations<'_> {
    fn decoys(&mut self, line: &str, span: std::ops::Range<usize>, new_name: &str) -> Vec<String> {
        let mut decoys = Vec::new();
        if self.added >= self.max {
            return decoys;
        }
        for _ in 0..self.rng.random_range(1..=4) {
            if self.added >= self.max {
                break;
            }
            let suffix = random_letters(&mut *self.rng, DECOY_SUFFIX_LEN);
            decoys.push(smali::splice(line, span.clone(), &format!("{new_name}{suffix}")));
            self.added += 1;
        }
        decoys
    }

    fn rewrite(&mut self, lines: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(lines.len());
        let mut pending: Vec<String> = Vec::new();
        let mut seen_class = false;

        for (i, line) in lines.iter().enumerate() {
            match classify(line) {
                SmaliLine::Class(decl) if !seen_class => {
                    seen_class = true;
                    if self.index.skipped.contains(decl.name) {
                        return lines.to_vec();
                    }
                }
                SmaliLine::Field(decl) if !decl.name.contains('$') => {
                    let new_name = hashed_identifier(PREFIX, decl.name);
                    out.push(smali::splice(line, decl.name_span.clone(), &new_name));
                    self.renamed.insert(decl.signature());

                    let decoys = self.decoys(line, decl.name_span.clone(), &new_name);
                    // A field with annotations is closed by `.end field`; decoys go after it.
                    let annotated = lines[i + 1..]
                        .iter()
                        .find(|l| !l.trim().is_empty())
                        .is_some_and(|l| l.trim_start().starts_with(".annotation"));
                    if annotated {
                        pending.extend(decoys);
                    } else {
                        for decoy in decoys {
                            out.push(String::new());
                            out.push(decoy);
                        }
                    }
                    continue;
                }
                _ => {}
            }
            out.push(line.clone());
            if line.starts_with(".end field") {
                for decoy in pending.drain(..) {
                    out.push(String::new());
                    out.push(decoy);
                }
            }
        }
        out
    }
}

fn rename_usage(line: &str, renamed: &HashSet<String>, index: &ClassIndex) -> Option<String> {
    match classify(line) {
        SmaliLine::FieldAccess(access)
            if renamed.contains(&access.signature()) && index.renames_usage(access.class) =>
        {
            let new_name = hashed_identifier(PREFIX, access.name);
            Some(smali::splice(line, access.name_span.clone(), &new_name))
        }
        _ => None,
    }
}

impl Transform for FieldRename {
    fn name(&self) -> &'static str {
        "FieldRename"
    }

    fn category(&self) -> Category {
        Category::Rename
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::AddsFields]
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let budget = session.remaining_fields_per_pass()?;
        let all_files = session.smali_files()?;
        let index = ClassIndex::scan(session, &all_files)?;
        let mut renamed = HashSet::new();
        let mut decoys = 0;

        for (group, paths) in group_files(session)?.iter().enumerate() {
            let mut pass = Declarations {
                index: &index,
                rng: &mut *rng,
                renamed: &mut renamed,
                added: 0,
                max: budget.get(group).copied().unwrap_or(0),
            };
            for path in paths {
                files::rewrite_lines(path, |lines| Ok::<_, TransformError>(pass.rewrite(lines)))?;
            }
            debug!("  group {}: {} decoy field(s) (budget {})", group, pass.added, pass.max);
            decoys += pass.added;
        }
        debug!("  renamed {} field signature(s), added {} decoy(s)", renamed.len(), decoys);

        let changed = crate::util::rewrite_all(&all_files, |_, lines| {
            Ok(lines
                .iter()
                .map(|l| rename_usage(l, &renamed, &index).unwrap_or_else(|| l.clone()))
                .collect())
        })?;
        debug!("  updated field accesses in {} file(s)", changed);
        Ok(!renamed.is_empty())
    }
}
