use crate::util::{group_files, instr};
use crate::{Capability, Category, Transform};
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Adds dummy overloads next to direct methods.
///
/// Each eligible method gets three siblings with the same name and four extra parameters, so
/// a reader has to tell the real implementation from the decoys by their bodies.
pub struct MethodOverload;

const PARAM_TYPES: &[&str] = &["Ljava/lang/String;", "Z", "B", "S", "C", "I", "F"];
const OVERLOADS: usize = 3;

/// Direct method signatures of framework superclasses that ship inside the application.
///
/// Overloading one of those could shadow an inherited platform method.
fn ignored_signatures(paths: &[PathBuf]) -> Result<HashSet<String>, TransformError> {
    let mut parents = HashSet::new();
    for path in paths {
        let text = files::read_text(path)?;
        if let Some(parent) = text.lines().find_map(|l| match classify(l) {
            SmaliLine::Super(name) => Some(name.to_string()),
            _ => None,
        }) {
            if parent != "Ljava/lang/Object;" && smali::is_framework_class(&parent) {
                parents.insert(parent);
            }
        }
    }

    let mut ignored = HashSet::new();
    if parents.is_empty() {
        return Ok(ignored);
    }
    for path in paths {
        let lines = files::read_lines(path)?;
        let owned = smali::declared_class(&lines).is_some_and(|c| parents.contains(c));
        if !owned {
            continue;
        }
        for line in lines.iter().take_while(|l| !l.starts_with("# virtual methods")) {
            if let SmaliLine::Method(decl) = classify(line) {
                if !decl.is_constructor() && decl.has_body() {
                    ignored.insert(decl.signature());
                }
            }
        }
    }
    Ok(ignored)
}

/// Three distinct orderings of four distinct random parameter types.
fn extra_params(rng: &mut StdRng) -> Vec<String> {
    let picked: Vec<&str> = PARAM_TYPES.choose_multiple(rng, 4).copied().collect();
    let mut orders = Vec::with_capacity(24);
    for a in 0..4 {
        for b in 0..4 {
            for c in 0..4 {
                for d in 0..4 {
                    let idx = [a, b, c, d];
                    let distinct = (0..4).all(|i| (i + 1..4).all(|j| idx[i] != idx[j]));
                    if distinct {
                        orders.push(idx.iter().map(|&i| picked[i]).collect::<String>());
                    }
                }
            }
        }
    }
    orders.shuffle(rng);
    orders.truncate(OVERLOADS);
    orders
}

fn overload_body(rng: &mut StdRng) -> Vec<String> {
    let a: u8 = rng.random_range(1..=7);
    let b: u8 = rng.random_range(1..=7);
    vec![
        instr(".locals 3"),
        String::new(),
        instr(format!("const/4 v0, 0x{a:x}")),
        String::new(),
        instr(format!("const/4 v1, 0x{b:x}")),
        String::new(),
        instr("mul-int v2, v0, v1"),
        String::new(),
        instr("add-int/2addr v2, v0"),
        String::new(),
        instr("return-void"),
        ".end method".to_string(),
        String::new(),
    ]
}

struct Overloader<'a> {
    rng: &'a mut StdRng,
    ignored: &'a HashSet<String>,
    added: usize,
    max: usize,
}

impl Overloader<'_> {
    fn rewrite(&mut self, lines: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(lines.len());
        let mut active = true;
        let mut seen_class = false;

        for line in lines {
            if !active {
                out.push(line.clone());
                continue;
            }
            if line.starts_with("# virtual methods") {
                active = false;
                out.push(line.clone());
                continue;
            }
            match classify(line) {
                SmaliLine::Class(decl) if !seen_class => {
                    seen_class = true;
                    active = !decl.is_enum() && !decl.is_interface();
                }
                SmaliLine::Method(decl)
                    if !decl.is_constructor()
                        && decl.has_body()
                        && !self.ignored.contains(&decl.signature())
                        && self.added + OVERLOADS <= self.max =>
                {
                    let tail = &line[decl.name_span.end..];
                    let original = format!("({}){}", decl.params, decl.ret);
                    for extra in extra_params(self.rng) {
                        let signature = format!("({}{extra})V", decl.params);
                        let head = line[..decl.name_span.end]
                            .replace(" varargs ", " ")
                            .replace(" bridge ", " ")
                            .replace(" synthetic ", " ");
                        out.push(format!("{head}{}", tail.replacen(&original, &signature, 1)));
                        out.extend(overload_body(self.rng));
                    }
                    self.added += OVERLOADS;
                }
                _ => {}
            }
            out.push(line.clone());
        }
        out
    }
}

impl Transform for MethodOverload {
    fn name(&self) -> &'static str {
        "MethodOverload"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::AddsMethods]
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let ignored = ignored_signatures(&session.smali_files()?)?;
        debug!("  {} inherited signatures left alone", ignored.len());
        let budget = session.remaining_methods_per_pass()?;
        let mut total = 0;

        for (index, group) in group_files(session)?.iter().enumerate() {
            let mut pass = Overloader {
                rng: &mut *rng,
                ignored: &ignored,
                added: 0,
                max: budget.get(index).copied().unwrap_or(0),
            };
            for path in group {
                if pass.added >= pass.max {
                    break;
                }
                files::rewrite_lines(path, |lines| Ok::<_, TransformError>(pass.rewrite(lines)))?;
            }
            debug!("  group {}: {} overloads (budget {})", index, pass.added, pass.max);
            total += pass.added;
        }
        Ok(total > 0)
    }
}
