use crate::util::{enters_body, instr, random_letters, rewrite_all};
use crate::{Category, Transform};
use dexcloak_core::smali::{classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

/// Prefixes method bodies with junk arithmetic feeding a conditional branch.
///
/// Both outcomes of the branch end up at the original first instruction, so the junk only
/// needs two scratch registers and never changes what the method computes.
pub struct ArithmeticBranch;

const LABEL_LEN: usize = 16;

fn branch(lines: &[String], rng: &mut StdRng) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut in_method = false;
    let mut end_label: Option<(String, String)> = None;

    for line in lines {
        match classify(line) {
            SmaliLine::Method(_) if enters_body(line) => {
                in_method = true;
                end_label = None;
                out.push(line.clone());
            }
            SmaliLine::Locals(count) if in_method && end_label.is_none() && count >= 2 => {
                out.push(line.clone());
                let start = random_letters(rng, LABEL_LEN);
                let end = random_letters(rng, LABEL_LEN);
                let tmp = random_letters(rng, LABEL_LEN);
                let first: u32 = rng.random_range(1..=32);
                let second: u32 = rng.random_range(1..=32);

                out.push(String::new());
                out.push(instr(format!("const v0, {first}")));
                out.push(instr(format!("const v1, {second}")));
                out.push(instr("add-int v0, v0, v1"));
                out.push(instr("rem-int v0, v0, v1"));
                out.push(instr(format!("if-gtz v0, :{tmp}")));
                out.push(instr(format!("goto/32 :{end}")));
                out.push(instr(format!(":{tmp}")));
                out.push(instr(format!(":{start}")));
                end_label = Some((start, end));
            }
            SmaliLine::EndMethod if in_method => {
                if let Some((start, end)) = end_label.take() {
                    out.push(instr(format!(":{end}")));
                    out.push(instr(format!("goto/32 :{start}")));
                }
                out.push(line.clone());
                in_method = false;
            }
            _ => out.push(line.clone()),
        }
    }
    out
}

impl Transform for ArithmeticBranch {
    fn name(&self) -> &'static str {
        "ArithmeticBranch"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let files = session.smali_files()?;
        let changed = rewrite_all(&files, |_, lines| Ok(branch(lines, rng)))?;
        debug!("  inserted arithmetic branches in {} file(s)", changed);
        Ok(changed > 0)
    }
}
