use crate::util::{enters_body, instr, rewrite_all};
use crate::{Category, Transform};
use dexcloak_core::resources::nop_opcodes;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

/// Pads selected instructions with a random run of `nop`s.
pub struct Nop;

fn pad(lines: &[String], rng: &mut StdRng) -> Vec<String> {
    let opcodes = nop_opcodes();
    let mut out = Vec::with_capacity(lines.len());
    let mut in_method = false;

    for line in lines {
        out.push(line.clone());
        match classify(line) {
            SmaliLine::Method(_) => in_method = enters_body(line),
            SmaliLine::EndMethod => in_method = false,
            _ if in_method => {
                if smali::opcode(line).is_some_and(|op| opcodes.contains(op)) {
                    for _ in 0..rng.random_range(1..=5) {
                        out.push(instr("nop"));
                    }
                }
            }
            _ => {}
        }
    }
    out
}

impl Transform for Nop {
    fn name(&self) -> &'static str {
        "Nop"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let files = session.smali_files()?;
        let changed = rewrite_all(&files, |_, lines| Ok(pad(lines, rng)))?;
        debug!("  padded {} file(s)", changed);
        Ok(changed > 0)
    }
}
