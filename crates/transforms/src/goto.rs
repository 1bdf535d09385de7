use crate::util::{enters_body, instr, rewrite_all};
use crate::{Category, Transform};
use dexcloak_core::smali::{classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use tracing::debug;

/// Wraps every method body in a pair of unconditional jumps.
///
/// The first instruction jumps to the end of the method, which jumps straight back to the
/// real start. Control flow is unchanged but the linear order no longer matches execution.
pub struct Goto;

fn wrap(lines: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len() + 8);
    let mut in_method = false;
    let mut wrapped = false;

    for line in lines {
        match classify(line) {
            SmaliLine::Method(_) if enters_body(line) => {
                in_method = true;
                wrapped = false;
                out.push(line.clone());
            }
            SmaliLine::Locals(_) if in_method && !wrapped => {
                out.push(line.clone());
                out.push(String::new());
                out.push(instr("goto/32 :after_last_instruction"));
                out.push(String::new());
                out.push(instr(":before_first_instruction"));
                wrapped = true;
            }
            SmaliLine::EndMethod if in_method => {
                if wrapped {
                    out.push(String::new());
                    out.push(instr(":after_last_instruction"));
                    out.push(String::new());
                    out.push(instr("goto/32 :before_first_instruction"));
                }
                out.push(line.clone());
                in_method = false;
            }
            _ => out.push(line.clone()),
        }
    }
    out
}

impl Transform for Goto {
    fn name(&self) -> &'static str {
        "Goto"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let files = session.smali_files()?;
        let changed = rewrite_all(&files, |_, lines| Ok(wrap(lines)))?;
        debug!("  wrapped methods in {} file(s)", changed);
        Ok(changed > 0)
    }
}
