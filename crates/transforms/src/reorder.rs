use crate::util::{enters_body, instr, random_letters, rewrite_all};
use crate::{Category, Transform};
use dexcloak_core::resources::code_block_opcodes;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Splits method bodies into blocks chained by `goto/32` and shuffles the blocks.
///
/// Each block ends with an explicit jump to the next one, so the shuffled layout executes in
/// the original order. Conditional branches are inverted so the taken edge becomes the jump.
/// Code inside `try` ranges is never split.
pub struct Reorder;

static IF_BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(?P<op>\S+)\s(?P<regs>[vp0-9,\s]+?),\s:(?P<label>\S+)").expect("if pattern")
});

fn inverted(op: &str) -> Option<&'static str> {
    Some(match op {
        "if-eq" => "if-ne",
        "if-ne" => "if-eq",
        "if-lt" => "if-ge",
        "if-ge" => "if-lt",
        "if-gt" => "if-le",
        "if-le" => "if-gt",
        "if-eqz" => "if-nez",
        "if-nez" => "if-eqz",
        "if-ltz" => "if-gez",
        "if-gez" => "if-ltz",
        "if-gtz" => "if-lez",
        "if-lez" => "if-gtz",
        _ => return None,
    })
}

#[derive(Default)]
struct MethodBody {
    prelude: Vec<String>,
    blocks: Vec<Vec<String>>,
}

impl MethodBody {
    fn sink(&mut self) -> &mut Vec<String> {
        self.blocks.last_mut().unwrap_or(&mut self.prelude)
    }
}

fn reorder(lines: &[String], rng: &mut StdRng) -> Vec<String> {
    let opcodes = code_block_opcodes();
    let mut out = Vec::with_capacity(lines.len());
    let mut body: Option<MethodBody> = None;
    let mut in_try = false;

    for line in lines {
        let Some(method) = body.as_mut() else {
            out.push(line.clone());
            if enters_body(line) {
                body = Some(MethodBody::default());
                in_try = false;
            }
            continue;
        };

        if matches!(classify(line), SmaliLine::EndMethod) {
            let MethodBody { prelude, mut blocks } = std::mem::take(method);
            blocks.shuffle(rng);
            out.extend(prelude);
            out.extend(blocks.into_iter().flatten());
            out.push(line.clone());
            body = None;
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with(":try_start_") {
            in_try = true;
            method.sink().push(line.clone());
            continue;
        }
        if trimmed.starts_with(":try_end_") {
            in_try = false;
            method.sink().push(line.clone());
            continue;
        }

        let op = smali::opcode(line).filter(|op| opcodes.contains(op));
        let Some(op) = op.filter(|_| !in_try) else {
            method.sink().push(line.clone());
            continue;
        };

        let label = format!(
            "l_{}_{}",
            random_letters(rng, 16),
            method.blocks.len()
        );
        let sink = method.sink();
        sink.push(instr(format!("goto/32 :{label}")));
        sink.push(instr("nop"));
        method.blocks.push(vec![instr(format!(":{label}"))]);

        let branch = inverted(op).and_then(|inv| IF_BRANCH.captures(line).map(|c| (inv, c)));
        let sink = method.sink();
        match branch {
            Some((inv, caps)) => {
                let skip = random_letters(rng, 16);
                sink.push(instr(format!("{inv} {}, :gl_{skip}", &caps["regs"])));
                sink.push(instr(format!("goto/32 :{}", &caps["label"])));
                sink.push(instr(format!(":gl_{skip}")));
            }
            None => sink.push(line.clone()),
        }
    }
    out
}

impl Transform for Reorder {
    fn name(&self) -> &'static str {
        "Reorder"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let files = session.smali_files()?;
        let changed = rewrite_all(&files, |_, lines| Ok(reorder(lines, rng)))?;
        debug!("  reordered code blocks in {} file(s)", changed);
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const CLASS: &str = "\
.class public LA;
.super Ljava/lang/Object;

.method public static max(II)I
    .locals 0

    if-ge p0, p1, :cond_0

    move p0, p1

    :cond_0
    return p0
.end method

.method public static guarded()V
    .locals 1

    :try_start_0
    const/4 v0, 0x1
    :try_end_0
    .catch Ljava/lang/Exception; {:try_start_0 .. :try_end_0} :catch_0

    :catch_0
    return-void
.end method
";

    fn run(seed: u64) -> Vec<String> {
        let lines: Vec<String> = CLASS.lines().map(str::to_string).collect();
        reorder(&lines, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn inverts_conditions_and_links_blocks() {
        let out = run(9);
        assert!(!out.iter().any(|l| l.trim().starts_with("if-ge")));
        let inv = out.iter().find(|l| l.trim().starts_with("if-lt p0, p1, :gl_")).unwrap();
        let skip = inv.rsplit(':').next().unwrap();
        assert!(out.contains(&format!("    :{skip}")));
        assert!(out.contains(&"    goto/32 :cond_0".to_string()));

        let jumps: Vec<_> = out
            .iter()
            .filter_map(|l| l.trim().strip_prefix("goto/32 :l_"))
            .collect();
        for target in &jumps {
            assert!(out.contains(&format!("    :l_{target}")));
        }
        assert!(!jumps.is_empty());
    }

    #[test]
    fn leaves_try_ranges_whole() {
        let out = run(4);
        let start = out.iter().position(|l| l.trim() == ":try_start_0").unwrap();
        assert_eq!(out[start + 1].trim(), "const/4 v0, 0x1");
        assert_eq!(out[start + 2].trim(), ":try_end_0");
    }

    #[test]
    fn keeps_every_original_instruction() {
        let out = run(21);
        for kept in ["move p0, p1", ":cond_0", "return p0", "return-void"] {
            assert_eq!(out.iter().filter(|l| l.trim() == kept).count(), 1, "{kept}");
        }
        assert_eq!(out.iter().filter(|l| *l == ".end method").count(), 2);
    }
}
