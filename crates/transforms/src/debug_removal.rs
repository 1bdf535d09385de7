use crate::util::rewrite_all;
use crate::{Category, Transform};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use rand::rngs::StdRng;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Strips source file, line number, local variable and parameter name information.
pub struct DebugRemoval;

const DEBUG_DIRECTIVES: &[&str] = &[
    ".source ",
    ".line ",
    ".prologue",
    ".epilogue",
    ".local ",
    ".end local",
    ".restart local",
];

static PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+\.param\s[vp0-9]+").expect("param pattern"));

fn strip(lines: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::with_capacity(lines.len());
    // Walking backwards tells whether a `.param` opens a block before the line is reached.
    let mut in_param_block = false;

    for line in lines.iter().rev() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(".end param") {
            in_param_block = true;
            kept.push(line.clone());
            continue;
        }
        if trimmed.starts_with(".param ") || trimmed == ".param" {
            if in_param_block {
                // Annotated parameter: keep the directive, drop the name.
                let reduced = PARAM.find(line).map_or(line.as_str(), |m| m.as_str());
                kept.push(reduced.to_string());
                in_param_block = false;
            }
            continue;
        }
        if DEBUG_DIRECTIVES.iter().any(|d| trimmed.starts_with(d)) {
            continue;
        }
        kept.push(line.clone());
    }
    kept.reverse();
    kept
}

impl Transform for DebugRemoval {
    fn name(&self) -> &'static str {
        "DebugRemoval"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let files = session.smali_files()?;
        let changed = rewrite_all(&files, |_, lines| Ok(strip(lines)))?;
        debug!("  removed debug info from {} file(s)", changed);
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_annotated_params_without_names() {
        let lines: Vec<String> = r#".class public LA;
.super Ljava/lang/Object;
.source "A.java"

.method public f(Ljava/lang/String;I)V
    .locals 1
    .param p1, "name"    # Ljava/lang/String;
    .annotation build Landroidx/annotation/NonNull;
    .end annotation
    .end param
    .param p2, "count"    # I

    .prologue
    .line 12
    const/4 v0, 0x0

    .local v0, "x":I
    .end local v0
    return-void
.end method
"#
        .lines()
        .map(str::to_string)
        .collect();

        let out = strip(&lines);
        assert!(!out.iter().any(|l| l.contains(".source") || l.contains(".line")));
        assert!(!out.iter().any(|l| l.contains(".local") || l.contains(".prologue")));
        assert!(out.contains(&"    .param p1".to_string()));
        assert!(!out.iter().any(|l| l.contains("p2")));
        assert!(out.contains(&"    .end param".to_string()));
        assert!(out.contains(&"    const/4 v0, 0x0".to_string()));
    }
}
