//! Bundled data lists.

use std::collections::HashSet;
use std::sync::LazyLock;

static LIBS_TO_IGNORE: &str = include_str!("../resources/libs_to_ignore.txt");
static DANGEROUS_API: &str = include_str!("../resources/dangerous_api.txt");
static NOP_OPCODES: &str = include_str!("../resources/nop_opcodes.txt");
static CODE_BLOCK_OPCODES: &str = include_str!("../resources/code_block_opcodes.txt");

fn entries(text: &'static str) -> impl Iterator<Item = &'static str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

static NOP_SET: LazyLock<HashSet<&'static str>> = LazyLock::new(|| entries(NOP_OPCODES).collect());

static CODE_BLOCK_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| entries(CODE_BLOCK_OPCODES).collect());

static DANGEROUS_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| entries(DANGEROUS_API).collect());

/// Smali path prefixes of well-known third-party libraries.
pub fn libs_to_ignore() -> Vec<&'static str> {
    entries(LIBS_TO_IGNORE).collect()
}

/// Framework method keys (`class->name(params)ret`) considered sensitive.
pub fn dangerous_api() -> &'static HashSet<&'static str> {
    &DANGEROUS_SET
}

/// Opcodes after which `nop` padding can be inserted.
pub fn nop_opcodes() -> &'static HashSet<&'static str> {
    &NOP_SET
}

/// Opcodes that may begin a relocatable code block.
pub fn code_block_opcodes() -> &'static HashSet<&'static str> {
    &CODE_BLOCK_SET
}
