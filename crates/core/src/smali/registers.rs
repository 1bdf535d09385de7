//! Dalvik register names.

use std::fmt;
use std::str::FromStr;

/// Whether a register is named relative to the locals (`v`) or the parameters (`p`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Local,
    Param,
}

/// A register such as `v3` or `p0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub kind: RegisterKind,
    pub index: usize,
}

impl Register {
    pub const fn local(index: usize) -> Self {
        Self {
            kind: RegisterKind::Local,
            index,
        }
    }

    pub const fn param(index: usize) -> Self {
        Self {
            kind: RegisterKind::Param,
            index,
        }
    }

    /// Absolute register number in a frame with `locals` local registers.
    pub const fn absolute(&self, locals: usize) -> usize {
        match self.kind {
            RegisterKind::Local => self.index,
            RegisterKind::Param => self.index + locals,
        }
    }

    /// Whether the register can be encoded in the 4-bit operand of a non-range invoke.
    pub const fn fits_nibble(&self, locals: usize) -> bool {
        self.absolute(locals) <= 15
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, digits) = match s.split_at_checked(1) {
            Some(("v", rest)) => (RegisterKind::Local, rest),
            Some(("p", rest)) => (RegisterKind::Param, rest),
            _ => return Err(format!("not a register: `{s}`")),
        };
        let index = digits
            .parse()
            .map_err(|_| format!("not a register: `{s}`"))?;
        Ok(Self { kind, index })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RegisterKind::Local => write!(f, "v{}", self.index),
            RegisterKind::Param => write!(f, "p{}", self.index),
        }
    }
}

/// Splits the register list of a non-range invoke (`v0, p1`) into names.
pub fn split_list(registers: &str) -> Vec<&str> {
    registers
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect()
}

/// Number of registers passed by an invoke, for both `{v0, v1}` and `{v0 .. v5}` forms.
pub fn passed_count(registers: &str) -> usize {
    if let Some((first, last)) = registers.split_once("..") {
        match (first.parse::<Register>(), last.parse::<Register>()) {
            (Ok(a), Ok(b)) if b.index >= a.index => b.index - a.index + 1,
            _ => 0,
        }
    } else {
        split_list(registers).len()
    }
}
