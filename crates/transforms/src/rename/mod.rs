//! Identifier renaming: classes, direct methods and fields.
//!
//! New names are derived from the MD5 of the old one, so every run over the same input
//! renames the same way and declarations always agree with their usages.

mod class;
mod field;
mod method;

pub use class::ClassRename;
pub use field::FieldRename;
pub use method::MethodRename;

use dexcloak_core::smali;
use dexcloak_core::Session;

/// Whether members declared by `class` may be renamed in this session.
fn is_renameable(session: &Session, class: &str) -> bool {
    !smali::is_framework_class(class) && !session.is_ignored_class(class)
}
