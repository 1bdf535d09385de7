//! The closed set of passes, looked up by name.

use crate::arithmetic_branch::ArithmeticBranch;
use crate::call_indirection::CallIndirection;
use crate::debug_removal::DebugRemoval;
use crate::encryption::{AssetEncryption, ConstStringEncryption, LibEncryption, ResStringEncryption};
use crate::goto::Goto;
use crate::method_overload::MethodOverload;
use crate::nop::Nop;
use crate::random_manifest::RandomManifest;
use crate::reflection::{AdvancedReflection, Reflection};
use crate::rename::{ClassRename, FieldRename, MethodRename};
use crate::reorder::Reorder;
use crate::trivial::{NewAlignment, NewSignature, Rebuild};
use crate::Transform;
use dexcloak_utils::errors::ObfuscateError;

type Constructor = fn() -> Box<dyn Transform>;

const PASSES: &[Constructor] = &[
    || Box::new(Rebuild),
    || Box::new(NewSignature),
    || Box::new(NewAlignment),
    || Box::new(ClassRename),
    || Box::new(FieldRename),
    || Box::new(MethodRename),
    || Box::new(AssetEncryption),
    || Box::new(ConstStringEncryption),
    || Box::new(ResStringEncryption),
    || Box::new(LibEncryption),
    || Box::new(Goto),
    || Box::new(ArithmeticBranch),
    || Box::new(Reorder),
    || Box::new(Nop),
    || Box::new(DebugRemoval),
    || Box::new(CallIndirection),
    || Box::new(MethodOverload),
    || Box::new(Reflection),
    || Box::new(AdvancedReflection),
    || Box::new(RandomManifest),
];

/// Case-insensitive key with `_` and `-` dropped, so `const_string_encryption` finds
/// `ConstStringEncryption`.
fn normalize(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// One instance of every registered pass, in registry order.
pub fn all() -> Vec<Box<dyn Transform>> {
    PASSES.iter().map(|make| make()).collect()
}

pub fn resolve(name: &str) -> Result<Box<dyn Transform>, ObfuscateError> {
    let wanted = normalize(name);
    PASSES
        .iter()
        .map(|make| make())
        .find(|pass| normalize(pass.name()) == wanted)
        .ok_or_else(|| ObfuscateError::InvalidPass(name.to_string()))
}

/// Resolves an ordered pipeline. The first unknown name fails the whole list.
pub fn resolve_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<Box<dyn Transform>>, ObfuscateError> {
    names.iter().map(|name| resolve(name.as_ref())).collect()
}
