//! Type descriptor helpers (`I`, `[J`, `Ljava/lang/String;`, ...).

/// Primitive descriptors that may appear in a parameter list.
pub const PRIMITIVES: &[&str] = &["I", "Z", "B", "S", "J", "F", "D", "C"];

/// Whether `ty` is a primitive descriptor.
pub fn is_primitive(ty: &str) -> bool {
    PRIMITIVES.contains(&ty)
}

/// Whether `ty` occupies a register pair.
pub fn is_wide(ty: &str) -> bool {
    ty == "J" || ty == "D"
}

/// Registers needed to hold a value of type `ty`.
pub fn register_width(ty: &str) -> usize {
    if is_wide(ty) {
        2
    } else {
        1
    }
}

/// Splits a parameter descriptor such as `I[JLjava/lang/String;` into its types.
///
/// Malformed trailing input (an unterminated class name) is returned as a final element
/// rather than dropped.
pub fn split_params(params: &str) -> Vec<&str> {
    let bytes = params.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'[' => {
                i += 1;
                continue;
            }
            b'L' => {
                i = params[i..].find(';').map_or(bytes.len(), |end| i + end + 1);
            }
            _ => i += 1,
        }
        out.push(&params[start..i]);
        start = i;
    }

    if start < bytes.len() {
        out.push(&params[start..]);
    }
    out
}

/// Registers needed to pass all `params`.
pub fn count_registers(params: &[&str]) -> usize {
    params.iter().map(|p| register_width(p)).sum()
}

/// Boxing metadata for a primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boxing {
    /// The wrapper class, e.g. `Ljava/lang/Integer;`.
    pub class: &'static str,
    /// Static field holding the primitive `Class` object.
    pub type_field: &'static str,
    /// `valueOf` method reference producing the wrapper.
    pub value_of: &'static str,
    /// Instance method reference unwrapping the primitive.
    pub unbox: &'static str,
}

const fn boxed(
    primitive: &'static str,
    class: &'static str,
    type_field: &'static str,
    value_of: &'static str,
    unbox: &'static str,
) -> (&'static str, Boxing) {
    (
        primitive,
        Boxing {
            class,
            type_field,
            value_of,
            unbox,
        },
    )
}

const BOXING: &[(&str, Boxing)] = &[
    boxed(
        "I",
        "Ljava/lang/Integer;",
        "Ljava/lang/Integer;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Integer;->valueOf(I)Ljava/lang/Integer;",
        "Ljava/lang/Integer;->intValue()I",
    ),
    boxed(
        "Z",
        "Ljava/lang/Boolean;",
        "Ljava/lang/Boolean;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Boolean;->valueOf(Z)Ljava/lang/Boolean;",
        "Ljava/lang/Boolean;->booleanValue()Z",
    ),
    boxed(
        "B",
        "Ljava/lang/Byte;",
        "Ljava/lang/Byte;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Byte;->valueOf(B)Ljava/lang/Byte;",
        "Ljava/lang/Byte;->byteValue()B",
    ),
    boxed(
        "S",
        "Ljava/lang/Short;",
        "Ljava/lang/Short;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Short;->valueOf(S)Ljava/lang/Short;",
        "Ljava/lang/Short;->shortValue()S",
    ),
    boxed(
        "J",
        "Ljava/lang/Long;",
        "Ljava/lang/Long;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Long;->valueOf(J)Ljava/lang/Long;",
        "Ljava/lang/Long;->longValue()J",
    ),
    boxed(
        "F",
        "Ljava/lang/Float;",
        "Ljava/lang/Float;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Float;->valueOf(F)Ljava/lang/Float;",
        "Ljava/lang/Float;->floatValue()F",
    ),
    boxed(
        "D",
        "Ljava/lang/Double;",
        "Ljava/lang/Double;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Double;->valueOf(D)Ljava/lang/Double;",
        "Ljava/lang/Double;->doubleValue()D",
    ),
    boxed(
        "C",
        "Ljava/lang/Character;",
        "Ljava/lang/Character;->TYPE:Ljava/lang/Class;",
        "Ljava/lang/Character;->valueOf(C)Ljava/lang/Character;",
        "Ljava/lang/Character;->charValue()C",
    ),
];

/// Boxing metadata for `primitive`, or `None` for reference types.
pub fn boxing(primitive: &str) -> Option<Boxing> {
    BOXING
        .iter()
        .find(|(p, _)| *p == primitive)
        .map(|(_, b)| *b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_mixed_descriptors() {
        assert_eq!(
            split_params("I[JLjava/lang/String;[[Lcom/a/B;Z"),
            vec!["I", "[J", "Ljava/lang/String;", "[[Lcom/a/B;", "Z"]
        );
        assert!(split_params("").is_empty());
    }

    #[test]
    fn counts_wide_registers() {
        let params = split_params("JIDLjava/lang/Object;");
        assert_eq!(count_registers(&params), 6);
    }

    #[test]
    fn boxing_tables_are_consistent() {
        for p in PRIMITIVES {
            let b = boxing(p).unwrap();
            assert!(b.type_field.starts_with(b.class));
            assert!(b.value_of.ends_with(b.class));
            assert!(b.unbox.ends_with(p));
        }
        assert!(boxing("Ljava/lang/String;").is_none());
    }
}
