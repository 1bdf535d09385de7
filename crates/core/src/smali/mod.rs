//! Line-oriented recognizers for smali source.
//!
//! Smali is processed one line at a time. [`classify`] runs the fixed set of anchored
//! patterns against a line and returns a typed event, so passes work with names, spans and
//! descriptors instead of re-deriving regular expressions.

use regex::{Captures, Regex};
use std::ops::Range;
use std::sync::LazyLock;

pub mod descriptor;
pub mod registers;
pub mod strings;

static CLASS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"L[^():\s]+?;").expect("class name pattern"));

static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.class(?P<mods>.+?)(?P<name>\S+?;)").expect("class pattern"));

static SUPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.super\s(?P<name>\S+?;)").expect("super pattern"));

static LOCALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+\.locals\s(?P<count>\d+)").expect("locals pattern"));

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.field(?P<mods>.+?)(?P<name>\S+?):(?P<ty>\S+)").expect("field pattern")
});

static METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.method(?P<mods>.+?)(?P<name>\S+?)\((?P<params>\S*?)\)(?P<ret>\S+)")
        .expect("method pattern")
});

static ANNOTATION_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+value\s=\s(?P<class>\S+?)->(?P<name>\S+?)\((?P<params>\S*?)\)(?P<ret>\S+)",
    )
    .expect("annotation method pattern")
});

static FIELD_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(?P<op>[is](get|put)\S*)\s(?P<regs>[vp0-9,\s]+),\s(?P<class>\S+?)->(?P<name>\S+?):(?P<ty>\S+)",
    )
    .expect("field access pattern")
});

static INVOKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(?P<kind>invoke-\S+)\s\{(?P<regs>[vp0-9,.\s]*)\},\s(?P<class>\S+?)->(?P<name>\S+?)\((?P<params>\S*?)\)(?P<ret>\S+)",
    )
    .expect("invoke pattern")
});

static CONST_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s+const-string(?P<jumbo>/jumbo)?\s(?P<reg>[vp0-9]+),\s"(?P<value>.+)""#)
        .expect("const-string pattern")
});

static OPCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(?P<op>\S+)").expect("opcode pattern"));

/// Access flags and other keywords between a directive and the declared name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modifiers<'a>(&'a str);

impl<'a> Modifiers<'a> {
    /// Whether `keyword` is one of the whitespace separated modifiers.
    pub fn contains(&self, keyword: &str) -> bool {
        self.0.split_whitespace().any(|m| m == keyword)
    }

    /// The raw modifier text, trimmed.
    pub fn as_str(&self) -> &'a str {
        self.0.trim()
    }
}

/// `.class` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDecl<'a> {
    pub modifiers: Modifiers<'a>,
    pub name: &'a str,
    pub name_span: Range<usize>,
}

impl ClassDecl<'_> {
    pub fn is_enum(&self) -> bool {
        self.modifiers.contains("enum")
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers.contains("interface") || self.modifiers.contains("annotation")
    }

    /// Public and instantiable, i.e. reachable through reflection from any package.
    pub fn is_public_concrete(&self) -> bool {
        self.modifiers.contains("public") && !self.modifiers.contains("abstract")
    }
}

/// `.field` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl<'a> {
    pub modifiers: Modifiers<'a>,
    pub name: &'a str,
    pub ty: &'a str,
    pub name_span: Range<usize>,
    /// Text following ` = ` for fields with a constant initializer.
    pub initializer: Option<&'a str>,
}

impl FieldDecl<'_> {
    /// `name:type`.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, self.ty)
    }

    /// `class->name:type`.
    pub fn key(&self, class: &str) -> String {
        format!("{class}->{}:{}", self.name, self.ty)
    }
}

/// `.method` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl<'a> {
    pub modifiers: Modifiers<'a>,
    pub name: &'a str,
    pub params: &'a str,
    pub ret: &'a str,
    pub name_span: Range<usize>,
}

impl MethodDecl<'_> {
    /// `name(params)ret`.
    pub fn signature(&self) -> String {
        format!("{}({}){}", self.name, self.params, self.ret)
    }

    /// `class->name(params)ret`.
    pub fn key(&self, class: &str) -> String {
        format!("{class}->{}", self.signature())
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn is_static_constructor(&self) -> bool {
        self.name == "<clinit>"
    }

    /// Abstract and native methods have no body to rewrite.
    pub fn has_body(&self) -> bool {
        !self.modifiers.contains("abstract") && !self.modifiers.contains("native")
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains("static")
    }
}

/// A method reference such as the target of `value = Lfoo;->bar()V` in an annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub params: &'a str,
    pub ret: &'a str,
}

impl MethodRef<'_> {
    pub fn key(&self) -> String {
        format!("{}->{}({}){}", self.class, self.name, self.params, self.ret)
    }
}

/// `invoke-*` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoke<'a> {
    /// Full opcode, e.g. `invoke-virtual/range`.
    pub kind: &'a str,
    /// Register list as written between the braces.
    pub registers: &'a str,
    pub class: &'a str,
    pub method: &'a str,
    pub params: &'a str,
    pub ret: &'a str,
    pub method_span: Range<usize>,
}

impl Invoke<'_> {
    /// `class->name(params)ret`.
    pub fn key(&self) -> String {
        format!("{}->{}({}){}", self.class, self.method, self.params, self.ret)
    }

    pub fn is_range(&self) -> bool {
        self.kind.ends_with("/range")
    }

    pub fn is_static(&self) -> bool {
        self.kind.starts_with("invoke-static")
    }

    pub fn is_direct_or_static(&self) -> bool {
        self.kind.starts_with("invoke-direct") || self.is_static()
    }

    pub fn is_constructor(&self) -> bool {
        self.method == "<init>"
    }
}

/// `iget`/`iput`/`sget`/`sput` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAccess<'a> {
    pub op: &'a str,
    pub registers: &'a str,
    pub class: &'a str,
    pub name: &'a str,
    pub ty: &'a str,
    pub name_span: Range<usize>,
}

impl FieldAccess<'_> {
    /// `name:type`.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, self.ty)
    }

    /// `class->name:type`.
    pub fn key(&self) -> String {
        format!("{}->{}:{}", self.class, self.name, self.ty)
    }
}

/// `const-string` or `const-string/jumbo` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstString<'a> {
    pub register: &'a str,
    /// The literal as written, still escaped.
    pub value: &'a str,
    pub jumbo: bool,
}

/// One classified line of smali.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmaliLine<'a> {
    Class(ClassDecl<'a>),
    Super(&'a str),
    Field(FieldDecl<'a>),
    Method(MethodDecl<'a>),
    EndMethod,
    Locals(usize),
    Invoke(Invoke<'a>),
    FieldAccess(FieldAccess<'a>),
    ConstString(ConstString<'a>),
    AnnotationMethod(MethodRef<'a>),
    Other,
}

fn group<'a>(caps: &Captures<'a>, name: &str) -> &'a str {
    caps.name(name).map_or("", |m| m.as_str())
}

fn span(caps: &Captures<'_>, name: &str) -> Range<usize> {
    caps.name(name).map_or(0..0, |m| m.range())
}

/// Classifies a single line.
pub fn classify(line: &str) -> SmaliLine<'_> {
    if line.starts_with('.') {
        classify_directive(line)
    } else {
        classify_body(line)
    }
}

fn classify_directive(line: &str) -> SmaliLine<'_> {
    if line.starts_with(".class") {
        if let Some(caps) = CLASS.captures(line) {
            return SmaliLine::Class(ClassDecl {
                modifiers: Modifiers(group(&caps, "mods")),
                name: group(&caps, "name"),
                name_span: span(&caps, "name"),
            });
        }
    } else if line.starts_with(".super") {
        if let Some(caps) = SUPER.captures(line) {
            return SmaliLine::Super(group(&caps, "name"));
        }
    } else if line.starts_with(".field") {
        if let Some(caps) = FIELD.captures(line) {
            let rest = &line[span(&caps, "ty").end..];
            let initializer = rest.trim_start().strip_prefix("= ").map(str::trim);
            return SmaliLine::Field(FieldDecl {
                modifiers: Modifiers(group(&caps, "mods")),
                name: group(&caps, "name"),
                ty: group(&caps, "ty"),
                name_span: span(&caps, "name"),
                initializer,
            });
        }
    } else if line.starts_with(".method") {
        if let Some(caps) = METHOD.captures(line) {
            return SmaliLine::Method(MethodDecl {
                modifiers: Modifiers(group(&caps, "mods")),
                name: group(&caps, "name"),
                params: group(&caps, "params"),
                ret: group(&caps, "ret"),
                name_span: span(&caps, "name"),
            });
        }
    } else if line.starts_with(".end method") {
        return SmaliLine::EndMethod;
    }
    SmaliLine::Other
}

fn classify_body(line: &str) -> SmaliLine<'_> {
    let trimmed = line.trim_start();
    if trimmed.len() == line.len() {
        return SmaliLine::Other;
    }

    if trimmed.starts_with(".locals") {
        return LOCALS
            .captures(line)
            .and_then(|caps| group(&caps, "count").parse().ok())
            .map_or(SmaliLine::Other, SmaliLine::Locals);
    }

    if trimmed.starts_with("invoke-") {
        if let Some(caps) = INVOKE.captures(line) {
            return SmaliLine::Invoke(Invoke {
                kind: group(&caps, "kind"),
                registers: group(&caps, "regs"),
                class: group(&caps, "class"),
                method: group(&caps, "name"),
                params: group(&caps, "params"),
                ret: group(&caps, "ret"),
                method_span: span(&caps, "name"),
            });
        }
        return SmaliLine::Other;
    }

    if trimmed.starts_with("const-string") {
        if let Some(caps) = CONST_STRING.captures(line) {
            return SmaliLine::ConstString(ConstString {
                register: group(&caps, "reg"),
                value: group(&caps, "value"),
                jumbo: caps.name("jumbo").is_some(),
            });
        }
        return SmaliLine::Other;
    }

    if let Some(caps) = FIELD_ACCESS.captures(line) {
        return SmaliLine::FieldAccess(FieldAccess {
            op: group(&caps, "op"),
            registers: group(&caps, "regs"),
            class: group(&caps, "class"),
            name: group(&caps, "name"),
            ty: group(&caps, "ty"),
            name_span: span(&caps, "name"),
        });
    }

    if let Some(caps) = ANNOTATION_METHOD.captures(line) {
        return SmaliLine::AnnotationMethod(MethodRef {
            class: group(&caps, "class"),
            name: group(&caps, "name"),
            params: group(&caps, "params"),
            ret: group(&caps, "ret"),
        });
    }

    SmaliLine::Other
}

/// The opcode of an indented instruction line, or `None` for blank lines, labels,
/// directives and comments.
pub fn opcode(line: &str) -> Option<&str> {
    let op = OPCODE.captures(line)?.name("op")?.as_str();
    match op.chars().next() {
        Some('.' | ':' | '#') => None,
        _ => Some(op),
    }
}

/// The class name declared in `lines`, if any.
pub fn declared_class(lines: &[String]) -> Option<&str> {
    lines.iter().find_map(|line| match classify(line) {
        SmaliLine::Class(decl) => Some(decl.name),
        _ => None,
    })
}

/// Every `L...;` type reference in `line`, left to right.
pub fn class_references(line: &str) -> impl Iterator<Item = &str> {
    CLASS_NAME.find_iter(line).map(|m| m.as_str())
}

/// Rewrites every `L...;` reference in `line` for which `map` returns a replacement.
pub fn replace_class_references<'a, F>(line: &str, mut map: F) -> String
where
    F: FnMut(&str) -> Option<&'a str>,
{
    CLASS_NAME
        .replace_all(line, |caps: &Captures<'_>| {
            let found = &caps[0];
            map(found).unwrap_or(found).to_string()
        })
        .into_owned()
}

/// Replaces the byte range `span` of `line` with `with`.
pub fn splice(line: &str, span: Range<usize>, with: &str) -> String {
    let mut out = String::with_capacity(line.len() + with.len());
    out.push_str(&line[..span.start]);
    out.push_str(with);
    out.push_str(&line[span.end..]);
    out
}

/// Framework namespaces whose classes live in the platform, not in the application.
pub const FRAMEWORK_PREFIXES: &[&str] = &[
    "Landroid/",
    "Ljava/",
    "Ljavax/",
    "Ldalvik/",
    "Lorg/apache/http/",
    "Lorg/json/",
    "Lorg/w3c/",
    "Lorg/xml/",
    "Lcom/android/internal/",
];

/// Whether `class` belongs to the Android platform rather than the application.
pub fn is_framework_class(class: &str) -> bool {
    FRAMEWORK_PREFIXES.iter().any(|p| class.starts_with(p))
}
