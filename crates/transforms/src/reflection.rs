//! Reflective call rewriting.
//!
//! Both passes share one engine. Each eligible call site is replaced by a call to the static
//! `obfuscate` dispatcher of an injected helper class, passing the index of a `Method` object
//! the helper looks up in its static initializer. Arguments are boxed into an `Object[]` and
//! the result is cast back to the original return type.

use crate::util::{instr, Helper};
use crate::{Category, Transform};
use dexcloak_core::resources::dangerous_api;
use dexcloak_core::session::ReflectionRegistry;
use dexcloak_core::smali::descriptor::{boxing, count_registers, is_primitive, is_wide, register_width, split_params};
use dexcloak_core::smali::registers::split_list;
use dexcloak_core::smali::{self, classify, Invoke, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

/// Calls public methods of public application classes through reflection.
pub struct Reflection;

/// Calls sensitive framework methods through reflection.
pub struct AdvancedReflection;

/// Parameter plus local registers a method may use and still have room for four more.
const REGISTER_HEADROOM: usize = 11;
const EXTRA_LOCALS: usize = 4;
/// Code units allowed in the lookup block of one helper.
const INSTRUCTION_LIMIT: usize = 60_000;
const CODE_PLACEHOLDER: &str = "#!code_to_replace!#";

/// Public application classes and their public method signatures.
#[derive(Debug, Default)]
struct ClassIndex {
    classes: HashMap<String, DeclaredClass>,
}

#[derive(Debug, Default)]
struct DeclaredClass {
    public_concrete: bool,
    public_methods: HashSet<String>,
}

impl ClassIndex {
    fn scan(paths: &[PathBuf]) -> Result<Self, TransformError> {
        let mut index = Self::default();
        for path in paths {
            let text = files::read_text(path)?;
            let mut current: Option<(String, DeclaredClass)> = None;
            for line in text.lines() {
                match classify(line) {
                    SmaliLine::Class(decl) if current.is_none() => {
                        let class = DeclaredClass {
                            public_concrete: decl.is_public_concrete(),
                            public_methods: HashSet::new(),
                        };
                        current = Some((decl.name.to_string(), class));
                    }
                    SmaliLine::Method(decl) if decl.modifiers.contains("public") => {
                        if let Some((_, class)) = current.as_mut() {
                            class.public_methods.insert(decl.signature());
                        }
                    }
                    _ => {}
                }
            }
            if let Some((name, class)) = current {
                index.classes.insert(name, class);
            }
        }
        Ok(index)
    }

    fn is_public_type(&self, ty: &str) -> bool {
        let element = ty.trim_start_matches('[');
        // Classes shipped in the app take precedence over framework package names.
        match self.classes.get(element) {
            Some(class) => class.public_concrete,
            None => is_primitive(element) || smali::is_framework_class(element),
        }
    }

    fn is_reflectable(&self, invoke: &Invoke<'_>) -> bool {
        if invoke.class.starts_with('[') || smali::is_framework_class(invoke.class) {
            return false;
        }
        let Some(class) = self.classes.get(invoke.class) else {
            return false;
        };
        let signature = format!("{}({}){}", invoke.method, invoke.params, invoke.ret);
        class.public_concrete
            && class.public_methods.contains(&signature)
            && split_params(invoke.params).iter().all(|p| self.is_public_type(p))
    }
}

enum Targets<'a> {
    Declared(&'a ClassIndex),
    Dangerous,
}

fn const_instr(register: &str, value: usize) -> String {
    if value <= 7 {
        format!("const/4 {register}, 0x{value:x}")
    } else if value <= 0x7fff {
        format!("const/16 {register}, 0x{value:x}")
    } else {
        format!("const {register}, 0x{value:x}")
    }
}

/// Dalvik code units of an emitted instruction.
fn code_units(line: &str) -> usize {
    match smali::opcode(line) {
        None => 0,
        Some(op) if op.starts_with("invoke-") => 3,
        Some("const/4" | "move-result-object" | "move-result" | "move-result-wide") => 1,
        Some("const") => 3,
        Some(_) => 2,
    }
}

/// Static initializer code looking up the invoked method and appending it to the helper list.
fn lookup(helper: Helper, invoke: &Invoke<'_>) -> Vec<String> {
    let params = split_params(invoke.params);
    let mut code = vec![String::new(), instr(const_instr("v1", params.len()))];
    if !params.is_empty() {
        code.push(instr("new-array v1, v1, [Ljava/lang/Class;"));
    }
    for (i, param) in params.iter().enumerate() {
        code.push(instr(const_instr("v2", i)));
        match boxing(param) {
            Some(b) => code.push(instr(format!("sget-object v3, {}", b.type_field))),
            None => code.push(instr(format!("const-class v3, {param}"))),
        }
        code.push(instr("aput-object v3, v1, v2"));
    }
    code.extend([
        instr(format!("const-class v2, {}", invoke.class)),
        instr(format!("const-string v3, \"{}\"", invoke.method)),
        instr(
            "invoke-virtual {v2, v3, v1}, Ljava/lang/Class;->getDeclaredMethod(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;",
        ),
        instr("move-result-object v1"),
        instr(format!("sget-object v2, {}->obfuscatedMethods:Ljava/util/List;", helper.descriptor)),
        instr("invoke-interface {v2, v1}, Ljava/util/List;->add(Ljava/lang/Object;)Z"),
    ]);
    code
}

/// Replacement for the call site, using the four registers after the original locals.
///
/// Returns `None` when the register list does not match the parameter types.
fn call_site(helper: Helper, invoke: &Invoke<'_>, index: usize, locals: usize) -> Option<Vec<String>> {
    let passed = split_list(invoke.registers);
    let params = split_params(invoke.params);
    let virtual_call = !invoke.is_static();
    let [args, boxed, slot, spare] = [0, 1, 2, 3].map(|o| format!("v{}", locals + o));

    let mut code = vec![instr(const_instr(&args, params.len()))];
    if !params.is_empty() {
        code.push(instr(format!("new-array {args}, {args}, [Ljava/lang/Object;")));
    }
    let mut at = usize::from(virtual_call);
    for (i, param) in params.iter().enumerate() {
        let width = register_width(param);
        let registers = passed.get(at..at + width)?;
        at += width;
        match boxing(param) {
            Some(b) => code.extend([
                instr(format!("invoke-static {{{}}}, {}", registers.join(", "), b.value_of)),
                instr(format!("move-result-object {boxed}")),
                instr(const_instr(&spare, i)),
                instr(format!("aput-object {boxed}, {args}, {spare}")),
            ]),
            None => code.extend([
                instr(const_instr(&slot, i)),
                instr(format!("aput-object {}, {args}, {slot}", registers[0])),
            ]),
        }
    }
    if at != passed.len() {
        return None;
    }

    code.push(instr(const_instr(&slot, index)));
    let dispatch = format!(
        "{}->obfuscate(ILjava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
        helper.descriptor
    );
    if virtual_call {
        code.push(instr(format!("invoke-static {{{slot}, {}, {args}}}, {dispatch}", passed[0])));
    } else {
        code.push(instr(format!("const/4 {spare}, 0x0")));
        code.push(instr(format!("invoke-static {{{slot}, {spare}, {args}}}, {dispatch}")));
    }
    Some(code)
}

/// Unboxes or casts the dispatcher result into `register`.
fn result_cast(ret: &str, register: &str) -> Vec<String> {
    let mut code = vec![instr(format!("move-result-object {register}"))];
    match boxing(ret) {
        Some(b) => {
            let mv = if is_wide(ret) { "move-result-wide" } else { "move-result" };
            code.extend([
                instr(format!("check-cast {register}, {}", b.class)),
                instr(format!("invoke-virtual {{{register}}}, {}", b.unbox)),
                instr(format!("{mv} {register}")),
            ]);
        }
        None => code.push(instr(format!("check-cast {register}, {ret}"))),
    }
    code
}

/// The `move-result` consuming the call at the start of `rest`, if any.
fn find_result(rest: &[String], ret: &str) -> Option<(usize, Vec<String>)> {
    for (offset, line) in rest.iter().take(9).enumerate() {
        if line.contains("invoke-") {
            return None;
        }
        if smali::opcode(line).is_some_and(|op| op.starts_with("move-result")) {
            let register = line.split_whitespace().nth(1)?;
            return Some((offset, result_cast(ret, register)));
        }
    }
    None
}

struct Reflector<'a> {
    helper: Helper,
    targets: Targets<'a>,
    registry: &'a mut ReflectionRegistry,
}

impl Reflector<'_> {
    fn exhausted(&self) -> bool {
        self.registry.instructions >= INSTRUCTION_LIMIT
    }

    fn is_target(&self, invoke: &Invoke<'_>) -> bool {
        if !matches!(invoke.kind, "invoke-virtual" | "invoke-static") || invoke.is_constructor() {
            return false;
        }
        match self.targets {
            Targets::Declared(index) => index.is_reflectable(invoke),
            Targets::Dangerous => dangerous_api().contains(invoke.key().as_str()),
        }
    }

    fn rewrite(&mut self, lines: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(lines.len());
        let mut i = 0;
        while i < lines.len() {
            let params = match classify(&lines[i]) {
                SmaliLine::Method(decl) if decl.has_body() => decl.params,
                _ => {
                    out.push(lines[i].clone());
                    i += 1;
                    continue;
                }
            };
            let end = lines[i..]
                .iter()
                .position(|l| l.starts_with(".end method"))
                .map_or(lines.len(), |p| i + p + 1);
            out.extend(self.rewrite_method(params, &lines[i..end]));
            i = end;
        }
        out
    }

    fn rewrite_method(&mut self, params: &str, body: &[String]) -> Vec<String> {
        let Some((locals_at, locals)) = body.iter().enumerate().find_map(|(i, l)| match classify(l) {
            SmaliLine::Locals(n) => Some((i, n)),
            _ => None,
        }) else {
            return body.to_vec();
        };
        if count_registers(&split_params(params)) + locals > REGISTER_HEADROOM {
            return body.to_vec();
        }

        let mut replaced: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (i, line) in body.iter().enumerate() {
            if self.exhausted() {
                break;
            }
            let SmaliLine::Invoke(invoke) = classify(line) else {
                continue;
            };
            if !self.is_target(&invoke) {
                continue;
            }
            let Some(call) = call_site(self.helper, &invoke, self.registry.methods, locals) else {
                continue;
            };
            if let Some((offset, cast)) = find_result(&body[i + 1..], invoke.ret) {
                replaced.insert(i + 1 + offset, cast);
            }
            replaced.insert(i, call);

            let code = lookup(self.helper, &invoke);
            self.registry.instructions += code.iter().map(|l| code_units(l)).sum::<usize>();
            self.registry.code.extend(code);
            self.registry.methods += 1;
        }

        if replaced.is_empty() {
            return body.to_vec();
        }
        replaced.insert(locals_at, vec![instr(format!(".locals {}", locals + EXTRA_LOCALS))]);
        body.iter()
            .enumerate()
            .flat_map(|(i, l)| replaced.remove(&i).unwrap_or_else(|| vec![l.clone()]))
            .collect()
    }
}

fn rewrite_calls(paths: &[PathBuf], mut reflector: Reflector<'_>) -> Result<(), TransformError> {
    for path in paths {
        if reflector.exhausted() {
            debug!("  no room left in {}", reflector.helper.descriptor);
            break;
        }
        files::rewrite_lines(path, |lines| Ok::<_, TransformError>(reflector.rewrite(lines)))?;
    }
    Ok(())
}

fn reflect(session: &mut Session, helper: Helper, index: Option<&ClassIndex>) -> Result<bool, TransformError> {
    let paths = session.smali_files()?;
    let mut registry = session.reflection.remove(helper.descriptor).unwrap_or_default();
    let before = registry.methods;
    let targets = match index {
        Some(index) => Targets::Declared(index),
        None => Targets::Dangerous,
    };
    let outcome = rewrite_calls(
        &paths,
        Reflector {
            helper,
            targets,
            registry: &mut registry,
        },
    );

    let added = registry.methods - before;
    let code = (registry.methods > 0).then(|| {
        helper
            .source(session.encryption_secret())
            .replace(CODE_PLACEHOLDER, &registry.code.join("\n"))
    });
    debug!(
        "  {} call(s) through {} ({} code units registered)",
        added, helper.descriptor, registry.instructions
    );
    session.reflection.insert(helper.descriptor.to_string(), registry);
    outcome?;

    if let Some(code) = code {
        helper.write(session, &code)?;
    }
    Ok(added > 0)
}

impl Transform for Reflection {
    fn name(&self) -> &'static str {
        "Reflection"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let index = ClassIndex::scan(&session.smali_files()?)?;
        reflect(session, Helper::API_REFLECTION, Some(&index))
    }
}

impl Transform for AdvancedReflection {
    fn name(&self) -> &'static str {
        "AdvancedReflection"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        reflect(session, Helper::ADVANCED_API_REFLECTION, None)
    }
}
