use crate::util::{group_files, insert_direct_methods, instr, random_letters};
use crate::{Capability, Category, Transform};
use dexcloak_core::smali::registers::passed_count;
use dexcloak_core::smali::{classify, Invoke, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use tracing::debug;

/// Routes method calls through generated static trampolines in the calling class.
pub struct CallIndirection;

/// Invocation kinds whose dispatch cannot be reproduced from a static method.
fn is_redirectable(invoke: &Invoke<'_>) -> bool {
    !(invoke.method == "<init>"
        || invoke.method == "<clinit>"
        || invoke.kind.starts_with("invoke-super")
        || invoke.kind.starts_with("invoke-polymorphic")
        || invoke.kind.starts_with("invoke-custom"))
}

fn trampoline(invoke: &Invoke<'_>, name: &str, owner_params: &str) -> Vec<String> {
    let ret = invoke.ret;
    let object = ret.starts_with('L') || ret.starts_with('[');
    let (locals, move_result, ret_instr) = match ret {
        "V" => (0, None, "return-void".to_string()),
        "J" | "D" => (2, Some("move-result-wide v0"), "return-wide v0".to_string()),
        _ if object => (1, Some("move-result-object v0"), "return-object v0".to_string()),
        _ => (1, Some("move-result v0"), "return v0".to_string()),
    };

    let count = passed_count(invoke.registers);
    let registers = if invoke.is_range() {
        if count == 0 {
            String::new()
        } else {
            format!("p0 .. p{}", count - 1)
        }
    } else {
        (0..count).map(|i| format!("p{i}")).collect::<Vec<_>>().join(", ")
    };

    let mut method = vec![
        format!(".method public static {name}({owner_params}{}){ret}", invoke.params),
        instr(format!(".locals {locals}")),
        String::new(),
        instr(format!(
            "{} {{{registers}}}, {}->{}({}){ret}",
            invoke.kind, invoke.class, invoke.method, invoke.params
        )),
        String::new(),
    ];
    if let Some(move_result) = move_result {
        method.push(instr(move_result));
        method.push(String::new());
    }
    method.push(instr(ret_instr));
    method.push(".end method".to_string());
    method.push(String::new());
    method
}

struct Indirection<'a> {
    rng: &'a mut StdRng,
    added: usize,
    max: usize,
}

impl Indirection<'_> {
    fn rewrite(&mut self, lines: &[String]) -> Vec<String> {
        let mut class: Option<String> = None;
        let mut out = Vec::with_capacity(lines.len());
        let mut methods = Vec::new();

        for line in lines {
            let event = classify(line);
            if class.is_none() {
                if let SmaliLine::Class(decl) = &event {
                    if decl.is_interface() {
                        return lines.to_vec();
                    }
                    class = Some(decl.name.to_string());
                }
            }
            let (Some(owner), SmaliLine::Invoke(invoke)) = (class.as_deref(), &event) else {
                out.push(line.clone());
                continue;
            };
            if !is_redirectable(invoke) || self.added >= self.max {
                out.push(line.clone());
                continue;
            }

            let name = random_letters(&mut *self.rng, 16);
            let receiver = if invoke.is_static() { "" } else { invoke.class };
            let kind = if invoke.is_range() {
                "invoke-static/range"
            } else {
                "invoke-static"
            };
            out.push(instr(format!(
                "{kind} {{{}}}, {owner}->{name}({receiver}{}){}",
                invoke.registers, invoke.params, invoke.ret
            )));
            methods.extend(trampoline(invoke, &name, receiver));
            self.added += 1;
        }

        insert_direct_methods(&mut out, methods);
        out
    }
}

impl Transform for CallIndirection {
    fn name(&self) -> &'static str {
        "CallIndirection"
    }

    fn category(&self) -> Category {
        Category::Code
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::AddsMethods]
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let budget = session.remaining_methods_per_pass()?;
        let mut total = 0;

        for (index, group) in group_files(session)?.iter().enumerate() {
            let mut pass = Indirection {
                rng: &mut *rng,
                added: 0,
                max: budget.get(index).copied().unwrap_or(0),
            };
            for path in group {
                if pass.added >= pass.max {
                    break;
                }
                files::rewrite_lines(path, |lines| {
                    Ok::<_, TransformError>(pass.rewrite(lines))
                })?;
            }
            debug!("  group {}: {} trampolines (budget {})", index, pass.added, pass.max);
            total += pass.added;
        }
        Ok(total > 0)
    }
}
