use super::{declared_registers, decrypt_call, inject_string_helper, param_registers, DECRYPT_STRING};
use crate::util::{insert_direct_methods, instr};
use crate::{Category, Transform};
use dexcloak_core::crypto::encrypt_string;
use dexcloak_core::smali::registers::Register;
use dexcloak_core::smali::strings::unescape;
use dexcloak_core::smali::{classify, SmaliLine};
use dexcloak_core::Session;
use dexcloak_utils::errors::TransformError;
use dexcloak_utils::files;
use rand::rngs::StdRng;
use std::collections::HashMap;
use tracing::debug;

/// Encrypts string constants and static string initializers.
///
/// Every `const-string` becomes a load of the hex ciphertext followed by a call to the string
/// helper. Initialized `static` string fields lose their initializer and are assigned the
/// decrypted value in `<clinit>`, which is created when the class has none.
pub struct ConstStringEncryption;

const STRING_TYPE: &str = "Ljava/lang/String;";

/// A `static` string field with a literal initializer, by line index.
struct StaticString {
    name: String,
    value: String,
}

struct StringSeal<'a> {
    secret: &'a str,
    sealed: usize,
}

impl StringSeal<'_> {
    fn seal(&mut self, plain: &str) -> Result<String, TransformError> {
        self.sealed += 1;
        Ok(encrypt_string(self.secret, plain)?)
    }

    fn static_init(&mut self, class: &str, fields: &[&StaticString]) -> Result<Vec<String>, TransformError> {
        let mut code = Vec::new();
        for field in fields {
            code.push(instr(format!("const-string/jumbo v0, \"{}\"", self.seal(&field.value)?)));
            code.push(String::new());
            code.extend(decrypt_call("v0", DECRYPT_STRING));
            code.push(instr(format!("sput-object v0, {class}->{}:{STRING_TYPE}", field.name)));
            code.push(String::new());
        }
        Ok(code)
    }

    fn rewrite(&mut self, lines: &[String]) -> Result<Vec<String>, TransformError> {
        let Some(class) = dexcloak_core::smali::declared_class(lines) else {
            return Ok(lines.to_vec());
        };

        let mut statics: HashMap<usize, StaticString> = HashMap::new();
        let mut clinit: Option<usize> = None;
        let mut clinit_locals: Option<usize> = None;
        let mut in_clinit = false;
        for (i, line) in lines.iter().enumerate() {
            match classify(line) {
                SmaliLine::Field(decl) if decl.modifiers.contains("static") && decl.ty == STRING_TYPE => {
                    let literal = decl
                        .initializer
                        .and_then(|v| v.strip_prefix('"'))
                        .and_then(|v| v.strip_suffix('"'))
                        .filter(|v| !v.is_empty());
                    if let Some(literal) = literal {
                        let field = StaticString {
                            name: decl.name.to_string(),
                            value: unescape(literal),
                        };
                        statics.insert(i, field);
                    }
                }
                SmaliLine::Method(decl) => {
                    in_clinit = decl.is_static_constructor();
                    if in_clinit {
                        clinit = Some(i);
                    }
                }
                SmaliLine::EndMethod => in_clinit = false,
                SmaliLine::Locals(_) if in_clinit && clinit_locals.is_none() => clinit_locals = Some(i),
                _ => {}
            }
        }
        // A static constructor without `.locals` cannot take the extra register.
        if clinit.is_some() && clinit_locals.is_none() {
            statics.clear();
        }
        let mut ordered: Vec<(&usize, &StaticString)> = statics.iter().collect();
        ordered.sort_by_key(|(i, _)| **i);
        let fields: Vec<&StaticString> = ordered.into_iter().map(|(_, f)| f).collect();
        let init = self.static_init(class, &fields)?;

        let mut out = Vec::with_capacity(lines.len());
        let mut locals = 0;
        let mut params = 0;
        for (i, line) in lines.iter().enumerate() {
            if statics.contains_key(&i) {
                let head = line.find(" = ").map_or(line.as_str(), |at| &line[..at]);
                out.push(head.to_string());
                continue;
            }
            match classify(line) {
                SmaliLine::Method(decl) => {
                    locals = 0;
                    params = param_registers(&decl);
                }
                SmaliLine::Other => {
                    if let Some(total) = declared_registers(line) {
                        locals = total.saturating_sub(params);
                    }
                }
                SmaliLine::Locals(n) => {
                    locals = n;
                    if Some(i) == clinit_locals && !init.is_empty() {
                        out.push(instr(format!(".locals {}", n.max(1))));
                        out.push(String::new());
                        out.extend(init.iter().cloned());
                        continue;
                    }
                }
                SmaliLine::ConstString(load) => {
                    let fits = load
                        .register
                        .parse::<Register>()
                        .is_ok_and(|r| r.fits_nibble(locals));
                    if fits {
                        let sealed = self.seal(&unescape(load.value))?;
                        out.push(instr(format!("const-string/jumbo {}, \"{sealed}\"", load.register)));
                        out.push(String::new());
                        out.extend(decrypt_call(load.register, DECRYPT_STRING));
                        continue;
                    }
                }
                _ => {}
            }
            out.push(line.clone());
        }

        if clinit.is_none() && !init.is_empty() {
            let mut method = vec![
                ".method static constructor <clinit>()V".to_string(),
                instr(".locals 1"),
                String::new(),
            ];
            method.extend(init);
            method.push(instr("return-void"));
            method.push(".end method".to_string());
            method.push(String::new());
            insert_direct_methods(&mut out, method);
        }
        Ok(out)
    }
}

impl Transform for ConstStringEncryption {
    fn name(&self) -> &'static str {
        "ConstStringEncryption"
    }

    fn category(&self) -> Category {
        Category::Encryption
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let mut seal = StringSeal {
            secret: session.encryption_secret(),
            sealed: 0,
        };
        for path in session.smali_files()? {
            files::rewrite_lines(&path, |lines| seal.rewrite(lines))?;
        }
        let sealed = seal.sealed;
        debug!("  encrypted {} string(s)", sealed);

        if sealed == 0 {
            return Ok(false);
        }
        inject_string_helper(session)?;
        Ok(true)
    }
}
