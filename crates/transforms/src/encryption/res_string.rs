use super::{
    declared_registers, decrypt_call, inject_string_helper, param_registers, DECRYPT_STRING,
    DECRYPT_STRING_ARRAY,
};
use crate::{Category, Transform};
use dexcloak_core::crypto::encrypt_string;
use dexcloak_core::smali::registers::{split_list, Register};
use dexcloak_core::smali::strings::unescape;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::xml::{XmlDocument, XmlElement};
use dexcloak_core::Session;
use dexcloak_utils::errors::{FileError, TransformError};
use dexcloak_utils::files;
use rand::rngs::StdRng;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

/// Encrypts string and string-array resources read by constant id from code.
///
/// The resource values are replaced by their ciphertext in `res/values`, and every read site
/// decrypts the result right after `move-result-object`. A resource is only encrypted when all
/// of its constant id loads lead to a rewritable read and no resource file refers to it.
pub struct ResStringEncryption;

const GET_STRING: [&str; 2] = [
    "Landroid/content/res/Resources;->getString(I)Ljava/lang/String;",
    "Landroid/content/Context;->getString(I)Ljava/lang/String;",
];
const GET_STRING_ARRAY: &str = "Landroid/content/res/Resources;->getStringArray(I)[Ljava/lang/String;";

static ID_LOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+const(?:/high16)?\s(?P<register>[vp]\d+),\s(?P<id>-?0x[0-9a-fA-F]+)\s*$")
        .expect("id load pattern")
});

static RESOURCE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(?P<kind>string|array)/(?P<name>[A-Za-z0-9_.]+)").expect("resource reference pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    String,
    Array,
}

impl Kind {
    const fn decrypt_method(self) -> &'static str {
        match self {
            Self::String => DECRYPT_STRING,
            Self::Array => DECRYPT_STRING_ARRAY,
        }
    }

    fn of_reference(kind: &str) -> Self {
        if kind == "array" {
            Self::Array
        } else {
            Self::String
        }
    }
}

type ResourceName = (Kind, String);

/// Resource ids declared in `R$string` and `R$array`.
#[derive(Default)]
struct ResourceIds {
    names: HashMap<String, ResourceName>,
}

impl ResourceIds {
    fn scan(paths: &[std::path::PathBuf]) -> Result<Self, TransformError> {
        let mut ids = Self::default();
        for path in paths {
            let lines = files::read_lines(path)?;
            let kind = match smali::declared_class(&lines) {
                Some(class) if class.ends_with("/R$string;") => Kind::String,
                Some(class) if class.ends_with("/R$array;") => Kind::Array,
                _ => continue,
            };
            for line in &lines {
                if let SmaliLine::Field(decl) = classify(line) {
                    let constant = decl.modifiers.contains("static") && decl.modifiers.contains("final");
                    if let (true, "I", Some(id)) = (constant, decl.ty, decl.initializer) {
                        ids.names.insert(id.to_string(), (kind, decl.name.to_string()));
                    }
                }
            }
        }
        Ok(ids)
    }
}

/// Read sites per resource, and the resources that must stay in clear text.
#[derive(Default)]
struct ReadSites {
    rewritten: HashMap<ResourceName, usize>,
    blocked: HashSet<ResourceName>,
}

impl ReadSites {
    fn encryptable(&self) -> HashSet<ResourceName> {
        self.rewritten
            .keys()
            .filter(|name| !self.blocked.contains(*name))
            .cloned()
            .collect()
    }
}

/// The resource id last loaded into `register` before line `before`, within the same method.
fn traced_id<'a>(lines: &'a [String], before: usize, register: &str) -> Option<&'a str> {
    for line in lines[..before].iter().rev() {
        if line.starts_with(".method ") {
            return None;
        }
        if let Some(caps) = ID_LOAD.captures(line) {
            if &caps["register"] == register {
                return caps.name("id").map(|m| m.as_str());
            }
        }
    }
    None
}

/// Index of the `move-result-object` consuming the call at `call`, if it directly follows.
fn move_result(lines: &[String], call: usize) -> Option<(usize, &str)> {
    for (i, line) in lines.iter().enumerate().skip(call + 1) {
        if line.starts_with(".end method") {
            return None;
        }
        match smali::opcode(line) {
            Some("move-result-object") => {
                return line.split_whitespace().nth(1).map(|register| (i, register));
            }
            Some(_) => return None,
            None => {}
        }
    }
    None
}

fn rewrite_reads(lines: &[String], ids: &ResourceIds, sites: &mut ReadSites) -> Vec<String> {
    let mut inserts: HashMap<usize, [String; 4]> = HashMap::new();
    let mut locals = 0;
    let mut params = 0;
    for (i, line) in lines.iter().enumerate() {
        let invoke = match classify(line) {
            SmaliLine::Method(decl) => {
                locals = 0;
                params = param_registers(&decl);
                continue;
            }
            SmaliLine::Locals(n) => {
                locals = n;
                continue;
            }
            SmaliLine::Other => {
                if let Some(total) = declared_registers(line) {
                    locals = total.saturating_sub(params);
                }
                continue;
            }
            SmaliLine::Invoke(invoke) if invoke.kind == "invoke-virtual" => invoke,
            _ => continue,
        };
        let key = invoke.key();
        let kind = if GET_STRING.contains(&key.as_str()) {
            Kind::String
        } else if key == GET_STRING_ARRAY {
            Kind::Array
        } else {
            continue;
        };
        let registers = split_list(invoke.registers);
        let [_, id_register] = registers.as_slice() else {
            continue;
        };
        let Some(name) = traced_id(lines, i, id_register).and_then(|id| ids.names.get(id)) else {
            continue;
        };
        if name.0 != kind {
            continue;
        }

        let target = move_result(lines, i).filter(|(_, register)| {
            register
                .parse::<Register>()
                .is_ok_and(|r| r.fits_nibble(locals))
        });
        match target {
            Some((at, register)) => {
                inserts.insert(at, decrypt_call(register, kind.decrypt_method()));
                *sites.rewritten.entry(name.clone()).or_default() += 1;
            }
            None => {
                sites.blocked.insert(name.clone());
            }
        }
    }

    let mut out = Vec::with_capacity(lines.len() + inserts.len() * 5);
    for (i, line) in lines.iter().enumerate() {
        out.push(line.clone());
        if let Some(call) = inserts.remove(&i) {
            out.push(String::new());
            out.extend(call);
        }
    }
    out
}

/// Resources named by `@string/…` or `@array/…` in the manifest or any resource file, which
/// the framework resolves without going through the decrypt helper.
fn referenced_from_xml(res_dir: &Path, manifest: &Path) -> Result<HashSet<ResourceName>, TransformError> {
    let mut names = HashSet::new();
    let mut paths = vec![manifest.to_path_buf()];
    if res_dir.is_dir() {
        for entry in WalkDir::new(res_dir) {
            let entry = entry.map_err(|e| FileError::Walk {
                path: res_dir.to_path_buf(),
                source: e,
            })?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "xml") {
                paths.push(entry.into_path());
            }
        }
    }
    for path in paths {
        let text = files::read_text(&path)?;
        for caps in RESOURCE_REF.captures_iter(&text) {
            names.insert((Kind::of_reference(&caps["kind"]), caps["name"].to_string()));
        }
    }
    Ok(names)
}

/// Resource value as the framework would return it: surrounding quotes dropped and escapes
/// resolved.
fn resource_value(text: &str) -> String {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed);
    unescape(inner)
}

fn seal_text(element: &mut XmlElement, secret: &str) -> Result<bool, TransformError> {
    let text = element.text();
    if text.trim().is_empty() || element.has_child_elements() {
        return Ok(false);
    }
    element.set_text(encrypt_string(secret, &resource_value(&text))?);
    Ok(true)
}

/// Encrypts the selected entries of a `values` file in place, returning how many were sealed.
fn seal_values(path: &Path, chosen: &HashSet<ResourceName>, secret: &str) -> Result<usize, TransformError> {
    let mut document = XmlDocument::parse(&files::read_text(path)?)?;
    let mut sealed = 0;
    for element in document.root.elements_mut() {
        let kind = match element.name.as_str() {
            "string" => Kind::String,
            "string-array" => Kind::Array,
            _ => continue,
        };
        let Some(name) = element.attribute("name").map(str::to_string) else {
            continue;
        };
        if !chosen.contains(&(kind, name)) {
            continue;
        }
        match kind {
            Kind::String => {
                if seal_text(element, secret)? {
                    sealed += 1;
                }
            }
            Kind::Array => {
                for item in element.elements_mut().filter(|e| e.name == "item") {
                    if seal_text(item, secret)? {
                        sealed += 1;
                    }
                }
            }
        }
    }
    if sealed > 0 {
        files::write_atomic(path, document.to_xml_string(4)?.as_bytes())?;
    }
    Ok(sealed)
}

/// Resources whose default value cannot be encrypted as plain text: missing, empty, or
/// holding markup or references instead of literal text.
fn unsealable(values: &Path) -> Result<HashSet<ResourceName>, TransformError> {
    let mut names = HashSet::new();
    let document = XmlDocument::parse(&files::read_text(values)?)?;
    for element in document.root.elements() {
        let Some(name) = element.attribute("name") else {
            continue;
        };
        let plain = |e: &XmlElement| {
            let text = e.text();
            !e.has_child_elements() && !text.trim().is_empty() && !text.trim_start().starts_with('@')
        };
        match element.name.as_str() {
            "string" if !plain(element) => {
                names.insert((Kind::String, name.to_string()));
            }
            "string-array" if !element.elements().filter(|e| e.name == "item").all(plain) => {
                names.insert((Kind::Array, name.to_string()));
            }
            _ => {}
        }
    }
    Ok(names)
}

impl Transform for ResStringEncryption {
    fn name(&self) -> &'static str {
        "ResStringEncryption"
    }

    fn category(&self) -> Category {
        Category::Encryption
    }

    fn apply(&self, session: &mut Session, _rng: &mut StdRng) -> Result<bool, TransformError> {
        let smali_files = session.smali_files()?;
        let ids = ResourceIds::scan(&smali_files)?;
        if ids.names.is_empty() {
            debug!("  no string resource ids");
            return Ok(false);
        }

        let values: Vec<_> = ["strings.xml", "arrays.xml"]
            .iter()
            .map(|file| session.resource_directory().map(|res| res.join("values").join(file)))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|path| path.is_file())
            .collect();
        if values.is_empty() {
            debug!("  no string values");
            return Ok(false);
        }

        // Dry run over the code to learn which resources can be encrypted.
        let mut sites = ReadSites::default();
        for path in &smali_files {
            rewrite_reads(&files::read_lines(path)?, &ids, &mut sites);
        }
        sites
            .blocked
            .extend(referenced_from_xml(&session.resource_directory()?, session.manifest_file()?)?);
        for path in &values {
            sites.blocked.extend(unsealable(path)?);
        }
        let chosen = sites.encryptable();
        if chosen.is_empty() {
            return Ok(false);
        }

        let secret = session.encryption_secret();
        let mut sealed = 0;
        for path in &values {
            sealed += seal_values(path, &chosen, secret)?;
        }
        debug!("  encrypted {} resource value(s) for {} name(s)", sealed, chosen.len());

        // Only reads of encrypted resources get the decrypt call.
        let decrypted = ResourceIds {
            names: ids
                .names
                .into_iter()
                .filter(|(_, name)| chosen.contains(name))
                .collect(),
        };
        let mut ignored = ReadSites::default();
        for path in &smali_files {
            files::rewrite_lines(path, |lines| {
                Ok::<_, TransformError>(rewrite_reads(lines, &decrypted, &mut ignored))
            })?;
        }

        inject_string_helper(session)?;
        Ok(true)
    }
}
