use super::is_renameable;
use crate::util::{random_letters, rewrite_all};
use crate::{Category, Transform};
use dexcloak_core::crypto::hashed_identifier;
use dexcloak_core::smali::{self, classify, SmaliLine};
use dexcloak_core::xml::XmlDocument;
use dexcloak_core::Session;
use dexcloak_utils::errors::{FileError, TransformError};
use dexcloak_utils::files;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

/// Renames application classes and the manifest package.
///
/// Every path segment of a class name is replaced by `p` plus a hash of the segment. Numeric
/// segments of anonymous classes are kept, as is everything from an `R` segment on, so
/// generated resource classes keep their layout. Usages are updated in smali, in the
/// manifest and in layout and xml resources.
pub struct ClassRename;

const PREFIX: &str = "p";
const INNER_CLASS_ANNOTATION: &str = ".annotation system Ldalvik/annotation/InnerClass;";

static INNER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s+name\s=\s"(?P<name>\S+?)""#).expect("inner name pattern"));

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?P<value>\S+?)""#).expect("string literal pattern"));

/// The renamed form of a class descriptor such as `Lcom/example/Main$1;`.
fn encrypt_class_name(class: &str) -> String {
    let inner = class
        .strip_prefix('L')
        .and_then(|c| c.strip_suffix(';'))
        .unwrap_or(class);
    let mut out = String::with_capacity(class.len() + 16);
    out.push('L');
    let mut keep_rest = false;

    for piece in inner.split_inclusive(['/', '$']) {
        let token = piece.trim_end_matches(['/', '$']);
        let separator = &piece[token.len()..];
        if token == "R" {
            keep_rest = true;
        }
        let keep = keep_rest || token.is_empty() || token.chars().all(|c| c.is_ascii_digit());
        if keep {
            out.push_str(token);
        } else {
            out.push_str(&hashed_identifier(PREFIX, token));
        }
        out.push_str(separator);
    }
    out.push(';');
    out
}

fn encrypt_package(package: &str) -> String {
    package
        .split('.')
        .map(|token| hashed_identifier(PREFIX, token))
        .collect::<Vec<_>>()
        .join(".")
}

/// `Lcom/example/Main$Inner;` in dotted form: `com.example.Main.Inner`.
fn dotted(class: &str) -> String {
    let trimmed = class
        .strip_prefix('L')
        .and_then(|c| c.strip_suffix(';'))
        .unwrap_or(class);
    trimmed.replace(['/', '$'], ".")
}

/// Renames the declaration in one file and records it in `renamed`.
fn rename_declaration(
    session: &Session,
    lines: &[String],
    renamed: &mut IndexMap<String, String>,
) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut class: Option<String> = None;
    let mut in_inner_annotation = false;
    let mut done = false;

    for line in lines {
        if done {
            out.push(line.clone());
            continue;
        }
        if class.is_none() {
            if let SmaliLine::Class(decl) = classify(line) {
                if !is_renameable(session, decl.name) {
                    return lines.to_vec();
                }
                let new_name = encrypt_class_name(decl.name);
                out.push(smali::splice(line, decl.name_span.clone(), &new_name));
                renamed.insert(decl.name.to_string(), new_name);
                class = Some(decl.name.to_string());
                continue;
            }
        }

        let trimmed = line.trim();
        if trimmed == INNER_CLASS_ANNOTATION {
            in_inner_annotation = true;
        } else if trimmed == ".end annotation" {
            in_inner_annotation = false;
        } else if line.starts_with(".method ") {
            done = true;
        } else if in_inner_annotation {
            let r_class = class.as_deref().is_some_and(|c| {
                c.trim_end_matches(';').split(['/', '$']).any(|t| t == "R")
            });
            if let Some(m) = INNER_NAME.captures(line).and_then(|c| c.name("name")) {
                if !r_class {
                    let hashed = hashed_identifier(PREFIX, m.as_str());
                    out.push(smali::splice(line, m.range(), &hashed));
                    continue;
                }
            }
        }
        out.push(line.clone());
    }
    out
}

struct Renames {
    /// `Lold;` to `Lnew;`.
    slashed: IndexMap<String, String>,
    /// `old.Name` to `new.Name`, plus the package itself.
    dotted: IndexMap<String, String>,
    package: String,
    encrypted_package: String,
}

impl Renames {
    fn new(slashed: IndexMap<String, String>, package: &str, encrypted_package: &str) -> Self {
        let mut dotted_map: IndexMap<String, String> = slashed
            .iter()
            .map(|(old, new)| (dotted(old), dotted(new)))
            .collect();
        dotted_map.insert(package.to_string(), encrypted_package.to_string());
        Self {
            slashed,
            dotted: dotted_map,
            package: package.to_string(),
            encrypted_package: encrypted_package.to_string(),
        }
    }

    fn rename_smali_line(&self, line: &str) -> String {
        let mut line = line.to_string();
        let literal = STRING_LITERAL
            .captures(&line)
            .and_then(|c| c.name("value"))
            .map(|m| m.as_str().to_string());

        if let Some(value) = literal {
            if let Some(new) = self.dotted.get(&value) {
                line = line.replace(&format!("\"{value}\""), &format!("\"{new}\""));
            }
            if let Some(new) = self.slashed.get(&format!("{value};")) {
                line = line.replace(&value, new.trim_end_matches(';'));
            }
        }
        smali::replace_class_references(&line, |class| self.slashed.get(class).map(String::as_str))
    }

    fn rename_xml(&self, text: &str) -> String {
        let mut pairs: Vec<(&String, &String)> = self.dotted.iter().collect();
        pairs.sort_by_key(|(old, _)| std::cmp::Reverse(old.len()));

        let mut text = text.to_string();
        for (old, new) in pairs {
            text = text.replace(old.as_str(), new);

            let relative = old
                .strip_prefix(self.package.as_str())
                .filter(|rest| rest.starts_with('.'));
            if let Some(relative) = relative {
                let new_relative = new.strip_prefix(self.encrypted_package.as_str()).unwrap_or(new);
                text = text.replace(&format!("\"{relative}\""), &format!("\"{new_relative}\""));
            }
        }
        text
    }
}

/// Layout and xml resources plus the manifest.
fn xml_files(session: &Session) -> Result<Vec<PathBuf>, TransformError> {
    let res = session.resource_directory()?;
    let mut found = Vec::new();
    if res.is_dir() {
        for entry in WalkDir::new(&res) {
            let entry = entry.map_err(|source| FileError::Walk {
                path: res.clone(),
                source,
            })?;
            let path = entry.path();
            let in_scope = path
                .parent()
                .and_then(|dir| dir.strip_prefix(&res).ok())
                .is_some_and(|dir| {
                    let dir = dir.to_string_lossy();
                    dir.contains("layout") || dir.contains("xml")
                });
            if entry.file_type().is_file() && in_scope && path.extension().is_some_and(|e| e == "xml") {
                found.push(entry.into_path());
            }
        }
    }
    found.sort();
    found.push(session.manifest_file()?.to_path_buf());
    Ok(found)
}

fn rewrite_text(path: &Path, edit: impl FnOnce(&str) -> String) -> Result<bool, TransformError> {
    let text = files::read_text(path)?;
    let edited = edit(&text);
    if edited == text {
        return Ok(false);
    }
    files::write_atomic(path, edited.as_bytes())?;
    Ok(true)
}

impl Transform for ClassRename {
    fn name(&self) -> &'static str {
        "ClassRename"
    }

    fn category(&self) -> Category {
        Category::Rename
    }

    fn apply(&self, session: &mut Session, rng: &mut StdRng) -> Result<bool, TransformError> {
        let manifest_path = session.manifest_file()?.to_path_buf();
        let mut manifest = XmlDocument::parse(&files::read_text(&manifest_path)?)?;
        let package = manifest
            .root
            .attribute("package")
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TransformError::MissingPackage(manifest_path.clone()))?;
        let encrypted_package = encrypt_package(&package);
        debug!("  package {} -> {}", package, encrypted_package);

        manifest.root.set_attribute("package", encrypted_package.as_str());
        manifest.root.set_attribute(
            "android:sharedUserId",
            format!("{}.uid.shared", random_letters(rng, 16)),
        );
        files::write_atomic(&manifest_path, manifest.to_xml_string(4)?.as_bytes())?;

        let smali_files = session.smali_files()?;
        let mut renamed = IndexMap::new();
        rewrite_all(&smali_files, |_, lines| {
            Ok(rename_declaration(session, lines, &mut renamed))
        })?;
        debug!("  renamed {} class declaration(s)", renamed.len());

        let renames = Renames::new(renamed, &package, &encrypted_package);
        let smali_changed = rewrite_all(&smali_files, |_, lines| {
            Ok(lines.iter().map(|l| renames.rename_smali_line(l)).collect())
        })?;

        let mut xml_changed = 0;
        for path in xml_files(session)? {
            if rewrite_text(&path, |text| renames.rename_xml(text))? {
                xml_changed += 1;
            }
        }
        debug!("  updated {} smali and {} xml file(s)", smali_changed, xml_changed);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, fixture_with, MANIFEST};
    use rand::SeedableRng;

    const MAIN: &str = r#".class public Lcom/example/app/MainActivity;
.super Landroid/app/Activity;
.source "MainActivity.java"

# annotations
.annotation system Ldalvik/annotation/MemberClasses;
    value = {
        Lcom/example/app/MainActivity$Inner;
    }
.end annotation


# direct methods
.method public constructor <init>()V
    .locals 1

    invoke-direct {p0}, Landroid/app/Activity;-><init>()V

    const-string v0, "com.example.app.MainActivity"

    const-string v0, "Lcom/example/app/MainActivity"

    return-void
.end method
"#;

    const INNER: &str = r#".class Lcom/example/app/MainActivity$Inner;
.super Ljava/lang/Object;

# annotations
.annotation system Ldalvik/annotation/EnclosingClass;
    value = Lcom/example/app/MainActivity;
.end annotation

.annotation system Ldalvik/annotation/InnerClass;
    accessFlags = 0x0
    name = "Inner"
.end annotation


# direct methods
.method constructor <init>()V
    .locals 0

    return-void
.end method
"#;

    const R_STRING: &str = ".class public final Lcom/example/app/R$string;
.super Ljava/lang/Object;
";

    const LAYOUT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<LinearLayout xmlns:android="http://schemas.android.com/apk/res/android">
    <com.example.app.MainActivity.Inner android:id="@+id/inner"/>
</LinearLayout>
"#;

    fn hashed(token: &str) -> String {
        hashed_identifier(PREFIX, token)
    }

    #[test]
    fn encrypts_class_names_segment_wise() {
        let renamed = encrypt_class_name("Lcom/example/Main$1;");
        assert_eq!(
            renamed,
            format!("L{}/{}/{}$1;", hashed("com"), hashed("example"), hashed("Main"))
        );
        let r = encrypt_class_name("Lcom/example/R$string;");
        assert_eq!(r, format!("L{}/{}/R$string;", hashed("com"), hashed("example")));
        let lambda = encrypt_class_name("Lcom/a/B$$Lambda$0;");
        assert_eq!(
            lambda,
            format!("L{}/{}/{}$${}$0;", hashed("com"), hashed("a"), hashed("B"), hashed("Lambda"))
        );
    }

    #[test]
    fn renames_declarations_usages_and_resources() {
        let mut fx = fixture(&[
            ("smali/com/example/app/MainActivity.smali", MAIN),
            ("smali/com/example/app/MainActivity$Inner.smali", INNER),
            ("smali/com/example/app/R$string.smali", R_STRING),
            ("res/layout/main.xml", LAYOUT),
        ]);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(ClassRename.apply(&mut fx.session, &mut rng).unwrap());

        let new_main = encrypt_class_name("Lcom/example/app/MainActivity;");
        let new_inner = encrypt_class_name("Lcom/example/app/MainActivity$Inner;");
        let main = fx.read("smali/com/example/app/MainActivity.smali");
        assert!(main.starts_with(&format!(".class public {new_main}")));
        assert!(main.contains(&format!("        {new_inner}")));
        assert!(main.contains(&format!("\"{}\"", dotted(&new_main))));
        assert!(main.contains(&format!("\"{}\"", new_main.trim_end_matches(';'))));
        assert!(main.contains("Landroid/app/Activity;-><init>()V"));

        let inner = fx.read("smali/com/example/app/MainActivity$Inner.smali");
        assert!(inner.contains(&format!("    name = \"{}\"", hashed("Inner"))));
        assert!(inner.contains(&format!("    value = {new_main}")));

        let r = fx.read("smali/com/example/app/R$string.smali");
        assert!(r.contains(&format!("L{}/{}/{}/R$string;", hashed("com"), hashed("example"), hashed("app"))));

        let layout = fx.read("res/layout/main.xml");
        assert!(layout.contains(&format!("<{} ", dotted(&new_inner))));

        let manifest = fx.read("AndroidManifest.xml");
        let package = encrypt_package("com.example.app");
        assert!(manifest.contains(&format!("package=\"{package}\"")));
        assert!(manifest.contains(".uid.shared\""));
        assert!(manifest.contains(&format!("android:name=\".{}\"", hashed("MainActivity"))));
    }

    #[test]
    fn leaves_ignored_packages_alone() {
        let mut fx = fixture_with(&[("smali/com/example/app/MainActivity.smali", MAIN)], |c| {
            c.ignore_packages = vec!["com.example.app".into()];
        });
        let mut rng = StdRng::seed_from_u64(4);
        ClassRename.apply(&mut fx.session, &mut rng).unwrap();
        let main = fx.read("smali/com/example/app/MainActivity.smali");
        assert!(main.starts_with(".class public Lcom/example/app/MainActivity;"));
    }

    #[test]
    fn manifest_without_package_is_an_error() {
        let manifest = MANIFEST.replace(" package=\"com.example.app\"", "");
        let mut fx = fixture(&[("AndroidManifest.xml", manifest.as_str())]);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(matches!(
            ClassRename.apply(&mut fx.session, &mut rng),
            Err(TransformError::MissingPackage(_))
        ));
    }
}
