//! End to end pipeline scenarios.
//!
//! Each test prepares a small decoded application, runs `obfuscate_apk` with a fixture
//! toolchain and inspects the rewritten tree and the run report.

use crate::fixture::{init_tracing, wide_class, App, MANIFEST};
use dexcloak_core::budget::{self, MemberKind};
use dexcloak_core::smali::{classify, SmaliLine};
use dexcloak_transform::obfuscator::obfuscate_apk;
use dexcloak_utils::errors::{ObfuscateError, TransformError};

const COUNTER: &str = "\
.class public Lcom/example/app/Counter;
.super Ljava/lang/Object;


# static fields
.field private static total:I

.field private static label:Ljava/lang/String;


# direct methods
.method private static bump(I)I
    .locals 1

    sget v0, Lcom/example/app/Counter;->total:I

    add-int/2addr v0, p0

    sput v0, Lcom/example/app/Counter;->total:I

    const-string v0, \"bumped\"

    sput-object v0, Lcom/example/app/Counter;->label:Ljava/lang/String;

    return p0
.end method

.method public static run()V
    .locals 1

    const/4 v0, 0x2

    invoke-static {v0}, Lcom/example/app/Counter;->bump(I)I

    return-void
.end method
";

const MAIN: &str = "\
.class public Lcom/example/app/MainActivity;
.super Landroid/app/Activity;


# virtual methods
.method public onCreate(Landroid/os/Bundle;)V
    .locals 2

    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V

    invoke-static {}, Lcom/example/app/Counter;->run()V

    const-string v0, \"hello\"

    if-eqz p1, :cond_0

    const-string v0, \"restored\"

    :cond_0
    return-void
.end method
";

fn sample() -> App {
    App::new()
        .file("smali/com/example/app/Counter.smali", COUNTER)
        .file("smali/com/example/app/MainActivity.smali", MAIN)
}

#[test]
fn every_field_adding_pass_gets_the_same_share() {
    init_tracing();
    let app = App::new().file("smali/com/example/app/Wide.smali", &wide_class("Lcom/example/app/Wide;", 50, 50));
    let run = app.prepare(&["FieldRename", "FieldRename", "FieldRename"]);
    let result = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();

    assert_eq!(result.metadata.fields_per_pass, Some(vec![(64000 - 50) / 3]));
    assert_eq!(result.metadata.fields_per_pass, Some(vec![21316]));
    assert_eq!(result.metadata.methods_per_pass, None);

    let wide = vec![run.decoded_root().join("smali/com/example/app/Wide.smali")];
    let fields = budget::count_members(&wide, MemberKind::Field).unwrap();
    assert!(fields <= 50 + 3 * 21316);
    assert!(fields > 50, "decoys were added");
}

#[test]
fn every_method_adding_pass_gets_the_same_share() {
    let app = App::new().file("smali/com/example/app/Wide.smali", &wide_class("Lcom/example/app/Wide;", 50, 50));
    let run = app.prepare(&["MethodOverload", "CallIndirection", "MethodOverload"]);
    let result = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();
    assert_eq!(result.metadata.methods_per_pass, Some(vec![21316]));
}

#[test]
fn a_single_adding_pass_keeps_the_whole_remainder() {
    let app = App::new().file("smali/com/example/app/Wide.smali", &wide_class("Lcom/example/app/Wide;", 10, 0));
    let run = app.prepare(&["FieldRename"]);
    let result = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();
    assert_eq!(result.metadata.fields_per_pass, Some(vec![64000 - 10]));
}

#[test]
fn same_seed_same_output() {
    let passes = [
        "DebugRemoval",
        "FieldRename",
        "MethodRename",
        "ClassRename",
        "Goto",
        "Reorder",
        "Nop",
        "RandomManifest",
    ];
    let first = sample().prepare(&passes);
    let second = sample().prepare(&passes);
    obfuscate_apk(first.config.clone(), Box::new(first.toolchain.clone())).unwrap();
    obfuscate_apk(second.config.clone(), Box::new(second.toolchain.clone())).unwrap();

    let (a, b) = (first.snapshot(), second.snapshot());
    assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
    assert_eq!(a, b);
    assert_ne!(a.get("AndroidManifest.xml").map(String::as_str), Some(MANIFEST));
}

#[test]
fn different_seeds_scramble_differently() {
    let first = sample().prepare(&["Nop"]);
    let mut second = sample().prepare(&["Nop"]);
    second.config.seed = 7;
    obfuscate_apk(first.config.clone(), Box::new(first.toolchain.clone())).unwrap();
    obfuscate_apk(second.config.clone(), Box::new(second.toolchain.clone())).unwrap();
    assert_ne!(first.snapshot(), second.snapshot());
}

#[test]
fn failing_pass_is_reported_with_everything_that_ran() {
    let run = sample().prepare(&["Nop", "Rebuild", "NewSignature", "NewAlignment"]);
    let err = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap_err();
    match err {
        ObfuscateError::Pass { name, applied, source } => {
            assert_eq!(name, "NewSignature");
            assert_eq!(applied, vec!["Nop", "Rebuild", "NewSignature"]);
            assert!(matches!(source, TransformError::MissingCredentials));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(run.toolchain.calls(), vec!["decode", "build"]);
    // Work done before the failure stays on disk.
    assert!(run.read("smali/com/example/app/Counter.smali").contains("    nop"));
}

#[test]
fn unknown_pass_stops_before_decoding() {
    let run = sample().prepare(&["Nop", "Obfuscate-Everything"]);
    let err = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap_err();
    assert!(matches!(err, ObfuscateError::InvalidPass(ref name) if name == "Obfuscate-Everything"));
    assert!(run.toolchain.calls().is_empty());
    assert!(!run.decoded_root().exists());
}

#[test]
fn trivial_passes_drive_the_toolchain() {
    let run = sample().prepare(&["Rebuild", "NewAlignment"]);
    let result = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();
    assert!(result.built);
    assert_eq!(result.output, run.dir.path().join("work").join("app_obfuscated.apk"));
    assert_eq!(run.toolchain.calls(), vec!["decode", "build", "align"]);

    let report: serde_json::Value = serde_json::to_value(&result).unwrap();
    assert_eq!(report["metadata"]["passes_applied"][0], "Rebuild");
    assert_eq!(report["metadata"]["seed_used"], 42);
}

#[test]
fn renaming_twice_keeps_usages_consistent() {
    let run = sample().prepare(&["FieldRename", "MethodRename", "FieldRename", "MethodRename"]);
    obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();

    let counter = run.read("smali/com/example/app/Counter.smali");
    let main = run.read("smali/com/example/app/MainActivity.smali");
    let mut declared_fields = Vec::new();
    let mut declared_methods = Vec::new();
    for line in counter.lines() {
        match classify(line) {
            SmaliLine::Field(decl) => declared_fields.push(decl.signature()),
            SmaliLine::Method(decl) => declared_methods.push(decl.signature()),
            _ => {}
        }
    }
    assert!(!declared_fields.iter().any(|f| f == "total:I"));
    assert!(!declared_methods.iter().any(|m| m == "bump(I)I"));

    for line in counter.lines().chain(main.lines()) {
        match classify(line) {
            SmaliLine::FieldAccess(access) if access.class == "Lcom/example/app/Counter;" => {
                assert!(declared_fields.contains(&access.signature()), "dangling {line}");
            }
            SmaliLine::Invoke(invoke) if invoke.class == "Lcom/example/app/Counter;" => {
                let signature = format!("{}({}){}", invoke.method, invoke.params, invoke.ret);
                assert!(declared_methods.contains(&signature), "dangling {line}");
            }
            _ => {}
        }
    }
}

#[test]
fn string_helper_is_injected_once() {
    let app = sample()
        .file("smali/com/example/app/R$string.smali", R_STRING)
        .file("res/values/strings.xml", STRINGS)
        .file("smali/com/example/app/Greeter.smali", GREETER);
    let run = app.prepare(&["ConstStringEncryption", "ResStringEncryption", "ConstStringEncryption"]);
    obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();

    let helpers: Vec<String> = run
        .snapshot()
        .into_keys()
        .filter(|k| k.ends_with("DecryptString.smali"))
        .collect();
    assert_eq!(helpers, vec!["smali/com/decryptstringmanager/DecryptString.smali"]);
    assert!(run.read(&helpers[0]).contains(crate::fixture::SECRET));
    assert!(!run.read("smali/com/example/app/Counter.smali").contains("\"bumped\""));
}

const R_STRING: &str = "\
.class public final Lcom/example/app/R$string;
.super Ljava/lang/Object;


# static fields
.field public static final title:I = 0x7f0b0010
";

const STRINGS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <string name="app_name">Example</string>
    <string name="title">Welcome</string>
</resources>
"#;

const GREETER: &str = "\
.class public Lcom/example/app/Greeter;
.super Ljava/lang/Object;


# virtual methods
.method public title(Landroid/content/Context;)Ljava/lang/String;
    .locals 1

    const v0, 0x7f0b0010

    invoke-virtual {p1, v0}, Landroid/content/Context;->getString(I)Ljava/lang/String;

    move-result-object v0

    return-object v0
.end method
";
