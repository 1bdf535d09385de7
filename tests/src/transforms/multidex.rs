use crate::fixture::{wide_class, App};
use dexcloak_transform::obfuscator::obfuscate_apk;

const LOADER: &str = "\
.class public Lcom/example/app/extra/Loader;
.super Ljava/lang/Object;


# virtual methods
.method public load(Landroid/content/res/AssetManager;)V
    .locals 1

    const-string v0, \"banner.txt\"

    invoke-virtual {p1, v0}, Landroid/content/res/AssetManager;->open(Ljava/lang/String;)Ljava/io/InputStream;

    return-void
.end method
";

fn two_dex() -> App {
    App::new()
        .file("smali/com/example/app/Wide.smali", &wide_class("Lcom/example/app/Wide;", 30, 0))
        .file(
            "smali_classes2/com/example/app/extra/Other.smali",
            &wide_class("Lcom/example/app/extra/Other;", 70, 0),
        )
}

#[test]
fn each_dex_gets_its_own_budget() {
    let run = two_dex().prepare(&["FieldRename", "FieldRename"]);
    let result = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();

    assert!(result.metadata.multidex);
    assert_eq!(result.metadata.smali_files, 2);
    assert_eq!(
        result.metadata.fields_per_pass,
        Some(vec![(64000 - 30) / 2, (64000 - 70) / 2])
    );
}

#[test]
fn helpers_land_in_the_primary_dex() {
    let run = two_dex()
        .file("smali_classes2/com/example/app/extra/Loader.smali", LOADER)
        .file("assets/banner.txt", "hello")
        .prepare(&["AssetEncryption"]);
    obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();

    let helpers: Vec<String> = run
        .snapshot()
        .into_keys()
        .filter(|k| k.ends_with("DecryptAsset.smali"))
        .collect();
    assert_eq!(helpers, vec!["smali/com/decryptassetmanager/DecryptAsset.smali"]);
    assert!(run
        .read("smali_classes2/com/example/app/extra/Loader.smali")
        .contains("Lcom/decryptassetmanager/DecryptAsset;->decryptAsset"));
}
