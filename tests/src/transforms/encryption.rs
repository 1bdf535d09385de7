use crate::fixture::{App, SECRET};
use dexcloak_core::crypto::decrypt_ecb;
use dexcloak_transform::obfuscator::obfuscate_apk;
use std::fs;

const LOADER: &str = "\
.class public Lcom/example/app/Loader;
.super Ljava/lang/Object;


# direct methods
.method static constructor <clinit>()V
    .locals 1

    const-string v0, \"codec\"

    invoke-static {v0}, Ljava/lang/System;->loadLibrary(Ljava/lang/String;)V

    return-void
.end method


# virtual methods
.method public open(Landroid/content/res/AssetManager;)V
    .locals 1

    const-string v0, \"model.bin\"

    invoke-virtual {p1, v0}, Landroid/content/res/AssetManager;->open(Ljava/lang/String;)Ljava/io/InputStream;

    return-void
.end method
";

#[test]
fn assets_and_libraries_share_one_helper() {
    let run = App::new()
        .file("smali/com/example/app/Loader.smali", LOADER)
        .file("assets/model.bin", "weights")
        .file("lib/armeabi-v7a/libcodec.so", "ELF-arm")
        .prepare(&["AssetEncryption", "LibEncryption"]);
    let result = obfuscate_apk(run.config.clone(), Box::new(run.toolchain.clone())).unwrap();
    assert_eq!(result.metadata.passes_applied, vec!["AssetEncryption", "LibEncryption"]);

    let files = run.snapshot();
    let helpers = files.keys().filter(|k| k.ends_with("DecryptAsset.smali")).count();
    assert_eq!(helpers, 1);
    assert!(!files.contains_key("lib/armeabi-v7a/libcodec.so"));

    let root = run.decoded_root();
    let library = fs::read(root.join("assets/lib.armeabi-v7a.codec.so")).unwrap();
    assert_eq!(decrypt_ecb(SECRET.as_bytes(), &library).unwrap(), b"ELF-arm");
    let model = fs::read(root.join("assets/model.bin")).unwrap();
    assert_eq!(decrypt_ecb(SECRET.as_bytes(), &model).unwrap(), b"weights");

    let loader = run.read("smali/com/example/app/Loader.smali");
    assert!(loader.contains("const-class v1, Lcom/example/app/Loader;"));
    assert!(loader.contains("->loadEncryptedLibrary(Ljava/lang/Class;Ljava/lang/String;)V"));
    assert!(loader.contains("->decryptAsset(Landroid/content/res/AssetManager;Ljava/lang/String;)Ljava/io/InputStream;"));
    assert!(loader.contains("    .locals 2"));
}
