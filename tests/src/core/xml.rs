use dexcloak_core::xml::XmlDocument;
use rand::rngs::StdRng;
use rand::SeedableRng;

const DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <uses-permission android:name="android.permission.INTERNET"/>
    <uses-permission android:name="android.permission.INTERNET" />
    <uses-feature android:name="android.hardware.camera" android:required="false"/>
    <application android:label="Example">
        <meta-data android:name="flavor" android:value="free"/>
        <meta-data android:name="flavor" android:value="free"/>
        <meta-data android:name="flavor" android:value="paid"/>
        <activity android:name=".A"/>
        <activity android:name=".B"/>
        <activity android:name=".C"/>
    </application>
</manifest>
"#;

#[test]
fn removing_duplicates_is_idempotent() {
    let mut once = XmlDocument::parse(DOC).unwrap();
    once.root.remove_duplicates();
    let mut twice = once.clone();
    twice.root.remove_duplicates();
    assert_eq!(once, twice);
    assert_eq!(once.root.element_count(), XmlDocument::parse(DOC).unwrap().root.element_count() - 2);
}

#[test]
fn scrambling_only_reorders() {
    let original = XmlDocument::parse(DOC).unwrap();
    let mut scrambled = original.clone();
    scrambled.root.scramble(&mut StdRng::seed_from_u64(11));

    assert_eq!(scrambled.root.element_count(), original.root.element_count());
    assert_eq!(scrambled.root.attributes, original.root.attributes);
    let names = |doc: &XmlDocument| {
        let app = doc.root.elements().find(|e| e.name == "application").unwrap();
        let mut names: Vec<String> = app
            .elements()
            .map(|e| format!("{:?}", e.attributes))
            .collect();
        names.sort();
        names
    };
    assert_eq!(names(&scrambled), names(&original));
}

#[test]
fn written_manifest_parses_back_to_the_same_tree() {
    let mut doc = XmlDocument::parse(DOC).unwrap();
    doc.root.remove_duplicates();
    doc.root.scramble(&mut StdRng::seed_from_u64(5));
    let written = doc.to_xml_string(4).unwrap();
    let reparsed = XmlDocument::parse(&written).unwrap();
    assert!(reparsed.root.structurally_equal(&doc.root));
    assert!(written.contains("xmlns:android=\"http://schemas.android.com/apk/res/android\""));
}
