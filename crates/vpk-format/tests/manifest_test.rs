use std::fs;
use std::path::Path;
use tempfile::TempDir;
use vpk_format::{
    build, build_paths, diff, merge, verify_local, BuildOptions, Manifest, ManifestMode,
    UpdateSet,
};

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

#[test]
fn manifest_saved_and_reloaded_from_disk() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "bin/app", b"binary");
    write(temp.path(), "share/readme", b"docs");

    let options = BuildOptions::new(temp.path()).with_full(true);
    let manifest = build(&options).unwrap().manifest;
    let out = temp.path().join("out/manifest.json");
    manifest.save(&out).unwrap();

    let text = fs::read_to_string(&out).unwrap();
    assert!(text.contains("\t\"bin/app\""));
    assert_eq!(Manifest::load(&out).unwrap(), manifest);
}

#[test]
fn diff_then_merge_brings_local_in_line() {
    let local_dir = TempDir::new().unwrap();
    let remote_dir = TempDir::new().unwrap();
    write(local_dir.path(), "same.txt", b"same");
    write(local_dir.path(), "changed.txt", b"v1");
    write(local_dir.path(), "local_only.txt", b"mine");
    write(remote_dir.path(), "same.txt", b"same");
    write(remote_dir.path(), "changed.txt", b"v2");
    write(remote_dir.path(), "new/file.txt", b"new");

    let local_options = BuildOptions::new(local_dir.path());
    let local = build(&local_options).unwrap().manifest;
    let remote = build(&BuildOptions::new(remote_dir.path())).unwrap().manifest;

    let update_set = diff(&local, &remote);
    let expected: UpdateSet = ["changed.txt".to_string(), "new/file.txt".to_string()].into();
    assert_eq!(update_set, expected);

    // Simulate the fetch by copying the remote files over.
    for path in &update_set {
        write(
            local_dir.path(),
            path,
            &fs::read(remote_dir.path().join(path)).unwrap(),
        );
    }
    let fresh = build_paths(&local_options, &update_set).unwrap();
    let merged = merge(&local, &update_set, &fresh).unwrap();

    assert!(diff(&merged, &remote).is_empty());
    assert!(merged.contains("local_only.txt"));
    assert!(verify_local(&merged, &local_options).unwrap().is_empty());
}

#[test]
fn basic_manifest_json_shape() {
    let json = br#"{"a.txt": "00112233445566778899aabbccddeeff"}"#;
    let manifest = Manifest::from_json(json).unwrap();
    assert_eq!(manifest.mode(), ManifestMode::Basic);
    assert_eq!(
        manifest.get("a.txt").unwrap().content_hash,
        "00112233445566778899aabbccddeeff"
    );

    let full = br#"{"a.txt": ["00112233445566778899aabbccddeeff", 12, "2024-05-01 10:20:30"]}"#;
    let manifest = Manifest::from_json(full).unwrap();
    assert_eq!(manifest.mode(), ManifestMode::Full);
    assert_eq!(manifest.total_size(), Some(12));
}
