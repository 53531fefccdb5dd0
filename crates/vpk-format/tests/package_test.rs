use rand::RngCore;
use std::collections::BTreeSet;
use std::fs;
use tempfile::TempDir;
use vpk_format::{
    create, derive_key, payload, read, read_header, unpack, update, CompressionMode,
    EncryptionMode, Error, KdfParams, PackageArchive, PackageBuilder, PackagePayload,
};

fn test_key() -> Vec<u8> {
    let params = KdfParams {
        key_length: 32,
        time_cost: 1,
        memory_cost: 64,
        parallelism: 1,
    };
    derive_key(b"correct horse", b"battery staple", &params).unwrap()
}

#[test]
fn package_roundtrip_reproduces_files() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("bundle");
    fs::create_dir_all(src.join("y")).unwrap();
    let mut random = [0u8; 17];
    rand::thread_rng().fill_bytes(&mut random);
    fs::write(src.join("x.txt"), b"hello").unwrap();
    fs::write(src.join("y/z.bin"), random).unwrap();

    let key = test_key();
    let container = create(&src, &key, CompressionMode::Zstd, EncryptionMode::AesGcm).unwrap();
    let (header, payload) = read(&container, &key).unwrap();

    assert_eq!(payload.len(), 2);
    assert_eq!(payload["x.txt"], b"hello");
    assert_eq!(payload["y/z.bin"], random);
    assert_eq!(header.name, "bundle");
    assert_eq!(header.data_size, payload::serialize(&payload).len() as u64);

    let dest = temp.path().join("restored");
    unpack(&payload, &dest).unwrap();
    assert_eq!(fs::read(dest.join("x.txt")).unwrap(), b"hello");
    assert_eq!(fs::read(dest.join("y/z.bin")).unwrap(), random);
}

#[test]
fn package_rejects_wrong_key() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("secret.vpk");
    PackageBuilder::new()
        .with_entry("a", b"payload".to_vec())
        .write_to(&path, &test_key())
        .unwrap();

    let container = fs::read(&path).unwrap();
    let mut wrong = test_key();
    wrong[0] ^= 0xff;
    assert!(matches!(read(&container, &wrong), Err(Error::Integrity(_))));

    // The header stays readable without any key.
    assert_eq!(read_header(&container).unwrap().key_size, 32);
}

#[test]
fn package_unauthenticated_modes_roundtrip() {
    let key = test_key();
    for encryption in [EncryptionMode::AesCtr, EncryptionMode::AesCbc] {
        let container = PackageBuilder::new()
            .with_encryption(encryption)
            .with_compression(CompressionMode::Bzip2)
            .with_entry("doc.txt", b"plain words".repeat(50))
            .encode(&key)
            .unwrap();
        let (header, payload) = read(&container, &key).unwrap();
        assert_eq!(header.encryption, encryption);
        assert_eq!(payload["doc.txt"], b"plain words".repeat(50));
    }
}

#[test]
fn package_update_applies_removals_then_entries() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("game.vpk");
    let key = test_key();
    PackageBuilder::new()
        .with_name("game")
        .with_author("studio")
        .with_info("level data")
        .with_entry("levels/1.dat", b"one".to_vec())
        .with_entry("levels/2.dat", b"two".to_vec())
        .with_entry("obsolete.dat", b"old".to_vec())
        .write_to(&path, &key)
        .unwrap();
    let before = PackageArchive::open(&path).unwrap();

    let existing = before.payload(&key).unwrap();
    let mut changes = PackagePayload::new();
    changes.insert("levels/2.dat".to_string(), b"TWO".to_vec());
    changes.insert("levels/3.dat".to_string(), b"three".to_vec());
    let removals: BTreeSet<String> = ["obsolete.dat".to_string()].into();

    update(&existing, &changes, &removals, &key, &path).unwrap();

    let after = PackageArchive::open(&path).unwrap();
    assert_eq!(after.header().name, "game");
    assert_eq!(after.header().author, "studio");
    assert_eq!(after.header().info, "level data");
    assert!(after.header().timestamp >= before.header().timestamp);

    let payload = after.payload(&key).unwrap();
    let paths: Vec<&String> = payload.keys().collect();
    assert_eq!(paths, vec!["levels/1.dat", "levels/2.dat", "levels/3.dat"]);
    assert_eq!(payload["levels/2.dat"], b"TWO");
}

#[test]
fn package_header_is_plain_json() {
    let container = PackageBuilder::new()
        .with_name("visible")
        .with_entry("f", b"x".to_vec())
        .encode(&test_key())
        .unwrap();
    let header_len = u32::from_le_bytes(container[4..8].try_into().unwrap()) as usize;
    let json: serde_json::Value = serde_json::from_slice(&container[8..8 + header_len]).unwrap();
    let keys: BTreeSet<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    let expected: BTreeSet<&str> = [
        "name",
        "info",
        "data_size",
        "author",
        "copyright",
        "timestamp",
        "encryption",
        "key_size",
        "version",
        "compression",
    ]
    .into();
    assert_eq!(keys, expected);
    assert_eq!(json["name"], "visible");
    assert_eq!(json["encryption"], "AES-GCM");
    assert_eq!(json["compression"], "zstd");
}
