//! Content service over packages written to a directory.

use std::sync::Arc;

use fidd_content::{
    ContentServiceRegistry, DirectorySource, FiddContentService, MemorySource, Package,
    PackageBuilder, PackageContentService, SignatureStatus,
};
use fidd_core::config::ContentConfig;
use fidd_core::{
    FiddError, FiddResult, JsonSerializer, LogicalFileMetadata, MessageMetadata,
    RecordSerializer, Serializers, UpdateType,
};
use fidd_crypto::{Ed25519Ph, Engines, Named, PublicKeyFormat, SignatureScheme, SigningIdentity};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn engines() -> Arc<Engines> {
    Arc::new(Engines::standard())
}

fn text_file() -> LogicalFileMetadata {
    LogicalFileMetadata::builder(UpdateType::CreateOrOverride)
        .mime_type("text/plain")
        .build()
        .unwrap()
}

fn article(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'a' + (i % 26) as u8).collect()
}

fn package(message_number: u64, cipher: &str) -> Package {
    let meta = MessageMetadata::builder(message_number, "post").build().unwrap();
    PackageBuilder::new(engines(), meta)
        .cipher(cipher)
        .add_file("index.md", text_file(), article(300))
        .add_file("img/logo.txt", text_file(), b"logo".to_vec())
        .build()
        .unwrap()
}

fn identity() -> SigningIdentity {
    Ed25519Ph.generate_identity(&mut StdRng::seed_from_u64(11))
}

fn signed_package(message_number: u64) -> Package {
    let meta = MessageMetadata::builder(message_number, "post").build().unwrap();
    PackageBuilder::new(engines(), meta)
        .sign_with(identity())
        .add_file("index.md", text_file(), article(300))
        .build()
        .unwrap()
}

fn store(dir: &tempfile::TempDir, packages: &[Package]) -> DirectorySource {
    let source = DirectorySource::open(dir.path()).unwrap();
    for p in packages {
        source.write_package(p, &JsonSerializer).unwrap();
    }
    source
}

fn tamper(source: &DirectorySource, message_number: u64, at: u64) {
    let path = source.body_path(message_number);
    let mut body = std::fs::read(&path).unwrap();
    body[at as usize] ^= 0x01;
    std::fs::write(&path, body).unwrap();
}

#[test]
fn test_message_enumeration() {
    let dir = tempfile::tempdir().unwrap();
    let packages: Vec<Package> = [1, 3, 5, 7, 9].iter().map(|&n| package(n, "none")).collect();
    let service = PackageContentService::with_defaults(store(&dir, &packages)).unwrap();

    assert_eq!(service.message_numbers_tail(3).unwrap(), vec![9, 7, 5]);
    assert_eq!(service.message_numbers_before(7, 2, true).unwrap(), vec![7, 5]);
    assert_eq!(service.message_numbers_before(7, 2, false).unwrap(), vec![5, 3]);
    assert_eq!(
        service.message_numbers_between(9, false, 1, false, 10, true).unwrap(),
        vec![7, 5, 3]
    );
    assert_eq!(
        service.message_numbers_between(9, true, 1, true, 2, false).unwrap(),
        vec![3, 1]
    );
}

#[test]
fn test_enumeration_is_not_truncated() {
    let mut source = MemorySource::new();
    for n in 1..=1005 {
        source.insert(n, Vec::new(), Vec::new());
    }
    let service = PackageContentService::with_defaults(source).unwrap();

    let tail = service.message_numbers_tail(1005).unwrap();
    assert_eq!(tail.len(), 1005);
    assert_eq!((tail[0], tail[1004]), (1005, 1));
    assert_eq!(service.message_numbers_before(1005, 1005, true).unwrap().len(), 1005);
    assert_eq!(
        service
            .message_numbers_between(1005, true, 1, true, 2000, false)
            .unwrap()
            .len(),
        1005
    );
}

#[test]
fn test_page_limit_rejects_large_counts() {
    let mut source = MemorySource::new();
    for n in 1..=5 {
        source.insert_package(&package(n, "none"), &JsonSerializer).unwrap();
    }
    let config = ContentConfig {
        max_page_size: Some(2),
        ..ContentConfig::default()
    };
    let service =
        PackageContentService::open(source, engines(), Serializers::default(), config).unwrap();
    assert_eq!(service.message_numbers_tail(2).unwrap(), vec![5, 4]);
    assert!(matches!(
        service.message_numbers_tail(3),
        Err(FiddError::PageSize { requested: 3, limit: 2 })
    ));
    assert!(matches!(
        service.message_numbers_before(5, 100, false),
        Err(FiddError::PageSize { .. })
    ));
    assert!(matches!(
        service.message_numbers_between(5, true, 1, true, 4, true),
        Err(FiddError::PageSize { .. })
    ));
}

#[test]
fn test_metadata_and_file_listing() {
    let dir = tempfile::tempdir().unwrap();
    let service = PackageContentService::with_defaults(store(&dir, &[package(4, "AES-256-CBC")]))
        .unwrap();

    let meta = service.get_fidd_file_metadata(4).unwrap().unwrap();
    assert_eq!(meta.message_number(), 4);
    assert_eq!(meta.post_id(), "post");

    let files = service.get_logical_files(4).unwrap().unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["index.md", "img/logo.txt"]);
    // CBC pads 300 bytes to 304
    assert_eq!(files[0].size, 304);
    assert_eq!(files[0].metadata.mime_type(), Some("text/plain"));

    let info = service.get_logical_file_info(4, "img/logo.txt").unwrap().unwrap();
    assert_eq!(info, files[1]);

    let key = service.get_fidd_key(4).unwrap().unwrap();
    assert_eq!(key.logical_files().len(), 2);
}

#[test]
fn test_unknown_message_or_path_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        PackageContentService::with_defaults(store(&dir, &[package(1, "AES-256-CTR")])).unwrap();

    assert!(service.get_fidd_key(2).unwrap().is_none());
    assert!(service.get_logical_files(2).unwrap().is_none());
    assert!(service.read_logical_file(2, "index.md").unwrap().is_none());
    assert!(service.read_logical_file(1, "missing.md").unwrap().is_none());
    assert!(service.get_logical_file_info(1, "missing.md").unwrap().is_none());
    assert!(service
        .read_logical_file_chunk(1, "missing.md", 0, 1)
        .unwrap()
        .is_none());
    assert!(service.verify_message(2).unwrap().is_none());
}

#[test]
fn test_full_and_chunked_reads() {
    let dir = tempfile::tempdir().unwrap();
    let packages = [package(1, "AES-256-CTR"), package(2, "AES-256-CBC"), package(3, "none")];
    let service = PackageContentService::with_defaults(store(&dir, &packages)).unwrap();
    let expected = article(300);

    for n in 1..=3 {
        assert_eq!(service.read_logical_file(n, "index.md").unwrap().unwrap(), expected);
        assert_eq!(
            service.read_logical_file(n, "img/logo.txt").unwrap().unwrap(),
            b"logo"
        );
        assert_eq!(
            service
                .read_logical_file_chunk(n, "index.md", 100, 50)
                .unwrap()
                .unwrap(),
            &expected[100..150]
        );
        assert_eq!(
            service
                .read_logical_file_chunk(n, "index.md", 290, 10)
                .unwrap()
                .unwrap(),
            &expected[290..]
        );
    }
}

#[test]
fn test_chunk_past_end_is_range_error() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        PackageContentService::with_defaults(store(&dir, &[package(1, "AES-256-CTR")])).unwrap();
    let err = service
        .read_logical_file_chunk(1, "index.md", 290, 11)
        .unwrap_err();
    assert!(matches!(err, FiddError::Range { limit: 300, .. }));
}

#[test]
fn test_falls_back_to_next_key_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let good = package(6, "AES-256-CTR");
    let source = DirectorySource::open(dir.path()).unwrap();
    source.write_package(&good, &JsonSerializer).unwrap();

    // default key slot holds another message's key; the labelled one is right
    let other = package(6, "AES-256-CTR");
    let wrong = RecordSerializer::serialize(&JsonSerializer, other.key()).unwrap();
    let right = RecordSerializer::serialize(&JsonSerializer, good.key()).unwrap();
    source.write_key(6, None, &wrong).unwrap();
    source.write_key(6, Some("reader"), &right).unwrap();
    source.write_key(6, Some("broken"), b"not a key").unwrap();

    let service = PackageContentService::with_defaults(source).unwrap();
    assert_eq!(service.get_fidd_key(6).unwrap().unwrap(), *good.key());
    assert_eq!(
        service.read_logical_file(6, "index.md").unwrap().unwrap(),
        article(300)
    );
}

#[test]
fn test_no_usable_key_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirectorySource::open(dir.path()).unwrap();
    source.write_package(&package(2, "AES-256-CTR"), &JsonSerializer).unwrap();
    source.write_key(2, None, b"{}").unwrap();

    let service = PackageContentService::with_defaults(source).unwrap();
    assert!(service.get_fidd_key(2).is_err());
    assert!(service.read_logical_file(2, "index.md").is_err());
}

#[test]
fn test_checksum_mismatch_on_full_read() {
    let dir = tempfile::tempdir().unwrap();
    let p = package(1, "AES-256-CTR");
    let offset = p.key().logical_files()[0].section().offset();
    let source = store(&dir, &[p]);
    tamper(&source, 1, offset + 10);

    let service = PackageContentService::with_defaults(source).unwrap();
    assert!(matches!(
        service.read_logical_file(1, "index.md"),
        Err(FiddError::ChecksumMismatch { ref section, .. }) if section == "index.md"
    ));
    // ranged reads do not cover the whole section and skip the checksum
    let chunk = service
        .read_logical_file_chunk(1, "index.md", 0, 20)
        .unwrap()
        .unwrap();
    assert_ne!(chunk, &article(300)[..20]);
    // the other file is untouched
    assert!(service.read_logical_file(1, "img/logo.txt").is_ok());
}

#[test]
fn test_signed_message_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        PackageContentService::with_defaults(store(&dir, &[signed_package(1), package(2, "none")]))
            .unwrap();

    let report = service.verify_message(1).unwrap().unwrap();
    assert!(report.is_valid());
    assert_eq!(report.files, vec![("index.md".to_string(), SignatureStatus::Valid)]);

    let meta = service.get_fidd_file_metadata(1).unwrap().unwrap();
    assert_eq!(meta.author_public_key(), Some(identity().public_key()));

    let unsigned = service.verify_message(2).unwrap().unwrap();
    assert_eq!(unsigned.key, SignatureStatus::Unsigned);
    assert_eq!(unsigned.metadata, SignatureStatus::Unsigned);
    assert!(!unsigned.has_invalid());
}

#[test]
fn test_tampered_file_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let p = signed_package(1);
    let offset = p.key().logical_files()[0].section().offset();
    let source = store(&dir, &[p]);
    tamper(&source, 1, offset);

    let service = PackageContentService::with_defaults(source).unwrap();
    let report = service.verify_message(1).unwrap().unwrap();
    assert_eq!(report.key, SignatureStatus::Valid);
    assert_eq!(report.metadata, SignatureStatus::Valid);
    assert_eq!(report.files[0].1, SignatureStatus::Invalid);
    assert!(report.has_invalid());
}

#[test]
fn test_forged_key_signature() {
    let dir = tempfile::tempdir().unwrap();
    let p = signed_package(3);
    let source = store(&dir, &[]);
    source.write_package(&p, &JsonSerializer).unwrap();
    let forged = p.key().signed("ED25519PH", vec![0u8; 64]);
    let forged = RecordSerializer::serialize(&JsonSerializer, &forged).unwrap();
    source.write_key(3, None, &forged).unwrap();

    let lenient = PackageContentService::with_defaults(
        DirectorySource::open(dir.path()).unwrap(),
    )
    .unwrap();
    let report = lenient.verify_message(3).unwrap().unwrap();
    assert_eq!(report.key, SignatureStatus::Invalid);
    assert_eq!(report.metadata, SignatureStatus::Valid);

    let strict = PackageContentService::open(
        source,
        engines(),
        Serializers::default(),
        ContentConfig {
            verify_key_signature: true,
            ..ContentConfig::default()
        },
    )
    .unwrap();
    assert!(matches!(strict.get_fidd_key(3), Err(FiddError::Signature(_))));
}

#[test]
fn test_delete_message_has_no_files() {
    let mut source = MemorySource::new();
    let meta = MessageMetadata::builder(8, "post")
        .revision_of(5)
        .version_number(2)
        .delete(true)
        .build()
        .unwrap();
    let p = PackageBuilder::new(engines(), meta).build().unwrap();
    source.insert_package(&p, &JsonSerializer).unwrap();

    let service = PackageContentService::with_defaults(source).unwrap();
    assert!(service.get_fidd_file_metadata(8).unwrap().unwrap().is_delete());
    assert!(service.get_logical_files(8).unwrap().unwrap().is_empty());
}

#[test]
fn test_registry_serves_directory_service() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ContentServiceRegistry::new();
    let service =
        PackageContentService::with_defaults(store(&dir, &[package(1, "AES-256-CTR")])).unwrap();
    assert!(registry.add_if_absent("blog", Arc::new(service)));

    let found = registry.get("blog").unwrap();
    assert_eq!(found.message_numbers_tail(10).unwrap(), vec![1]);
    assert_eq!(
        found.read_logical_file(1, "img/logo.txt").unwrap().unwrap(),
        b"logo"
    );
}

/// Stores the raw Ed25519 key bytes in reverse order.
struct ReversedKey;

impl Named for ReversedKey {
    fn name(&self) -> &str {
        "ed25519-reversed"
    }
}

impl PublicKeyFormat for ReversedKey {
    fn scheme(&self) -> &str {
        "ED25519PH"
    }

    fn encode(&self, raw: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(raw.iter().rev().copied().collect())
    }

    fn decode(&self, encoded: &[u8]) -> FiddResult<Vec<u8>> {
        Ok(encoded.iter().rev().copied().collect())
    }
}

fn signed_with_key_format(engines: Arc<Engines>, format: &str) -> Package {
    let meta = MessageMetadata::builder(1, "post").build().unwrap();
    PackageBuilder::new(engines, meta)
        .sign_with(identity())
        .public_key_format(format)
        .add_file("index.md", text_file(), article(300))
        .build()
        .unwrap()
}

#[test]
fn test_registered_public_key_format() {
    let mut custom = Engines::standard();
    custom.public_key_formats.register(Arc::new(ReversedKey)).unwrap();
    let custom = Arc::new(custom);

    let p = signed_with_key_format(custom.clone(), "ed25519-reversed");
    let stored: Vec<u8> = identity().public_key().iter().rev().copied().collect();
    assert_eq!(p.metadata().author_public_key_format(), Some("ed25519-reversed"));
    assert_eq!(p.metadata().author_public_key(), Some(stored.as_slice()));

    let mut source = MemorySource::new();
    source.insert_package(&p, &JsonSerializer).unwrap();
    let service =
        PackageContentService::open(source, custom, Serializers::default(), ContentConfig::default())
            .unwrap();
    assert!(service.verify_message(1).unwrap().unwrap().is_valid());

    // a reader without the format cannot decode the author key
    let mut source = MemorySource::new();
    source.insert_package(&p, &JsonSerializer).unwrap();
    let service = PackageContentService::with_defaults(source).unwrap();
    let report = service.verify_message(1).unwrap().unwrap();
    assert_eq!(report.key, SignatureStatus::Invalid);
    assert_eq!(report.metadata, SignatureStatus::Invalid);
    assert_eq!(report.files[0].1, SignatureStatus::Invalid);
}

#[test]
fn test_hex_public_key_format() {
    let p = signed_with_key_format(engines(), "ed25519-hex");
    assert_eq!(p.metadata().author_public_key().map(<[u8]>::len), Some(64));

    let mut source = MemorySource::new();
    source.insert_package(&p, &JsonSerializer).unwrap();
    let service = PackageContentService::with_defaults(source).unwrap();
    assert!(service.verify_message(1).unwrap().unwrap().is_valid());
}

#[test]
fn test_unknown_public_key_format_rejected_by_builder() {
    let meta = MessageMetadata::builder(1, "post").build().unwrap();
    let result = PackageBuilder::new(engines(), meta)
        .sign_with(identity())
        .public_key_format("x509-pem")
        .build();
    assert!(matches!(result, Err(FiddError::UnknownAlgorithm { .. })));
}

fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|j| (j as u8).wrapping_mul(seed.wrapping_add(3)) ^ seed)
        .collect()
}

#[test]
fn test_concurrent_readers_share_one_service() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirectorySource::open(dir.path()).unwrap();
    let contents: Vec<Vec<u8>> = (0..8u8).map(|i| pattern(i, 1000 + i as usize * 37)).collect();
    for (i, data) in contents.iter().enumerate() {
        let cipher = if i % 2 == 0 { "AES-256-CTR" } else { "AES-256-CBC" };
        let meta = MessageMetadata::builder(i as u64 + 1, "post").build().unwrap();
        let p = PackageBuilder::new(engines(), meta)
            .cipher(cipher)
            .add_file("data.bin", text_file(), data.clone())
            .build()
            .unwrap();
        source.write_package(&p, &JsonSerializer).unwrap();
    }

    let service = Arc::new(PackageContentService::with_defaults(source).unwrap());
    let contents = Arc::new(contents);
    let handles: Vec<_> = (0..8usize)
        .map(|t| {
            let service = Arc::clone(&service);
            let contents = Arc::clone(&contents);
            std::thread::spawn(move || {
                for round in 0..4 {
                    let i = (t + round) % contents.len();
                    let n = i as u64 + 1;
                    let expected = &contents[i];
                    let full = service.read_logical_file(n, "data.bin").unwrap().unwrap();
                    assert_eq!(&full, expected, "message {n}");
                    let chunk = service
                        .read_logical_file_chunk(n, "data.bin", 123, 400)
                        .unwrap()
                        .unwrap();
                    assert_eq!(chunk, &expected[123..523], "message {n}");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_chunk_matches_full_read(
        cbc in any::<bool>(),
        offset in 0u64..300,
        length in 0u64..300,
    ) {
        let cipher = if cbc { "AES-256-CBC" } else { "AES-256-CTR" };
        let mut source = MemorySource::new();
        source.insert_package(&package(1, cipher), &JsonSerializer).unwrap();
        let service = PackageContentService::with_defaults(source).unwrap();

        let chunk = service.read_logical_file_chunk(1, "index.md", offset, length);
        if offset + length <= 300 {
            let full = article(300);
            prop_assert_eq!(
                chunk.unwrap().unwrap(),
                full[offset as usize..(offset + length) as usize].to_vec()
            );
        } else {
            prop_assert!(
                matches!(chunk, Err(FiddError::Range { .. })),
                "expected range error"
            );
        }
    }
}
