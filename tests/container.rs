use kdbx_codec::format::{Header, HeaderFieldId, header::encode_field};
use kdbx_codec::{
    CompositeKey, CompressionAlgorithm, Database, Error, Group, InnerStreamId, tree,
};
use proptest::prelude::*;

const ROUNDS: u64 = 50;

fn key() -> CompositeKey {
    CompositeKey::from_password("pw")
}

fn sample() -> Database {
    let mut db = Database::new(key());
    db.transform_rounds = ROUNDS;
    db.set_name("Personal");
    db.set_description("things & stuff");
    db.meta.default_user = "alice".into();

    let mut group = Group::new("Email");
    let entry = db
        .new_entry(&[
            (tree::TITLE, "mail"),
            (tree::USER_NAME, "alice@example.com"),
            (tree::PASSWORD, "correct-horse"),
            (tree::URL, "https://mail.example.com"),
            (tree::NOTES, "line one\nline two"),
        ])
        .unwrap();
    group.add_entry(entry);
    db.root.add_group(group);
    db
}

fn save(db: &Database) -> Vec<u8> {
    let mut out = Vec::new();
    let written = db.save(&mut out).unwrap();
    assert_eq!(written as usize, out.len());
    out
}

fn header_len(bytes: &[u8]) -> usize {
    Header::read_from(&mut &bytes[..])
        .unwrap()
        .to_bytes()
        .unwrap()
        .len()
}

#[test]
fn protected_password_survives_roundtrip() {
    let db = sample();
    let bytes = save(&db);
    let loaded = Database::open(&bytes[..], key()).unwrap();

    let entry = &loaded.root.groups[0].entries[0];
    assert_eq!(entry.password().unwrap().as_deref(), Some("correct-horse"));
    assert!(entry.field(tree::PASSWORD).unwrap().is_protected());
    assert_eq!(loaded.cipher_id, db.cipher_id);
}

#[test]
fn all_modelled_fields_roundtrip() {
    let db = sample();
    let loaded = Database::open(&save(&db)[..], key()).unwrap();

    assert_eq!(loaded.meta, db.meta);
    assert_eq!(loaded.root, db.root);
    assert_eq!(loaded.compression, db.compression);
    assert_eq!(loaded.transform_rounds, ROUNDS);
    assert_eq!(loaded.inner_stream, InnerStreamId::Salsa20);
}

#[test]
fn uncompressed_roundtrip() {
    let mut db = sample();
    db.compression = CompressionAlgorithm::None;
    let loaded = Database::open(&save(&db)[..], key()).unwrap();

    assert_eq!(loaded.compression, CompressionAlgorithm::None);
    assert_eq!(loaded.root, db.root);
}

#[test]
fn loaded_database_can_be_saved_again() {
    let db = sample();
    let first = Database::open(&save(&db)[..], key()).unwrap();
    let second = Database::open(&save(&first)[..], key()).unwrap();
    assert_eq!(second.root, db.root);
}

#[test]
fn wrong_password_is_detected() {
    let bytes = save(&sample());
    let err = Database::open(&bytes[..], CompositeKey::from_password("wrong")).unwrap_err();
    assert!(matches!(err, Error::WrongKeyOrCorrupt));
}

#[test]
fn key_file_is_part_of_the_key() {
    let mut db = sample();
    db.set_master_key(key().with_key_file(b"key file"));
    let bytes = save(&db);

    assert!(matches!(
        Database::open(&bytes[..], key()),
        Err(Error::WrongKeyOrCorrupt)
    ));
    assert!(Database::open(&bytes[..], key().with_key_file(b"key file")).is_ok());
}

#[test]
fn truncated_header_is_a_format_error() {
    let bytes = save(&sample());
    for len in [0, 4, 11, 12, 40, header_len(&bytes) - 1] {
        let err = Database::open(&bytes[..len], key()).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "len {len}: {err:?}");
    }
}

#[test]
fn truncated_ciphertext_is_wrong_key_or_corrupt() {
    let bytes = save(&sample());
    let cut = bytes.len() - 16;
    let err = Database::open(&bytes[..cut], key()).unwrap_err();
    assert!(matches!(err, Error::WrongKeyOrCorrupt), "{err:?}");

    let err = Database::open(&bytes[..bytes.len() - 5], key()).unwrap_err();
    assert!(matches!(err, Error::WrongKeyOrCorrupt), "{err:?}");
}

#[test]
fn flipping_a_ciphertext_byte_is_detected() {
    let bytes = save(&sample());
    let start = header_len(&bytes);

    // the first two blocks carry the verification bytes; the last byte of the
    // second-to-last block flips the pad length
    for pos in [start, start + 17, bytes.len() - 17] {
        let mut tampered = bytes.clone();
        tampered[pos] ^= 0x01;
        let err = Database::open(&tampered[..], key()).unwrap_err();
        assert!(matches!(err, Error::WrongKeyOrCorrupt), "pos {pos}: {err:?}");
    }
}

#[test]
fn flipping_a_mid_stream_byte_is_detected() {
    for mode in [CompressionAlgorithm::Gzip, CompressionAlgorithm::None] {
        let mut db = sample();
        db.compression = mode;
        for i in 0..20 {
            let title = format!("site-{i}");
            let entry = db
                .new_entry(&[(tree::TITLE, title.as_str()), (tree::PASSWORD, "hunter2")])
                .unwrap();
            db.root.add_entry(entry);
        }
        let bytes = save(&db);
        let start = header_len(&bytes);
        let pos = start + (bytes.len() - start) / 2;

        let mut tampered = bytes.clone();
        tampered[pos] ^= 0x01;
        let err = Database::open(&tampered[..], key()).unwrap_err();
        assert!(matches!(err, Error::WrongKeyOrCorrupt), "{mode:?}: {err:?}");
    }
}

#[test]
fn comment_field_in_header_breaks_header_hash() {
    let bytes = save(&sample());
    let len = header_len(&bytes);
    let end_field = len - 7;

    let mut tampered = bytes[..end_field].to_vec();
    tampered.extend(encode_field(HeaderFieldId::Comment, b"hello").unwrap());
    tampered.extend_from_slice(&bytes[end_field..]);

    let err = Database::open(&tampered[..], key()).unwrap_err();
    assert!(matches!(err, Error::HeaderHashMismatch), "{err:?}");
}

#[test]
fn unsupported_cipher_is_rejected_before_writing() {
    let mut db = sample();
    db.cipher_id = uuid::Uuid::nil();
    let mut out = Vec::new();
    assert!(matches!(db.save(&mut out), Err(Error::UnsupportedCipher(_))));
    assert!(out.is_empty());
}

#[test]
fn every_save_regenerates_seeds() {
    let db = sample();
    let a = Header::read_from(&mut &save(&db)[..]).unwrap();
    let b = Header::read_from(&mut &save(&db)[..]).unwrap();

    assert_ne!(a.master_seed, b.master_seed);
    assert_ne!(a.transform_seed, b.transform_seed);
    assert_ne!(a.encryption_iv, b.encryption_iv);
    assert_ne!(a.protected_stream_key, b.protected_stream_key);
    assert_ne!(a.stream_start_bytes, b.stream_start_bytes);
    assert_eq!(a.transform_rounds, ROUNDS);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn arbitrary_entries_roundtrip(
        entries in prop::collection::vec(("[a-zA-Z0-9 ]{1,12}", ".{0,40}"), 0..6),
    ) {
        let mut db = Database::new(key());
        db.transform_rounds = 1;
        for (title, password) in &entries {
            let entry = db
                .new_entry(&[(tree::TITLE, title.as_str()), (tree::PASSWORD, password.as_str())])
                .unwrap();
            db.root.add_entry(entry);
        }

        let loaded = Database::open(&save(&db)[..], key()).unwrap();
        prop_assert_eq!(loaded.root.entries.len(), entries.len());
        for (entry, (title, password)) in loaded.root.entries.iter().zip(&entries) {
            prop_assert_eq!(entry.title().unwrap(), Some(title.clone()));
            prop_assert_eq!(entry.password().unwrap(), Some(password.clone()));
        }
    }
}
