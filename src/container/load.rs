use std::io::{self, Read};

use flate2::read::GzDecoder;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{LoadStage, Stages};
use crate::crypto::{CbcReader, HashingReader, KEY_LEN, derive_final_key};
use crate::database::Database;
use crate::document::read_document;
use crate::format::{CompressionAlgorithm, Header};
use crate::keys::{CompositeKey, KeyTransform};
use crate::protected::ProtectedStream;
use crate::{Error, Result};

/// Decrypts and parses a database written by [`write_database`](super::write_database).
///
/// A wrong key is reported as [`Error::WrongKeyOrCorrupt`] before the document is
/// touched.
pub fn read_database<R: Read>(source: R, key: CompositeKey) -> Result<Database> {
    let mut stages = Stages::new("load", LoadStage::Init);
    let result = load(source, key, &mut stages);
    if let Err(err) = &result {
        debug!(stage = ?stages.current(), error = %err, "load aborted");
    }
    result
}

fn load<R: Read>(source: R, key: CompositeKey, stages: &mut Stages<LoadStage>) -> Result<Database> {
    let mut input = HashingReader::new(source);
    let header = Header::read_from(&mut input)?;
    let header_hash = input.digest();
    header.check_cipher()?;
    let mut stream = ProtectedStream::new(header.inner_stream, &header.protected_stream_key)?;
    stages.enter(LoadStage::HeaderParsed);

    let transformed = key.transform_key(&header.transform_seed, header.transform_rounds)?;
    let final_key = derive_final_key(&header.master_seed, &transformed);
    drop(transformed);
    stages.enter(LoadStage::KeyDerived);

    let mut envelope = CbcReader::new(input.into_inner(), &final_key, &header.encryption_iv);
    drop(final_key);
    stages.enter(LoadStage::EnvelopeOpen);

    let mut start_bytes = Zeroizing::new([0u8; KEY_LEN]);
    envelope.read_exact(&mut start_bytes[..]).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::WrongKeyOrCorrupt,
        _ => Error::from(e),
    })?;
    let diff = start_bytes
        .iter()
        .zip(&header.stream_start_bytes)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff != 0 {
        return Err(Error::WrongKeyOrCorrupt);
    }
    stages.enter(LoadStage::VerificationChecked);

    let mut payload = Zeroizing::new(Vec::new());
    envelope.read_to_end(&mut payload)?;
    let xml = match header.compression {
        CompressionAlgorithm::None => payload,
        CompressionAlgorithm::Gzip => {
            let mut out = Zeroizing::new(Vec::with_capacity(payload.len() * 4));
            GzDecoder::new(&payload[..])
                .read_to_end(&mut out)
                .map_err(|e| corrupt_payload(Error::document(format!("gzip: {e}"))))?;
            out
        }
    };

    let parsed = read_document(&xml, &mut stream).map_err(corrupt_payload)?;
    if let Some(stored) = &parsed.header_hash {
        if stored[..] != header_hash[..] {
            return Err(Error::HeaderHashMismatch);
        }
    }
    stages.enter(LoadStage::DocumentParsed);

    let mut db = Database::new(key);
    db.cipher_id = header.cipher_id;
    db.compression = header.compression;
    db.transform_rounds = header.transform_rounds;
    db.inner_stream = header.inner_stream;
    db.meta = parsed.meta;
    db.root = parsed.root;
    stages.enter(LoadStage::Finalized);

    let (groups, entries) = db.root.counts();
    info!(
        document_bytes = xml.len(),
        groups = groups + 1,
        entries,
        compression = ?db.compression,
        "database loaded"
    );
    Ok(db)
}

/// Decode failures after the verification bytes mean the ciphertext was altered.
fn corrupt_payload(err: Error) -> Error {
    match err {
        Error::Document(detail) => {
            debug!(%detail, "decrypted payload is malformed");
            Error::WrongKeyOrCorrupt
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree;

    fn saved(compression: CompressionAlgorithm) -> Vec<u8> {
        let mut db = Database::new(CompositeKey::from_password("pw"));
        db.transform_rounds = 10;
        db.compression = compression;
        let entry = db
            .new_entry(&[(tree::TITLE, "mail"), (tree::PASSWORD, "correct-horse")])
            .unwrap();
        db.root.add_entry(entry);

        let mut out = Vec::new();
        db.save(&mut out).unwrap();
        out
    }

    #[test]
    fn loads_both_compression_modes() {
        for mode in [CompressionAlgorithm::None, CompressionAlgorithm::Gzip] {
            let bytes = saved(mode);
            let db = read_database(&bytes[..], CompositeKey::from_password("pw")).unwrap();
            assert_eq!(db.compression, mode);
            assert_eq!(db.transform_rounds, 10);
            assert_eq!(
                db.root.find_entry("mail").unwrap().password().unwrap().as_deref(),
                Some("correct-horse")
            );
        }
    }

    #[test]
    fn wrong_password_is_wrong_key_or_corrupt() {
        let bytes = saved(CompressionAlgorithm::Gzip);
        let err = read_database(&bytes[..], CompositeKey::from_password("nope")).unwrap_err();
        assert!(matches!(err, Error::WrongKeyOrCorrupt));
        assert_eq!(err.to_string(), "Invalid password or corrupted data");
    }

    #[test]
    fn malformed_payload_is_wrong_key_or_corrupt() {
        assert!(matches!(
            corrupt_payload(Error::document("invalid utf-8")),
            Error::WrongKeyOrCorrupt
        ));
        assert!(matches!(
            corrupt_payload(Error::HeaderHashMismatch),
            Error::HeaderHashMismatch
        ));
    }

    #[test]
    fn missing_ciphertext_is_wrong_key_or_corrupt() {
        let bytes = saved(CompressionAlgorithm::Gzip);
        let header_len = Header::read_from(&mut &bytes[..]).unwrap().to_bytes().unwrap().len();

        let err = read_database(&bytes[..header_len], CompositeKey::from_password("pw")).unwrap_err();
        assert!(matches!(err, Error::WrongKeyOrCorrupt));
    }
}
