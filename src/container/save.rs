use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use super::{SaveStage, Stages};
use crate::crypto::{CbcWriter, HashingWriter, derive_final_key};
use crate::database::Database;
use crate::document::write_document;
use crate::format::{CompressionAlgorithm, Header};
use crate::keys::KeyTransform;
use crate::protected::ProtectedStream;
use crate::Result;

/// Encrypts `db` into `sink` and returns the number of bytes written.
///
/// Every seed is drawn fresh for this call. An unsupported cipher is rejected before
/// anything reaches `sink`.
pub fn write_database<W: Write>(db: &Database, sink: W) -> Result<u64> {
    let mut stages = Stages::new("save", SaveStage::Init);
    let result = save(db, sink, &mut stages);
    if let Err(err) = &result {
        debug!(stage = ?stages.current(), error = %err, "save aborted");
    }
    result
}

fn save<W: Write>(db: &Database, sink: W, stages: &mut Stages<SaveStage>) -> Result<u64> {
    let header = Header::generate(db.cipher_id, db.compression, db.transform_rounds)?;
    header.check_cipher()?;

    let mut out = HashingWriter::new(sink);
    header.write_to(&mut out)?;
    let header_hash = out.digest();
    stages.enter(SaveStage::HeaderWritten);

    let transformed = db
        .master_key()
        .transform_key(&header.transform_seed, header.transform_rounds)?;
    let key = derive_final_key(&header.master_seed, &transformed);
    drop(transformed);
    stages.enter(SaveStage::KeyDerived);

    let mut envelope = CbcWriter::new(out, &key, &header.encryption_iv);
    drop(key);
    stages.enter(SaveStage::EnvelopeOpen);

    envelope.write_all(&header.stream_start_bytes)?;

    let mut stream = ProtectedStream::new(header.inner_stream, &header.protected_stream_key)?;
    let xml = write_document(db, &header_hash, &mut stream)?;
    match header.compression {
        CompressionAlgorithm::None => envelope.write_all(&xml)?,
        CompressionAlgorithm::Gzip => {
            let mut gz = GzEncoder::new(&mut envelope, Compression::default());
            gz.write_all(&xml)?;
            gz.finish()?;
        }
    }
    stages.enter(SaveStage::DocumentWritten);

    let mut out = envelope.finish()?;
    out.flush()?;
    stages.enter(SaveStage::Finalized);

    let written = out.byte_count();
    let (groups, entries) = db.root.counts();
    info!(
        bytes = written,
        document_bytes = xml.len(),
        groups = groups + 1,
        entries,
        compression = ?header.compression,
        "database saved"
    );
    Ok(written)
}
