//! Clear header framing.
//!
//! ```text
//! SIG1 (4, LE) | SIG2 (4, LE) | VERSION (4, LE) | { ID (1) | LEN (2, LE) | PAYLOAD (LEN) }* | END-OF-HEADER field
//! ```

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use super::{
    CIPHER_AES256, CompressionAlgorithm, END_OF_HEADER_PAYLOAD, FILE_VERSION,
    FILE_VERSION_CRITICAL_MASK, HeaderFieldId, InnerStreamId, PREAMBLE_LEN, SIGNATURE_1,
    SIGNATURE_2, SIGNATURE_2_OLD, SIGNATURE_2_PRE_RELEASE,
};
use crate::crypto::{IV_LEN, KEY_LEN, secure_random};
use crate::{Error, Result};

/// One framed field as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// Frames one field: id byte, little-endian `u16` length, payload.
pub fn encode_field(id: HeaderFieldId, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::format(format!("header field too big: {} bytes", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(3 + payload.len());
    buf.push(id as u8);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reads the preamble and every field up to and including the end-of-header field.
///
/// Returns the fields in wire order (without the terminator) and the number of bytes read.
pub fn decode_fields<R: Read>(reader: &mut R) -> Result<(Vec<HeaderField>, usize)> {
    let mut preamble = [0u8; PREAMBLE_LEN];
    read_header_bytes(reader, &mut preamble)?;
    check_preamble(&preamble)?;

    let mut consumed = PREAMBLE_LEN;
    let mut fields = Vec::new();

    loop {
        let mut head = [0u8; 3];
        read_header_bytes(reader, &mut head)?;
        let len = u16::from_le_bytes([head[1], head[2]]) as usize;

        let mut payload = vec![0u8; len];
        read_header_bytes(reader, &mut payload)?;
        consumed += 3 + len;

        if head[0] == HeaderFieldId::EndOfHeader as u8 {
            return Ok((fields, consumed));
        }
        fields.push(HeaderField { id: head[0], payload });
    }
}

fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::format("truncated header"),
        _ => Error::from(e),
    })
}

fn check_preamble(preamble: &[u8; PREAMBLE_LEN]) -> Result<()> {
    let word = |i: usize| u32::from_le_bytes([preamble[i], preamble[i + 1], preamble[i + 2], preamble[i + 3]]);
    let (sig1, sig2, version) = (word(0), word(4), word(8));

    if sig1 != SIGNATURE_1 {
        return Err(Error::format("not a database file"));
    }
    match sig2 {
        SIGNATURE_2 => {}
        SIGNATURE_2_OLD => return Err(Error::format("first-generation databases are not supported")),
        SIGNATURE_2_PRE_RELEASE => return Err(Error::format("pre-release databases are not supported")),
        _ => return Err(Error::format("not a database file")),
    }

    if version & FILE_VERSION_CRITICAL_MASK != FILE_VERSION & FILE_VERSION_CRITICAL_MASK {
        return Err(Error::format(format!(
            "unsupported file version {}.{}",
            version >> 16,
            version & 0xFFFF
        )));
    }
    if version != FILE_VERSION {
        debug!(version = %format!("{version:#010x}"), "minor version differs, continuing");
    }
    Ok(())
}

/// Typed view of the clear header.
pub struct Header {
    pub cipher_id: Uuid,
    pub compression: CompressionAlgorithm,
    pub master_seed: [u8; KEY_LEN],
    pub transform_seed: [u8; KEY_LEN],
    pub transform_rounds: u64,
    pub encryption_iv: [u8; IV_LEN],
    pub protected_stream_key: [u8; KEY_LEN],
    pub stream_start_bytes: [u8; KEY_LEN],
    pub inner_stream: InnerStreamId,
}

impl Drop for Header {
    fn drop(&mut self) {
        self.master_seed.zeroize();
        self.transform_seed.zeroize();
        self.encryption_iv.zeroize();
        self.protected_stream_key.zeroize();
        self.stream_start_bytes.zeroize();
    }
}

impl Header {
    /// A header for one save, with every seed freshly drawn from the OS.
    pub fn generate(
        cipher_id: Uuid,
        compression: CompressionAlgorithm,
        transform_rounds: u64,
    ) -> Result<Self> {
        let mut header = Self {
            cipher_id,
            compression,
            master_seed: [0u8; KEY_LEN],
            transform_seed: [0u8; KEY_LEN],
            transform_rounds,
            encryption_iv: [0u8; IV_LEN],
            protected_stream_key: [0u8; KEY_LEN],
            stream_start_bytes: [0u8; KEY_LEN],
            inner_stream: InnerStreamId::Salsa20,
        };
        secure_random(&mut header.master_seed)?;
        secure_random(&mut header.transform_seed)?;
        secure_random(&mut header.encryption_iv)?;
        secure_random(&mut header.protected_stream_key)?;
        secure_random(&mut header.stream_start_bytes)?;
        Ok(header)
    }

    /// Serialises preamble, all fields and the terminator.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        buf.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        buf.extend_from_slice(&FILE_VERSION.to_le_bytes());

        let fields: [(HeaderFieldId, &[u8]); 10] = [
            (HeaderFieldId::CipherId, self.cipher_id.as_bytes()),
            (HeaderFieldId::CompressionFlags, &(self.compression as u32).to_le_bytes()),
            (HeaderFieldId::MasterSeed, &self.master_seed),
            (HeaderFieldId::TransformSeed, &self.transform_seed),
            (HeaderFieldId::TransformRounds, &self.transform_rounds.to_le_bytes()),
            (HeaderFieldId::EncryptionIv, &self.encryption_iv),
            (HeaderFieldId::ProtectedStreamKey, &self.protected_stream_key),
            (HeaderFieldId::StreamStartBytes, &self.stream_start_bytes),
            (HeaderFieldId::InnerRandomStreamId, &(self.inner_stream as u32).to_le_bytes()),
            (HeaderFieldId::EndOfHeader, END_OF_HEADER_PAYLOAD),
        ];
        for (id, payload) in fields {
            buf.extend_from_slice(&encode_field(id, payload)?);
        }
        Ok(buf)
    }

    /// Writes the header and returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        let len = bytes.len();
        bytes.zeroize();
        Ok(len)
    }

    /// Parses a header, leaving `reader` positioned at the first ciphertext byte.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let (fields, consumed) = decode_fields(reader)?;
        debug!(fields = fields.len(), bytes = consumed, "header decoded");

        let mut known: BTreeMap<HeaderFieldId, Vec<u8>> = BTreeMap::new();
        for field in fields {
            let Some(id) = HeaderFieldId::from_byte(field.id) else {
                warn!(id = field.id, len = field.payload.len(), "skipping unknown header field");
                continue;
            };
            if !id.is_critical() {
                warn!(?id, len = field.payload.len(), "ignoring non-critical header field");
                continue;
            }
            if let Some(expected) = id.payload_len() {
                if field.payload.len() != expected {
                    return Err(Error::format(format!(
                        "header field {id:?} has {} bytes, expected {expected}",
                        field.payload.len()
                    )));
                }
            }
            if known.insert(id, field.payload).is_some() {
                return Err(Error::format(format!("duplicate header field {id:?}")));
            }
        }

        let mut take = |id: HeaderFieldId| {
            known
                .remove(&id)
                .ok_or_else(|| Error::format(format!("missing header field {id:?}")))
        };

        let cipher_id = Uuid::from_slice(&take(HeaderFieldId::CipherId)?)
            .map_err(|e| Error::format(format!("cipher id: {e}")))?;
        let compression = CompressionAlgorithm::try_from(le_u32(&take(HeaderFieldId::CompressionFlags)?))?;
        let master_seed = fixed(&take(HeaderFieldId::MasterSeed)?);
        let transform_seed = fixed(&take(HeaderFieldId::TransformSeed)?);
        let transform_rounds = u64::from_le_bytes(fixed(&take(HeaderFieldId::TransformRounds)?));
        let encryption_iv = fixed(&take(HeaderFieldId::EncryptionIv)?);
        let protected_stream_key = fixed(&take(HeaderFieldId::ProtectedStreamKey)?);
        let stream_start_bytes = fixed(&take(HeaderFieldId::StreamStartBytes)?);
        let inner_stream = InnerStreamId::try_from(le_u32(&take(HeaderFieldId::InnerRandomStreamId)?))?;

        Ok(Self {
            cipher_id,
            compression,
            master_seed,
            transform_seed,
            transform_rounds,
            encryption_iv,
            protected_stream_key,
            stream_start_bytes,
            inner_stream,
        })
    }

    /// Fails unless the cipher is the supported block cipher.
    pub fn check_cipher(&self) -> Result<()> {
        if self.cipher_id != CIPHER_AES256 {
            return Err(Error::UnsupportedCipher(self.cipher_id));
        }
        Ok(())
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(fixed(bytes))
}

/// Lengths were validated against `HeaderFieldId::payload_len` before this is called.
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
