//! Constant tables of the container format.
//!
//! Signatures, the file version, header field identifiers and the algorithm
//! enumerations stored in the clear header.

use uuid::Uuid;

use crate::{Error, Result};

pub mod header;

pub use header::{Header, HeaderField};

/// First signature word, shared by every generation of the format.
pub const SIGNATURE_1: u32 = 0x9AA2_D903;
/// Second signature word of the current generation.
pub const SIGNATURE_2: u32 = 0xB54B_FB67;
/// Second signature word of first-generation files (not supported).
pub const SIGNATURE_2_OLD: u32 = 0xB54B_FB65;
/// Second signature word of pre-release files (not supported).
pub const SIGNATURE_2_PRE_RELEASE: u32 = 0xB54B_FB66;

/// Version written by this crate. High 16 bits are critical, low 16 informational.
pub const FILE_VERSION: u32 = 0x0003_0001;
pub const FILE_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

/// Length of the two signature words plus the version.
pub const PREAMBLE_LEN: usize = 12;

/// AES-256 in CBC mode, the only block cipher supported.
pub const CIPHER_AES256: Uuid = Uuid::from_bytes([
    0x31, 0xC1, 0xF2, 0xE6, 0xBF, 0x71, 0x43, 0x50, 0xBE, 0x58, 0x05, 0x21, 0x6A, 0xFC, 0x5A, 0xFF,
]);

/// Payload of the end-of-header field.
pub const END_OF_HEADER_PAYLOAD: &[u8; 4] = b"\r\n\r\n";

/// Identifier byte of a header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum HeaderFieldId {
    EndOfHeader = 0,
    Comment = 1,
    CipherId = 2,
    CompressionFlags = 3,
    MasterSeed = 4,
    TransformSeed = 5,
    TransformRounds = 6,
    EncryptionIv = 7,
    ProtectedStreamKey = 8,
    StreamStartBytes = 9,
    InnerRandomStreamId = 10,
}

impl HeaderFieldId {
    /// `None` for identifiers this crate does not know.
    pub fn from_byte(id: u8) -> Option<Self> {
        use HeaderFieldId::*;
        Some(match id {
            0 => EndOfHeader,
            1 => Comment,
            2 => CipherId,
            3 => CompressionFlags,
            4 => MasterSeed,
            5 => TransformSeed,
            6 => TransformRounds,
            7 => EncryptionIv,
            8 => ProtectedStreamKey,
            9 => StreamStartBytes,
            10 => InnerRandomStreamId,
            _ => return None,
        })
    }

    /// Critical fields may appear at most once and must be understood.
    pub fn is_critical(self) -> bool {
        !matches!(self, HeaderFieldId::Comment)
    }

    /// Exact payload length, where the format fixes one.
    pub fn payload_len(self) -> Option<usize> {
        use HeaderFieldId::*;
        match self {
            CipherId | EncryptionIv => Some(16),
            MasterSeed | TransformSeed | ProtectedStreamKey | StreamStartBytes => Some(32),
            TransformRounds => Some(8),
            CompressionFlags | InnerRandomStreamId => Some(4),
            EndOfHeader | Comment => None,
        }
    }
}

/// Compression applied to the document inside the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[repr(u32)]
pub enum CompressionAlgorithm {
    None = 0,
    #[default]
    Gzip = 1,
}

impl TryFrom<u32> for CompressionAlgorithm {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Gzip),
            other => Err(Error::UnsupportedCompression(other)),
        }
    }
}

/// Algorithm of the stream that masks protected values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[repr(u32)]
pub enum InnerStreamId {
    None = 0,
    ArcFourVariant = 1,
    #[default]
    Salsa20 = 2,
}

impl TryFrom<u32> for InnerStreamId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(InnerStreamId::None),
            1 => Ok(InnerStreamId::ArcFourVariant),
            2 => Ok(InnerStreamId::Salsa20),
            other => Err(Error::UnsupportedInnerStream(other)),
        }
    }
}
