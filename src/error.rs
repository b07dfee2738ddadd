//! Error types for loading and saving containers.

use std::io;

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::cbc::PaddingError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while framing, encrypting or parsing a container.
#[derive(Debug, Error)]
pub enum Error {
    /// The clear header is malformed, truncated or of an unsupported major version.
    #[error("invalid database file: {0}")]
    Format(String),

    /// Padding or verification bytes did not check out. A wrong key and a damaged
    /// ciphertext look identical from here.
    #[error("Invalid password or corrupted data")]
    WrongKeyOrCorrupt,

    /// The header digest stored inside the document does not match the clear header.
    #[error("header hash mismatch; the file header has been modified")]
    HeaderHashMismatch,

    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(Uuid),

    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompression(u32),

    #[error("unsupported inner random stream: {0}")]
    UnsupportedInnerStream(u32),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The decrypted document is not well-formed.
    #[error("malformed document: {0}")]
    Document(String),

    #[error("OS random generator unavailable")]
    Random,

    #[error(transparent)]
    Io(io::Error),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn document(msg: impl std::fmt::Display) -> Self {
        Error::Document(msg.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let padding = err
            .get_ref()
            .is_some_and(|inner| inner.is::<PaddingError>());
        if padding {
            Error::WrongKeyOrCorrupt
        } else {
            Error::Io(err)
        }
    }
}

impl From<getrandom::Error> for Error {
    fn from(_: getrandom::Error) -> Self {
        Error::Random
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_failures_become_integrity_errors() {
        let err = io::Error::new(io::ErrorKind::InvalidData, PaddingError::InvalidPadding);
        assert!(matches!(Error::from(err), Error::WrongKeyOrCorrupt));
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        match Error::from(err) {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got: {other:?}"),
        }
    }

    #[test]
    fn wrong_key_message_does_not_pick_a_cause() {
        assert_eq!(
            Error::WrongKeyOrCorrupt.to_string(),
            "Invalid password or corrupted data"
        );
    }
}
