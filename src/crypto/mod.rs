//! Cryptographic primitives for the container.
//!
//! Provides the integrity tracker, the AES-CBC envelope, the Salsa20 keystream used for
//! protected values and the transform-key step.

pub mod cbc;
pub mod hashing;
pub mod kdf;
pub mod salsa20;

pub use self::cbc::{CbcReader, CbcWriter};
pub use hashing::{HashingReader, HashingWriter};
pub use kdf::{derive_final_key, transform_key};
pub use self::salsa20::{CryptoRandomStream, Salsa20};

use getrandom::fill;
use sha2::{Digest, Sha256};

use crate::Result;

/// Length of the symmetric keys and seeds (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the AES-CBC initialisation vector.
pub const IV_LEN: usize = 16;
/// AES block size.
pub const BLOCK_SIZE: usize = 16;
/// Length of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf)?;
    Ok(())
}

pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
