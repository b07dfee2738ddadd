//! Composite master key assembled from user credentials.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{KEY_LEN, sha256, transform_key};
use crate::{Error, Result};

/// Turns `(transform seed, rounds)` into 32 bytes of transformed key material.
///
/// Expected to be slow; `rounds` tunes the cost.
pub trait KeyTransform {
    fn transform_key(&self, seed: &[u8; KEY_LEN], rounds: u64) -> Result<Zeroizing<[u8; KEY_LEN]>>;
}

/// Master credential: SHA-256 of each component, concatenated and hashed again.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct CompositeKey {
    password: Option<[u8; KEY_LEN]>,
    key_file: Option<[u8; KEY_LEN]>,
}

impl CompositeKey {
    pub fn from_password(password: &str) -> Self {
        Self {
            password: Some(sha256(&[password.as_bytes()])),
            key_file: None,
        }
    }

    /// Adds a key file. 32-byte files are used verbatim, 64 hex characters are decoded,
    /// anything else is hashed.
    pub fn with_key_file(mut self, contents: &[u8]) -> Self {
        self.key_file = Some(key_file_hash(contents));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.key_file.is_none()
    }

    /// Hash of all components in their fixed order.
    pub fn raw_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        if self.is_empty() {
            return Err(Error::KeyDerivation("composite key has no components".into()));
        }

        let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
        if let Some(pw) = &self.password {
            parts.push(pw);
        }
        if let Some(kf) = &self.key_file {
            parts.push(kf);
        }
        Ok(Zeroizing::new(sha256(&parts)))
    }
}

impl KeyTransform for CompositeKey {
    fn transform_key(&self, seed: &[u8; KEY_LEN], rounds: u64) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let raw = self.raw_key()?;
        Ok(transform_key(&raw, seed, rounds))
    }
}

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeKey")
            .field("password", &self.password.is_some())
            .field("key_file", &self.key_file.is_some())
            .finish()
    }
}

fn key_file_hash(contents: &[u8]) -> [u8; KEY_LEN] {
    if contents.len() == KEY_LEN {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(contents);
        return key;
    }

    if contents.len() == KEY_LEN * 2 {
        let mut key = [0u8; KEY_LEN];
        if hex::decode_to_slice(contents, &mut key).is_ok() {
            return key;
        }
    }

    sha256(&[contents])
}
