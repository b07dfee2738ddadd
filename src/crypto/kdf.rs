use aes::Aes256;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use zeroize::Zeroizing;

use super::{BLOCK_SIZE, KEY_LEN, sha256};

/// Default number of transform rounds for new databases.
pub const DEFAULT_TRANSFORM_ROUNDS: u64 = 60_000;

/// AES-KDF: encrypts both halves of `raw_key` with AES-256-ECB keyed by `seed`,
/// `rounds` times over.
pub fn transform_key(
    raw_key: &[u8; KEY_LEN],
    seed: &[u8; KEY_LEN],
    rounds: u64,
) -> Zeroizing<[u8; KEY_LEN]> {
    let cipher = Aes256::new(GenericArray::from_slice(seed));
    let mut out = Zeroizing::new(*raw_key);

    for half in out.chunks_exact_mut(BLOCK_SIZE) {
        let block = GenericArray::from_mut_slice(half);
        for _ in 0..rounds {
            cipher.encrypt_block(block);
        }
    }

    out
}

/// Final symmetric key: `SHA-256(master_seed || SHA-256(transformed))`.
pub fn derive_final_key(
    master_seed: &[u8; KEY_LEN],
    transformed: &[u8; KEY_LEN],
) -> Zeroizing<[u8; KEY_LEN]> {
    let inner = Zeroizing::new(sha256(&[transformed]));
    Zeroizing::new(sha256(&[master_seed, &inner[..]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockDecrypt;

    #[test]
    fn transform_is_deterministic() {
        let raw = [42u8; 32];
        let seed = [7u8; 32];

        let k1 = transform_key(&raw, &seed, 100);
        let k2 = transform_key(&raw, &seed, 100);

        assert_eq!(*k1, *k2);
    }

    #[test]
    fn rounds_affect_output() {
        let raw = [42u8; 32];
        let seed = [7u8; 32];

        assert_ne!(*transform_key(&raw, &seed, 10), *transform_key(&raw, &seed, 11));
    }

    #[test]
    fn seed_affects_output() {
        let raw = [42u8; 32];
        assert_ne!(
            *transform_key(&raw, &[1u8; 32], 10),
            *transform_key(&raw, &[2u8; 32], 10)
        );
    }

    #[test]
    fn zero_rounds_is_identity() {
        let raw: [u8; 32] = core::array::from_fn(|i| i as u8);
        assert_eq!(*transform_key(&raw, &[0u8; 32], 0), raw);
    }

    #[test]
    fn halves_are_independent_ecb() {
        let raw: [u8; 32] = core::array::from_fn(|i| (i * 3) as u8);
        let seed = [5u8; 32];
        let out = transform_key(&raw, &seed, 3);

        let cipher = Aes256::new(GenericArray::from_slice(&seed));
        let mut back = *out;
        for half in back.chunks_exact_mut(16) {
            let block = GenericArray::from_mut_slice(half);
            for _ in 0..3 {
                cipher.decrypt_block(block);
            }
        }
        assert_eq!(back, raw);
    }

    #[test]
    fn final_key_binds_master_seed() {
        let transformed = [9u8; 32];
        let a = derive_final_key(&[1u8; 32], &transformed);
        let b = derive_final_key(&[2u8; 32], &transformed);
        assert_ne!(*a, *b);

        let expected = sha256(&[&[1u8; 32], &sha256(&[&transformed])]);
        assert_eq!(*a, expected);
    }
}
