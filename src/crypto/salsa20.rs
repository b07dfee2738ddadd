//! Salsa20/20 keystream generator and the protected-value random stream built on it.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{KEY_LEN, sha256};

const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646E, 0x7962_2D32, 0x6B20_6574];

/// Fixed IV of the protected-value stream. Part of the file format.
pub const PROTECTED_STREAM_IV: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

const OUTPUT_LEN: usize = 64;

/// Salsa20 with 20 rounds, a 256-bit key and a 64-bit nonce.
///
/// State layout: constants on the diagonal, key words 1..=4 and 11..=14, nonce in 6..=7,
/// block counter in 8..=9. Cloning snapshots the exact keystream position.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Salsa20 {
    state: [u32; 16],
    output: [u8; OUTPUT_LEN],
    output_pos: usize,
}

impl Salsa20 {
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; 8]) -> Self {
        let k = |i: usize| u32::from_le_bytes([key[i], key[i + 1], key[i + 2], key[i + 3]]);
        let n = |i: usize| u32::from_le_bytes([iv[i], iv[i + 1], iv[i + 2], iv[i + 3]]);

        let state = [
            SIGMA[0], k(0), k(4), k(8),
            k(12), SIGMA[1], n(0), n(4),
            0, 0, SIGMA[2], k(16),
            k(20), k(24), k(28), SIGMA[3],
        ];

        Self {
            state,
            output: [0u8; OUTPUT_LEN],
            output_pos: OUTPUT_LEN,
        }
    }

    /// Produces the next 64-byte block and bumps the block counter.
    pub fn advance(&mut self) {
        let mut x = self.state;

        for _ in 0..10 {
            // columns
            quarter_round(&mut x, 0, 4, 8, 12);
            quarter_round(&mut x, 5, 9, 13, 1);
            quarter_round(&mut x, 10, 14, 2, 6);
            quarter_round(&mut x, 15, 3, 7, 11);
            // rows
            quarter_round(&mut x, 0, 1, 2, 3);
            quarter_round(&mut x, 5, 6, 7, 4);
            quarter_round(&mut x, 10, 11, 8, 9);
            quarter_round(&mut x, 15, 12, 13, 14);
        }

        for (i, word) in x.iter_mut().enumerate() {
            *word = word.wrapping_add(self.state[i]);
            self.output[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        x.zeroize();

        self.output_pos = 0;
        self.state[8] = self.state[8].wrapping_add(1);
        if self.state[8] == 0 {
            self.state[9] = self.state[9].wrapping_add(1);
        }
    }

    /// Applies keystream to `buf`: XORed in when `xor` is set, copied over otherwise.
    pub fn cipher(&mut self, buf: &mut [u8], xor: bool) {
        let mut offset = 0;
        while offset < buf.len() {
            if self.output_pos == OUTPUT_LEN {
                self.advance();
            }

            let n = (OUTPUT_LEN - self.output_pos).min(buf.len() - offset);
            let stream = &self.output[self.output_pos..self.output_pos + n];
            let dst = &mut buf[offset..offset + n];
            if xor {
                dst.iter_mut().zip(stream).for_each(|(d, s)| *d ^= s);
            } else {
                dst.copy_from_slice(stream);
            }

            self.output_pos += n;
            offset += n;
        }
    }

    /// Current 64-bit block counter.
    pub fn block_counter(&self) -> u64 {
        (u64::from(self.state[9]) << 32) | u64::from(self.state[8])
    }
}

#[inline]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}

/// Deterministic stream used to mask protected values inside the document.
///
/// Keyed with SHA-256 of the protected-stream key from the header and the fixed
/// [`PROTECTED_STREAM_IV`].
#[derive(Clone)]
pub struct CryptoRandomStream {
    cipher: Salsa20,
}

impl CryptoRandomStream {
    pub fn new(protected_stream_key: &[u8; KEY_LEN]) -> Self {
        let mut key = sha256(&[protected_stream_key]);
        let cipher = Salsa20::new(&key, &PROTECTED_STREAM_IV);
        key.zeroize();
        Self { cipher }
    }

    /// XORs the next `buf.len()` keystream bytes into `buf`.
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.cipher(buf, true);
    }

    /// Fills `buf` with the next keystream bytes.
    pub fn fill(&mut self, buf: &mut [u8]) {
        self.cipher.cipher(buf, false);
    }
}
