//! AES-256-CBC envelope with PKCS#7 padding.
//!
//! [`CbcWriter`] buffers plaintext and emits whole ciphertext blocks; [`CbcWriter::finish`]
//! pads the tail. [`CbcReader`] holds back the last decrypted block until the source is
//! exhausted so the padding can be checked before the final bytes are released.

use std::io::{self, Read, Write};

use aes::Aes256;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};
use thiserror::Error;
use zeroize::Zeroizing;

use super::{BLOCK_SIZE, IV_LEN, KEY_LEN};

type Encryptor = ::cbc::Encryptor<Aes256>;
type Decryptor = ::cbc::Decryptor<Aes256>;

/// Default amount of plaintext held before a flush.
pub const DEFAULT_CAPACITY: usize = 2048;

/// Carried inside `io::Error`s raised by [`CbcReader`].
#[derive(Debug, Error)]
pub enum PaddingError {
    #[error("ciphertext length is not a multiple of the block size")]
    Truncated,
    #[error("invalid PKCS#7 padding")]
    InvalidPadding,
}

impl From<PaddingError> for io::Error {
    fn from(err: PaddingError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Result of pushing bytes into the writer's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The buffer still has room; this many bytes are waiting.
    Buffered(usize),
    /// A full buffer was encrypted and handed to the sink.
    Flushed(usize),
}

/// Number of padding bytes appended to `len` bytes of plaintext. Always in `1..=BLOCK_SIZE`.
pub fn pad_len(len: usize) -> usize {
    BLOCK_SIZE - len % BLOCK_SIZE
}

/// Validates the PKCS#7 tail of the final plaintext block and returns the pad length.
pub fn check_padding(block: &[u8]) -> Result<usize, PaddingError> {
    let Some(&last) = block.last() else {
        return Err(PaddingError::Truncated);
    };
    let pad = last as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > block.len() {
        return Err(PaddingError::InvalidPadding);
    }
    // fold over the whole tail instead of bailing on the first mismatch
    let bad = block[block.len() - pad..]
        .iter()
        .fold(0u8, |acc, &b| acc | (b ^ last));
    if bad != 0 {
        return Err(PaddingError::InvalidPadding);
    }
    Ok(pad)
}

/// Encrypting adapter over a byte sink.
pub struct CbcWriter<W: Write> {
    inner: W,
    cipher: Encryptor,
    buffer: Zeroizing<Vec<u8>>,
    capacity: usize,
    failed: Option<io::ErrorKind>,
}

impl<W: Write> CbcWriter<W> {
    pub fn new(inner: W, key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self::with_capacity(inner, key, iv, DEFAULT_CAPACITY)
    }

    /// `capacity` is rounded up to a whole number of blocks.
    pub fn with_capacity(inner: W, key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], capacity: usize) -> Self {
        let capacity = capacity.max(BLOCK_SIZE).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let cipher = Encryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
        Self {
            inner,
            cipher,
            // one spare block so the final padding always fits
            buffer: Zeroizing::new(Vec::with_capacity(capacity + BLOCK_SIZE)),
            capacity,
            failed: None,
        }
    }

    /// Copies as much of `input` as fits and flushes if the buffer became full.
    /// Returns the number of bytes taken and what happened to the buffer.
    fn fill(&mut self, input: &[u8]) -> io::Result<(usize, FlushOutcome)> {
        let room = self.capacity - self.buffer.len();
        let take = room.min(input.len());
        self.buffer.extend_from_slice(&input[..take]);

        if self.buffer.len() < self.capacity {
            return Ok((take, FlushOutcome::Buffered(self.buffer.len())));
        }

        let written = self.flush_full_buffer()?;
        Ok((take, FlushOutcome::Flushed(written)))
    }

    fn flush_full_buffer(&mut self) -> io::Result<usize> {
        assert_eq!(
            self.buffer.len(),
            self.capacity,
            "CbcWriter: flush of a buffer that is not full"
        );
        encrypt_blocks(&mut self.cipher, &mut self.buffer);
        let result = self.inner.write_all(&self.buffer);
        let written = self.buffer.len();
        self.buffer.clear();
        result.map(|_| written)
    }

    /// Pads and encrypts the buffered tail, writes it out and returns the sink.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(kind) = self.failed {
            return Err(io::Error::new(kind, "CbcWriter: sink failed earlier"));
        }

        let len = self.buffer.len();
        assert!(len < self.capacity, "CbcWriter: full buffer at close");

        let pad = pad_len(len);
        self.buffer.resize(len + pad, pad as u8);
        assert_eq!(self.buffer.len() % BLOCK_SIZE, 0, "CbcWriter: padding misaligned");

        encrypt_blocks(&mut self.cipher, &mut self.buffer);
        self.inner.write_all(&self.buffer)?;
        self.buffer.clear();
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CbcWriter<W> {
    fn write(&mut self, input: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.failed {
            return Err(io::Error::new(kind, "CbcWriter: sink failed earlier"));
        }

        let mut consumed = 0;
        while consumed < input.len() {
            match self.fill(&input[consumed..]) {
                Ok((taken, outcome)) => {
                    consumed += taken;
                    if let FlushOutcome::Flushed(n) = outcome {
                        assert_eq!(n, self.capacity, "CbcWriter: partial flush");
                    }
                }
                Err(err) => {
                    // the cipher state has advanced past bytes the sink never saw
                    self.failed = Some(err.kind());
                    return Err(err);
                }
            }
        }

        assert_eq!(consumed, input.len(), "CbcWriter: byte accounting mismatch");
        assert!(self.buffer.len() < self.capacity, "CbcWriter: full buffer after write");
        Ok(consumed)
    }

    /// Ciphertext can only leave in whole blocks, so this only flushes the sink.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn encrypt_blocks(cipher: &mut Encryptor, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks(cipher: &mut Decryptor, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// Decrypting adapter over a byte source.
pub struct CbcReader<R: Read> {
    inner: R,
    cipher: Decryptor,
    chunk: Zeroizing<Vec<u8>>,
    plain: Zeroizing<Vec<u8>>,
    pos: usize,
    held: Option<Zeroizing<[u8; BLOCK_SIZE]>>,
    finished: bool,
}

impl<R: Read> CbcReader<R> {
    pub fn new(inner: R, key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self::with_capacity(inner, key, iv, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: R, key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], capacity: usize) -> Self {
        let capacity = capacity.max(BLOCK_SIZE).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let cipher = Decryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
        Self {
            inner,
            cipher,
            chunk: Zeroizing::new(vec![0u8; capacity]),
            plain: Zeroizing::new(Vec::with_capacity(capacity)),
            pos: 0,
            held: None,
            finished: false,
        }
    }

    /// Reads until the chunk is full or the source is exhausted.
    fn read_chunk(&mut self) -> io::Result<usize> {
        let mut filled = 0;
        while filled < self.chunk.len() {
            match self.inner.read(&mut self.chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn refill(&mut self) -> io::Result<()> {
        self.plain.clear();
        self.pos = 0;

        let filled = self.read_chunk()?;
        if filled % BLOCK_SIZE != 0 {
            return Err(PaddingError::Truncated.into());
        }

        if filled == 0 {
            self.finished = true;
            let Some(last) = self.held.take() else {
                // no ciphertext at all: not even a padding block
                return Err(PaddingError::Truncated.into());
            };
            let pad = check_padding(&last[..])?;
            self.plain.extend_from_slice(&last[..BLOCK_SIZE - pad]);
            return Ok(());
        }

        let data = &mut self.chunk[..filled];
        decrypt_blocks(&mut self.cipher, data);

        if let Some(prev) = self.held.take() {
            self.plain.extend_from_slice(&prev[..]);
        }
        let (body, tail) = data.split_at(filled - BLOCK_SIZE);
        self.plain.extend_from_slice(body);
        let mut last = Zeroizing::new([0u8; BLOCK_SIZE]);
        last.copy_from_slice(tail);
        self.held = Some(last);
        Ok(())
    }
}

impl<R: Read> Read for CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plain.len() {
            if self.finished {
                return Ok(0);
            }
            self.refill()?;
        }

        let n = buf.len().min(self.plain.len() - self.pos);
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::block_padding::Pkcs7;
    use proptest::prelude::*;

    const KEY: [u8; 32] = [7u8; 32];
    const IV: [u8; 16] = [9u8; 16];

    fn encrypt_with(capacity: usize, writes: &[&[u8]]) -> Vec<u8> {
        let mut w = CbcWriter::with_capacity(Vec::new(), &KEY, &IV, capacity);
        for chunk in writes {
            w.write_all(chunk).unwrap();
        }
        w.finish().unwrap()
    }

    fn decrypt_all(ciphertext: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        CbcReader::with_capacity(ciphertext, &KEY, &IV, 64).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn cipher_state_is_wiped_on_drop() {
        fn wiped<T: zeroize::ZeroizeOnDrop>() {}
        wiped::<Aes256>();
        wiped::<Encryptor>();
        wiped::<Decryptor>();
    }

    #[test]
    fn pad_len_is_never_zero() {
        assert_eq!(pad_len(0), 16);
        assert_eq!(pad_len(1), 15);
        assert_eq!(pad_len(15), 1);
        assert_eq!(pad_len(16), 16);
        assert_eq!(pad_len(31), 1);
    }

    #[test]
    fn full_block_gets_a_whole_padding_block() {
        let ct = encrypt_with(64, &[&[0xAA; 16]]);
        assert_eq!(ct.len(), 32);
        assert_eq!(decrypt_all(&ct).unwrap(), vec![0xAA; 16]);
    }

    #[test]
    fn empty_plaintext_is_one_padding_block() {
        let ct = encrypt_with(64, &[]);
        assert_eq!(ct.len(), 16);
        assert!(decrypt_all(&ct).unwrap().is_empty());
    }

    #[test]
    fn matches_reference_cbc_pkcs7() {
        let data: Vec<u8> = (0..=200u8).collect();
        let ours = encrypt_with(32, &[&data[..5], &data[5..77], &data[77..]]);

        let reference = Encryptor::new(GenericArray::from_slice(&KEY), GenericArray::from_slice(&IV))
            .encrypt_padded_vec_mut::<Pkcs7>(&data);
        assert_eq!(ours, reference);
    }

    #[test]
    fn writes_larger_than_capacity_flush_whole_buffers() {
        let data = vec![0x42u8; 1000];
        let ct = encrypt_with(48, &[&data]);
        assert_eq!(ct.len(), 1008);
        assert_eq!(decrypt_all(&ct).unwrap(), data);
    }

    #[test]
    fn fill_reports_flush_outcome() {
        let mut w = CbcWriter::with_capacity(Vec::new(), &KEY, &IV, 32);
        assert_eq!(w.fill(&[1u8; 10]).unwrap(), (10, FlushOutcome::Buffered(10)));
        assert_eq!(w.fill(&[1u8; 40]).unwrap(), (22, FlushOutcome::Flushed(32)));
        assert_eq!(w.inner.len(), 32);
    }

    #[test]
    fn capacity_rounds_up_to_block_multiple() {
        let w = CbcWriter::with_capacity(Vec::new(), &KEY, &IV, 20);
        assert_eq!(w.capacity, 32);
    }

    #[test]
    fn corrupted_padding_is_rejected() {
        let mut ct = encrypt_with(64, &[b"some plaintext"]);
        let last = ct.len() - 1;
        ct[last] ^= 0x01;

        let err = decrypt_all(&ct).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn wrong_key_is_rejected_or_garbled() {
        let data = b"attack at dawn, bring snacks".to_vec();
        let ct = encrypt_with(64, &[&data]);

        let mut out = Vec::new();
        let res = CbcReader::new(&ct[..], &[8u8; 32], &IV).read_to_end(&mut out);
        assert!(res.is_err() || out != data);
    }

    #[test]
    fn ragged_ciphertext_is_rejected() {
        let ct = encrypt_with(64, &[b"0123456789abcdef0123"]);
        let err = decrypt_all(&ct[..ct.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_ciphertext_is_rejected() {
        assert!(decrypt_all(&[]).is_err());
    }

    #[test]
    fn check_padding_rules() {
        let mut block = [0u8; 16];
        block[15] = 0;
        assert!(check_padding(&block).is_err());

        block[12..].copy_from_slice(&[4, 4, 4, 4]);
        assert_eq!(check_padding(&block).unwrap(), 4);

        block[12] = 3;
        assert!(check_padding(&block).is_err());

        block[15] = 17;
        assert!(check_padding(&block).is_err());
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_is_sticky() {
        let mut w = CbcWriter::with_capacity(FailingSink, &KEY, &IV, 16);
        assert!(w.write(&[0u8; 40]).is_err());
        assert!(w.write(&[0u8; 1]).is_err());
        assert!(w.finish().is_err());
    }

    proptest! {
        #[test]
        fn padded_length_law(data in proptest::collection::vec(any::<u8>(), 0..600), cap in 1usize..200) {
            let ct = encrypt_with(cap, &[&data]);
            prop_assert_eq!(ct.len(), (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE);
            prop_assert_eq!(decrypt_all(&ct).unwrap(), data);
        }
    }
}
