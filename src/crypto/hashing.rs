//! Pass-through streams that count and digest every byte they move.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

use super::DIGEST_LEN;

/// Wraps a sink, feeding every accepted byte through SHA-256 and a counter.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    byte_count: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            byte_count: 0,
        }
    }

    /// Number of bytes the underlying sink has accepted so far.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Digest of everything written so far. Writing may continue afterwards.
    pub fn digest(&self) -> [u8; DIGEST_LEN] {
        self.hasher.clone().finalize().into()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        // short writes: only digest what the sink took
        self.hasher.update(&buf[..n]);
        self.byte_count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read-side twin of [`HashingWriter`].
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    byte_count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            byte_count: 0,
        }
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn digest(&self) -> [u8; DIGEST_LEN] {
        self.hasher.clone().finalize().into()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.byte_count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    /// Sink that accepts at most `max` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        max: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.max);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn passes_bytes_through_unchanged() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();

        assert_eq!(w.byte_count(), 11);
        assert_eq!(w.digest(), sha256(&[b"hello world"]));
        assert_eq!(w.into_inner(), b"hello world");
    }

    #[test]
    fn digest_snapshot_does_not_reset_state() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"header").unwrap();
        let snapshot = w.digest();
        w.write_all(b"body").unwrap();

        assert_eq!(snapshot, sha256(&[b"header"]));
        assert_eq!(w.digest(), sha256(&[b"headerbody"]));
    }

    #[test]
    fn short_writes_only_digest_accepted_bytes() {
        let mut w = HashingWriter::new(Trickle {
            data: Vec::new(),
            max: 3,
        });

        let n = w.write(b"abcdefgh").unwrap();
        assert_eq!(n, 3);
        assert_eq!(w.byte_count(), 3);
        assert_eq!(w.digest(), sha256(&[b"abc"]));

        w.write_all(b"defgh").unwrap();
        assert_eq!(w.digest(), sha256(&[b"abcdefgh"]));
        assert_eq!(w.into_inner().data, b"abcdefgh");
    }

    #[test]
    fn reader_counts_and_digests() {
        let mut r = HashingReader::new(&b"0123456789"[..]);
        let mut head = [0u8; 4];
        r.read_exact(&mut head).unwrap();

        assert_eq!(&head, b"0123");
        assert_eq!(r.byte_count(), 4);
        assert_eq!(r.digest(), sha256(&[b"0123"]));
    }
}
