//! Secret field values and the stream that masks them inside the document.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{CryptoRandomStream, KEY_LEN, secure_random};
use crate::format::InnerStreamId;
use crate::{Error, Result};

/// A secret held XOR-masked in memory.
///
/// The plain bytes only leave through [`reveal`](Self::reveal) or
/// [`reveal_str`](Self::reveal_str), both wrapped so they are wiped when dropped.
/// The buffer itself is wiped on [`clear`](Self::clear) and on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProtectedValue {
    masked: Vec<u8>,
    pad: Vec<u8>,
}

impl ProtectedValue {
    pub fn new(plain: &[u8]) -> Result<Self> {
        let mut pad = vec![0u8; plain.len()];
        secure_random(&mut pad)?;
        let masked = plain.iter().zip(&pad).map(|(p, k)| p ^ k).collect();
        Ok(Self { masked, pad })
    }

    pub fn from_text(plain: &str) -> Result<Self> {
        Self::new(plain.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.masked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masked.is_empty()
    }

    pub fn reveal(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.masked.iter().zip(&self.pad).map(|(m, k)| m ^ k).collect())
    }

    pub fn reveal_str(&self) -> Result<Zeroizing<String>> {
        let bytes = self.reveal();
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| Error::document("protected value is not valid UTF-8"))?;
        Ok(Zeroizing::new(text.to_owned()))
    }

    /// Wipes the content. Afterwards the value reveals as all zero bytes.
    pub fn clear(&mut self) {
        self.masked.iter_mut().for_each(|b| *b = 0);
        self.pad.iter_mut().for_each(|b| *b = 0);
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.reveal(), other.reveal());
        a.len() == b.len() && a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl Eq for ProtectedValue {}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtectedValue({} bytes)", self.len())
    }
}

/// Masks protected values in document order.
///
/// The keystream is positional: the writer and the reader must visit protected values
/// in exactly the same order.
pub enum ProtectedStream {
    Salsa20(CryptoRandomStream),
    /// Protected values are only base64-encoded.
    Plain,
}

impl ProtectedStream {
    pub fn new(id: InnerStreamId, key: &[u8; KEY_LEN]) -> Result<Self> {
        match id {
            InnerStreamId::Salsa20 => Ok(ProtectedStream::Salsa20(CryptoRandomStream::new(key))),
            InnerStreamId::None => Ok(ProtectedStream::Plain),
            InnerStreamId::ArcFourVariant => Err(Error::UnsupportedInnerStream(id as u32)),
        }
    }

    /// Masks a value for embedding: keystream XOR, then base64.
    pub fn seal(&mut self, value: &ProtectedValue) -> String {
        let mut bytes = value.reveal();
        self.apply(&mut bytes);
        STANDARD.encode(&bytes[..])
    }

    /// Reverses [`seal`](Self::seal) for the next protected value in document order.
    pub fn open(&mut self, encoded: &str) -> Result<ProtectedValue> {
        let mut bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::document(format!("protected value: {e}")))?,
        );
        self.apply(&mut bytes);
        ProtectedValue::new(&bytes)
    }

    fn apply(&mut self, buf: &mut [u8]) {
        if let ProtectedStream::Salsa20(stream) = self {
            stream.apply(buf);
        }
    }
}
