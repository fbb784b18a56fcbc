//! Versioned, checksummed binary envelope for artifact blobs.
//!
//! Layout (integers big-endian):
//!
//! ```text
//! "NGAF" | u16 envelope version | u8 tag len | tag | u16 payload version
//!        | u64 payload len | payload | sha256(payload) (32 bytes)
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"NGAF";
pub const ENVELOPE_VERSION: u16 = 1;

pub const PREPROCESSOR_TAG: &str = "preprocessor";

/// Tag for an estimator payload of `algorithm`.
#[must_use]
pub fn estimator_tag(algorithm: &str) -> String {
    format!("estimator/{algorithm}")
}

const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope is truncated")]
    Truncated,

    #[error("bad magic bytes")]
    BadMagic,

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u16),

    #[error("tag is {0} bytes, at most 255 allowed")]
    TagTooLong(usize),

    #[error("tag is not valid utf-8")]
    InvalidTag,

    #[error("expected tag `{expected}`, found `{found}`")]
    UnexpectedTag { expected: String, found: String },

    #[error("{0} trailing bytes after checksum")]
    TrailingBytes(usize),

    #[error("payload checksum mismatch")]
    ChecksumMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: String,
    pub payload_version: u16,
    pub payload: Vec<u8>,
}

impl Envelope {
    #[must_use]
    pub fn new(tag: impl Into<String>, payload_version: u16, payload: Vec<u8>) -> Self {
        Self { tag: tag.into(), payload_version, payload }
    }

    /// Hex SHA-256 of the payload.
    #[must_use]
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.payload))
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let tag = self.tag.as_bytes();
        let tag_len = u8::try_from(tag.len()).map_err(|_| EnvelopeError::TagTooLong(tag.len()))?;

        let mut out = Vec::with_capacity(4 + 2 + 1 + tag.len() + 2 + 8 + self.payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&ENVELOPE_VERSION.to_be_bytes());
        out.push(tag_len);
        out.extend_from_slice(tag);
        out.extend_from_slice(&self.payload_version.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&Sha256::digest(&self.payload));
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut cursor = Cursor { bytes, pos: 0 };
        if cursor.take(4)? != MAGIC {
            return Err(EnvelopeError::BadMagic);
        }
        let version = cursor.u16()?;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let tag_len = usize::from(cursor.take(1)?[0]);
        let tag = std::str::from_utf8(cursor.take(tag_len)?).map_err(|_| EnvelopeError::InvalidTag)?.to_string();
        let payload_version = cursor.u16()?;
        let payload_len = usize::try_from(cursor.u64()?).map_err(|_| EnvelopeError::Truncated)?;
        let payload = cursor.take(payload_len)?.to_vec();
        let checksum = cursor.take(CHECKSUM_LEN)?;
        if cursor.remaining() > 0 {
            return Err(EnvelopeError::TrailingBytes(cursor.remaining()));
        }
        if Sha256::digest(&payload).as_slice() != checksum {
            return Err(EnvelopeError::ChecksumMismatch);
        }
        Ok(Self { tag, payload_version, payload })
    }

    /// Decode and require a specific tag.
    pub fn decode_tagged(bytes: &[u8], expected: &str) -> Result<Self, EnvelopeError> {
        let envelope = Self::decode(bytes)?;
        if envelope.tag != expected {
            return Err(EnvelopeError::UnexpectedTag { expected: expected.to_string(), found: envelope.tag });
        }
        Ok(envelope)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EnvelopeError> {
        let end = self.pos.checked_add(n).ok_or(EnvelopeError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(EnvelopeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, EnvelopeError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, EnvelopeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}
