//! Cumulative SHA-512 hash chain
//!
//! The mixer is a single running accumulator per request. A checkpoint returns the digest of
//! every byte ingested so far and leaves the running state untouched, so successive
//! checkpoints are prefixes of one chain rather than independent digests:
//!
//! ```text
//! challenge ──> cp0 = H(challenge)
//! tag       ──> cp1 = H(challenge || tag)
//! draw      ──> cp2 = H(challenge || tag || draw)
//! ```

use sha2::{Digest as _, Sha512};
use std::fmt;

/// Length of every checkpoint digest in bytes
pub const DIGEST_LEN: usize = 64;

/// A SHA-512 checkpoint
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex, as sent on the wire
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::LowerHex for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Streaming accumulator for one exchange
#[derive(Clone, Default)]
pub struct Mixer {
    hasher: Sha512,
}

impl Mixer {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the running hash state
    pub fn ingest(&mut self, bytes: impl AsRef<[u8]>) {
        self.hasher.update(bytes.as_ref());
    }

    /// Digest of everything ingested so far, without resetting
    pub fn checkpoint(&self) -> Digest {
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&self.hasher.clone().finalize());
        Digest(out)
    }
}
