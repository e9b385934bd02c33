//! Exact-length randomness draws
//!
//! A [`RandomSource`] wraps an [`EntropySource`] backend and loops over short reads until the
//! requested length is filled. The loop is bounded by `max_attempts`, so a permanently broken
//! backend surfaces as [`Error::EntropySourceUnavailable`] instead of spinning forever.
//!
//! Backends are shared by every request and read through `&self`, so one slow device read
//! never holds up another request's draw.

use crate::{config::ServerConfig, Error, Result};
use rand::{rngs::OsRng, RngCore};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Backend able to produce random bytes, possibly fewer than asked for
pub trait EntropySource: Send + Sync {
    /// Fill a prefix of `dest`, returning how many bytes were written
    fn read(&self, dest: &mut [u8]) -> io::Result<usize>;

    /// Human-readable backend name for logs
    fn name(&self) -> &str;
}

/// Operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn read(&self, dest: &mut [u8]) -> io::Result<usize> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(dest.len())
    }

    fn name(&self) -> &str {
        "os"
    }
}

/// Byte stream readable through a shared reference, typically a character device such as
/// `/dev/hwrng`
///
/// `&File` implements [`Read`], so concurrent draws issue independent `read` calls on the same
/// descriptor without any lock.
pub struct ReaderEntropy<R> {
    reader: R,
    name: String,
}

impl<R> ReaderEntropy<R>
where
    for<'a> &'a R: Read,
{
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
        }
    }
}

impl ReaderEntropy<File> {
    /// Open a device or file for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::EntropySourceUnavailable(format!("Cannot open {}: {}", path.display(), e))
        })?;
        Ok(Self::new(file, path.display().to_string()))
    }
}

impl<R> EntropySource for ReaderEntropy<R>
where
    R: Send + Sync,
    for<'a> &'a R: Read,
{
    fn read(&self, dest: &mut [u8]) -> io::Result<usize> {
        (&self.reader).read(dest)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Bounded, exact-length draws from an entropy backend
#[derive(Clone)]
pub struct RandomSource {
    backend: Arc<dyn EntropySource>,
    max_attempts: u32,
}

impl RandomSource {
    pub fn new(backend: Arc<dyn EntropySource>, max_attempts: u32) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
        }
    }

    /// OS CSPRNG with the given attempt bound
    pub fn os(max_attempts: u32) -> Self {
        Self::new(Arc::new(OsEntropy), max_attempts)
    }

    /// Build the source described by server configuration
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        match &config.source_path {
            Some(path) => Ok(Self::new(
                Arc::new(ReaderEntropy::open(path)?),
                config.max_draw_attempts,
            )),
            None => Ok(Self::os(config.max_draw_attempts)),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Draw exactly `n` bytes
    ///
    /// Short reads are retried until the buffer is full or `max_attempts` reads have been
    /// issued. A hard error from the backend fails immediately.
    pub fn draw(&self, n: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; n];
        let mut filled = 0;
        let mut attempts = 0;

        while filled < n {
            if attempts >= self.max_attempts {
                warn!(
                    "Entropy source '{}' delivered {}/{} bytes after {} attempts",
                    self.backend.name(),
                    filled,
                    n,
                    attempts
                );
                return Err(Error::EntropySourceUnavailable(format!(
                    "short read: {}/{} bytes after {} attempts",
                    filled, n, attempts
                )));
            }
            attempts += 1;

            match self.backend.read(&mut data[filled..]) {
                Ok(read) => {
                    filled += read.min(n - filled);
                    if filled < n {
                        debug!("Short read ({} bytes), {}/{} filled", read, filled, n);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Entropy source '{}' failed: {}", self.backend.name(), e);
                    return Err(Error::EntropySourceUnavailable(e.to_string()));
                }
            }
        }

        Ok(data)
    }
}
