//! Environment abstraction.
//!
//! Everything in the core that needs randomness takes an [`Environment`]
//! instead of reaching for a global RNG. Production uses [`SystemEnv`]; tests
//! substitute seeded or failing environments.

use crate::error::EntropyError;

/// Source of external effects for the session core.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fill `buffer` with cryptographically secure random bytes.
    ///
    /// # Errors
    ///
    /// `EntropyError` if the random source cannot be read. Implementations
    /// must never fall back to weaker randomness.
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;

    /// Random fixed-size array.
    fn random_array<const N: usize>(&self) -> Result<[u8; N], EntropyError> {
        let mut out = [0u8; N];
        self.random_bytes(&mut out)?;
        Ok(out)
    }
}

/// Environment backed by the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|err| EntropyError(err.to_string()))
    }
}
