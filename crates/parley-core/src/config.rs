//! Codec configuration.

use std::time::Duration;

/// Configuration for [`crate::MessageCodec`].
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Timeout for fetching a remote prekey bundle
    pub bundle_fetch_timeout: Duration,
    /// Timeout for other directory requests (publish, mark consumed)
    pub directory_timeout: Duration,
    /// Maximum number of missing messages a receiver skips over
    pub max_skip: u32,
    /// One-time prekeys generated per provisioning batch
    pub one_time_prekey_batch: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            bundle_fetch_timeout: Duration::from_secs(10),
            directory_timeout: Duration::from_secs(10),
            max_skip: 1000,
            one_time_prekey_batch: 100,
        }
    }
}
