//! Download-and-verify with bounded exponential backoff.
//!
//! Each artifact walks
//! `Pending → Downloading → Verifying → Done`, with transient failures
//! detouring through `RetryWait` back to `Downloading` until the retry budget
//! is spent. Integrity failures end in `Exhausted` at once.

use std::time::Duration;

use p2index_shared::{ArtifactDescriptor, FetchConfig, P2IndexError, Result};
use tracing::{debug, warn};

use crate::transport::{Download, DownloadState, Transport};
use crate::verify::verify_download;

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first.
    pub retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based):
    /// `min(initial_delay * 2^(attempt-1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            retries: config.retries,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
        }
    }
}

/// Per-artifact fetch state.
#[derive(Debug)]
pub enum FetchState {
    Pending,
    Downloading { attempt: u32 },
    Verifying { attempt: u32, download: Download },
    RetryWait { attempt: u32, delay: Duration },
    Done(Download),
    Exhausted(P2IndexError),
}

/// Download `descriptor.location` through `transport` and verify it.
///
/// Only content the transport reports as freshly written is verified; a
/// cache hit was verified when it was first downloaded.
pub async fn fetch_verified(
    transport: &dyn Transport,
    descriptor: &ArtifactDescriptor,
    policy: &RetryPolicy,
) -> Result<Download> {
    let url = descriptor.location.as_ref().ok_or_else(|| {
        P2IndexError::validation(format!("{} has no download location", descriptor.label()))
    })?;

    let mut state = FetchState::Pending;
    loop {
        state = match state {
            FetchState::Pending => FetchState::Downloading { attempt: 1 },

            FetchState::Downloading { attempt } => match transport.fetch(url).await {
                Ok(download) => FetchState::Verifying { attempt, download },
                Err(e) if e.is_transient() && attempt <= policy.retries => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "download failed, retrying"
                    );
                    FetchState::RetryWait { attempt, delay }
                }
                Err(e) => FetchState::Exhausted(e),
            },

            FetchState::Verifying { attempt, download } => {
                if download.state == DownloadState::Unmodified {
                    FetchState::Done(download)
                } else {
                    let path = download.path.clone();
                    let checksum = descriptor.checksum.clone();
                    let size = descriptor.size;
                    let verified = tokio::task::spawn_blocking(move || {
                        verify_download(&path, checksum.as_deref(), size)
                    })
                    .await
                    .map_err(|e| P2IndexError::Integrity(format!("verification aborted: {e}")))
                    .and_then(|r| r);
                    match verified {
                        Ok(()) => {
                            debug!(%url, attempt, "verified");
                            FetchState::Done(download)
                        }
                        Err(e) => FetchState::Exhausted(e),
                    }
                }
            }

            FetchState::RetryWait { attempt, delay } => {
                tokio::time::sleep(delay).await;
                FetchState::Downloading {
                    attempt: attempt + 1,
                }
            }

            FetchState::Done(download) => return Ok(download),
            FetchState::Exhausted(e) => return Err(e),
        };
    }
}
