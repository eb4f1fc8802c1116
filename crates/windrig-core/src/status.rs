//! Remote playback status.
//!
//! The rig server is the authority on whether a performance is running. The
//! [`StatusSynchronizer`] fetches a [`StatusSnapshot`] on a fixed period and
//! keeps only the latest one; snapshots are never merged.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::api::RigApi;

/// Default status poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A rest in the performed output long enough to be reported on its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignificantRest {
    pub start_offset_sec: f64,
    pub end_offset_sec: f64,
    pub duration_sec: f64,
    pub beats: f64,
}

/// One poll of the rig's playback status.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub is_playing: bool,
    pub current_file: String,
    /// 0 to 100.
    pub progress_percent: f64,
    pub current_note: u64,
    pub total_notes: u64,
    /// Server-formatted elapsed time.
    pub elapsed_time: String,
    /// Server-formatted remaining time.
    pub remaining_time: String,
    /// The rig's own expected and measured run lengths, 0 when unknown.
    pub theoretical_duration_sec: f64,
    pub actual_duration_sec: f64,
    pub significant_rests: Vec<SignificantRest>,
}

/// Periodic status poller.
pub struct StatusSynchronizer<A: ?Sized> {
    api: Arc<A>,
    interval: Duration,
    latest: Option<StatusSnapshot>,
    failures: u64,
}

impl<A: RigApi + ?Sized> StatusSynchronizer<A> {
    pub fn new(api: Arc<A>, interval: Duration) -> Self {
        Self {
            api,
            interval,
            latest: None,
            failures: 0,
        }
    }

    /// Poll period the driver should schedule.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch a fresh snapshot.
    ///
    /// On success the previous snapshot is replaced and the new one returned.
    /// Failures are logged and skipped: the next scheduled poll is the retry.
    pub async fn poll(&mut self) -> Option<&StatusSnapshot> {
        match self.api.playback_status().await {
            Ok(snapshot) => {
                if self.failures > 0 {
                    log::info!("Status feed recovered after {} failed polls", self.failures);
                    self.failures = 0;
                }
                self.latest = Some(snapshot);
                self.latest.as_ref()
            }
            Err(e) => {
                self.failures += 1;
                // Log the first failure loudly, repeats quietly.
                if self.failures == 1 {
                    log::warn!("Status poll failed: {}", e);
                } else {
                    log::debug!("Status poll failed ({} in a row): {}", self.failures, e);
                }
                None
            }
        }
    }

    /// The most recent successful snapshot.
    pub fn latest(&self) -> Option<&StatusSnapshot> {
        self.latest.as_ref()
    }

    /// Consecutive failed polls since the last success.
    pub fn consecutive_failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use crate::testing::FakeRig;

    #[tokio::test]
    async fn test_each_poll_replaces_snapshot() {
        let rig = Arc::new(FakeRig::new());
        let mut sync = StatusSynchronizer::new(Arc::clone(&rig), DEFAULT_POLL_INTERVAL);

        rig.set_status(StatusSnapshot {
            is_playing: true,
            significant_rests: vec![SignificantRest {
                start_offset_sec: 1.0,
                end_offset_sec: 2.0,
                duration_sec: 1.0,
                beats: 1.0,
            }],
            ..Default::default()
        });
        assert!(sync.poll().await.unwrap().is_playing);

        rig.set_status(StatusSnapshot::default());
        let latest = sync.poll().await.unwrap();
        assert!(!latest.is_playing);
        assert!(latest.significant_rests.is_empty());
    }

    #[tokio::test]
    async fn test_failed_poll_is_skipped() {
        let rig = Arc::new(FakeRig::new());
        let mut sync = StatusSynchronizer::new(Arc::clone(&rig), DEFAULT_POLL_INTERVAL);
        rig.set_status(StatusSnapshot {
            is_playing: true,
            ..Default::default()
        });
        sync.poll().await;

        rig.fail_status(Some(RigError::Network("timeout".into())));
        assert!(sync.poll().await.is_none());
        assert!(sync.poll().await.is_none());
        assert_eq!(sync.consecutive_failures(), 2);
        assert!(sync.latest().unwrap().is_playing);

        rig.fail_status(None);
        assert!(sync.poll().await.is_some());
        assert_eq!(sync.consecutive_failures(), 0);
    }
}
