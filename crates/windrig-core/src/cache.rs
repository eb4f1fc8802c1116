//! Execution sequence cache.
//!
//! The rig keeps precomputed, hardware-ready command streams ("execution
//! sequences") on disk, one per [`ExecCacheKey`]. The client never holds the
//! sequences themselves, only [`ExecCacheEntry`] references that a remote check
//! or build has confirmed.
//!
//! [`ExecCacheManager`] wraps the two remote calls:
//!
//! - [`check`](ExecCacheManager::check) fails open: any error is a miss
//! - [`begin_resolve`](ExecCacheManager::begin_resolve) hands out a detached
//!   [`ResolveJob`] (check, then build on miss) and allows only one at a time

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use crate::api::RigApi;
use crate::error::{CacheError, RigError, SessionError};

/// Instrument the rig is fitted with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    /// Saxophone.
    Sks,
    /// Suona.
    #[default]
    Sn,
}

impl Instrument {
    pub fn as_str(self) -> &'static str {
        match self {
            Instrument::Sks => "sks",
            Instrument::Sn => "sn",
        }
    }

    /// Human-readable instrument name.
    pub fn display_name(self) -> &'static str {
        match self {
            Instrument::Sks => "saxophone",
            Instrument::Sn => "suona",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sks" | "sax" | "saxophone" => Ok(Instrument::Sks),
            "sn" | "suona" => Ok(Instrument::Sn),
            other => Err(format!("unknown instrument '{}' (expected sks or sn)", other)),
        }
    }
}

/// Identity of one execution sequence. Matching is exact on every field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecCacheKey {
    pub source_file: String,
    pub instrument: Instrument,
    /// Tempo; 0 means the document's own tempo.
    pub bpm: f64,
    pub tonguing_delay_ms: u32,
}

impl ExecCacheKey {
    pub fn new(
        source_file: impl Into<String>,
        instrument: Instrument,
        bpm: f64,
        tonguing_delay_ms: u32,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            instrument,
            bpm,
            tonguing_delay_ms,
        }
    }

    /// Tempo as it appears in sequence file names. Sent as the check query
    /// parameter so the check looks for the file preprocessing writes.
    pub fn bpm_param(&self) -> String {
        format_bpm(self.bpm)
    }

    /// Name of the sequence file preprocessing writes for this key.
    pub fn exec_file_name(&self) -> String {
        let base = self
            .source_file
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.source_file);
        let stem = base.strip_suffix(".json").unwrap_or(base);
        format!(
            "{}_{}_{}_{}.exec.json",
            stem,
            self.instrument,
            self.bpm_param(),
            self.tonguing_delay_ms
        )
    }

    fn bpm_bits(&self) -> u64 {
        // -0.0 and 0.0 both mean "document tempo".
        if self.bpm == 0.0 {
            0
        } else {
            self.bpm.to_bits()
        }
    }
}

impl PartialEq for ExecCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.source_file == other.source_file
            && self.instrument == other.instrument
            && self.bpm_bits() == other.bpm_bits()
            && self.tonguing_delay_ms == other.tonguing_delay_ms
    }
}

impl Eq for ExecCacheKey {}

impl Hash for ExecCacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_file.hash(state);
        self.instrument.hash(state);
        self.bpm_bits().hash(state);
        self.tonguing_delay_ms.hash(state);
    }
}

impl fmt::Display for ExecCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} @ {} bpm, {} ms]",
            self.source_file,
            self.instrument,
            self.bpm_param(),
            self.tonguing_delay_ms
        )
    }
}

/// Format a tempo the way preprocessing names its output: rounded to whole
/// beats per minute. Keys differing only below one bpm share a file name.
pub fn format_bpm(bpm: f64) -> String {
    format!("{:.0}", bpm)
}

/// A remotely confirmed execution sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecCacheEntry {
    pub key: ExecCacheKey,
    /// Sequence file name to pass to the play call.
    pub exec_file: String,
    pub duration_sec: f64,
    pub total_events: u64,
}

/// Result of a cache check.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheLookup {
    Hit(ExecCacheEntry),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Why a resolve job was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPurpose {
    /// Resolve, then start playback.
    Start,
    /// Resolve only; the entry is kept for a later start.
    Prepare,
}

/// What a finished [`ResolveJob`] produced.
#[derive(Debug)]
pub struct ResolveOutcome {
    pub key: ExecCacheKey,
    pub purpose: JobPurpose,
    pub result: Result<ExecCacheEntry, RigError>,
}

/// A detached check-then-build run.
///
/// The job owns its own handle to the collaborator, so it can be polled from
/// the driver loop while the session keeps serving polls and timer ticks.
pub struct ResolveJob {
    key: ExecCacheKey,
    purpose: JobPurpose,
    future: BoxFuture<'static, Result<ExecCacheEntry, RigError>>,
}

impl ResolveJob {
    pub fn key(&self) -> &ExecCacheKey {
        &self.key
    }
}

impl Future for ResolveJob {
    type Output = ResolveOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(self.future.as_mut().poll(cx));
        Poll::Ready(ResolveOutcome {
            key: self.key.clone(),
            purpose: self.purpose,
            result,
        })
    }
}

impl fmt::Debug for ResolveJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveJob")
            .field("key", &self.key)
            .field("purpose", &self.purpose)
            .finish_non_exhaustive()
    }
}

/// Client side of the execution sequence cache.
pub struct ExecCacheManager<A: ?Sized> {
    api: Arc<A>,
    in_flight: Option<ExecCacheKey>,
}

impl<A: RigApi + ?Sized + 'static> ExecCacheManager<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            in_flight: None,
        }
    }

    /// Look up `key` remotely. Failures are logged and reported as a miss.
    pub async fn check(&self, key: &ExecCacheKey) -> CacheLookup {
        match self.api.check_exec(key).await {
            Ok(Some(entry)) => {
                log::debug!("Cache hit for {}: {}", key, entry.exec_file);
                CacheLookup::Hit(entry)
            }
            Ok(None) => {
                log::debug!("Cache miss for {}", key);
                CacheLookup::Miss
            }
            Err(e) => {
                log::warn!("Cache check for {} failed, treating as miss: {}", key, e);
                CacheLookup::Miss
            }
        }
    }

    /// Build the sequence for `key` and wait for it.
    pub async fn build(&mut self, key: &ExecCacheKey) -> Result<ExecCacheEntry, SessionError> {
        self.claim(key)?;
        log::info!("Preprocessing {}", key);
        let result = self.api.preprocess(key).await;
        self.finish(key);
        Ok(result?)
    }

    /// Start a detached check-then-build for `key`.
    ///
    /// Refused while another job or build is outstanding. The caller must
    /// report completion through [`finish`](Self::finish).
    pub fn begin_resolve(
        &mut self,
        key: ExecCacheKey,
        purpose: JobPurpose,
    ) -> Result<ResolveJob, CacheError> {
        self.claim(&key)?;
        let api = Arc::clone(&self.api);
        let job_key = key.clone();
        let future: BoxFuture<'static, Result<ExecCacheEntry, RigError>> =
            Box::pin(async move {
                match api.check_exec(&job_key).await {
                    Ok(Some(entry)) => return Ok(entry),
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("Cache check for {} failed, preprocessing: {}", job_key, e)
                    }
                }
                log::info!("Preprocessing {}", job_key);
                api.preprocess(&job_key).await
            });
        Ok(ResolveJob {
            key,
            purpose,
            future,
        })
    }

    /// Release the build slot held for `key`.
    pub fn finish(&mut self, key: &ExecCacheKey) {
        if self.in_flight.as_ref() == Some(key) {
            self.in_flight = None;
        }
    }

    /// Key of the outstanding build, if any.
    pub fn in_flight(&self) -> Option<&ExecCacheKey> {
        self.in_flight.as_ref()
    }

    fn claim(&mut self, key: &ExecCacheKey) -> Result<(), CacheError> {
        if let Some(current) = &self.in_flight {
            return Err(CacheError::BuildInFlight(current.to_string()));
        }
        self.in_flight = Some(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRig;
    use std::collections::HashSet;

    fn key(delay: u32) -> ExecCacheKey {
        ExecCacheKey::new("trsmusic/song.json", Instrument::Sks, 72.0, delay)
    }

    #[test]
    fn test_keys_differing_in_delay_are_distinct() {
        assert_ne!(key(30), key(31));
        let set: HashSet<ExecCacheKey> = [key(30), key(31), key(30)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_zero_bpm_variants_are_equal() {
        let a = ExecCacheKey::new("a.json", Instrument::Sn, 0.0, 30);
        let b = ExecCacheKey::new("a.json", Instrument::Sn, -0.0, 30);
        assert_eq!(a, b);
    }

    #[test]
    fn test_exec_file_name_convention() {
        assert_eq!(key(30).exec_file_name(), "song_sks_72_30.exec.json");
        let down = ExecCacheKey::new("song.json", Instrument::Sn, 72.4, 0);
        assert_eq!(down.exec_file_name(), "song_sn_72_0.exec.json");
        assert_eq!(down.bpm_param(), "72");
        let up = ExecCacheKey::new("trsmusic/song.json", Instrument::Sn, 72.6, 0);
        assert_eq!(up.exec_file_name(), "song_sn_73_0.exec.json");
        assert_eq!(format_bpm(0.0), "0");
    }

    #[test]
    fn test_instrument_parsing() {
        assert_eq!("sks".parse::<Instrument>(), Ok(Instrument::Sks));
        assert_eq!("SN".parse::<Instrument>(), Ok(Instrument::Sn));
        assert!("flute".parse::<Instrument>().is_err());
    }

    #[tokio::test]
    async fn test_check_never_shares_entries_across_delays() {
        let rig = Arc::new(FakeRig::new());
        rig.insert_entry(&key(30), 10.0);
        let manager = ExecCacheManager::new(rig);
        assert!(manager.check(&key(30)).await.is_hit());
        assert!(!manager.check(&key(31)).await.is_hit());
    }

    #[tokio::test]
    async fn test_check_fails_open_on_network_error() {
        let rig = Arc::new(FakeRig::new());
        rig.insert_entry(&key(30), 10.0);
        rig.fail_checks(RigError::Network("connection refused".into()));
        let manager = ExecCacheManager::new(rig);
        assert_eq!(manager.check(&key(30)).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_only_one_build_at_a_time() {
        let rig = Arc::new(FakeRig::new());
        let mut manager = ExecCacheManager::new(rig);
        let job = manager.begin_resolve(key(30), JobPurpose::Prepare).unwrap();
        assert!(matches!(
            manager.begin_resolve(key(31), JobPurpose::Start),
            Err(CacheError::BuildInFlight(_))
        ));
        let outcome = job.await;
        manager.finish(&outcome.key);
        assert!(manager.in_flight().is_none());
        assert!(manager.begin_resolve(key(31), JobPurpose::Start).is_ok());
    }

    #[tokio::test]
    async fn test_resolve_uses_existing_entry_before_building() {
        let rig = Arc::new(FakeRig::new());
        rig.insert_entry(&key(30), 8.0);
        let mut manager = ExecCacheManager::new(Arc::clone(&rig));
        let outcome = manager
            .begin_resolve(key(30), JobPurpose::Start)
            .unwrap()
            .await;
        let entry = outcome.result.unwrap();
        assert!((entry.duration_sec - 8.0).abs() < 1e-9);
        assert_eq!(rig.preprocess_calls(), 0);
    }

    #[tokio::test]
    async fn test_build_failure_releases_slot() {
        let rig = Arc::new(FakeRig::new());
        rig.fail_preprocess(RigError::Rejected("fingering missing for F#6".into()));
        let mut manager = ExecCacheManager::new(rig);
        let err = manager.build(&key(30)).await.unwrap_err();
        assert_eq!(err.to_string(), "fingering missing for F#6");
        assert!(manager.in_flight().is_none());
    }
}
