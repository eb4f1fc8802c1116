//! The playback session controller.
//!
//! [`SessionController`] owns the single [`PlaybackSession`], the loaded
//! [`TimelineDocument`], the execution cache client and the status poller.
//! It is the only place session state changes; everything else reads it
//! through the query methods.
//!
//! # Start protocol
//!
//! ```text
//! Idle/Stopped --begin_start--> Preprocessing --finish_resolve/launch--> Playing
//!                                     |                                     |
//!                                  failure                 poll: not playing | user_stop
//!                                     v                                     v
//!                                   Idle                                 Stopped
//! ```
//!
//! Starting is split in two so the driver can keep polling while the rig
//! preprocesses: [`begin_start`](SessionController::begin_start) returns a
//! [`StartPlan`], and a detached [`ResolveJob`] is fed back through
//! [`finish_resolve`](SessionController::finish_resolve).
//! [`start`](SessionController::start) runs both halves inline.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::messages::SessionEvent;
use super::model::{PlaybackSession, Selection, SessionState, DEFAULT_TONGUING_DELAY_MS};
use crate::api::RigApi;
use crate::cache::{
    CacheLookup, ExecCacheEntry, ExecCacheKey, ExecCacheManager, Instrument, JobPurpose,
    ResolveJob, ResolveOutcome,
};
use crate::error::{CacheError, Result, SessionError, TimelineError};
use crate::status::{SignificantRest, StatusSnapshot, StatusSynchronizer, DEFAULT_POLL_INTERVAL};
use crate::timeline::{TimelineDocument, TimelineMetrics};
use crate::timing::TimerReading;

/// Initial operator settings.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub instrument: Instrument,
    pub tonguing_delay_ms: u32,
    pub status_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            instrument: Instrument::default(),
            tonguing_delay_ms: DEFAULT_TONGUING_DELAY_MS,
            status_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How a start request continues after entering `Preprocessing`.
#[derive(Debug)]
pub enum StartPlan {
    /// A sequence is already confirmed; call
    /// [`launch`](SessionController::launch).
    Ready,
    /// Run the job, then hand its outcome to
    /// [`finish_resolve`](SessionController::finish_resolve).
    Resolve(ResolveJob),
}

/// A rest edit in progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestEdit {
    pub index: usize,
    pub current_beats: f64,
}

/// Result of committing a rest edit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EditOutcome {
    /// Applied locally and saved on the rig.
    Committed(TimelineMetrics),
    /// Not a rest, or a performance is running.
    Refused,
}

/// Owner of the playback session.
pub struct SessionController<A: ?Sized> {
    api: Arc<A>,
    session: PlaybackSession,
    timeline: Option<TimelineDocument>,
    cache: ExecCacheManager<A>,
    status: StatusSynchronizer<A>,
    rest_report: Vec<SignificantRest>,
    editing: Option<usize>,
}

impl<A: RigApi + ?Sized + 'static> SessionController<A> {
    pub fn new(api: Arc<A>, settings: SessionSettings) -> Self {
        Self {
            cache: ExecCacheManager::new(Arc::clone(&api)),
            status: StatusSynchronizer::new(Arc::clone(&api), settings.status_interval),
            session: PlaybackSession::new(settings.instrument, settings.tonguing_delay_ms),
            api,
            timeline: None,
            rest_report: Vec::new(),
            editing: None,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn timeline(&self) -> Option<&TimelineDocument> {
        self.timeline.as_ref()
    }

    /// Derived timeline values at the current tempo input.
    pub fn metrics(&self) -> Option<TimelineMetrics> {
        self.timeline
            .as_ref()
            .map(|doc| doc.metrics(self.session.bpm))
    }

    /// Significant rests reported at the end of the last natural run.
    pub fn rest_report(&self) -> &[SignificantRest] {
        &self.rest_report
    }

    pub fn latest_status(&self) -> Option<&StatusSnapshot> {
        self.status.latest()
    }

    pub fn status_interval(&self) -> Duration {
        self.status.interval()
    }

    pub fn timer_reading(&self) -> TimerReading {
        self.session.timer.reading()
    }

    pub fn timer_running(&self) -> bool {
        self.session.timer.is_running()
    }

    pub fn cache_key(&self) -> Option<ExecCacheKey> {
        self.session.cache_key()
    }

    /// Whether a resolve job or build is outstanding.
    pub fn is_resolving(&self) -> bool {
        self.cache.in_flight().is_some()
    }

    /// Index of the rest currently being edited.
    pub fn editing_rest(&self) -> Option<usize> {
        self.editing
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    // =========================================================================
    // Selection and parameters
    // =========================================================================

    /// Select a file and load its timeline.
    ///
    /// The new session keeps the instrument and tonguing delay and takes its
    /// tempo from the document. Refused while preprocessing or playing.
    pub async fn select_file(&mut self, selection: Selection) -> Result<&TimelineDocument> {
        if self.session.state.is_active() {
            return Err(SessionError::Busy(self.session.state));
        }
        let doc = self.api.load_timeline(&selection.filename).await?;
        log::info!(
            "Selected {} ({} events, {} bpm)",
            selection.filename,
            doc.events().len(),
            doc.bpm()
        );
        self.session = self.session.for_selection(selection, doc.bpm());
        self.rest_report.clear();
        self.editing = None;
        Ok(&*self.timeline.insert(doc))
    }

    pub fn set_instrument(&mut self, instrument: Instrument) -> Result<()> {
        self.ensure_not_playing()?;
        if self.session.instrument != instrument {
            self.session.instrument = instrument;
            self.apply(SessionEvent::ParametersChanged);
        }
        Ok(())
    }

    /// Set the tempo input. Zero means the document's own tempo.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        if !(bpm >= 0.0 && bpm.is_finite()) {
            return Err(TimelineError::InvalidBpm(bpm).into());
        }
        self.ensure_not_playing()?;
        if self.session.bpm.to_bits() != bpm.to_bits() {
            self.session.bpm = bpm;
            self.apply(SessionEvent::ParametersChanged);
        }
        Ok(())
    }

    pub fn set_tonguing_delay(&mut self, delay_ms: u32) -> Result<()> {
        self.ensure_not_playing()?;
        if self.session.tonguing_delay_ms != delay_ms {
            self.session.tonguing_delay_ms = delay_ms;
            self.apply(SessionEvent::ParametersChanged);
        }
        Ok(())
    }

    fn ensure_not_playing(&self) -> Result<()> {
        if self.session.state == SessionState::Playing {
            Err(SessionError::Busy(SessionState::Playing))
        } else {
            Ok(())
        }
    }

    /// Check the rig for a sequence matching the current parameters and adopt
    /// it on a hit.
    pub async fn refresh_cache(&mut self) -> Result<CacheLookup> {
        if self.session.state.is_active() {
            return Err(SessionError::Busy(self.session.state));
        }
        let key = self.cache_key().ok_or(SessionError::NoFileSelected)?;
        let lookup = self.cache.check(&key).await;
        match &lookup {
            CacheLookup::Hit(entry) => {
                self.apply(SessionEvent::EntryResolved(entry.clone()));
            }
            CacheLookup::Miss => {
                if self.session.exec_file.is_some() {
                    self.apply(SessionEvent::ParametersChanged);
                }
            }
        }
        Ok(lookup)
    }

    // =========================================================================
    // Timeline editing
    // =========================================================================

    /// Open an edit of the rest at `index`.
    ///
    /// Returns `None` (nothing to edit) for notes, out-of-range indices and
    /// while a performance is running.
    pub fn begin_rest_edit(&mut self, index: usize) -> Option<RestEdit> {
        if self.session.state == SessionState::Playing {
            return None;
        }
        let doc = self.timeline.as_ref()?;
        if !doc.is_rest_at(index) {
            return None;
        }
        let current_beats = doc.event(index)?.beats;
        self.editing = Some(index);
        Some(RestEdit {
            index,
            current_beats,
        })
    }

    /// Abandon the open rest edit.
    pub fn cancel_rest_edit(&mut self) {
        self.editing = None;
    }

    /// Change a rest's duration and save the whole timeline on the rig.
    ///
    /// The duration is validated before anything else. The local document is
    /// updated before the save; a failed save is reported but the local change
    /// stays.
    pub async fn commit_rest_edit(&mut self, index: usize, beats: f64) -> Result<EditOutcome> {
        if !(beats > 0.0 && beats.is_finite()) {
            return Err(TimelineError::InvalidDuration(beats).into());
        }
        if self.session.state == SessionState::Playing {
            return Ok(EditOutcome::Refused);
        }
        let Some(doc) = self.timeline.as_mut() else {
            return Ok(EditOutcome::Refused);
        };
        if !doc.is_rest_at(index) {
            return Ok(EditOutcome::Refused);
        }
        doc.set_rest_duration(index, beats)?;
        self.editing = None;

        let doc = &*doc;
        if let Err(e) = self.api.save_timeline(doc.filename(), doc.events()).await {
            log::warn!(
                "Saving timeline {} failed, keeping local edit: {}",
                doc.filename(),
                e
            );
            return Err(e.into());
        }
        log::info!("Rest {} of {} set to {} beats", index, doc.filename(), beats);
        Ok(EditOutcome::Committed(doc.metrics(self.session.bpm)))
    }

    // =========================================================================
    // Start / stop
    // =========================================================================

    /// Enter `Preprocessing` and decide how to obtain the sequence.
    pub fn begin_start(&mut self) -> Result<StartPlan> {
        if self.session.state.is_active() {
            return Err(SessionError::Busy(self.session.state));
        }
        let key = self.cache_key().ok_or(SessionError::NoFileSelected)?;
        if let Some(current) = self.cache.in_flight() {
            return Err(CacheError::BuildInFlight(current.to_string()).into());
        }

        self.apply(SessionEvent::PreprocessingStarted);
        if self.session.exec_file.is_some() {
            return Ok(StartPlan::Ready);
        }
        match self.cache.begin_resolve(key, JobPurpose::Start) {
            Ok(job) => Ok(StartPlan::Resolve(job)),
            Err(e) => {
                self.apply(SessionEvent::PreprocessingFailed);
                Err(e.into())
            }
        }
    }

    /// Resolve a sequence for the current parameters without starting.
    pub fn begin_prepare(&mut self) -> Result<ResolveJob> {
        if self.session.state.is_active() {
            return Err(SessionError::Busy(self.session.state));
        }
        let key = self.cache_key().ok_or(SessionError::NoFileSelected)?;
        Ok(self.cache.begin_resolve(key, JobPurpose::Prepare)?)
    }

    /// Feed back the outcome of a [`ResolveJob`].
    ///
    /// For a start job this continues into [`launch`](Self::launch). Results
    /// for parameters that changed while the job ran are discarded.
    pub async fn finish_resolve(&mut self, outcome: ResolveOutcome) -> Result<()> {
        self.cache.finish(&outcome.key);
        let current = self.cache_key();
        let stale = current.as_ref() != Some(&outcome.key);

        match outcome.purpose {
            JobPurpose::Prepare => {
                let entry = outcome.result?;
                if stale {
                    log::info!("Discarding prepared sequence for {}", outcome.key);
                    return Err(SessionError::StaleBuild);
                }
                self.apply(SessionEvent::EntryResolved(entry));
                Ok(())
            }
            JobPurpose::Start => {
                if self.session.state != SessionState::Preprocessing {
                    log::debug!(
                        "Ignoring resolve result for {} in state {}",
                        outcome.key,
                        self.session.state
                    );
                    return Ok(());
                }
                let entry = match outcome.result {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("Preprocessing {} failed: {}", outcome.key, e);
                        self.apply(SessionEvent::PreprocessingFailed);
                        return Err(e.into());
                    }
                };
                if stale {
                    log::info!("Parameters changed while preprocessing {}", outcome.key);
                    self.apply(SessionEvent::PreprocessingFailed);
                    return Err(SessionError::StaleBuild);
                }
                self.adopt_and_launch(entry).await
            }
        }
    }

    async fn adopt_and_launch(&mut self, entry: ExecCacheEntry) -> Result<()> {
        self.apply(SessionEvent::EntryResolved(entry));
        self.launch().await
    }

    /// Command the rig to play the confirmed sequence.
    pub async fn launch(&mut self) -> Result<()> {
        if self.session.state != SessionState::Preprocessing {
            return Err(SessionError::Busy(self.session.state));
        }
        let Some(exec_file) = self.session.exec_file.clone() else {
            self.apply(SessionEvent::PreprocessingFailed);
            return Err(SessionError::NoFileSelected);
        };
        match self.api.play_exec(&exec_file).await {
            Ok(()) => {
                self.apply(SessionEvent::PlaybackStarted { at: Instant::now() });
                Ok(())
            }
            Err(e) => {
                log::warn!("Play command for {} failed: {}", exec_file, e);
                self.apply(SessionEvent::LaunchFailed);
                Err(e.into())
            }
        }
    }

    /// Start playback, waiting for any preprocessing inline.
    pub async fn start(&mut self) -> Result<()> {
        match self.begin_start()? {
            StartPlan::Ready => self.launch().await,
            StartPlan::Resolve(job) => {
                let outcome = job.await;
                self.finish_resolve(outcome).await
            }
        }
    }

    /// Stop the running performance.
    ///
    /// Returns `Ok(false)` when nothing was playing. If the rig does not
    /// confirm the stop the session stays `Playing`.
    pub async fn user_stop(&mut self) -> Result<bool> {
        if self.session.state != SessionState::Playing {
            return Ok(false);
        }
        self.api.stop_playback().await?;
        Ok(self.apply(SessionEvent::StoppedByOperator))
    }

    // =========================================================================
    // Status and timer
    // =========================================================================

    /// Poll the status feed and reconcile.
    ///
    /// Returns `true` when the poll detected the natural end of the
    /// performance.
    pub async fn poll_status(&mut self) -> bool {
        let snapshot = self.status.poll().await.cloned();
        match snapshot {
            Some(snapshot) => self.observe_status(&snapshot),
            None => false,
        }
    }

    /// Reconcile the session with a status snapshot.
    pub fn observe_status(&mut self, snapshot: &StatusSnapshot) -> bool {
        if !snapshot.is_playing && self.session.state == SessionState::Playing {
            self.apply(SessionEvent::PlaybackEnded {
                rests: snapshot.significant_rests.clone(),
            })
        } else {
            false
        }
    }

    pub fn tick_timer(&mut self, now: Instant) -> Option<TimerReading> {
        self.session.timer.tick(now)
    }

    /// Prepare for shutdown.
    ///
    /// When a performance is running this returns a stop signal for the
    /// caller to fire without waiting on it.
    pub fn teardown(&mut self) -> Option<BoxFuture<'static, ()>> {
        if self.session.state != SessionState::Playing {
            return None;
        }
        self.apply(SessionEvent::StoppedByOperator);
        let api = Arc::clone(&self.api);
        Some(Box::pin(async move {
            if let Err(e) = api.stop_playback().await {
                log::warn!("Stop signal on shutdown failed: {}", e);
            }
        }))
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Apply a transition message. Returns whether anything changed.
    ///
    /// Messages that do not fit the current state are ignored, which makes
    /// repeated stops no-ops.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        use SessionState::*;

        let from = self.session.state;
        match (from, event) {
            (Idle | Stopped, SessionEvent::PreprocessingStarted) => {
                self.session.state = Preprocessing;
                self.session.timer.stop_and_reset();
                self.rest_report.clear();
            }
            (Preprocessing, SessionEvent::PreprocessingFailed | SessionEvent::LaunchFailed) => {
                self.session.state = Idle;
            }
            (Preprocessing, SessionEvent::PlaybackStarted { at }) => {
                self.session.state = Playing;
                self.session.timer.stop_and_reset();
                self.session.timer.start(at);
            }
            (Playing, SessionEvent::PlaybackEnded { rests }) => {
                self.session.state = Stopped;
                self.session.timer.pause_keeping_display();
                self.rest_report = rests;
            }
            (Playing, SessionEvent::StoppedByOperator) => {
                self.session.state = Stopped;
                self.session.timer.stop_and_reset();
            }
            (state, SessionEvent::EntryResolved(entry)) if state != Playing => {
                self.session.adopt(&entry);
                return true;
            }
            (_, SessionEvent::ParametersChanged) => {
                self.session.invalidate_exec();
                return true;
            }
            (state, event) => {
                log::debug!("Ignoring {:?} in state {}", event, state);
                return false;
            }
        }
        log::info!("Session {} -> {}", from, self.session.state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use crate::testing::FakeRig;
    use crate::timeline::TimelineEvent;

    fn scenario_doc() -> TimelineDocument {
        TimelineDocument::new(
            "song.json",
            60.0,
            vec![
                TimelineEvent::new("C4", 2.0).unwrap(),
                TimelineEvent::new("NO", 1.0).unwrap(),
                TimelineEvent::new("D4", 1.0).unwrap(),
            ],
        )
        .unwrap()
    }

    async fn selected() -> (Arc<FakeRig>, SessionController<FakeRig>) {
        let rig = Arc::new(FakeRig::new());
        rig.insert_timeline(scenario_doc());
        let mut controller = SessionController::new(Arc::clone(&rig), SessionSettings::default());
        controller
            .select_file(Selection::named("song.json"))
            .await
            .unwrap();
        (rig, controller)
    }

    async fn playing() -> (Arc<FakeRig>, SessionController<FakeRig>) {
        let (rig, mut controller) = selected().await;
        controller.start().await.unwrap();
        assert_eq!(controller.state(), SessionState::Playing);
        (rig, controller)
    }

    fn ended_with_rest() -> StatusSnapshot {
        StatusSnapshot {
            is_playing: false,
            significant_rests: vec![SignificantRest {
                start_offset_sec: 1.0,
                end_offset_sec: 2.5,
                duration_sec: 1.5,
                beats: 1.5,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_select_loads_timeline_and_metrics() {
        let (_rig, controller) = selected().await;
        assert_eq!(controller.state(), SessionState::Idle);
        let metrics = controller.metrics().unwrap();
        assert!((metrics.total_beats - 4.0).abs() < 1e-9);
        assert!((metrics.duration_sec - 4.0).abs() < 1e-9);
        assert_eq!(metrics.rest_count, 1);
        assert!((controller.session().bpm - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_select_missing_file_is_not_found() {
        let rig = Arc::new(FakeRig::new());
        let mut controller = SessionController::new(rig, SessionSettings::default());
        let err = controller
            .select_file(Selection::named("missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Rig(RigError::NotFound(_))));
        assert!(controller.timeline().is_none());
    }

    #[tokio::test]
    async fn test_start_builds_on_miss_then_plays() {
        let (rig, mut controller) = selected().await;
        rig.set_build_result("x.exec", 12.34);

        controller.start().await.unwrap();

        assert_eq!(controller.state(), SessionState::Playing);
        assert_eq!(controller.session().exec_file.as_deref(), Some("x.exec"));
        assert!((controller.session().theoretical_duration_sec - 12.34).abs() < 1e-9);
        assert_eq!(rig.preprocess_calls(), 1);
        assert_eq!(rig.played(), vec!["x.exec".to_string()]);
        assert!(controller.timer_running());
    }

    #[tokio::test]
    async fn test_start_uses_cached_reference_without_building() {
        let (rig, mut controller) = selected().await;
        let key = controller.cache_key().unwrap();
        rig.insert_entry(&key, 9.0);
        assert!(controller.refresh_cache().await.unwrap().is_hit());

        controller.start().await.unwrap();
        assert_eq!(controller.state(), SessionState::Playing);
        assert_eq!(rig.preprocess_calls(), 0);
    }

    #[tokio::test]
    async fn test_build_failure_reverts_to_idle_with_reason() {
        let (rig, mut controller) = selected().await;
        rig.fail_preprocess(RigError::Rejected("unknown note X9".into()));

        let err = controller.start().await.unwrap_err();
        assert_eq!(err.to_string(), "unknown note X9");
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!controller.is_resolving());
    }

    #[tokio::test]
    async fn test_play_failure_reverts_to_idle() {
        let (rig, mut controller) = selected().await;
        rig.fail_play(RigError::Rejected("pump controller not initialised".into()));

        assert!(controller.start().await.is_err());
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(!controller.timer_running());
    }

    #[tokio::test]
    async fn test_start_refused_while_playing() {
        let (rig, mut controller) = playing().await;
        let err = controller.start().await.unwrap_err();
        assert_eq!(err, SessionError::Busy(SessionState::Playing));
        assert_eq!(rig.played().len(), 1);
    }

    #[tokio::test]
    async fn test_start_without_selection() {
        let rig = Arc::new(FakeRig::new());
        let mut controller = SessionController::new(rig, SessionSettings::default());
        assert_eq!(
            controller.start().await.unwrap_err(),
            SessionError::NoFileSelected
        );
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_poll_detects_natural_end_and_reports_rests() {
        let (rig, mut controller) = playing().await;
        rig.set_status(ended_with_rest());

        assert!(controller.poll_status().await);
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(controller.rest_report().len(), 1);
        assert!(!controller.timer_running());
    }

    #[tokio::test]
    async fn test_empty_rest_list_clears_previous_report() {
        let (rig, mut controller) = playing().await;
        rig.set_status(ended_with_rest());
        controller.poll_status().await;
        assert_eq!(controller.rest_report().len(), 1);

        controller.start().await.unwrap();
        rig.set_status(StatusSnapshot::default());
        assert!(controller.poll_status().await);
        assert!(controller.rest_report().is_empty());
    }

    #[tokio::test]
    async fn test_poll_keeps_timer_display_on_natural_end() {
        let (_rig, mut controller) = playing().await;
        let later = Instant::now() + Duration::from_secs(5);
        controller.tick_timer(later);
        let before = controller.timer_reading();
        assert!(before.elapsed >= Duration::from_secs(5));

        controller.observe_status(&StatusSnapshot::default());
        assert_eq!(controller.timer_reading(), before);
    }

    #[tokio::test]
    async fn test_user_stop_resets_timer_and_keeps_selection() {
        let (rig, mut controller) = playing().await;
        controller.tick_timer(Instant::now() + Duration::from_secs(2));

        assert!(controller.user_stop().await.unwrap());
        assert_eq!(controller.state(), SessionState::Stopped);
        assert_eq!(controller.timer_reading().elapsed, Duration::ZERO);
        assert!(controller.session().selection.is_some());
        assert_eq!(rig.stop_calls(), 1);

        // Restart straight away without selecting again.
        controller.start().await.unwrap();
        assert_eq!(controller.state(), SessionState::Playing);
    }

    #[tokio::test]
    async fn test_user_stop_and_poll_stop_converge_once() {
        let (rig, mut controller) = playing().await;
        assert!(controller.user_stop().await.unwrap());
        rig.set_status(ended_with_rest());
        assert!(!controller.poll_status().await);
        assert_eq!(controller.state(), SessionState::Stopped);
        // The late poll did not overwrite the operator stop's outcome.
        assert!(controller.rest_report().is_empty());
        assert!(!controller.user_stop().await.unwrap());
        assert_eq!(rig.stop_calls(), 1);
    }

    #[tokio::test]
    async fn test_poll_stop_then_user_stop_is_noop() {
        let (rig, mut controller) = playing().await;
        controller.observe_status(&ended_with_rest());
        assert!(!controller.user_stop().await.unwrap());
        assert_eq!(rig.stop_calls(), 0);
        assert_eq!(controller.rest_report().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_playing() {
        let (rig, mut controller) = playing().await;
        rig.fail_stop(RigError::Network("connection reset".into()));
        assert!(controller.user_stop().await.is_err());
        assert_eq!(controller.state(), SessionState::Playing);
    }

    #[tokio::test]
    async fn test_instrument_change_while_stopped_invalidates_reference() {
        let (rig, mut controller) = playing().await;
        controller.user_stop().await.unwrap();
        controller.set_instrument(Instrument::Sks).unwrap();
        controller.set_instrument(Instrument::Sn).unwrap();
        assert!(controller.session().exec_file.is_none());

        let builds = rig.preprocess_calls();
        match controller.begin_start().unwrap() {
            StartPlan::Resolve(job) => {
                assert_eq!(controller.state(), SessionState::Preprocessing);
                let outcome = job.await;
                controller.finish_resolve(outcome).await.unwrap();
            }
            StartPlan::Ready => panic!("expected a fresh resolve"),
        }
        assert_eq!(controller.state(), SessionState::Playing);
        // The first run's sequence is found by the check, no new build needed.
        assert_eq!(rig.preprocess_calls(), builds);
    }

    #[tokio::test]
    async fn test_parameter_changes_refused_while_playing() {
        let (_rig, mut controller) = playing().await;
        let busy = SessionError::Busy(SessionState::Playing);
        assert_eq!(controller.set_instrument(Instrument::Sks).unwrap_err(), busy);
        assert_eq!(controller.set_bpm(90.0).unwrap_err(), busy);
        assert_eq!(controller.set_tonguing_delay(50).unwrap_err(), busy);
        assert!(matches!(
            controller.select_file(Selection::named("song.json")).await,
            Err(SessionError::Busy(SessionState::Playing))
        ));
        assert!(controller.session().exec_file.is_some());
    }

    #[tokio::test]
    async fn test_stale_build_is_discarded() {
        let (_rig, mut controller) = selected().await;
        let job = match controller.begin_start().unwrap() {
            StartPlan::Resolve(job) => job,
            StartPlan::Ready => panic!("nothing cached yet"),
        };
        controller.set_tonguing_delay(45).unwrap();
        let outcome = job.await;
        assert_eq!(
            controller.finish_resolve(outcome).await.unwrap_err(),
            SessionError::StaleBuild
        );
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.session().exec_file.is_none());
    }

    #[tokio::test]
    async fn test_prepare_adopts_entry_and_blocks_second_build() {
        let (rig, mut controller) = selected().await;
        rig.set_build_result("song_sn_60_30.exec.json", 4.2);
        let job = controller.begin_prepare().unwrap();
        assert!(controller.is_resolving());
        assert!(matches!(
            controller.begin_start(),
            Err(SessionError::Cache(_))
        ));
        assert_eq!(controller.state(), SessionState::Idle);

        controller.finish_resolve(job.await).await.unwrap();
        assert_eq!(
            controller.session().exec_file.as_deref(),
            Some("song_sn_60_30.exec.json")
        );
        assert!(matches!(controller.begin_start().unwrap(), StartPlan::Ready));
    }

    #[tokio::test]
    async fn test_rest_edit_commit_persists_whole_timeline() {
        let (rig, mut controller) = selected().await;
        let edit = controller.begin_rest_edit(1).unwrap();
        assert!((edit.current_beats - 1.0).abs() < 1e-9);

        let outcome = controller.commit_rest_edit(1, 3.0).await.unwrap();
        let EditOutcome::Committed(metrics) = outcome else {
            panic!("edit refused");
        };
        assert!((metrics.total_beats - 6.0).abs() < 1e-9);
        assert_eq!(metrics.rest_count, 1);
        let saved = rig.saved_timeline("song.json").unwrap();
        assert_eq!(saved.len(), 3);
        assert!((saved[1].beats - 3.0).abs() < 1e-9);
        assert!(controller.editing_rest().is_none());
    }

    #[tokio::test]
    async fn test_invalid_rest_duration_rejected_before_save() {
        let (rig, mut controller) = selected().await;
        let before = controller.timeline().unwrap().clone();
        let err = controller.commit_rest_edit(2, -1.0).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Timeline(TimelineError::InvalidDuration(-1.0))
        );
        assert_eq!(controller.timeline().unwrap(), &before);
        assert!(rig.saved_timeline("song.json").is_none());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_local_edit() {
        let (rig, mut controller) = selected().await;
        rig.fail_save(RigError::Rejected("failed to write file".into()));
        assert!(controller.commit_rest_edit(1, 2.0).await.is_err());
        let doc = controller.timeline().unwrap();
        assert!((doc.events()[1].beats - 2.0).abs() < 1e-9);
        assert!((controller.metrics().unwrap().total_beats - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rest_edit_refused_for_notes_and_while_playing() {
        let (rig, mut controller) = selected().await;
        assert!(controller.begin_rest_edit(0).is_none());
        assert_eq!(
            controller.commit_rest_edit(0, 2.0).await.unwrap(),
            EditOutcome::Refused
        );

        let (_rig, mut controller) = playing().await;
        assert!(controller.begin_rest_edit(1).is_none());
        assert_eq!(
            controller.commit_rest_edit(1, 2.0).await.unwrap(),
            EditOutcome::Refused
        );
        assert!(rig.saved_timeline("song.json").is_none());
    }

    #[tokio::test]
    async fn test_tempo_change_recomputes_duration() {
        let (_rig, mut controller) = selected().await;
        controller.set_bpm(120.0).unwrap();
        assert!((controller.metrics().unwrap().duration_sec - 2.0).abs() < 1e-9);
        controller.set_bpm(0.0).unwrap();
        assert!((controller.metrics().unwrap().duration_sec - 4.0).abs() < 1e-9);
        assert!(controller.set_bpm(-5.0).is_err());
    }

    #[tokio::test]
    async fn test_teardown_sends_stop_only_when_playing() {
        let (rig, mut controller) = selected().await;
        assert!(controller.teardown().is_none());

        controller.start().await.unwrap();
        let signal = controller.teardown().unwrap();
        assert_eq!(controller.state(), SessionState::Stopped);
        signal.await;
        assert_eq!(rig.stop_calls(), 1);
    }
}
