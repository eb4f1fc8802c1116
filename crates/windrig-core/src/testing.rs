//! In-memory rig for unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::api::{music_path, Fingering, LogLine, MusicFile, PumpReply, RigApi};
use crate::cache::{ExecCacheEntry, ExecCacheKey, Instrument};
use crate::error::RigError;
use crate::status::StatusSnapshot;
use crate::timeline::{TimelineDocument, TimelineEvent};

#[derive(Default)]
struct FakeState {
    entries: HashMap<ExecCacheKey, ExecCacheEntry>,
    build_result: Option<(String, f64)>,
    check_error: Option<RigError>,
    preprocess_error: Option<RigError>,
    preprocess_calls: usize,
    timelines: HashMap<String, TimelineDocument>,
    saved: HashMap<String, Vec<TimelineEvent>>,
    save_error: Option<RigError>,
    status: StatusSnapshot,
    status_error: Option<RigError>,
    played: Vec<String>,
    play_error: Option<RigError>,
    stop_calls: usize,
    stop_error: Option<RigError>,
    logs: Vec<LogLine>,
    logs_error: Option<RigError>,
}

/// Scriptable [`RigApi`] double.
#[derive(Default)]
pub struct FakeRig {
    state: Mutex<FakeState>,
}

impl FakeRig {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn insert_entry(&self, key: &ExecCacheKey, duration_sec: f64) {
        let entry = ExecCacheEntry {
            key: key.clone(),
            exec_file: key.exec_file_name(),
            duration_sec,
            total_events: 3,
        };
        self.with(|s| s.entries.insert(key.clone(), entry));
    }

    pub fn set_build_result(&self, exec_file: &str, duration_sec: f64) {
        self.with(|s| s.build_result = Some((exec_file.to_string(), duration_sec)));
    }

    pub fn fail_checks(&self, err: RigError) {
        self.with(|s| s.check_error = Some(err));
    }

    pub fn fail_preprocess(&self, err: RigError) {
        self.with(|s| s.preprocess_error = Some(err));
    }

    pub fn preprocess_calls(&self) -> usize {
        self.with(|s| s.preprocess_calls)
    }

    pub fn insert_timeline(&self, doc: TimelineDocument) {
        self.with(|s| s.timelines.insert(doc.filename().to_string(), doc));
    }

    pub fn fail_save(&self, err: RigError) {
        self.with(|s| s.save_error = Some(err));
    }

    pub fn saved_timeline(&self, filename: &str) -> Option<Vec<TimelineEvent>> {
        self.with(|s| s.saved.get(filename).cloned())
    }

    pub fn set_status(&self, status: StatusSnapshot) {
        self.with(|s| s.status = status);
    }

    pub fn fail_status(&self, err: Option<RigError>) {
        self.with(|s| s.status_error = err);
    }

    pub fn fail_play(&self, err: RigError) {
        self.with(|s| s.play_error = Some(err));
    }

    pub fn played(&self) -> Vec<String> {
        self.with(|s| s.played.clone())
    }

    pub fn fail_stop(&self, err: RigError) {
        self.with(|s| s.stop_error = Some(err));
    }

    pub fn stop_calls(&self) -> usize {
        self.with(|s| s.stop_calls)
    }

    pub fn push_log(&self, kind: &str, message: &str) {
        self.with(|s| {
            s.logs.push(LogLine {
                timestamp: format!("00:00:{:02}", s.logs.len()),
                kind: kind.to_string(),
                message: message.to_string(),
            })
        });
    }

    pub fn fail_logs(&self, err: RigError) {
        self.with(|s| s.logs_error = Some(err));
    }
}

#[async_trait]
impl RigApi for FakeRig {
    async fn search_files(&self, query: &str) -> Result<Vec<MusicFile>, RigError> {
        Ok(self.with(|s| {
            s.timelines
                .values()
                .filter(|doc| doc.filename().contains(query))
                .map(|doc| MusicFile {
                    filename: doc.filename().to_string(),
                    title: doc.filename().trim_end_matches(".json").to_string(),
                    bpm: doc.bpm(),
                    duration: doc.events().len() as u64,
                    file_path: Some(music_path(doc.filename())),
                    modified_at: String::new(),
                })
                .collect()
        }))
    }

    async fn load_timeline(&self, filename: &str) -> Result<TimelineDocument, RigError> {
        self.with(|s| s.timelines.get(filename).cloned())
            .ok_or_else(|| RigError::NotFound(filename.to_string()))
    }

    async fn save_timeline(
        &self,
        filename: &str,
        events: &[TimelineEvent],
    ) -> Result<(), RigError> {
        self.with(|s| {
            if let Some(err) = &s.save_error {
                return Err(err.clone());
            }
            s.saved.insert(filename.to_string(), events.to_vec());
            Ok(())
        })
    }

    async fn check_exec(&self, key: &ExecCacheKey) -> Result<Option<ExecCacheEntry>, RigError> {
        self.with(|s| match &s.check_error {
            Some(err) => Err(err.clone()),
            None => Ok(s.entries.get(key).cloned()),
        })
    }

    async fn preprocess(&self, key: &ExecCacheKey) -> Result<ExecCacheEntry, RigError> {
        self.with(|s| {
            s.preprocess_calls += 1;
            if let Some(err) = &s.preprocess_error {
                return Err(err.clone());
            }
            let (exec_file, duration_sec) = s
                .build_result
                .clone()
                .unwrap_or_else(|| (key.exec_file_name(), 12.34));
            let entry = ExecCacheEntry {
                key: key.clone(),
                exec_file,
                duration_sec,
                total_events: 3,
            };
            s.entries.insert(key.clone(), entry.clone());
            Ok(entry)
        })
    }

    async fn play_exec(&self, exec_file: &str) -> Result<(), RigError> {
        self.with(|s| {
            if let Some(err) = &s.play_error {
                return Err(err.clone());
            }
            s.played.push(exec_file.to_string());
            Ok(())
        })
    }

    async fn stop_playback(&self) -> Result<(), RigError> {
        self.with(|s| {
            if let Some(err) = &s.stop_error {
                return Err(err.clone());
            }
            s.stop_calls += 1;
            Ok(())
        })
    }

    async fn playback_status(&self) -> Result<StatusSnapshot, RigError> {
        self.with(|s| match &s.status_error {
            Some(err) => Err(err.clone()),
            None => Ok(s.status.clone()),
        })
    }

    async fn playback_logs(&self) -> Result<Vec<LogLine>, RigError> {
        self.with(|s| match &s.logs_error {
            Some(err) => Err(err.clone()),
            None => Ok(s.logs.clone()),
        })
    }

    async fn fingerings(&self, _instrument: Instrument) -> Result<Vec<Fingering>, RigError> {
        Ok(vec![
            Fingering {
                note: "C4".to_string(),
                left: vec!["L1".to_string(), "L2".to_string()],
                right: vec!["R1".to_string()],
            },
            Fingering {
                note: "C5".to_string(),
                left: Vec::new(),
                right: Vec::new(),
            },
        ])
    }

    async fn send_fingering(
        &self,
        note: &str,
        instrument: Instrument,
    ) -> Result<String, RigError> {
        Ok(format!("sent {} for {}", note, instrument))
    }

    async fn pump_debug(&self, command: &str) -> Result<PumpReply, RigError> {
        Ok(PumpReply {
            message: "ok".to_string(),
            response: Some(command.to_string()),
        })
    }
}
