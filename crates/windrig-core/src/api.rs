//! The rig collaborator contract.
//!
//! Everything the controller needs from the rig server goes through
//! [`RigApi`]. `windrig-http` implements it over HTTP; tests use an in-memory
//! double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{ExecCacheEntry, ExecCacheKey, Instrument};
use crate::error::RigError;
use crate::status::StatusSnapshot;
use crate::timeline::{TimelineDocument, TimelineEvent};

/// Folder on the rig that timeline names are resolved against.
pub const MUSIC_ROOT: &str = "trsmusic";

/// Server-side path of the music file called `filename`.
pub fn music_path(filename: &str) -> String {
    format!("{}/{}", MUSIC_ROOT, filename.trim_start_matches('/'))
}

/// A music file offered by the rig's file listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MusicFile {
    pub filename: String,
    pub title: String,
    pub bpm: f64,
    /// Number of timeline events.
    pub duration: u64,
    /// Server-side path; used as the cache source file when present.
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub modified_at: String,
}

impl MusicFile {
    /// The source file reference the server expects in cache requests.
    pub fn source_file(&self) -> String {
        match &self.file_path {
            Some(path) if !path.is_empty() => path.clone(),
            _ => music_path(&self.filename),
        }
    }
}

/// One line of the rig's playback log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Finger positions for one note.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fingering {
    pub note: String,
    #[serde(default)]
    pub left: Vec<String>,
    #[serde(default)]
    pub right: Vec<String>,
}

/// Reply to a raw pump debug command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PumpReply {
    pub message: String,
    #[serde(default)]
    pub response: Option<String>,
}

/// Request/response contract of the rig server.
#[async_trait]
pub trait RigApi: Send + Sync {
    /// List music files, optionally filtered by a search string.
    async fn search_files(&self, query: &str) -> Result<Vec<MusicFile>, RigError>;

    /// Load a song's timeline. Absent files yield [`RigError::NotFound`].
    async fn load_timeline(&self, filename: &str) -> Result<TimelineDocument, RigError>;

    /// Replace the stored timeline of `filename` with `events`.
    async fn save_timeline(&self, filename: &str, events: &[TimelineEvent])
        -> Result<(), RigError>;

    /// Look up a precomputed sequence; `Ok(None)` is a miss.
    async fn check_exec(&self, key: &ExecCacheKey) -> Result<Option<ExecCacheEntry>, RigError>;

    /// Compute the execution sequence for `key`. May take a long time.
    async fn preprocess(&self, key: &ExecCacheKey) -> Result<ExecCacheEntry, RigError>;

    /// Start performing a precomputed sequence.
    async fn play_exec(&self, exec_file: &str) -> Result<(), RigError>;

    async fn stop_playback(&self) -> Result<(), RigError>;

    async fn playback_status(&self) -> Result<StatusSnapshot, RigError>;

    async fn playback_logs(&self) -> Result<Vec<LogLine>, RigError>;

    async fn fingerings(&self, instrument: Instrument) -> Result<Vec<Fingering>, RigError>;

    /// Press the fingering for a single note on the hardware.
    async fn send_fingering(&self, note: &str, instrument: Instrument)
        -> Result<String, RigError>;

    /// Forward a raw command to the air pump controller.
    async fn pump_debug(&self, command: &str) -> Result<PumpReply, RigError>;
}
