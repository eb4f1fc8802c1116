//! Session data model.

use serde::Serialize;
use std::fmt;

use crate::api::{music_path, MusicFile};
use crate::cache::{ExecCacheEntry, ExecCacheKey, Instrument};
use crate::timing::LocalTimer;

/// Default articulation latency in milliseconds.
pub const DEFAULT_TONGUING_DELAY_MS: u32 = 30;

/// Where a session is in the start/stop protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Preprocessing,
    Playing,
    Stopped,
}

impl SessionState {
    /// Whether the selection and its parameters are locked.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Preprocessing | SessionState::Playing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Preprocessing => "preprocessing",
            SessionState::Playing => "playing",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The file a session performs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Name used for timeline load and save.
    pub filename: String,
    /// Reference used in cache keys.
    pub source_file: String,
}

impl Selection {
    /// Select a file by name alone. The cache reference is its path in the
    /// rig's music folder, where timeline loads look for it too.
    pub fn named(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            source_file: music_path(&filename),
            filename,
        }
    }
}

impl From<&MusicFile> for Selection {
    fn from(file: &MusicFile) -> Self {
        Self {
            filename: file.filename.clone(),
            source_file: file.source_file(),
        }
    }
}

/// State of the one playback session the application owns.
#[derive(Clone, Debug, Default)]
pub struct PlaybackSession {
    pub selection: Option<Selection>,
    pub instrument: Instrument,
    /// Tempo input; 0 means the document's own tempo.
    pub bpm: f64,
    pub tonguing_delay_ms: u32,
    /// Sequence confirmed for the current parameters.
    pub exec_file: Option<String>,
    pub theoretical_duration_sec: f64,
    pub state: SessionState,
    pub timer: LocalTimer,
}

impl PlaybackSession {
    pub fn new(instrument: Instrument, tonguing_delay_ms: u32) -> Self {
        Self {
            instrument,
            tonguing_delay_ms,
            ..Default::default()
        }
    }

    /// A fresh session for a newly selected file, keeping the operator's
    /// instrument and tonguing delay.
    pub fn for_selection(&self, selection: Selection, bpm: f64) -> Self {
        Self {
            selection: Some(selection),
            bpm,
            ..Self::new(self.instrument, self.tonguing_delay_ms)
        }
    }

    /// Cache key for the current parameters, if a file is selected.
    pub fn cache_key(&self) -> Option<ExecCacheKey> {
        self.selection.as_ref().map(|s| {
            ExecCacheKey::new(
                s.source_file.clone(),
                self.instrument,
                self.bpm,
                self.tonguing_delay_ms,
            )
        })
    }

    pub(crate) fn adopt(&mut self, entry: &ExecCacheEntry) {
        self.exec_file = Some(entry.exec_file.clone());
        self.theoretical_duration_sec = entry.duration_sec;
        self.timer.set_theoretical_duration(entry.duration_sec);
    }

    pub(crate) fn invalidate_exec(&mut self) {
        self.exec_file = None;
        self.theoretical_duration_sec = 0.0;
        self.timer.set_theoretical_duration(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(file_path: Option<&str>) -> MusicFile {
        MusicFile {
            filename: "song.json".to_string(),
            title: "song".to_string(),
            bpm: 60.0,
            duration: 3,
            file_path: file_path.map(str::to_string),
            modified_at: String::new(),
        }
    }

    #[test]
    fn test_named_selection_points_into_music_folder() {
        let selection = Selection::named("song.json");
        assert_eq!(selection.filename, "song.json");
        assert_eq!(selection.source_file, "trsmusic/song.json");
    }

    #[test]
    fn test_listed_selection_prefers_server_path() {
        let selection = Selection::from(&listed(Some("trsmusic/live/song.json")));
        assert_eq!(selection.source_file, "trsmusic/live/song.json");
        let selection = Selection::from(&listed(None));
        assert_eq!(selection.source_file, "trsmusic/song.json");
    }

    #[test]
    fn test_cache_key_uses_source_file() {
        let session = PlaybackSession::new(Instrument::Sn, 30)
            .for_selection(Selection::named("song.json"), 60.0);
        let key = session.cache_key().unwrap();
        assert_eq!(key.source_file, "trsmusic/song.json");
        assert_eq!(key.exec_file_name(), "song_sn_60_30.exec.json");
    }
}
