//! Wire models for the rig server's JSON API.
//!
//! These mirror what the server actually sends, including its looser corners
//! (nullable lists, numeric strings). Conversion into core types happens here
//! so the client code only deals with validated values.

use serde::{Deserialize, Serialize};
use windrig_core::timeline::DEFAULT_BPM;
use windrig_core::{
    ExecCacheEntry, ExecCacheKey, Fingering, LogLine, MusicFile, SignificantRest, StatusSnapshot,
    TimelineDocument, TimelineError, TimelineEvent,
};

// ============================================================================
// Errors
// ============================================================================

/// Body of a non-2xx response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> String {
        match self.details {
            Some(details) if !details.is_empty() && details != self.error => {
                format!("{} ({})", self.error, details)
            }
            _ => self.error,
        }
    }
}

/// Generic acknowledgement carrying a human-readable message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FileList {
    #[serde(default)]
    pub files: Option<Vec<MusicFile>>,
    #[serde(default)]
    pub total: usize,
}

// ============================================================================
// Timeline
// ============================================================================

/// A duration cell; the file format allows numbers and numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Beats {
    Number(f64),
    Text(String),
}

impl Beats {
    pub fn value(&self) -> Option<f64> {
        match self {
            Beats::Number(v) => Some(*v),
            Beats::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// One `[symbol, beats]` row.
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineRow(pub String, pub Beats);

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineResponse {
    pub filename: String,
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub timeline: Vec<TimelineRow>,
}

impl TimelineResponse {
    /// Validate into a document. Missing or unusable tempo falls back to the
    /// default.
    pub fn into_document(self) -> Result<TimelineDocument, TimelineError> {
        let bpm = self
            .bpm
            .filter(|b| *b > 0.0 && b.is_finite())
            .unwrap_or(DEFAULT_BPM);
        let events = self
            .timeline
            .into_iter()
            .map(|TimelineRow(symbol, beats)| {
                let value = beats.value().unwrap_or(f64::NAN);
                TimelineEvent::new(symbol, value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        TimelineDocument::new(self.filename, bpm, events)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineUpdate<'a> {
    pub filename: &'a str,
    pub timeline: Vec<(&'a str, f64)>,
}

impl<'a> TimelineUpdate<'a> {
    pub fn new(filename: &'a str, events: &'a [TimelineEvent]) -> Self {
        Self {
            filename,
            timeline: events
                .iter()
                .map(|e| (e.symbol.as_str(), e.beats))
                .collect(),
        }
    }
}

// ============================================================================
// Execution cache
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ExecCheckResponse {
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub exec_file: String,
    #[serde(default)]
    pub duration_sec: f64,
    #[serde(default)]
    pub total_events: u64,
    /// Set when the file exists but could not be read.
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecCheckResponse {
    pub fn into_entry(self, key: &ExecCacheKey) -> Option<ExecCacheEntry> {
        if !self.exists {
            if let Some(err) = &self.error {
                log::warn!("Sequence for {} unusable: {}", key, err);
            }
            return None;
        }
        Some(ExecCacheEntry {
            key: key.clone(),
            exec_file: self.exec_file,
            duration_sec: self.duration_sec,
            total_events: self.total_events,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreprocessRequest<'a> {
    pub source_file: &'a str,
    pub instrument: &'a str,
    pub bpm: f64,
    pub tonguing_delay: u32,
}

impl<'a> From<&'a ExecCacheKey> for PreprocessRequest<'a> {
    fn from(key: &'a ExecCacheKey) -> Self {
        Self {
            source_file: &key.source_file,
            instrument: key.instrument.as_str(),
            bpm: key.bpm,
            tonguing_delay: key.tonguing_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessResponse {
    pub exec_file: String,
    #[serde(default)]
    pub duration_sec: f64,
    #[serde(default)]
    pub total_events: u64,
}

impl PreprocessResponse {
    pub fn into_entry(self, key: &ExecCacheKey) -> ExecCacheEntry {
        ExecCacheEntry {
            key: key.clone(),
            exec_file: self.exec_file,
            duration_sec: self.duration_sec,
            total_events: self.total_events,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayRequest<'a> {
    pub exec_file: &'a str,
}

// ============================================================================
// Playback status
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RestTiming {
    pub start_offset: f64,
    pub end_offset: f64,
    pub duration: f64,
    pub beats: f64,
}

impl From<RestTiming> for SignificantRest {
    fn from(r: RestTiming) -> Self {
        Self {
            start_offset_sec: r.start_offset,
            end_offset_sec: r.end_offset,
            duration_sec: r.duration,
            beats: r.beats,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub current_file: String,
    pub progress: f64,
    pub current_note: u64,
    pub total_notes: u64,
    pub elapsed_time: String,
    pub remaining_time: String,
    pub theoretical_duration: f64,
    pub actual_duration: f64,
    pub significant_rests: Option<Vec<RestTiming>>,
}

impl From<PlaybackStatus> for StatusSnapshot {
    fn from(s: PlaybackStatus) -> Self {
        Self {
            is_playing: s.is_playing,
            current_file: s.current_file,
            progress_percent: s.progress,
            current_note: s.current_note,
            total_notes: s.total_notes,
            elapsed_time: s.elapsed_time,
            remaining_time: s.remaining_time,
            theoretical_duration_sec: s.theoretical_duration,
            actual_duration_sec: s.actual_duration,
            significant_rests: s
                .significant_rests
                .unwrap_or_default()
                .into_iter()
                .map(SignificantRest::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Option<Vec<LogLine>>,
}

// ============================================================================
// Fingerings and pump
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FingeringRow {
    pub note: String,
    #[serde(default)]
    pub left: Option<Vec<String>>,
    #[serde(default)]
    pub right: Option<Vec<String>>,
}

impl From<FingeringRow> for Fingering {
    fn from(row: FingeringRow) -> Self {
        Self {
            note: row.note,
            left: row.left.unwrap_or_default(),
            right: row.right.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FingeringsResponse {
    #[serde(default)]
    pub fingerings: Option<Vec<FingeringRow>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FingeringSend<'a> {
    pub note: &'a str,
    pub instrument: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PumpCommand<'a> {
    pub command: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_rows_accept_numeric_strings() {
        let body = r#"{"filename":"a.json","bpm":72,"timeline":[["C4",2],["NO","1.5"]]}"#;
        let doc = serde_json::from_str::<TimelineResponse>(body)
            .unwrap()
            .into_document()
            .unwrap();
        assert_eq!(doc.bpm(), 72.0);
        assert!(doc.is_rest_at(1));
        assert!((doc.events()[1].beats - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_timeline_without_bpm_uses_default() {
        let body = r#"{"filename":"a.json","timeline":[["C4",1]]}"#;
        let doc = serde_json::from_str::<TimelineResponse>(body)
            .unwrap()
            .into_document()
            .unwrap();
        assert_eq!(doc.bpm(), DEFAULT_BPM);
    }

    #[test]
    fn test_unparseable_duration_rejects_document() {
        let body = r#"{"filename":"a.json","bpm":60,"timeline":[["C4","long"]]}"#;
        let resp = serde_json::from_str::<TimelineResponse>(body).unwrap();
        assert!(matches!(
            resp.into_document(),
            Err(TimelineError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_null_rest_list_is_empty() {
        let body = r#"{"is_playing":false,"significant_rests":null}"#;
        let status: StatusSnapshot = serde_json::from_str::<PlaybackStatus>(body).unwrap().into();
        assert!(status.significant_rests.is_empty());
    }

    #[test]
    fn test_status_keeps_rig_durations() {
        let body = r#"{
            "is_playing": true,
            "elapsed_time": "00:41",
            "remaining_time": "01:19",
            "progress": 34.2,
            "theoretical_duration": 120.0,
            "actual_duration": 41.3
        }"#;
        let status: StatusSnapshot = serde_json::from_str::<PlaybackStatus>(body).unwrap().into();
        assert_eq!(status.remaining_time, "01:19");
        assert_eq!(status.theoretical_duration_sec, 120.0);
        assert_eq!(status.actual_duration_sec, 41.3);
    }

    #[test]
    fn test_update_body_shape() {
        let events = vec![
            TimelineEvent::new("C4", 2.0).unwrap(),
            TimelineEvent::new("NO", 1.0).unwrap(),
        ];
        let value = serde_json::to_value(TimelineUpdate::new("a.json", &events)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"filename": "a.json", "timeline": [["C4", 2.0], ["NO", 1.0]]})
        );
    }

    #[test]
    fn test_error_details_appended() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"error":"pump offline","details":"serial closed"}"#).unwrap();
        assert_eq!(body.into_message(), "pump offline (serial closed)");
    }
}
