//! Timeline document: the ordered note/rest sequence of one song.
//!
//! A [`TimelineDocument`] is loaded from the rig's file store when the operator
//! selects a song. Event order is performance order and never changes; the only
//! mutation is changing the duration of a rest, see
//! [`TimelineDocument::set_rest_duration`].
//!
//! Derived values live in [`TimelineMetrics`] and are recomputed from the events
//! on every call to [`TimelineDocument::metrics`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TimelineError;

/// Symbol the file format uses for silence.
pub const REST_MARKER: &str = "NO";

/// Tempo used when a file carries no usable bpm.
pub const DEFAULT_BPM: f64 = 60.0;

/// What sounds during one timeline event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Symbol {
    /// A note identifier from the instrument's fingering table, e.g. `"C4"`.
    Note(String),
    /// Silence.
    Rest,
}

impl Symbol {
    pub fn is_rest(&self) -> bool {
        matches!(self, Symbol::Rest)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Symbol::Note(note) => note,
            Symbol::Rest => REST_MARKER,
        }
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        if value == REST_MARKER {
            Symbol::Rest
        } else {
            Symbol::Note(value.to_string())
        }
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        if value == REST_MARKER {
            Symbol::Rest
        } else {
            Symbol::Note(value)
        }
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        match value {
            Symbol::Note(note) => note,
            Symbol::Rest => REST_MARKER.to_string(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One note or rest with its length in beats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub symbol: Symbol,
    pub beats: f64,
}

impl TimelineEvent {
    /// Create an event, rejecting non-positive durations.
    pub fn new(symbol: impl Into<Symbol>, beats: f64) -> Result<Self, TimelineError> {
        validate_beats(beats)?;
        Ok(Self {
            symbol: symbol.into(),
            beats,
        })
    }

    pub fn is_rest(&self) -> bool {
        self.symbol.is_rest()
    }
}

fn validate_beats(beats: f64) -> Result<(), TimelineError> {
    // NaN fails the comparison too.
    if beats > 0.0 && beats.is_finite() {
        Ok(())
    } else {
        Err(TimelineError::InvalidDuration(beats))
    }
}

/// A song's note/rest sequence as stored on the rig.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineDocument {
    filename: String,
    bpm: f64,
    events: Vec<TimelineEvent>,
}

impl TimelineDocument {
    /// Build a document, checking the tempo and every event duration.
    pub fn new(
        filename: impl Into<String>,
        bpm: f64,
        events: Vec<TimelineEvent>,
    ) -> Result<Self, TimelineError> {
        if !(bpm > 0.0 && bpm.is_finite()) {
            return Err(TimelineError::InvalidBpm(bpm));
        }
        for event in &events {
            validate_beats(event.beats)?;
        }
        Ok(Self {
            filename: filename.into(),
            bpm,
            events,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Tempo stored in the file.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn event(&self, index: usize) -> Option<&TimelineEvent> {
        self.events.get(index)
    }

    /// Whether the event at `index` exists and is a rest.
    pub fn is_rest_at(&self, index: usize) -> bool {
        self.events.get(index).is_some_and(TimelineEvent::is_rest)
    }

    /// Change the length of the rest at `index`.
    ///
    /// The duration is validated before the index, so an invalid duration is
    /// reported even for an index that could never be edited.
    pub fn set_rest_duration(&mut self, index: usize, beats: f64) -> Result<(), TimelineError> {
        validate_beats(beats)?;
        let len = self.events.len();
        let event = self
            .events
            .get_mut(index)
            .ok_or(TimelineError::IndexOutOfRange { index, len })?;
        if !event.is_rest() {
            return Err(TimelineError::NotARest(index));
        }
        event.beats = beats;
        Ok(())
    }

    /// Recompute the derived metrics.
    ///
    /// `bpm_override` is the operator's tempo input; zero or negative means
    /// "use the document tempo".
    pub fn metrics(&self, bpm_override: f64) -> TimelineMetrics {
        let bpm = if bpm_override > 0.0 {
            bpm_override
        } else {
            self.bpm
        };
        let total_beats: f64 = self.events.iter().map(|e| e.beats).sum();
        let rest_count = self.events.iter().filter(|e| e.is_rest()).count();
        TimelineMetrics {
            bpm,
            total_beats,
            total_events: self.events.len(),
            rest_count,
            duration_sec: total_beats / bpm * 60.0,
        }
    }
}

/// Values derived from a timeline at one tempo.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimelineMetrics {
    /// The tempo the duration was computed at.
    pub bpm: f64,
    pub total_beats: f64,
    pub total_events: usize,
    pub rest_count: usize,
    pub duration_sec: f64,
}

/// Format seconds as `M:SS`.
pub fn format_song_length(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = (seconds % 60.0).floor() as u64;
    format!("{}:{:02}", minutes, secs)
}

/// Format seconds as `M:SS.mmm`.
pub fn format_offset(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = (seconds % 60.0).floor() as u64;
    let millis = ((seconds % 1.0) * 1000.0).floor() as u64;
    format!("{}:{:02}.{:03}", minutes, secs, millis)
}
