//! Playback session management.
//!
//! The application owns exactly one playback session. Every state change is
//! a [`SessionEvent`] applied by the [`SessionController`], so the operator's
//! stop and the status feed's end-of-run converge on the same `Stopped` state.
//!
//! # Architecture
//!
//! - [`PlaybackSession`] - Selection, parameters, state and timer
//! - [`SessionEvent`] - All possible state transitions
//! - [`SessionController`] - Start/stop protocol and reconciliation

mod controller;
mod messages;
mod model;

pub use controller::{EditOutcome, RestEdit, SessionController, SessionSettings, StartPlan};
pub use messages::SessionEvent;
pub use model::{PlaybackSession, Selection, SessionState, DEFAULT_TONGUING_DELAY_MS};
