//! Session transition messages.
//!
//! Every change of [`SessionState`](super::SessionState) is expressed as a
//! [`SessionEvent`] and applied by
//! [`SessionController::apply`](super::SessionController::apply). Funnelling
//! the operator's stop and the status feed's end-of-run through the same
//! handler is what makes the two converge on a single `Stopped`.

use std::time::Instant;

use crate::cache::ExecCacheEntry;
use crate::status::SignificantRest;

#[derive(Clone, Debug)]
pub enum SessionEvent {
    // === Start protocol ===
    /// Operator asked to start; execution sequence being resolved.
    PreprocessingStarted,

    /// Resolving or building the sequence failed, or its result went stale.
    PreprocessingFailed,

    /// A sequence was confirmed for the current parameters.
    EntryResolved(ExecCacheEntry),

    /// The rig accepted the play command.
    PlaybackStarted { at: Instant },

    /// The rig refused or never answered the play command.
    LaunchFailed,

    // === Stop protocol ===
    /// The status feed reports the performance finished.
    PlaybackEnded { rests: Vec<SignificantRest> },

    /// The rig confirmed the operator's stop.
    StoppedByOperator,

    // === Parameters ===
    /// Instrument, tempo or tonguing delay changed.
    ParametersChanged,
}
