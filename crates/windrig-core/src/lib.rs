//! Windrig Core - Session control for the windrig performance rig.
//!
//! The rig is a robotic wind instrument: fingering actuators and an air pump
//! driven by a server that plays precomputed execution sequences. This crate
//! is the client side of that server:
//!
//! - **Timeline** - Note/rest documents, rest editing, derived metrics
//! - **Cache** - Execution sequence keys, checks and builds
//! - **Session** - The start/stop protocol and its state machine
//! - **Status** - Periodic reconciliation with the rig's playback status
//! - **Timing** - Local elapsed-time and drift measurement
//!
//! # Architecture
//!
//! All remote calls go through the [`RigApi`] trait. The [`SessionController`]
//! owns the session and applies every state change through [`SessionEvent`].
//! Long-running builds are detached as [`ResolveJob`] futures so a driver can
//! keep polling status while the rig preprocesses.

pub mod api;
pub mod cache;
pub mod error;
pub mod session;
pub mod status;
pub mod timeline;
pub mod timing;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use api::{music_path, Fingering, LogLine, MusicFile, PumpReply, RigApi, MUSIC_ROOT};
pub use cache::{
    CacheLookup, ExecCacheEntry, ExecCacheKey, ExecCacheManager, Instrument, JobPurpose,
    ResolveJob, ResolveOutcome,
};
pub use error::{CacheError, Result, RigError, SessionError, TimelineError};
pub use session::{
    EditOutcome, PlaybackSession, RestEdit, Selection, SessionController, SessionEvent,
    SessionSettings, SessionState, StartPlan,
};
pub use status::{SignificantRest, StatusSnapshot, StatusSynchronizer};
pub use timeline::{Symbol, TimelineDocument, TimelineEvent, TimelineMetrics};
pub use timing::{Drift, LocalTimer, TimerReading};
