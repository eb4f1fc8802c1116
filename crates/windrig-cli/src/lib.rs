//! windrig - operator console for the windrig performance rig
//!
//! Drives a robotic saxophone/suona rig server from the terminal: select a
//! song, edit its rests, preprocess and start the performance, and follow the
//! rig's status and log while it plays.

pub mod config;
pub mod console;
pub mod driver;
pub mod error;

pub use config::Config;
pub use driver::Driver;
pub use error::{Error, Result};
