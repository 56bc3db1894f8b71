//! Orchestration of one snapshot run.
//!
//! [`Pipeline::run`] takes the URLs to publish and drives three phases on a
//! 0 to 100 progress scale:
//!
//! 1. **0-80**: fetch every URL (from the cache when still valid), transform
//!    fresh pages and write each one into a private [`Workspace`].
//! 2. **80-90**: copy static assets from the site root and delete anything
//!    matching the [exclusions](Exclusions).
//! 3. **90-100**: hand the finished workspace to each enabled sink in a
//!    fixed order. Sinks fail independently.
//!
//! Only one run may be active at a time, enforced by a [`RunLock`] marker
//! file. The lease and the workspace are both drop guards, so they are
//! released on every exit path. Nothing is returned as an error: the
//! [`RunResult`] and the [`Observer`] carry every outcome.

mod assets;
pub mod error;
mod lease;
mod observer;
mod run;
mod workspace;

pub use crate::assets::{Exclusions, FORCE_EXCLUDE};
pub use crate::lease::{MARKER_FILE, RunLease, RunLock};
pub use crate::observer::{LOG_CAPACITY, LogRecord, Observer, PROGRESS_TTL, Progress, RunLog};
pub use crate::run::{Pipeline, RunResult, RunStatus, SinkReport};
pub use crate::workspace::Workspace;
