//! Conflict detection between the branches of a repository.
//!
//! [`detector`] drives the pairwise merge probes and the conflict lifecycle;
//! [`ignore`] decides which conflicting files are not reported.

pub mod detector;
pub mod ignore;

pub use detector::{ConflictDetector, DetectionReport};
pub use ignore::IgnoredFiles;
