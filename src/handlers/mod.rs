//! Consumer-specific side effects.
//!
//! Each handler plugs into a [`ConsumerLoop`](crate::consumer::ConsumerLoop)
//! bound to its own queue:
//! - `HistoryRecorder`: appends every view to the history read model
//! - `RecommendationsHandler`: keeps per-video view counts

pub mod history;
pub mod recommendations;

pub use history::HistoryRecorder;
pub use recommendations::RecommendationsHandler;
