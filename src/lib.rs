//! FlixTube view-event pipeline.
//!
//! A content-delivery service publishes a "viewed" event to a fanout
//! exchange each time a video is fully streamed. Independent consumers bound
//! to their own durable queues react to every event: the history service
//! appends it to a paginated read model, the recommendations service keeps
//! view counts.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod event;
pub mod handlers;
pub mod http;
pub mod process;
pub mod producer;
pub mod storage;
pub mod topology;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
