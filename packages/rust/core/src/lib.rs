//! Pipeline orchestration for articlepipe.
//!
//! This crate ties the batch fetcher, the record mapper and the article store
//! into one invocation that returns [`BatchStatistics`](articlepipe_shared::BatchStatistics).

pub mod mapper;
pub mod pipeline;
pub mod retry;

pub use mapper::{RECORD_CONTENT_CHARS, RECORD_TITLE_CHARS, RecordMapper};
pub use pipeline::{Pipeline, ProgressReporter, SilentProgress};
pub use retry::{IsRetryable, RetryPolicy, with_retry};
