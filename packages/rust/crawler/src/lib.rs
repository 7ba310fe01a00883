//! Concurrent page fetching and content extraction.
//!
//! This crate provides:
//! - [`ConcurrencyGate`]: counting-permit admission control
//! - [`FetchUnit`] / [`HttpFetcher`]: one polite, bounded GET per call
//! - [`ContentExtractor`] / [`SelectorExtractor`]: title and text extraction
//! - [`BatchFetcher`]: fan-out over many targets with isolated failures

pub mod batch;
pub mod extract;
pub mod fetch;
pub mod gate;

pub use batch::{BatchFetcher, BatchReport, OnFetched};
pub use extract::{ContentExtractor, Extracted, FALLBACK_TITLE, SelectorExtractor};
pub use fetch::{FetchUnit, HttpFetcher, OUTCOME_CONTENT_CHARS, OUTCOME_TITLE_CHARS};
pub use gate::{ConcurrencyGate, GatePermit};
