//! Utility modules for bggfinna-ingest

pub mod backoff;

pub use backoff::{BackoffPolicy, RetryBudget, Sleeper, TokioSleeper};
