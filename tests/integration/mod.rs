//! Integration tests for the content generation pipeline

pub mod test_utils;

mod cancellation;
mod crash_recovery;
mod judge_stage;
mod logging_default;
mod pipeline_run;
mod similarity_fallback;
mod store_failure;
