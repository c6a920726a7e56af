//! Merge layer: the default values every other source overrides.

pub mod merge_policy;
