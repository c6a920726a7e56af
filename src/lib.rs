//! coursegen: Curriculum Content Generation Pipeline
//!
//! Expands a curriculum catalog into generation specs, drives each spec through
//! a content producer, a three-stage validator and an optional LLM judge, and
//! tracks every spec in a
//! durable, resumable status store.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod content;
pub mod error;
pub mod judge;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod producer;
pub mod progress;
pub mod resolver;
pub mod schema;
pub mod status;
pub mod validator;
