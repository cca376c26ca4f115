//! Gmail attachment scraper
//!
//! Finds every message from one sender and writes each attachment to a local
//! directory, running listing, content retrieval, attachment download and
//! persistence as concurrent stages.

#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

/// Command line and file configuration
pub mod config;
/// Stage implementations and the run coordinator
pub mod pipeline;
/// Interactive sender prompt
pub mod prompt;
/// Attachment persistence
pub mod storage;
