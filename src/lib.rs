//! Sabai — a conversational NCD health-triage assistant.
//!
//! Single Rust binary. Accepts free-text turns over HTTP, grounds replies in
//! a knowledge-base index, periodically classifies the user into a coarse
//! risk bucket, and persists the full dialogue per user.
//!
//! See `DESIGN.md` for architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod notify;
pub mod providers;
pub mod retrieval;
pub mod store;

pub mod engine;
pub mod server;
