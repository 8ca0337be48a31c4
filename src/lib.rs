// src/lib.rs

//! Airlift Over-the-Air Package Manager
//!
//! Manages delivery of replacement application content packages for a
//! packaged mobile application: new content can be staged, installed,
//! confirmed, or automatically rolled back without a binary release.
//!
//! # Architecture
//!
//! - Database-first: all durable state (package slots, flags, blacklist,
//!   pending install, status report) lives in SQLite
//! - Two-slot metadata: exactly one current and at most one previous package
//! - Crash-safe lifecycle: an install applied but never confirmed is detected
//!   at the next process start and rolled back
//! - Signed manifests: every install is gated by an ed25519 token over the
//!   manifest digest

pub mod db;
mod error;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod reporting;
pub mod signing;

pub use error::{Error, Result};
