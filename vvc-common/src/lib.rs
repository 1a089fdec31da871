//! # VVC Common Library
//!
//! Shared code for the VVC crawler binaries including:
//! - Error types (typed error kinds for retry/quota/corruption policy)
//! - Configuration loading and data-root resolution
//! - Atomic JSON file helpers (backup + temp-file + rename)
//! - Utility functions

pub mod config;
pub mod error;
pub mod fsjson;
pub mod human_time;

pub use error::{Error, Result};
