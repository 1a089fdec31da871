//! Durable manifest of every video the crawler has ever seen
//!
//! The manifest is the single source of truth for the pipeline: discovery
//! appends pending records, download/analyze/filter/upload mutate them, and
//! every mutation is persisted through [`store::ManifestStore`] with backup
//! and atomic replace.

pub mod record;
pub mod store;

pub use record::{DownloadStatus, ManifestRecord};
pub use store::{Manifest, ManifestStore};
