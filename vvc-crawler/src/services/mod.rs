//! External collaborators
//!
//! Narrow seams around everything the pipeline does not own: the platform
//! search API, the media downloader and the audio classifier. Production
//! implementations are thin adapters; tests substitute scripted doubles.

pub mod collaborator;
pub mod platform;

pub use collaborator::{
    AudioCollaborator, Classification, CommandCollaborator, CommandUploader, DownloadOutcome,
    Uploader,
};
pub use platform::{HttpPlatformClient, PlatformClient, SearchPage, VideoMeta};
