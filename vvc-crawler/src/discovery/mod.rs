//! Candidate discovery
//!
//! Turns search queries and channel usernames into new pending manifest
//! records, deduplicating against everything already collected, and feeds
//! qualifying channels back into the crawl as a scored secondary loop.

pub mod channels;
pub mod engine;

pub use channels::{ChannelInfo, ChannelRegistry};
pub use engine::{DiscoveryEngine, DiscoveryOutcome};
