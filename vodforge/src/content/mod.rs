//! Content-addressable storage for transcode outputs.
//!
//! Finished (and actively streaming) transcode outputs are stored under a
//! deterministic content hash so identical requests are served from disk
//! instead of re-encoding. The store owns the `content/` and `metadata/`
//! trees under the data directory; nothing else writes there.

pub mod hash;
pub mod metadata;
pub mod store;

pub use hash::{derive_content_hash, is_valid_content_hash, shard};
pub use metadata::{ContentMetadata, EncodingParams, StreamingInfo, StreamingStatus};
pub use store::{ContentStats, ContentStore, SegmentIngestInfo};
