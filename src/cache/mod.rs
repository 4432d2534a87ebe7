//! Versioned response caching.
//!
//! Buckets are named `{namespace}-{classification}-{version}`; at any time
//! exactly one bucket per classification belongs to the running version, and
//! activation deletes every bucket whose name carries a stale version tag.

mod bucket;
mod response_cache;

pub use bucket::{bucket_name, version_bucket_names, BucketClass};
pub use response_cache::{CachedEntry, ResponseCache};
