//! Result caching and request coalescing.
//!
//! - [`CacheKey`]: normalized request identity
//! - [`ResultCache`]: bounded TTL cache of outcomes
//! - [`InflightRegistry`]: leader/follower coalescing of identical requests

mod inflight;
mod key;
mod result;

pub use inflight::{Claim, FollowerHandle, InflightRegistry, LeaderGuard};
pub use key::{CacheKey, normalize};
pub use result::{ResultCache, ResultCacheConfig};
