//! Rate limiting
//!
//! - [`RateLimitHeaders`] reads the limit headers off a response.
//! - `BucketState` tracks one bucket's window.
//! - [`RateLimiter`] owns the buckets and runs one worker task per bucket.

mod bucket;
mod headers;
mod limiter;

pub use bucket::BucketSnapshot;
pub use headers::RateLimitHeaders;
pub use limiter::{PendingResponse, RateLimiter, BUCKET_IDLE_TIMEOUT};
