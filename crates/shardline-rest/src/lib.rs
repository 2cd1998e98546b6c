//! # shardline-rest
//!
//! REST dispatcher. Requests are grouped into rate-limit buckets by route;
//! each bucket runs its requests one at a time, in submission order, and
//! waits out bucket and global limits reported by the server.

pub mod client;
pub mod error;
pub mod ratelimit;
pub mod route;
pub mod transport;

pub use client::{GatewayBot, RestClient, SessionStartLimit};
pub use error::{RestError, RestResult};
pub use ratelimit::{BucketSnapshot, PendingResponse, RateLimitHeaders, RateLimiter};
pub use route::resolve_bucket;
pub use transport::{Method, ReqwestTransport, RestRequest, RestResponse, Transport};
