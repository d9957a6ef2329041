pub mod api;
pub mod rate_limiter;

pub use api::{parse_tagged_body, TumblrApiClient};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
