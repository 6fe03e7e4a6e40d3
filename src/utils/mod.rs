pub mod idempotency;
pub mod rate_limiter;

pub use idempotency::generate_idempotency_key;
pub use rate_limiter::RateLimiter;
