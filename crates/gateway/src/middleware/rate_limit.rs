//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use clearpath_common::errors::AppError;
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Per-route limiter with the quota it reports on rejection
pub struct RouteLimiter {
    limiter: GlobalRateLimiter,
    per_minute: u32,
}

impl RouteLimiter {
    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    pub fn check(&self) -> Result<(), AppError> {
        self.limiter.check().map_err(|_| AppError::RateLimited {
            limit: self.per_minute,
        })
    }
}

/// Create a limiter allowing `requests_per_minute`, bursting up to the full quota
pub fn create_rate_limiter(requests_per_minute: u32) -> Arc<RouteLimiter> {
    let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RouteLimiter {
        limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        per_minute: per_minute.get(),
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RouteLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Err(e) = limiter.check() {
        tracing::warn!(
            path = %request.uri().path(),
            limit = limiter.per_minute(),
            "Rate limit exceeded"
        );
        return Err(e);
    }
    Ok(next.run(request).await)
}
