use crate::middleware::RateLimiter;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub session_key: Vec<u8>,
    /// IP rate limiter shared by the OTP endpoints.
    pub login_limiter: RateLimiter,
    /// Echo OTP codes in API responses (dev only).
    pub otp_echo: bool,
}

pub type SharedState = Arc<AppState>;
