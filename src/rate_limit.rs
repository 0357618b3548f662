use actix_web::HttpResponse;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const AUTH_LIMIT: u32 = 5;
pub const API_LIMIT: u32 = 60;
pub const HEAVY_LIMIT: u32 = 10;
pub const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request counter shared across workers. Buckets keep the
/// different limits (auth / api / heavy) from interfering with each other
/// even when they share a key.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a hit for `bucket:key` and checks it against `limit` per
    /// `window`. Returns `Err(retry_after_seconds)` once the window is full.
    pub fn check(&self, bucket: &str, key: &str, limit: u32, window: Duration) -> Result<(), u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        // Expired entries are dropped here, or the map would keep one entry
        // per client address ever seen.
        windows.retain(|_, (start, _)| now.duration_since(*start) < window);

        let entry = windows
            .entry(format!("{}:{}", bucket, key))
            .or_insert((now, 0));

        if entry.1 >= limit {
            let remaining = window.saturating_sub(now.duration_since(entry.0));
            // Round up so a client never retries inside the same window.
            let retry_after = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(retry_after.max(1));
        }

        entry.1 += 1;
        Ok(())
    }
}

#[derive(Serialize)]
pub struct RateLimitResponse {
    pub success: bool,
    pub message: String,
    pub retry_after_seconds: u64,
}

pub fn too_many_requests(message: &str, retry_after_seconds: u64) -> HttpResponse {
    HttpResponse::TooManyRequests().json(RateLimitResponse {
        success: false,
        message: message.to_string(),
        retry_after_seconds,
    })
}
