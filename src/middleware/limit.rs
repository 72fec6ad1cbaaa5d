use crate::error::ServerError;
use crate::http::{Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

lazy_static! {
    // Sliding one-minute windows keyed by (client ip, path), shared by every
    // RateLimiter clone in the process.
    static ref WINDOWS: Mutex<HashMap<(String, String), Vec<Instant>>> =
        Mutex::new(HashMap::new());
}

/// Per-client, per-path rate limiting during the run phase. Over-limit
/// requests stop the pipeline with 429 before any handler runs.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    async fn admit(&self, client: &str, path: &str) -> bool {
        let mut windows = WINDOWS.lock().await;
        let now = Instant::now();
        let horizon = now.checked_sub(Duration::from_secs(60));
        let hits = windows
            .entry((client.to_string(), path.to_string()))
            .or_default();
        if let Some(horizon) = horizon {
            hits.retain(|&t| t > horizon);
        }

        if hits.len() as u32 >= self.config.burst_size
            || hits.len() as u32 >= self.config.requests_per_minute
        {
            return false;
        }
        hits.push(now);
        true
    }
}

impl Middleware for RateLimiter {
    fn run<'a>(&'a self, req: &'a mut Request, _res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let client = req
                .header("x-forwarded-for")
                .or_else(|| req.header("x-real-ip"))
                .unwrap_or("unknown")
                .to_string();
            if self.admit(&client, &req.path).await {
                Ok(())
            } else {
                log::warn!("rate limit exceeded for {} on {}", client, req.path);
                Err(ServerError::TooManyRequests)
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn requests_over_the_burst_are_rejected() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 2,
        });
        let mut res = Response::new(200);

        // Unique path keeps this test isolated from the shared window map.
        let path = "/limit-test-burst";
        for _ in 0..2 {
            let mut req = Request::new(Method::GET, path);
            req.headers.insert("x-real-ip".into(), "10.0.0.1".into());
            limiter.run(&mut req, &mut res).await.unwrap();
        }

        let mut req = Request::new(Method::GET, path);
        req.headers.insert("x-real-ip".into(), "10.0.0.1".into());
        let err = limiter.run(&mut req, &mut res).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
    }

    #[tokio::test]
    async fn distinct_clients_have_distinct_windows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 1,
        });
        let mut res = Response::new(200);
        let path = "/limit-test-clients";

        let mut req = Request::new(Method::GET, path);
        req.headers.insert("x-real-ip".into(), "10.0.0.2".into());
        limiter.run(&mut req, &mut res).await.unwrap();

        let mut req = Request::new(Method::GET, path);
        req.headers.insert("x-real-ip".into(), "10.0.0.3".into());
        limiter.run(&mut req, &mut res).await.unwrap();
    }
}
