use crate::app::ports::{HttpClientPort, HttpRequest, HttpResponse};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

#[derive(Clone, Debug, Default)]
pub struct Limits {
    pub requests_per_min: Option<u64>,
    pub concurrency: Option<u32>,
}

impl Limits {
    /// Requests-per-minute limit with one call in flight; 0 means unlimited
    pub fn per_minute(rpm: u64) -> Self {
        Self {
            requests_per_min: (rpm > 0).then_some(rpm),
            concurrency: Some(1),
        }
    }
}

/// Token bucket over requests per minute plus an optional concurrency cap
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: Limits,
    // tokens and the time of the last refill
    rpm_tokens: Mutex<(f64, Instant)>,
    sem: Option<Semaphore>,
}

impl RateLimiter {
    pub fn new(limits: Limits) -> Self {
        let rpm_capacity = limits.requests_per_min.unwrap_or(0) as f64;
        let sem = limits.concurrency.map(|c| Semaphore::new(c as usize));
        Self {
            inner: Arc::new(Inner {
                limits,
                rpm_tokens: Mutex::new((rpm_capacity, Instant::now())),
                sem,
            }),
        }
    }

    /// Wait for a request slot, then run `call` while holding the concurrency permit
    pub async fn run<F, T>(&self, call: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        // A closed semaphore only means no concurrency cap
        let _permit = match &self.inner.sem {
            Some(sem) => sem.acquire().await.ok(),
            None => None,
        };
        if let Some(rpm) = self.inner.limits.requests_per_min {
            if rpm > 0 {
                self.consume_token(rpm as f64, 60.0).await;
            }
        }
        call.await
    }

    async fn consume_token(&self, capacity: f64, period_secs: f64) {
        loop {
            let mut guard = self.inner.rpm_tokens.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            let refill_rate = capacity / period_secs;
            *tokens = (*tokens + elapsed * refill_rate).min(capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                break;
            }
            let secs = (1.0 - *tokens) / refill_rate;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}

/// HTTP port that passes every call through a provider's rate limiter
pub struct RateLimitedHttp {
    inner: Arc<dyn HttpClientPort>,
    limiter: RateLimiter,
}

impl RateLimitedHttp {
    pub fn new(inner: Arc<dyn HttpClientPort>, limits: Limits) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(limits),
        }
    }
}

#[async_trait]
impl HttpClientPort for RateLimitedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.limiter.run(self.inner.send(request)).await
    }
}
