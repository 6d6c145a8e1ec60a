#![allow(dead_code)]

use async_trait::async_trait;
use concert_ingest::app::ports::{HttpClientPort, HttpRequest, HttpResponse, Pacer};
use concert_ingest::error::{IngestError, Result};
use concert_ingest::storage::{InMemoryStorage, RowQuery, Storage};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
        retry_after: None,
    }
}

/// Serves queued responses per URL needle; the last queued response repeats.
/// Unmatched requests get a 404.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<Vec<(String, VecDeque<HttpResponse>)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, responses: Vec<HttpResponse>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((needle.to_string(), responses.into_iter().collect()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClientPort for FakeHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let target = format!(
            "{}?{}",
            request.url,
            request
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&")
        );
        self.requests.lock().unwrap().push(request);
        let mut routes = self.routes.lock().unwrap();
        for (needle, queue) in routes.iter_mut() {
            if target.contains(needle.as_str()) {
                let next = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(resp) = next {
                    return Ok(resp);
                }
            }
        }
        Ok(json_response(404, Value::Null))
    }
}

#[derive(Default)]
pub struct CountingPacer {
    pauses: Mutex<Vec<Duration>>,
}

impl CountingPacer {
    pub fn count(&self) -> usize {
        self.pauses.lock().unwrap().len()
    }
}

#[async_trait]
impl Pacer for CountingPacer {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}

/// In-memory store that records upsert batch sizes and fails chosen upsert calls (1-based)
pub struct FlakyStorage {
    pub inner: Arc<InMemoryStorage>,
    fail_calls: Vec<usize>,
    calls: Mutex<Vec<usize>>,
    search_delay: Option<Duration>,
}

impl FlakyStorage {
    pub fn new(fail_calls: Vec<usize>) -> Self {
        Self {
            inner: Arc::new(InMemoryStorage::new()),
            fail_calls,
            calls: Mutex::new(Vec::new()),
            search_delay: None,
        }
    }

    pub fn slow_search(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn upsert_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn upsert(&self, table: &str, rows: &[Value], on_conflict: &str) -> Result<Vec<Value>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(rows.len());
            calls.len()
        };
        if self.fail_calls.contains(&call) {
            return Err(IngestError::Storage {
                table: table.to_string(),
                message: "statement timeout".into(),
            });
        }
        self.inner.upsert(table, rows, on_conflict).await
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<Value> {
        self.inner.insert(table, row).await
    }

    async fn update(&self, table: &str, column: &str, value: &str, patch: &Value) -> Result<u64> {
        self.inner.update(table, column, value, patch).await
    }

    async fn search(&self, table: &str, query: &RowQuery) -> Result<(Vec<Value>, u64)> {
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.search(table, query).await
    }

    async fn rpc(&self, function: &str, args: &Value) -> Result<Value> {
        self.inner.rpc(function, args).await
    }
}
