//! Scripted ports shared by unit tests

use crate::app::ports::{HttpClientPort, HttpRequest, HttpResponse, Pacer};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
        retry_after: None,
    }
}

/// Answers requests whose URL contains a route's needle, in route order.
/// A route replays its last response once the queue is down to one.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<Vec<(String, VecDeque<HttpResponse>)>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, needle: &str, responses: Vec<HttpResponse>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((needle.to_string(), responses.into_iter().collect()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.contains(needle))
            .count()
    }
}

#[async_trait]
impl HttpClientPort for ScriptedHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        let mut routes = self.routes.lock().unwrap();
        for (needle, queue) in routes.iter_mut() {
            if url.contains(needle.as_str()) {
                let resp = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(resp) = resp {
                    return Ok(resp);
                }
            }
        }
        Ok(json_response(404, Value::Null))
    }
}

#[derive(Default)]
pub struct RecordingPacer {
    pub pauses: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn calls(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, duration: Duration) {
        self.pauses.lock().unwrap().push(duration);
    }
}
