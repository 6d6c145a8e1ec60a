use crate::app::ports::{HttpClientPort, HttpMethod, HttpRequest, HttpResponse};
use crate::constants::USER_AGENT;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use tracing::debug;

pub struct ReqwestHttp {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match &request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::PostForm(form) => self.client.post(&request.url).form(form),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }

        debug!("HTTP {:?} {}", request.method, request.url);
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::Timeout(self.timeout.as_secs())
            } else {
                IngestError::Http(e)
            }
        })?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}
