//! HTTP transport: one ureq Agent (connection reuse), retry with backoff on
//! transport errors and 5xx/429. Only idempotent requests are repeated; a
//! POST that may have reached the server is sent once.

use std::io::Read;
use std::time::Duration;

use crate::config::Config;
use crate::sync::{Request, Response, Transport, TransportError};

const RETRY_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 5_000;
const MAX_IDLE_PER_HOST: usize = 8;

pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
    retries: usize,
    backoff_ms: u64,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .max_idle_connections_per_host(MAX_IDLE_PER_HOST)
            .build();
        Self {
            agent,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            retries: config.retries,
            backoff_ms: RETRY_BACKOFF_MS,
        }
    }

    /// Server paths are joined to the base URL; absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn send_once(&self, url: &str, request: &Request) -> Result<Response, TransportError> {
        let mut req = self.agent.request(request.method.as_str(), url);
        if let Some(content_type) = request.content_type {
            req = req.set("Content-Type", content_type);
        }
        let result = match &request.body {
            Some(body) => req.send_bytes(body),
            None => req.call(),
        };
        match result {
            Ok(resp) => read_response(resp),
            // non-2xx is still an answer; the caller interprets the status
            Err(ureq::Error::Status(_, resp)) => read_response(resp),
            Err(ureq::Error::Transport(t)) => Err(TransportError(t.to_string())),
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> Result<Response, TransportError> {
        let url = self.url_for(&request.path);
        let mut attempt = 0usize;
        let mut backoff = self.backoff_ms;
        loop {
            attempt += 1;
            let outcome = self.send_once(&url, &request);
            let retryable = request.method.is_idempotent()
                && match &outcome {
                    Ok(resp) => resp.status >= 500 || resp.status == 429,
                    Err(_) => true,
                };
            if retryable && attempt <= self.retries {
                match &outcome {
                    Ok(resp) => tracing::warn!("{} {}: HTTP {}, retrying", request.method.as_str(), url, resp.status),
                    Err(e) => tracing::warn!("{} {}: {}, retrying", request.method.as_str(), url, e),
                }
                std::thread::sleep(Duration::from_millis(backoff));
                backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_MS);
                continue;
            }
            return outcome;
        }
    }
}

fn read_response(resp: ureq::Response) -> Result<Response, TransportError> {
    let status = resp.status();
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|e| TransportError(e.to_string()))?;
    Ok(Response { status, body })
}
