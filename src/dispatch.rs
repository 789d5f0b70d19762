//! Request dispatch.
//!
//! [`Dispatcher::dispatch`] is the single entry point the transport calls:
//! it matches the request against the current route table, applies the
//! route's delay and produces the response.

use crate::delay::Delay;
use crate::error::ForwardError;
use crate::hash::to_hex;
use crate::matcher::RouteAction;
use crate::mock::{HttpForward, HttpResponse};
use crate::registry::MockRegistry;
use crate::rest;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transport-neutral view of an incoming request.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: String,
    /// Raw request path, without the query string
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// Header lines in arrival order
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A mock produced the response
    Mocked,
    /// The forwarder produced the response
    Forwarded,
    /// No route matched
    Unmatched,
    /// A REST item route matched but the identifier is unknown
    NotFound,
    /// A forward route matched but no forwarder is wired
    NotImplemented,
    /// A REST write carried a body that is not a JSON object
    BadRequest,
    /// A REST create used an identifier that already exists
    Conflict,
    /// The forwarder failed
    BadGateway,
}

/// The response handed back to the transport.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub outcome: Outcome,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            outcome: Outcome::Mocked,
        }
    }

    /// A JSON error body: `{"error": code, "message": message}`.
    pub fn error(status: u16, outcome: Outcome, code: &str, message: impl Into<String>) -> Self {
        Self::new(status)
            .with_json(&json!({"error": code, "message": message.into()}))
            .with_outcome(outcome)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set headers from a map, in name order.
    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        let mut sorted: Vec<_> = headers.iter().collect();
        sorted.sort();
        for (name, value) in sorted {
            self.headers.push((name.clone(), value.clone()));
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the body, adding a JSON content type unless one
    /// is already set.
    pub fn with_json(mut self, value: &Value) -> Self {
        if self.header("content-type").is_none() {
            self.headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
        }
        self.body = Bytes::from(value.to_string());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Delegates forward actions to an upstream.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send `request` to `target` with `headers` (the request's own headers
    /// overlaid by the mock's) and relay the answer.
    async fn forward(
        &self,
        target: &str,
        headers: &[(String, String)],
        request: &MockRequest,
    ) -> Result<MockResponse, ForwardError>;
}

/// Request counters, reported by the control plane.
#[derive(Debug, Default)]
pub struct DispatchStats {
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
}

impl DispatchStats {
    pub fn total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    pub fn unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }
}

/// Answers requests from the mocks in a [`MockRegistry`].
pub struct Dispatcher {
    registry: Arc<MockRegistry>,
    forwarder: Option<Arc<dyn Forwarder>>,
    log_matches: bool,
    log_unmatched: bool,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(registry: Arc<MockRegistry>) -> Self {
        Self {
            registry,
            forwarder: None,
            log_matches: true,
            log_unmatched: true,
            stats: DispatchStats::default(),
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn with_logging(mut self, log_matches: bool, log_unmatched: bool) -> Self {
        self.log_matches = log_matches;
        self.log_unmatched = log_unmatched;
        self
    }

    pub fn registry(&self) -> &Arc<MockRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Answer one request.
    ///
    /// Dropping the returned future before it completes abandons any pending
    /// delay; a REST write that has not started by then never happens.
    pub async fn dispatch(&self, request: &MockRequest) -> MockResponse {
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

        let table = self.registry.snapshot();
        let (route, id) = match table.find(request) {
            Some(m) => (Arc::clone(m.route), m.id),
            None => {
                self.stats.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.log_unmatched {
                    info!(
                        method = %request.method,
                        path = %request.path,
                        query = request.query.as_deref().unwrap_or(""),
                        "No mock matched request"
                    );
                }
                return MockResponse::error(
                    404,
                    Outcome::Unmatched,
                    "unmatched",
                    format!("no mock matched {} {}", request.method, request.path),
                );
            }
        };
        drop(table);

        self.stats.requests_matched.fetch_add(1, Ordering::Relaxed);
        if self.log_matches {
            info!(
                hash = %to_hex(route.hash),
                mock = %route.label,
                method = %request.method,
                path = %request.path,
                "Request matched"
            );
        }

        let response = match &route.action {
            RouteAction::Respond(response) => {
                wait(response.delay).await;
                respond(response)
            }
            RouteAction::Forward(forward) => {
                wait(forward.delay).await;
                self.forward(forward, request).await
            }
            RouteAction::Rest { op, resource } => {
                wait(resource.response.delay).await;
                rest::handle(*op, resource, id.as_deref(), request)
            }
        };

        debug!(
            hash = %to_hex(route.hash),
            status = response.status,
            outcome = ?response.outcome,
            "Request answered"
        );
        response
    }

    async fn forward(&self, forward: &HttpForward, request: &MockRequest) -> MockResponse {
        let Some(forwarder) = &self.forwarder else {
            return MockResponse::error(
                501,
                Outcome::NotImplemented,
                "not_implemented",
                "forwarding is not available",
            );
        };

        let headers = overlay_headers(&request.headers, &forward.headers);
        match forwarder.forward(&forward.to, &headers, request).await {
            Ok(response) => response.with_outcome(Outcome::Forwarded),
            Err(e) => {
                warn!(target_url = %forward.to, error = %e, "Forwarding failed");
                MockResponse::error(502, Outcome::BadGateway, "bad_gateway", e.to_string())
            }
        }
    }
}

async fn wait(delay: Delay) {
    if !delay.is_zero() {
        debug!(delay = %delay, "Applying delay");
        tokio::time::sleep(delay.duration()).await;
    }
}

fn respond(response: &HttpResponse) -> MockResponse {
    let out = MockResponse::new(response.status).with_headers(&response.headers);
    match &response.body {
        Some(body) => out.with_json(body),
        None => out,
    }
}

/// Request headers with `overrides` replacing same-named entries.
fn overlay_headers(
    base: &[(String, String)],
    overrides: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = base
        .iter()
        .filter(|(name, _)| !overrides.keys().any(|o| o.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();

    let mut extra: Vec<_> = overrides.iter().collect();
    extra.sort();
    merged.extend(extra.into_iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
