//! HTTP/1.1 listeners.
//!
//! Converts between hyper requests and [`MockRequest`]/[`MockResponse`] and
//! runs accept loops until a shutdown signal is broadcast.

use crate::control::ControlPlane;
use crate::dispatch::{Dispatcher, MockRequest, MockResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};

/// Something that answers requests on a listener.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: &MockRequest) -> MockResponse;
}

#[async_trait]
impl Handler for Dispatcher {
    async fn handle(&self, request: &MockRequest) -> MockResponse {
        self.dispatch(request).await
    }
}

#[async_trait]
impl Handler for ControlPlane {
    async fn handle(&self, request: &MockRequest) -> MockResponse {
        ControlPlane::handle(self, request).await
    }
}

/// Bind a listener, logging the address actually bound.
pub async fn bind(addr: SocketAddr, name: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {} listener on {}: {}", name, addr, e))?;
    let local = listener.local_addr()?;
    info!(listener = name, addr = %local, "Listening on http://{}", local);
    Ok(listener)
}

/// Accept connections until `shutdown` fires. Each connection runs on its
/// own task; in-flight connections are left to finish on their own.
pub async fn serve<H: Handler>(
    listener: TcpListener,
    handler: Arc<H>,
    mut shutdown: broadcast::Receiver<()>,
    name: &'static str,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let handler = Arc::clone(&handler);
                                async move { handle_request(req, handler, name).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(listener = name, peer = %peer, error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(listener = name, error = %e, "Accept error");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!(listener = name, "Listener shutting down");
                break;
            }
        }
    }
}

async fn handle_request<H: Handler>(
    req: Request<Incoming>,
    handler: Arc<H>,
    listener: &'static str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match into_mock_request(req).await {
        Ok(request) => into_hyper_response(handler.handle(&request).await),
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            plain_response(StatusCode::BAD_REQUEST, "failed to read request body")
        }
    };

    log_access(listener, method.as_str(), &path, response.status(), start.elapsed());
    Ok(response)
}

/// Access log level by status class: 5xx error, 4xx warn, otherwise info.
fn access_level(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

fn log_access(listener: &str, method: &str, path: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16();
    let response_ms = elapsed.as_secs_f64() * 1000.0;
    match access_level(status) {
        Level::ERROR => error!(
            listener,
            method,
            path,
            status = status_code,
            response_ms,
            "{} {} {}",
            method,
            path,
            status_code
        ),
        Level::WARN => warn!(
            listener,
            method,
            path,
            status = status_code,
            response_ms,
            "{} {} {}",
            method,
            path,
            status_code
        ),
        _ => info!(
            listener,
            method,
            path,
            status = status_code,
            response_ms,
            "{} {} {}",
            method,
            path,
            status_code
        ),
    }
}

async fn into_mock_request(req: Request<Incoming>) -> Result<MockRequest, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(MockRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body,
    })
}

fn into_hyper_response(response: MockResponse) -> Response<Full<Bytes>> {
    let Ok(status) = StatusCode::from_u16(response.status) else {
        error!(status = response.status, "Mock produced an invalid status code");
        return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid status code");
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(Full::new(response.body)).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        plain_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid response headers")
    })
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
}
