//! Proxy request handler
//!
//! Each inbound request selects one upstream from the pool and is forwarded
//! through it. There are no retries: an upstream failure is answered with a
//! gateway error and the client may try again, landing on a fresh selection.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RotatorError};
use crate::models::ProxyRecord;
use crate::pool::{ProxySelector, RequestTarget};
use crate::proxy::transport::ProxyTransport;
use crate::proxy::tunnel::TunnelHandler;

/// Configuration for proxy handler
#[derive(Debug, Clone)]
pub struct ProxyHandlerConfig {
    /// Timeout for reaching the upstream proxy and opening a tunnel
    pub connect_timeout: Duration,
    /// Timeout for request/response through the upstream
    pub request_timeout: Duration,
}

impl Default for ProxyHandlerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Proxy request handler
pub struct ProxyHandler {
    selector: Arc<dyn ProxySelector>,
    config: ProxyHandlerConfig,
}

impl ProxyHandler {
    pub fn new(selector: Arc<dyn ProxySelector>, config: ProxyHandlerConfig) -> Self {
        Self { selector, config }
    }

    /// Handle an incoming proxy request
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>, client_ip: String) -> Result<Response<Full<Bytes>>>
    where
        B: Body + Send + 'static,
        B::Error: Display,
    {
        if req.method() == Method::CONNECT {
            return self.handle_connect(req, client_ip).await;
        }

        self.handle_http(req, client_ip).await
    }

    /// Handle HTTP CONNECT request (HTTPS tunneling)
    async fn handle_connect<B>(&self, req: Request<B>, client_ip: String) -> Result<Response<Full<Bytes>>>
    where
        B: Body + Send + 'static,
    {
        let uri = req.uri();
        let authority = uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| uri.to_string());
        let target = ProxyTransport::parse_authority(&authority)?;

        debug!("CONNECT request to {} from {}", target, client_ip);

        let proxy = match self.select(&target) {
            Ok(proxy) => proxy,
            Err(response) => return Ok(response),
        };

        // Don't answer 200 until the upstream tunnel is up
        let start = Instant::now();
        let upstream = match tokio::time::timeout(
            self.config.connect_timeout,
            ProxyTransport::open_tunnel(&proxy, &target),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Ok(self.upstream_failure(&proxy, &target, e)),
            Err(_) => return Ok(self.upstream_failure(&proxy, &target, RotatorError::Timeout)),
        };

        info!(
            proxy_id = proxy.id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "CONNECT tunnel established through {} to {}",
            proxy.address(),
            target
        );

        let on_upgrade: OnUpgrade = hyper::upgrade::on(req);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    if let Err(e) = TunnelHandler::handle_upgraded(upgraded, upstream).await {
                        debug!("Tunnel ended with error: {}", e);
                    }
                }
                Err(e) => {
                    debug!("CONNECT upgrade failed: {}", e);
                }
            }
        });

        Ok(Response::new(Full::new(Bytes::new())))
    }

    /// Handle regular HTTP request
    async fn handle_http<B>(&self, req: Request<B>, client_ip: String) -> Result<Response<Full<Bytes>>>
    where
        B: Body + Send + 'static,
        B::Error: Display,
    {
        let target = ProxyTransport::parse_target(req.uri())?;

        debug!("{} request to {} from {}", req.method(), target, client_ip);

        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| RotatorError::InvalidRequest(format!("Failed to read body: {}", e)))?
            .to_bytes();

        let proxy = match self.select(&target) {
            Ok(proxy) => proxy,
            Err(response) => return Ok(response),
        };

        let start = Instant::now();
        match self.forward_request(&proxy, &parts, body_bytes, &target).await {
            Ok(response) => {
                info!(
                    proxy_id = proxy.id(),
                    status = response.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Forwarded {} {} through {}",
                    parts.method,
                    parts.uri,
                    proxy.address()
                );
                Ok(response)
            }
            Err(e) => Ok(self.upstream_failure(&proxy, &target, e)),
        }
    }

    /// Pick an upstream, or the response to send when there is none
    fn select(&self, target: &RequestTarget) -> std::result::Result<Arc<ProxyRecord>, Response<Full<Bytes>>> {
        self.selector.select(Some(target)).map_err(|e| {
            warn!("No proxy available for {}: {}", target, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "No proxies available")
        })
    }

    /// Log an upstream failure and turn it into a gateway error
    fn upstream_failure(
        &self,
        proxy: &ProxyRecord,
        target: &RequestTarget,
        err: RotatorError,
    ) -> Response<Full<Bytes>> {
        warn!(
            proxy_id = proxy.id(),
            "Upstream {} failed for {}: {}",
            proxy.address(),
            target,
            err
        );

        let status = match err {
            RotatorError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        error_response(status, &format!("Upstream proxy failed: {}", err))
    }

    /// Forward HTTP request through proxy
    async fn forward_request(
        &self,
        proxy: &ProxyRecord,
        parts: &http::request::Parts,
        body: Bytes,
        target: &RequestTarget,
    ) -> Result<Response<Full<Bytes>>> {
        let stream = tokio::time::timeout(self.config.connect_timeout, ProxyTransport::connect(proxy))
            .await
            .map_err(|_| RotatorError::Timeout)??;

        // Upstream proxies expect the absolute-form URI
        let mut builder = Request::builder()
            .method(parts.method.clone())
            .uri(parts.uri.clone());

        for (name, value) in &parts.headers {
            if !is_hop_by_hop_header(name.as_str()) {
                builder = builder.header(name, value);
            }
        }

        if !parts.headers.contains_key(HOST) {
            let host = HeaderValue::from_str(&target.to_string())
                .map_err(|e| RotatorError::InvalidRequest(format!("Invalid host: {}", e)))?;
            builder = builder.header(HOST, host);
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| RotatorError::InvalidRequest(format!("Failed to build request: {}", e)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RotatorError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = tokio::time::timeout(self.config.request_timeout, sender.send_request(request))
            .await
            .map_err(|_| RotatorError::Timeout)?
            .map_err(|e| RotatorError::ProxyConnectionFailed(format!("Request failed: {}", e)))?;

        let (mut parts, body) = response.into_parts();
        let body_bytes = tokio::time::timeout(self.config.request_timeout, body.collect())
            .await
            .map_err(|_| RotatorError::Timeout)?
            .map_err(|e| RotatorError::ProxyConnectionFailed(format!("Failed to read response: {}", e)))?
            .to_bytes();

        // The body is re-framed by our own connection
        let hop_by_hop: Vec<_> = parts
            .headers
            .keys()
            .filter(|name| is_hop_by_hop_header(name.as_str()))
            .cloned()
            .collect();
        for name in hop_by_hop {
            parts.headers.remove(&name);
        }

        Ok(Response::from_parts(parts, Full::new(body_bytes)))
    }
}

/// Plain-text error response
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
