//! HTTP client abstraction.
//!
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, ureq, etc.) or an in-process loopback.

use crate::error::{EngineResult, SyncError};
use rowsync_protocol::{HttpHandler, HttpRequest, HttpResponse};
use std::time::{Duration, Instant};
use tracing::warn;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response.
    ///
    /// A response not received within `timeout` is discarded and reported
    /// as `Timeout`. Connection failures map to a retryable `Transport`
    /// error.
    fn post(&self, url: &str, request: HttpRequest, timeout: Duration) -> EngineResult<HttpResponse>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// A loopback HTTP client that routes requests directly to a handler.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<H: HttpHandler> {
    handler: H,
}

impl<H: HttpHandler> LoopbackClient<H> {
    /// Creates a new loopback client connected to the given handler.
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// The handler behind this client.
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: HttpHandler> HttpClient for LoopbackClient<H> {
    fn post(&self, url: &str, request: HttpRequest, timeout: Duration) -> EngineResult<HttpResponse> {
        let started = Instant::now();
        let response = self.handler.handle(request);
        let elapsed = started.elapsed();
        if elapsed > timeout {
            warn!(url, ?elapsed, ?timeout, "response arrived after the deadline");
            return Err(SyncError::Timeout);
        }
        Ok(response)
    }
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn post(&self, url: &str, request: HttpRequest, timeout: Duration) -> EngineResult<HttpResponse> {
        (**self).post(url, request, timeout)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
