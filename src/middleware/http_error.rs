use super::{Capability, Middleware, ResponseMiddleware};
use crate::error::SpiderError;
use crate::response::Response;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Turns responses with a status outside `200..300` into [`SpiderError::HttpStatus`].
#[derive(Debug, Clone, Default)]
pub struct HttpErrorMiddleware {
    allowed: HashSet<u16>,
}

impl HttpErrorMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets responses with `status` through to the callback.
    pub fn allow_status(mut self, status: u16) -> Self {
        self.allowed.insert(status);
        self
    }
}

impl ResponseMiddleware for HttpErrorMiddleware {
    fn process_response(&self, response: &mut Response) -> Result<(), SpiderError> {
        if response.is_success() || self.allowed.contains(&response.status) {
            return Ok(());
        }
        debug!("Rejecting {} response from {}", response.status, response.url);
        Err(SpiderError::HttpStatus {
            status: response.status,
            url: response.url.to_string(),
        })
    }
}

impl Middleware for HttpErrorMiddleware {
    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![Capability::Response(self)]
    }
}
