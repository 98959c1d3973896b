use super::{Capability, Middleware, RequestMiddleware};
use crate::error::SpiderError;
use crate::request::Request;
use std::sync::Arc;
use tracing::trace;

/// Adds headers to every request that does not already carry them.
///
/// Header names are compared case-insensitively; a header set by the spider always wins.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeadersMiddleware {
    headers: Vec<(String, String)>,
}

impl DefaultHeadersMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn user_agent(self, user_agent: impl Into<String>) -> Self {
        self.header("User-Agent", user_agent)
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl RequestMiddleware for DefaultHeadersMiddleware {
    fn process_request(&self, request: &mut Request) -> Result<(), SpiderError> {
        for (name, value) in &self.headers {
            let present = request
                .headers
                .keys()
                .any(|key| key.eq_ignore_ascii_case(name));
            if !present {
                trace!("Adding default header {} to {}", name, request.url);
                request.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

impl Middleware for DefaultHeadersMiddleware {
    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![Capability::Request(self)]
    }
}
