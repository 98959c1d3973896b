//! Responses handed to request callbacks.

use crate::error::SpiderError;
use crate::item::ParseOutput;
use crate::request::Request;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::HashMap;
use url::Url;

/// The result of fetching a [`Request`].
///
/// The originating request is kept as an immutable snapshot, taken after the request
/// middlewares ran.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL, after redirects.
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Protocol label reported by the transport, e.g. `HTTP/1.1`.
    pub protocol: String,
    request: Request,
}

impl Response {
    pub fn new(
        url: Url,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        request: Request,
        protocol: impl Into<String>,
    ) -> Self {
        Response {
            url,
            status,
            headers,
            body,
            protocol: protocol.into(),
            request,
        }
    }

    /// The request this response answers.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SpiderError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Builds a request for `href`, resolved against this response's URL.
    pub fn follow<F>(&self, href: &str, callback: F) -> Result<Request, SpiderError>
    where
        F: Fn(Response) -> Result<ParseOutput, SpiderError> + Send + Sync + 'static,
    {
        Ok(Request::new(self.url.join(href)?, callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn noop(_: Response) -> Result<ParseOutput, SpiderError> {
        Ok(ParseOutput::new())
    }

    fn response(body: &str) -> Response {
        let request = Request::get("https://example.com/catalogue/page-1.html", noop).unwrap();
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Response::new(
            request.url.clone(),
            200,
            headers,
            body.as_bytes().to_vec(),
            request,
            "HTTP/1.1",
        )
    }

    #[test]
    fn follow_resolves_relative_links() {
        let next = response("").follow("page-2.html", noop).unwrap();
        assert_eq!(
            next.url.as_str(),
            "https://example.com/catalogue/page-2.html"
        );
    }

    #[test]
    fn headers_are_case_insensitive() {
        let resp = response("");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert!(resp.is_success());
    }

    #[test]
    fn decodes_json_bodies() {
        let value: Value = response(r#"{"next": null}"#).json().unwrap();
        assert_eq!(value["next"], Value::Null);
        assert!(response("{").json::<Value>().is_err());
    }
}
