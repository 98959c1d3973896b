//! Fetch requests and the callbacks bound to them.
//!
//! A [`Request`] always carries a callback: the only ways to build one are
//! [`Request::new`], [`Request::get`] and [`RequestBuilder::build`], and the builder refuses to
//! produce a request without a callback. The engine can therefore never dequeue a request it
//! does not know how to continue.

use crate::error::SpiderError;
use crate::item::ParseOutput;
use crate::response::Response;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Continuation invoked with the response of a request.
pub type Callback = Arc<dyn Fn(Response) -> Result<ParseOutput, SpiderError> + Send + Sync>;

/// A pending fetch.
#[derive(Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Free-form context carried from one stage of a crawl to the next.
    pub meta: HashMap<String, Value>,
    spider_name: Option<String>,
    depth: usize,
    callback: Callback,
}

impl Request {
    /// Creates a GET request bound to `callback`.
    pub fn new<F>(url: Url, callback: F) -> Self
    where
        F: Fn(Response) -> Result<ParseOutput, SpiderError> + Send + Sync + 'static,
    {
        Self::with_callback(url, Arc::new(callback))
    }

    /// Parses `url` and creates a GET request bound to `callback`.
    pub fn get<F>(url: &str, callback: F) -> Result<Self, SpiderError>
    where
        F: Fn(Response) -> Result<ParseOutput, SpiderError> + Send + Sync + 'static,
    {
        Ok(Self::new(Url::parse(url)?, callback))
    }

    pub fn builder(url: Url) -> RequestBuilder {
        RequestBuilder::new(url)
    }

    pub(crate) fn with_callback(url: Url, callback: Callback) -> Self {
        Request {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            body: Vec::new(),
            meta: HashMap::new(),
            spider_name: None,
            depth: 0,
            callback,
        }
    }

    /// The callback that will receive this request's response.
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Name of the spider whose crawl produced this request, once the engine has seen it.
    pub fn spider_name(&self) -> Option<&str> {
        self.spider_name.as_deref()
    }

    /// Number of hops from the seed request (seeds are at depth 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Tags the request with its crawl provenance unless a spider already claimed it.
    pub(crate) fn tag_provenance(&mut self, spider_name: Option<&str>, depth: usize) {
        if self.spider_name.is_none() {
            self.spider_name = spider_name.map(str::to_owned);
        }
        self.depth = depth;
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("meta", &self.meta)
            .field("spider_name", &self.spider_name)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Request`].
pub struct RequestBuilder {
    url: Url,
    method: Method,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    meta: HashMap<String, Value>,
    callback: Option<Callback>,
}

impl RequestBuilder {
    pub fn new(url: Url) -> Self {
        RequestBuilder {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            body: Vec::new(),
            meta: HashMap::new(),
            callback: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets a header, replacing any previous value for the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Response) -> Result<ParseOutput, SpiderError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Reuses an already shared callback, e.g. the one of a parent request.
    pub fn shared_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Finishes the request. Fails with [`SpiderError::MissingCallback`] if no callback was set.
    pub fn build(self) -> Result<Request, SpiderError> {
        let callback = self.callback.ok_or_else(|| SpiderError::MissingCallback {
            url: self.url.to_string(),
        })?;
        let mut request = Request::with_callback(self.url, callback);
        request.method = self.method;
        request.headers = self.headers;
        request.body = self.body;
        request.meta = self.meta;
        Ok(request)
    }
}
