//! # Downloader Module
//!
//! The transport behind every fetch.
//!
//! A [`Downloader`] performs one blocking call per request and turns the outcome into either a
//! [`Response`] or a [`SpiderError::Transport`]. Status codes are not interpreted here; that is
//! left to response middlewares such as
//! [`HttpErrorMiddleware`](crate::middleware::HttpErrorMiddleware).

use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Performs the transport call of a fetch.
pub trait Downloader: Send + Sync {
    fn download(&self, request: &Request) -> Result<Response, SpiderError>;
}

/// Options of the [`ReqwestClientDownloader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            timeout: Duration::from_secs(30),
            proxy: None,
            user_agent: None,
        }
    }
}

/// A [`Downloader`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClientDownloader {
    client: Client,
}

impl ReqwestClientDownloader {
    pub fn new(config: &DownloaderConfig) -> Result<Self, SpiderError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| SpiderError::Configuration(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| {
            SpiderError::Configuration(format!("failed to build HTTP client: {}", e))
        })?;
        Ok(ReqwestClientDownloader { client })
    }

    fn headers(request: &Request) -> Result<HeaderMap, SpiderError> {
        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SpiderError::transport(request.url.as_str(), format!("bad header name: {}", e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SpiderError::transport(request.url.as_str(), format!("bad header value: {}", e))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

impl Downloader for ReqwestClientDownloader {
    fn download(&self, request: &Request) -> Result<Response, SpiderError> {
        let url = request.url.as_str();
        trace!("Downloading {} {}", request.method, url);

        let mut call = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(Self::headers(request)?);
        if !request.body.is_empty() {
            call = call.body(request.body.clone());
        }

        let reply = call.send().map_err(|e| SpiderError::transport(url, e))?;
        let status = reply.status().as_u16();
        let final_url = reply.url().clone();
        let protocol = format!("{:?}", reply.version());

        let mut headers = HashMap::new();
        for (name, value) in reply.headers() {
            if let Ok(value) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
        }

        let body = reply
            .bytes()
            .map_err(|e| SpiderError::transport(url, e))?
            .to_vec();
        debug!("Downloaded {} ({} bytes, status {})", url, body.len(), status);

        Ok(Response::new(
            final_url,
            status,
            headers,
            body,
            request.clone(),
            protocol,
        ))
    }
}
