//! Middleware Manager for ordered, concurrent dispatch.
//!
//! This module provides a `MiddlewareManager` that keeps one chain per middleware capability.
//! Chains are sorted once at registration time and snapshotted at dispatch time, so workers
//! never hold the registry lock while a middleware runs.

use crate::error::SpiderError;
use crate::middleware::{
    Capability, ExceptionAction, ExceptionMiddleware, Middleware, MiddlewareConfig,
    RequestMiddleware, ResponseMiddleware,
};
use crate::request::Request;
use crate::response::Response;
use dashmap::DashSet;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Registration data shared by every chain a middleware joined.
struct Entry {
    name: String,
    priority: i32,
    group: String,
    enabled: AtomicBool,
}

type Link<T> = (Arc<Entry>, Arc<T>);

#[derive(Default)]
struct Chains {
    request: Vec<Link<dyn RequestMiddleware>>,
    response: Vec<Link<dyn ResponseMiddleware>>,
    exception: Vec<Link<dyn ExceptionMiddleware>>,
    entries: HashMap<String, Arc<Entry>>,
}

/// A registry of middlewares that dispatches requests, responses and errors through them.
#[derive(Default)]
pub struct MiddlewareManager {
    chains: RwLock<Chains>,
    disabled_groups: DashSet<String>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware under `config`.
    ///
    /// An empty name falls back to the middleware's type name. Names must be unique.
    pub fn register<M: Middleware>(
        &self,
        middleware: M,
        config: MiddlewareConfig,
    ) -> Result<(), SpiderError> {
        self.register_arc(Arc::new(middleware), config)
    }

    /// Registers a shared middleware instance.
    pub fn register_arc<M: Middleware>(
        &self,
        middleware: Arc<M>,
        mut config: MiddlewareConfig,
    ) -> Result<(), SpiderError> {
        if config.name.is_empty() {
            config.name = std::any::type_name::<M>().to_string();
        }
        let capabilities = middleware.capabilities();
        if capabilities.is_empty() {
            return Err(SpiderError::Configuration(format!(
                "middleware '{}' implements no capability",
                config.name
            )));
        }

        let mut chains = self.chains.write();
        let id = config.id();
        if chains.entries.contains_key(&id) {
            return Err(SpiderError::Configuration(format!(
                "middleware '{}' is already registered",
                config.name
            )));
        }

        let entry = Arc::new(Entry {
            name: config.name,
            priority: config.priority,
            group: config.group,
            enabled: AtomicBool::new(config.enabled),
        });
        for capability in capabilities {
            trace!(
                "Adding middleware '{}' to the {} chain",
                entry.name,
                capability.kind()
            );
            match capability {
                Capability::Request(handler) => {
                    chains.request.push((Arc::clone(&entry), handler));
                    chains.request.sort_by_key(|(e, _)| Reverse(e.priority));
                }
                Capability::Response(handler) => {
                    chains.response.push((Arc::clone(&entry), handler));
                    chains.response.sort_by_key(|(e, _)| e.priority);
                }
                Capability::Exception(handler) => {
                    chains.exception.push((Arc::clone(&entry), handler));
                    chains.exception.sort_by_key(|(e, _)| Reverse(e.priority));
                }
            }
        }
        debug!(
            "Registered middleware '{}' (priority {}, group '{}')",
            entry.name, entry.priority, entry.group
        );
        chains.entries.insert(id, entry);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.chains
            .read()
            .entries
            .contains_key(&format!("mw-{}", name))
    }

    /// Number of registered middlewares.
    pub fn len(&self) -> usize {
        self.chains.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Switches a single middleware on or off. Returns `false` if no such middleware exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.chains.read().entries.get(&format!("mw-{}", name)) {
            Some(entry) => {
                entry.enabled.store(enabled, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn enable_group(&self, group: &str) {
        self.disabled_groups.remove(group);
    }

    /// Skips every middleware of `group` until it is enabled again, whatever their own flag says.
    pub fn disable_group(&self, group: &str) {
        self.disabled_groups.insert(group.to_string());
    }

    fn is_active(&self, entry: &Entry) -> bool {
        entry.enabled.load(Ordering::SeqCst) && !self.disabled_groups.contains(&entry.group)
    }

    fn snapshot<T: ?Sized>(&self, chain: &[Link<T>]) -> Vec<Link<T>> {
        chain
            .iter()
            .filter(|(entry, _)| self.is_active(entry))
            .map(|(entry, handler)| (Arc::clone(entry), Arc::clone(handler)))
            .collect()
    }

    /// Runs the request chain, highest priority first, stopping at the first failure.
    pub fn process_request(&self, request: &mut Request) -> Result<(), SpiderError> {
        let chain = self.snapshot(&self.chains.read().request);
        for (entry, handler) in chain {
            trace!("Request middleware '{}' on {}", entry.name, request.url);
            handler
                .process_request(request)
                .map_err(|e| SpiderError::middleware(entry.name.as_str(), e))?;
        }
        Ok(())
    }

    /// Runs the response chain, lowest priority first, stopping at the first failure.
    pub fn process_response(&self, response: &mut Response) -> Result<(), SpiderError> {
        let chain = self.snapshot(&self.chains.read().response);
        for (entry, handler) in chain.into_iter().rev() {
            trace!("Response middleware '{}' on {}", entry.name, response.url);
            handler
                .process_response(response)
                .map_err(|e| SpiderError::middleware(entry.name.as_str(), e))?;
        }
        Ok(())
    }

    /// Offers `error` to the exception chain in priority order.
    ///
    /// The first middleware that handles the error decides the outcome. `None` means the error
    /// was suppressed. Unhandled errors come back unchanged.
    pub fn process_exception(&self, error: SpiderError) -> Option<SpiderError> {
        let chain = self.snapshot(&self.chains.read().exception);
        for (entry, handler) in chain {
            match handler.process_exception(&error) {
                ExceptionAction::Continue => continue,
                ExceptionAction::Propagate => {
                    trace!("Exception middleware '{}' propagated: {}", entry.name, error);
                    return Some(error);
                }
                ExceptionAction::Replace(replacement) => {
                    debug!(
                        "Exception middleware '{}' replaced '{}' with '{}'",
                        entry.name, error, replacement
                    );
                    return Some(replacement);
                }
                ExceptionAction::Suppress => {
                    debug!("Exception middleware '{}' suppressed: {}", entry.name, error);
                    return None;
                }
            }
        }
        Some(error)
    }
}

impl fmt::Debug for MiddlewareManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains = self.chains.read();
        let names = |chain: Vec<&Arc<Entry>>| -> Vec<String> {
            chain.into_iter().map(|e| e.name.clone()).collect()
        };
        f.debug_struct("MiddlewareManager")
            .field("request", &names(chains.request.iter().map(|(e, _)| e).collect()))
            .field("response", &names(chains.response.iter().map(|(e, _)| e).collect()))
            .field("exception", &names(chains.exception.iter().map(|(e, _)| e).collect()))
            .field("disabled_groups", &self.disabled_groups)
            .finish()
    }
}
