//! Per-request scope
//!
//! A [`RequestContext`] is created when a GraphQL request starts and dropped
//! when it completes. It owns the request's [`HttpApi`] (and with it the
//! loader cache) plus the set of resources built for it.

use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::api::{HttpApi, HttpApiConfig};
use crate::cache::ResourceSet;
use crate::transport::Transport;

/// Scope of one logical request
///
/// Clones share the same resource set. Contexts created separately can be
/// grouped under one cache key with [`RequestContext::with_cache_key`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: Uuid,
    cache_key: Option<Uuid>,
    api: Arc<HttpApi>,
    resources: Arc<OnceLock<Arc<ResourceSet>>>,
}

impl RequestContext {
    pub fn new(api: Arc<HttpApi>) -> Self {
        Self {
            id: Uuid::new_v4(),
            cache_key: None,
            api,
            resources: Arc::new(OnceLock::new()),
        }
    }

    /// Share resources with every other context using the same key
    #[must_use]
    pub fn with_cache_key(mut self, key: Uuid) -> Self {
        self.cache_key = Some(key);
        self.resources = Arc::new(OnceLock::new());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Key resources are cached under: the override key, else the context id
    pub fn cache_key(&self) -> Uuid {
        self.cache_key.unwrap_or(self.id)
    }

    pub fn api(&self) -> &Arc<HttpApi> {
        &self.api
    }

    pub(crate) fn resource_set(&self) -> Option<Arc<ResourceSet>> {
        self.resources.get().cloned()
    }

    /// Hold `set` for the lifetime of this context; returns the set in use
    pub(crate) fn attach(&self, set: Arc<ResourceSet>) -> Arc<ResourceSet> {
        Arc::clone(self.resources.get_or_init(|| set))
    }
}

/// Creates a fresh [`RequestContext`] per request
#[derive(Clone)]
pub struct ContextFactory {
    config: HttpApiConfig,
    transport: Arc<dyn Transport>,
}

impl ContextFactory {
    pub fn new(config: HttpApiConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &HttpApiConfig {
        &self.config
    }

    /// New context with its own API instance, hence an empty loader cache
    pub fn new_context(&self) -> RequestContext {
        let api = HttpApi::new(self.config.clone(), Arc::clone(&self.transport));
        RequestContext::new(Arc::new(api))
    }
}
