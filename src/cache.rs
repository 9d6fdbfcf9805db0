//! Resources scoped to a request
//!
//! [`ResourceCache`] maps a context's cache key to its [`ResourceSet`]
//! without keeping the set alive: contexts hold the strong references, the
//! cache only a weak one. Once the last context using a set is dropped, the
//! set and every resource in it are freed; the dead entry is swept the next
//! time a new scope is registered.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;
use uuid::Uuid;

use crate::context::RequestContext;

pub(crate) type AnyResource = Arc<dyn Any + Send + Sync>;

/// Resources built for one logical request, by name
#[derive(Default)]
pub struct ResourceSet {
    resources: Mutex<HashMap<String, AnyResource>>,
}

impl ResourceSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, AnyResource>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, name: &str) -> Option<AnyResource> {
        self.lock().get(name).cloned()
    }

    fn insert(&self, name: &str, resource: AnyResource) {
        self.lock().insert(name.to_string(), resource);
    }

    /// Keeps the first resource stored under `name`
    fn insert_if_absent(&self, name: &str, resource: AnyResource) -> AnyResource {
        Arc::clone(self.lock().entry(name.to_string()).or_insert(resource))
    }
}

impl fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.lock().keys()).finish()
    }
}

/// Cache of per-request resource sets
#[derive(Debug, Default)]
pub struct ResourceCache {
    scopes: Mutex<HashMap<Uuid, Weak<ResourceSet>>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource `name` of the context, if one of type `R` was stored
    pub fn get<R>(&self, ctx: &RequestContext, name: &str) -> Option<Arc<R>>
    where
        R: Any + Send + Sync,
    {
        self.scope(ctx).get(name)?.downcast::<R>().ok()
    }

    /// Store `resource` under `name`, replacing any previous one
    pub fn set<R>(&self, ctx: &RequestContext, name: &str, resource: Arc<R>)
    where
        R: Any + Send + Sync,
    {
        self.scope(ctx).insert(name, resource);
    }

    /// Resource `name`, built with `create` on first access
    ///
    /// `create` runs without any lock held, so it may itself look up other
    /// resources. If two callers race, the first stored value wins.
    pub fn get_or_insert_with<F>(&self, ctx: &RequestContext, name: &str, create: F) -> AnyResource
    where
        F: FnOnce() -> AnyResource,
    {
        let set = self.scope(ctx);
        if let Some(existing) = set.get(name) {
            return existing;
        }

        trace!(name, scope = %ctx.cache_key(), "creating resource");
        set.insert_if_absent(name, create())
    }

    /// Number of request scopes still alive
    pub fn live_scopes(&self) -> usize {
        let mut scopes = self.lock();
        prune(&mut scopes);
        scopes.len()
    }

    fn scope(&self, ctx: &RequestContext) -> Arc<ResourceSet> {
        let key = ctx.cache_key();
        let mut scopes = self.lock();
        let live = scopes.get(&key).and_then(Weak::upgrade);

        let set = match ctx.resource_set() {
            Some(set) => set,
            None => ctx.attach(live.clone().unwrap_or_default()),
        };

        // Dead entries are only swept when a new scope is registered.
        if live.is_none() {
            prune(&mut scopes);
            scopes.insert(key, Arc::downgrade(&set));
        }
        set
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Weak<ResourceSet>>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn prune(scopes: &mut HashMap<Uuid, Weak<ResourceSet>>) {
    scopes.retain(|_, set| set.strong_count() > 0);
}
