//! Named resource factories
//!
//! The application builds one [`ResourceRegistry`] at startup and passes it
//! to whatever needs to look resources up by name (usually through schema
//! data, see [`crate::handler::resource`]). Instances are built lazily, once
//! per request scope.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cache::{AnyResource, ResourceCache};
use crate::context::RequestContext;
use crate::resource::{Endpoint, HttpResource, Pagination};
use crate::{ApiError, Result};

type Factory = Arc<dyn Fn(&RequestContext) -> AnyResource + Send + Sync>;

/// Registry of resource factories, keyed by name
#[derive(Default)]
pub struct ResourceRegistry {
    factories: HashMap<String, Factory>,
    cache: ResourceCache,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory building resource `name` for a request
    #[must_use]
    pub fn register<R, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        R: Any + Send + Sync,
        F: Fn(&RequestContext) -> R + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |ctx: &RequestContext| -> AnyResource { Arc::new(factory(ctx)) });
        self.factories.insert(name.into(), factory);
        self
    }

    /// Register an [`HttpResource`] on the request's API
    #[must_use]
    pub fn register_http(
        self,
        name: impl Into<String>,
        endpoint: impl Into<Endpoint>,
        pagination: Pagination,
    ) -> Self {
        let endpoint = endpoint.into();
        self.register(name, move |ctx: &RequestContext| {
            HttpResource::new(Arc::clone(ctx.api()), endpoint.clone()).with_pagination(pagination)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Resource `name` for the request, built on first access
    pub fn get<R>(&self, ctx: &RequestContext, name: &str) -> Result<Arc<R>>
    where
        R: Any + Send + Sync,
    {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ApiError::Registry(format!("no resource registered as `{}`", name)))?;

        self.cache
            .get_or_insert_with(ctx, name, || factory(ctx))
            .downcast::<R>()
            .map_err(|_| {
                ApiError::Registry(format!(
                    "resource `{}` is not a `{}`",
                    name,
                    std::any::type_name::<R>()
                ))
            })
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.factories.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
