//! GraphQL request handler and resolver helpers
//!
//! Provides helpers for:
//! - Running each GraphQL request inside a fresh [`RequestContext`]
//! - Reaching that context and its resources from resolvers

use std::any::Any;
use std::sync::Arc;

use async_graphql::{Context, ErrorExtensions, Request, Response, Schema};
use axum::{extract::Extension, Json};
use tracing::debug;

use crate::context::{ContextFactory, RequestContext};
use crate::registry::ResourceRegistry;

/// Standard GraphQL handler with request scope injection
///
/// Every request gets its own [`RequestContext`], so batching and caching
/// never leak across requests.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Extension, Router, routing::post};
/// use async_graphql::{EmptyMutation, EmptySubscription, Schema};
/// use pleme_rest_loader::{graphql_handler, ContextFactory};
///
/// # #[derive(Default)] struct Query;
/// # #[async_graphql::Object] impl Query { async fn ok(&self) -> bool { true } }
/// # fn example(factory: ContextFactory) {
/// let schema = Schema::new(Query, EmptyMutation, EmptySubscription);
/// let app: Router = Router::new()
///     .route("/graphql", post(graphql_handler::<Query, EmptyMutation, EmptySubscription>))
///     .layer(Extension(schema))
///     .layer(Extension(factory));
/// # }
/// ```
pub async fn graphql_handler<Query, Mutation, Subscription>(
    Extension(schema): Extension<Schema<Query, Mutation, Subscription>>,
    Extension(factory): Extension<ContextFactory>,
    req: Json<Request>,
) -> Json<Response>
where
    Query: async_graphql::ObjectType + 'static,
    Mutation: async_graphql::ObjectType + 'static,
    Subscription: async_graphql::SubscriptionType + 'static,
{
    let ctx = factory.new_context();
    debug!(request_id = %ctx.id(), "executing GraphQL request");

    let request = req.0.data(ctx);
    Json(schema.execute(request).await)
}

/// Get the [`RequestContext`] from GraphQL context
pub fn request_context<'a>(ctx: &'a Context<'_>) -> async_graphql::Result<&'a RequestContext> {
    ctx.data::<RequestContext>()
}

/// Get resource `name` for the current request
///
/// The [`ResourceRegistry`] is read from schema data.
///
/// # Example
///
/// ```rust,no_run
/// use async_graphql::Context;
/// use pleme_rest_loader::{resource, HttpResource};
///
/// async fn salad(ctx: &Context<'_>, id: String) -> async_graphql::Result<Option<serde_json::Value>> {
///     let salads = resource::<HttpResource>(ctx, "salads")?;
///     Ok(salads.get(Some(&id)).await?)
/// }
/// ```
pub fn resource<R>(ctx: &Context<'_>, name: &str) -> async_graphql::Result<Arc<R>>
where
    R: Any + Send + Sync,
{
    let registry = ctx.data::<ResourceRegistry>()?;
    registry
        .get::<R>(request_context(ctx)?, name)
        .map_err(|e| e.extend())
}
