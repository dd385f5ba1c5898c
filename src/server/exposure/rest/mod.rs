//! REST exposure of registered models
//!
//! Consumes an [`Application`] and produces an Axum `Router`. Models are
//! resolved per request from the plural path segment, so models and remote
//! methods registered after the router is built are served too.

pub mod context;
pub mod handlers;
pub mod response;

use crate::server::application::Application;
use axum::{Router, middleware, routing::any, routing::get};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router for an application
    ///
    /// The router carries:
    /// - health check routes
    /// - collection, instance and action routes for every model
    /// - the auth context middleware
    /// - request tracing, and permissive CORS when `rest.cors` is set
    pub fn build_router(app: Application) -> Router {
        let cors = app.config().rest.cors;

        let router = Router::new()
            .merge(Self::health_routes())
            .route(
                "/{plural}",
                get(handlers::list_instances).post(handlers::create_instance),
            )
            .route("/{plural}/{id}", any(handlers::item_route))
            .route("/{plural}/{id}/{action}", any(handlers::action_route))
            .fallback(handlers::route_not_found)
            .layer(middleware::from_fn_with_state(
                app.clone(),
                context::attach_auth_context,
            ))
            .with_state(app);

        let router = if cors {
            router.layer(CorsLayer::permissive())
        } else {
            router
        };

        router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    fn health_routes() -> Router<Application> {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/healthz", get(handlers::health_check))
    }
}
