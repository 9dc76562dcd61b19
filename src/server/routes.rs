//! Router configuration for the API server.

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::AppState;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/site", get(handlers::get_site))
        .route(
            "/api/subscriber",
            get(handlers::get_subscribers)
                .post(handlers::add_subscriber)
                .delete(handlers::delete_subscriber),
        )
        .route(
            "/api/subscriber/by_subscription",
            get(handlers::get_subscribers_by_subscription),
        )
        .route(
            "/api/subscription",
            axum::routing::post(handlers::subscribe).delete(handlers::unsubscribe),
        )
        .route(
            "/api/subscription/by_subscriber",
            get(handlers::get_subscriptions_by_subscriber),
        )
        .with_state(state)
}
