pub mod affiliate;
pub mod auth;
pub mod config;
pub mod credits;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod plans;
pub mod processing;
pub mod rate_limit;
pub mod state;
pub mod store;
pub mod stripe_api;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let auth_router = Router::new()
        .route("/signup-complete", post(handlers::signup_complete))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let credits_router = Router::new()
        .route("/", get(handlers::get_credits))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let subscription_router = Router::new()
        .route("/", get(handlers::get_subscription))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let stripe_router = Router::new()
        .route(
            "/create-checkout-session",
            post(handlers::create_checkout_session),
        )
        .route(
            "/create-customer-portal-session",
            post(handlers::create_customer_portal_session),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let process_router = Router::new()
        .route("/upscale", post(handlers::upscale_image))
        .route("/background-removal", post(handlers::remove_background))
        .route("/vectorize", post(handlers::vectorize_image))
        .route("/generate", post(handlers::generate_image))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let affiliate_router = Router::new()
        .route("/", get(handlers::get_affiliate_status))
        .route("/apply", post(handlers::apply_for_affiliate))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let admin_router = Router::new()
        .route("/users/{id}", get(handlers::admin_get_user))
        .route("/users/{id}/credits", post(handlers::admin_adjust_credits))
        .route(
            "/affiliates/{id}/review",
            post(handlers::admin_review_affiliate),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    let api_router = Router::new()
        .nest("/auth", auth_router)
        .nest("/credits", credits_router)
        .nest("/subscription", subscription_router)
        .nest("/stripe", stripe_router)
        .nest("/process", process_router)
        .nest("/affiliate", affiliate_router)
        .nest("/admin", admin_router)
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::api_rate_limit,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/stripe/webhook", post(handlers::handle_stripe_webhook))
        .nest("/health", Router::new().route("/", get(handlers::health)))
        .nest("/api", api_router)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
