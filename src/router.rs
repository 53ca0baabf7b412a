use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Without configured origins any origin is allowed, without credentials.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::register_user))
        .route("/login", post(handlers::login_user));

    // Upload size is enforced while streaming, so the default body cap is lifted.
    let file_routes = Router::new()
        .route(
            "/upload",
            post(handlers::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/upload-anonymous",
            post(handlers::upload_anonymous).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/tags",
            get(handlers::get_tags).delete(handlers::delete_unknown_file),
        )
        .route(
            "/history",
            get(handlers::get_history).delete(handlers::delete_unknown_file),
        )
        .route("/:key", axum::routing::delete(handlers::delete_file))
        .route("/:key/metadata", get(handlers::get_metadata))
        .route("/:key/download", post(handlers::download_file))
        .route("/:key/tags", patch(handlers::update_tags))
        .route("/:key/password", patch(handlers::update_password))
        .route("/:key/expiration", patch(handlers::update_expiration));

    let user_routes = Router::new().route(
        "/me",
        get(handlers::get_profile)
            .patch(handlers::update_profile)
            .delete(handlers::delete_account),
    );

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/files", file_routes)
        .nest("/users", user_routes)
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}
