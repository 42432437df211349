use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::AppState;
use crate::config::Config;
use crate::handlers;

/// Create file server routes
///
/// Every path is a resource path, so the dispatcher is installed as the
/// fallback rather than on fixed routes.
pub fn file_routes() -> Router<AppState> {
    Router::new().fallback(handlers::dispatch)
}

/// Build the complete application: routes, state and middleware.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();
    with_middleware(file_routes(), &config).with_state(state)
}

/// Wrap `router` in the body limit, tracing, panic isolation and, when
/// enabled, CORS layers.
pub fn with_middleware(router: Router<AppState>, config: &Config) -> Router<AppState> {
    let app = router
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        );

    if config.cors {
        app.layer(cors_layer(config))
    } else {
        app
    }
}

/// Build CORS layer
fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.cors_origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(&config.cors_origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!(
                    "Invalid CORS origin {:?}, allowing any origin",
                    config.cors_origin
                );
                AllowOrigin::from(Any)
            }
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::HEAD, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::IF_MATCH,
            header::IF_NONE_MATCH,
        ])
        .expose_headers([header::ETAG, header::LAST_MODIFIED])
}
