use crate::state::AppState;
use crate::{api, logging, middleware as mw};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

/// Builds the HTTP router. Request logging is the outermost layer so that
/// rejected callers are logged and carry a trace id too.
pub fn build_http_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/ping", get(api::ping))
        .route("/update", post(api::update_json))
        .route("/updates", post(api::updates))
        .route("/update/{kind}/{name}/{value}", post(api::update_by_path))
        .route("/value", post(api::value_json))
        .route("/value/{kind}/{name}", get(api::value_by_path))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::trusted_subnet_middleware,
        ))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}
