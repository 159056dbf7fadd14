pub mod admin;
pub mod boot;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::DbPool;
use crate::error::RenderError;
use crate::renderer::TemplateRegistry;
use crate::types::HealthResponse;

pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub registry: Arc<TemplateRegistry>,
}

pub(crate) type ApiError = (StatusCode, String);

pub(crate) fn internal_error(e: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub(crate) fn render_error(e: RenderError) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/clusters", post(admin::create_cluster).get(admin::list_clusters))
        .route("/clusters/:name/users", post(admin::add_user))
        .route("/nodes", post(admin::create_node).get(admin::list_nodes))
        .route(
            "/nodes/:fqdn",
            get(admin::get_node)
                .patch(admin::update_node)
                .delete(admin::delete_node),
        )
        .route(
            "/nodes/:fqdn/credentials/reissue",
            post(admin::reissue_credentials),
        )
        .route("/nodes/:fqdn/disks/:device", put(admin::set_disk))
        .route("/nodes/:fqdn/provisions", get(admin::list_provisions))
        .route("/nodes/:fqdn/ignition", get(admin::preview_ignition))
        .route("/nodes/:fqdn/ipxe", get(admin::preview_ipxe))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        // Health check
        .route("/health", get(health))
        // Node-facing boot surface
        .route("/ignition", get(boot::ignition))
        .route("/ipxe", get(boot::ipxe_boot))
        .route("/credentials/:filename", get(boot::credentials))
        .route("/report", post(boot::report))
        // Operator surface
        .nest("/api", admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Every operator route requires the configured admin token.
async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    if presented != Some(state.config.admin_token.as_str()) {
        return (StatusCode::UNAUTHORIZED, "401 Unauthorized").into_response();
    }

    next.run(req).await
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
