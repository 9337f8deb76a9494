pub mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use teleop_core::config::Config;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Device socket & pairing
        .route("/api/device/initiate", get(routes::device::initiate))
        .route("/api/device/link/{code}", post(routes::device::link))
        .route("/api/device/unlink/{code}", post(routes::device::unlink))
        .route("/api/device/status/{code}", get(routes::device::status))
        .route(
            "/api/device/clear_visual/{code}",
            post(routes::device::clear_visual),
        )
        // Commands
        .route(
            "/api/device/send_command",
            post(routes::commands::send_command),
        )
        // Actions
        .route("/api/actions", get(routes::actions::list_actions))
        .route("/api/actions", post(routes::actions::create_action))
        // Motions
        .route("/api/motions", get(routes::motions::list_motions))
        // Recording
        .route("/api/recording/start/{code}", get(routes::recording::start))
        .route("/api/recording/pause/{code}", get(routes::recording::pause))
        .route(
            "/api/recording/resume/{code}",
            get(routes::recording::resume),
        )
        .route("/api/recording/stop/{code}", get(routes::recording::stop))
        .layer(cors)
        .with_state(app_state)
}

/// Start the teleop backend server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let port = config.port;
    let app_state = state::AppState::new(&config);
    let app = build_router(app_state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("teleop server listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
