use livesync::config::ServerConfig;
use livesync::{routes, state};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    let port = config.port;
    tracing::info!(
        outbox_capacity = config.outbox_capacity,
        max_subscribers = config.max_subscribers,
        diagnostics_capacity = config.diagnostics_capacity,
        "sync configured"
    );

    let state = state::AppState::new(config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "livesync listening");
    axum::serve(listener, app).await.expect("server failed");
}
