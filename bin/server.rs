// Care-Gap Dashboard - API Server

use rusqlite::Connection;
use tokio::net::TcpListener;
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use caredash::{build_router, setup_database, AppState, Config};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();

    let conn = Connection::open(&config.db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to set up database schema");
    info!("Database opened: {}", config.db_path);

    let port = config.port;
    let state = AppState::new(conn, config);
    let app = build_router(state);

    let address = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&address)
        .await
        .expect("Failed to bind to address");
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    info!("Server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
