use anyhow::Result;
use axum::{Extension, Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod handlers;

/// Bind the service and serve until shutdown.
///
/// The auth core itself is transport-agnostic; this only exposes the
/// operational surface (health) and owns the database pool.
///
/// # Errors
///
/// Fails when the pool cannot connect or the listener cannot bind.
pub async fn new(port: u16, dsn: String) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;
    info!(port, "listening");

    let app = Router::new()
        .route("/health", get(handlers::health))
        .layer(Extension(pool))
        .layer(TraceLayer::new_for_http());

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
