use std::net::SocketAddr;
use std::path::PathBuf;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use stride_relay::dispatcher::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stride=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("STRIDE_DB_PATH").unwrap_or_else(|_| "stride-relay.db".into());
    let host = std::env::var("STRIDE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("STRIDE_PORT")
        .unwrap_or_else(|_| "3100".into())
        .parse()?;

    // Init message store
    let db = stride_db::Database::open(&PathBuf::from(&db_path))?;
    let dispatcher = Dispatcher::new(db);
    info!("Relay node {} starting", dispatcher.node_id());

    let app = stride_relay::app(dispatcher)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Stride relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
