#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod api_server;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use http::Request;
use hyper::Body;
use thiserror::Error;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tower_request_id::{RequestId, RequestIdLayer};
use tracing::info_span;
use tracing_appender::non_blocking::NonBlockingBuilder;

use traced_lib::config;
use traced_lib::kv::{KvError, RemoteKv};

#[derive(Debug, Error)]
enum ApiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("KV error: {0}")]
    Kv(#[from] KvError),
    #[error("server error: {0}")]
    Server(#[from] hyper::Error),
    #[error("invalid listen address: {0}")]
    ListenAddr(#[from] std::net::AddrParseError),
}

type ApiState = Arc<api_server::state::State>;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), ApiError> {
    let (non_blocking, _guard) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(non_blocking)
        .init();

    let config = config::load_config_from_environment();
    tracing::info!("connecting to KV at {}", config.kv_url);
    let kv = RemoteKv::connect(&config.kv_url).await?;

    let state: ApiState = Arc::new(api_server::state::State::new(config.clone(), kv));

    let app = Router::new()
        .merge(api_server::routes::register())
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map_or_else(|| "unknown".into(), ToString::to_string);
                info_span!(
                    "request",
                    id = %request_id,
                )
            }),
        )
        .layer(RequestIdLayer);

    let addr = SocketAddr::from_str(&config.listen_addr)?;
    tracing::info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
