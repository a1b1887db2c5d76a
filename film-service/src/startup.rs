use crate::config::FilmConfig;
use crate::db;
use crate::handlers;
use crate::services::{
    ContentPaths, LocalFileStreamer, MetadataStore, PgMetadataStore, ResourceDispatcher,
    TokenVerifier,
};
use axum::{middleware, routing::get, Router};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetadataStore>,
    pub dispatcher: ResourceDispatcher,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    /// Connect to PostgreSQL, apply migrations and bind the listener.
    pub async fn build(config: FilmConfig) -> Result<Self, AppError> {
        let pool = db::create_pool(&config.database).await.map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            AppError::from(e)
        })?;
        db::run_migrations(&pool).await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e))
        })?;

        Self::build_with_store(config, Arc::new(PgMetadataStore::new(pool))).await
    }

    /// Bind the listener around an already constructed metadata store.
    pub async fn build_with_store(
        config: FilmConfig,
        store: Arc<dyn MetadataStore>,
    ) -> Result<Self, AppError> {
        let verifier = TokenVerifier::new(config.token.secret.expose_secret().as_bytes());
        let paths = ContentPaths::new(&config.storage.root);
        if !paths.root().exists() {
            tracing::warn!(
                root = %paths.root().display(),
                "Storage root does not exist; every transfer will fail"
            );
        }

        let dispatcher =
            ResourceDispatcher::new(store.clone(), verifier, paths, Arc::new(LocalFileStreamer));

        let state = AppState { store, dispatcher };

        let app = router(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/film/:film/export/:export", get(handlers::get_export))
        .route("/film/:film/thumbnail/:thumbnail", get(handlers::get_thumbnail))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
