#![allow(dead_code)]

use async_trait::async_trait;
use film_service::config::{DatabaseConfig, FilmConfig, StorageConfig, TokenConfig};
use film_service::models::{ResourceKind, ResourceMetadata};
use film_service::services::{MetadataStore, TokenVerifier};
use film_service::startup::Application;
use secrecy::Secret;
use service_core::config::Config as CoreConfig;
use service_core::error::AppError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tempfile::TempDir;

pub const TEST_SECRET: &str = "integration-test-secret";

/// In-memory metadata store that counts lookups.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<(ResourceKind, i64), ResourceMetadata>>,
    lookups: AtomicUsize,
}

impl InMemoryStore {
    pub fn insert(&self, kind: ResourceKind, id: i64, metadata: ResourceMetadata) {
        self.records.write().unwrap().insert((kind, id), metadata);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn find_resource_by_id(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<Option<ResourceMetadata>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().unwrap().get(&(kind, id)).cloned())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<InMemoryStore>,
    pub storage: TempDir,
    pub verifier: TokenVerifier,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let storage = tempfile::tempdir().expect("Failed to create storage dir");
        let store = Arc::new(InMemoryStore::default());

        let config = FilmConfig {
            common: CoreConfig {
                port: 0, // Random port for testing
                ..CoreConfig::default()
            },
            database: DatabaseConfig {
                url: "postgres://unused".to_string(),
                max_connections: 1,
                min_connections: 0,
            },
            storage: StorageConfig {
                root: storage.path().to_string_lossy().into_owned(),
            },
            token: TokenConfig {
                secret: Secret::new(TEST_SECRET.to_string()),
            },
        };

        let app = Application::build_with_store(config, store.clone())
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            port,
            store,
            storage,
            verifier: TokenVerifier::new(TEST_SECRET.as_bytes()),
        }
    }

    /// Register metadata and write the backing file.
    pub async fn seed(
        &self,
        kind: ResourceKind,
        id: i64,
        metadata: ResourceMetadata,
        content: &[u8],
    ) {
        self.store.insert(kind, id, metadata);

        let path: PathBuf = self
            .storage
            .path()
            .join(kind.storage_dir())
            .join(id.to_string());
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .expect("Failed to create storage subdirectory");
        tokio::fs::write(&path, content)
            .await
            .expect("Failed to write test content");
    }

    pub fn token_for(&self, film_id: i64) -> String {
        self.verifier
            .issue(film_id, Some(chrono::Duration::minutes(5)))
            .expect("Failed to issue token")
    }
}
