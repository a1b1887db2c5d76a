//! The delivery pipeline: validate, resolve, authorize, then stream.
//!
//! Stages run strictly in order and the first failure ends the request.
//! User errors (400/401/404) are logged at debug; faults that point at a
//! defect or broken storage are logged at error with kind, id and owning
//! parent id.

use crate::models::{CacheDirective, ResourceKind, ResourceMetadata};
use crate::services::authorization::{authorize, Authorization};
use crate::services::database::MetadataStore;
use crate::services::metrics::{record_request, record_stream_outcome};
use crate::services::storage::{ByteStreamer, ContentPaths, StreamOutcome, StreamRequest};
use crate::services::token::TokenVerifier;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Per-request values the pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequest {
    pub raw_id: String,
    pub authorisation: Option<String>,
    pub download: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedId {
    pub id: i64,
    pub auth_required: bool,
}

/// Accept only plain decimal digits that fit an `i64`. Signs, whitespace and
/// fractions are rejected.
pub fn validate_id(kind: ResourceKind, raw: &str) -> Result<ValidatedId, AppError> {
    let invalid = || AppError::BadRequest(anyhow::anyhow!("id must be a number"));

    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let id = raw.parse::<i64>().map_err(|_| invalid())?;

    Ok(ValidatedId {
        id,
        auth_required: kind.auth_required(),
    })
}

/// Outcome of every stage before the byte transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub metadata: ResourceMetadata,
    pub authorization: Authorization,
    pub cache: Option<CacheDirective>,
    pub stream: StreamRequest,
}

#[derive(Clone)]
pub struct ResourceDispatcher {
    store: Arc<dyn MetadataStore>,
    verifier: Arc<TokenVerifier>,
    paths: ContentPaths,
    streamer: Arc<dyn ByteStreamer>,
}

impl ResourceDispatcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        verifier: TokenVerifier,
        paths: ContentPaths,
        streamer: Arc<dyn ByteStreamer>,
    ) -> Self {
        Self {
            store,
            verifier: Arc::new(verifier),
            paths,
            streamer,
        }
    }

    /// Run every stage up to, but not including, the transfer.
    pub async fn plan(
        &self,
        kind: ResourceKind,
        request: &ResourceRequest,
    ) -> Result<DeliveryPlan, AppError> {
        let validated = validate_id(kind, &request.raw_id).map_err(|e| {
            tracing::debug!(kind = %kind, raw_id = %request.raw_id, "Rejected malformed id");
            e
        })?;
        let id = validated.id;

        let metadata = self
            .store
            .find_resource_by_id(kind, id)
            .await
            .map_err(|e| {
                tracing::error!(kind = %kind, id, error = %e, "Metadata lookup failed");
                AppError::InternalError(anyhow::anyhow!("Metadata lookup failed"))
            })?
            .ok_or_else(|| {
                tracing::debug!(kind = %kind, id, "Resource not found");
                AppError::NotFound(anyhow::anyhow!("Resource not found"))
            })?;

        let authorization = authorize(
            kind,
            &metadata,
            request.authorisation.as_deref(),
            &self.verifier,
        );
        if authorization == Authorization::Unauthorized {
            tracing::debug!(
                kind = %kind,
                id,
                token_present = request.authorisation.is_some(),
                "Resource access denied"
            );
            return Err(AppError::Unauthorized(anyhow::anyhow!("Access denied")));
        }

        let cache = kind.cache_directive();
        let path = self.paths.resolve(kind, id);
        let attachment_filename = if request.download && kind.has_display_filename() {
            metadata.display_filename.clone()
        } else {
            None
        };

        Ok(DeliveryPlan {
            stream: StreamRequest {
                kind,
                id,
                path,
                mime_type: metadata.content_type().to_string(),
                attachment_filename,
            },
            metadata,
            authorization,
            cache,
        })
    }

    /// Serve one resource request end to end.
    pub async fn serve(
        &self,
        kind: ResourceKind,
        request: &ResourceRequest,
    ) -> Result<Response, AppError> {
        let result = self.serve_planned(kind, request).await;
        record_request(kind, result_label(&result));
        result
    }

    async fn serve_planned(
        &self,
        kind: ResourceKind,
        request: &ResourceRequest,
    ) -> Result<Response, AppError> {
        let plan = self.plan(kind, request).await?;
        let id = plan.stream.id;
        let owning_parent_id = plan.metadata.owning_parent_id;

        let cache_header = plan
            .cache
            .map(|cache| HeaderValue::from_str(&cache.header_value()))
            .transpose()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        let handle = self.streamer.stream(plan.stream).await.map_err(|e| {
            tracing::error!(
                kind = %kind,
                id,
                owning_parent_id,
                error = %e,
                "Failed to open resource content"
            );
            AppError::InternalError(anyhow::anyhow!("Failed to open resource content"))
        })?;

        tokio::spawn(observe_delivery(kind, id, owning_parent_id, handle.outcome));

        let mut response = handle.response;
        if let Some(value) = cache_header {
            response.headers_mut().insert(header::CACHE_CONTROL, value);
        }

        Ok(response)
    }
}

fn result_label(result: &Result<Response, AppError>) -> &'static str {
    match result {
        Ok(_) => "served",
        Err(AppError::BadRequest(_)) => "bad_request",
        Err(AppError::NotFound(_)) => "not_found",
        Err(AppError::Unauthorized(_)) => "unauthorized",
        Err(_) => "internal_error",
    }
}

async fn observe_delivery(
    kind: ResourceKind,
    id: i64,
    owning_parent_id: i64,
    outcome: oneshot::Receiver<StreamOutcome>,
) {
    let Ok(outcome) = outcome.await else {
        return;
    };
    record_stream_outcome(kind, &outcome);

    match &outcome {
        StreamOutcome::Completed { bytes_sent } => {
            tracing::info!(kind = %kind, id, bytes_sent, "Resource delivered");
        }
        StreamOutcome::ClientClosed { bytes_sent } => {
            tracing::debug!(kind = %kind, id, bytes_sent, "Client closed connection mid-transfer");
        }
        StreamOutcome::Discarded => {
            tracing::debug!(kind = %kind, id, "Response body discarded before transfer");
        }
        StreamOutcome::IoFailure { bytes_sent, error } => {
            tracing::error!(
                kind = %kind,
                id,
                owning_parent_id,
                bytes_sent,
                error = %error,
                "Resource transfer failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::{StreamError, StreamHandle};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::StatusCode;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SECRET: &[u8] = b"dispatcher-test-secret";

    #[derive(Default)]
    struct CountingStore {
        records: HashMap<(ResourceKind, i64), ResourceMetadata>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl MetadataStore for CountingStore {
        async fn find_resource_by_id(
            &self,
            kind: ResourceKind,
            id: i64,
        ) -> Result<Option<ResourceMetadata>, AppError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.get(&(kind, id)).cloned())
        }

        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl MetadataStore for FailingStore {
        async fn find_resource_by_id(
            &self,
            _kind: ResourceKind,
            _id: i64,
        ) -> Result<Option<ResourceMetadata>, AppError> {
            Err(AppError::DatabaseError(anyhow::anyhow!("connection reset")))
        }

        async fn health_check(&self) -> Result<(), AppError> {
            Err(AppError::ServiceUnavailable)
        }
    }

    #[derive(Default)]
    struct RecordingStreamer {
        calls: Mutex<Vec<StreamRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl ByteStreamer for RecordingStreamer {
        async fn stream(&self, request: StreamRequest) -> Result<StreamHandle, StreamError> {
            if self.fail {
                return Err(StreamError::NotAFile(request.path));
            }
            let mime_type = request.mime_type.clone();
            self.calls.lock().unwrap().push(request);

            let (tx, rx) = oneshot::channel();
            let _ = tx.send(StreamOutcome::Completed { bytes_sent: 0 });
            let response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, mime_type)
                .body(Body::empty())?;
            Ok(StreamHandle {
                response,
                outcome: rx,
            })
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        streamer: Arc<RecordingStreamer>,
        dispatcher: ResourceDispatcher,
        verifier: TokenVerifier,
    }

    fn fixture() -> Fixture {
        let mut store = CountingStore::default();
        store.records.insert(
            (ResourceKind::Export, 42),
            ResourceMetadata {
                mime_type: Some("video/mp4".to_string()),
                display_filename: Some("reel.mp4".to_string()),
                owning_parent_id: 7,
            },
        );
        store.records.insert(
            (ResourceKind::Thumbnail, 5),
            ResourceMetadata {
                mime_type: Some("image/jpeg".to_string()),
                display_filename: None,
                owning_parent_id: 7,
            },
        );
        let store = Arc::new(store);
        let streamer = Arc::new(RecordingStreamer::default());
        let dispatcher = ResourceDispatcher::new(
            store.clone(),
            TokenVerifier::new(SECRET),
            ContentPaths::new("/srv/archive"),
            streamer.clone(),
        );

        Fixture {
            store,
            streamer,
            dispatcher,
            verifier: TokenVerifier::new(SECRET),
        }
    }

    fn request(raw_id: &str, token: Option<String>, download: bool) -> ResourceRequest {
        ResourceRequest {
            raw_id: raw_id.to_string(),
            authorisation: token,
            download,
        }
    }

    #[test]
    fn validate_id_accepts_decimal_digits() {
        let validated = validate_id(ResourceKind::Export, "42").unwrap();
        assert_eq!(validated.id, 42);
        assert!(validated.auth_required);

        assert_eq!(validate_id(ResourceKind::Thumbnail, "0").unwrap().id, 0);
        assert_eq!(validate_id(ResourceKind::Thumbnail, "007").unwrap().id, 7);
        assert!(!validate_id(ResourceKind::Thumbnail, "1").unwrap().auth_required);
    }

    #[test]
    fn validate_id_rejects_everything_else() {
        for raw in ["", "abc", "-1", "+1", "1.5", " 1", "1e3", "99999999999999999999"] {
            let err = validate_id(ResourceKind::Export, raw).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "accepted {:?}", raw);
            assert_eq!(err.to_string(), "Bad request: id must be a number");
        }
    }

    #[tokio::test]
    async fn malformed_id_never_touches_the_store() {
        let f = fixture();

        for raw in ["abc", "-42"] {
            let err = f
                .dispatcher
                .serve(ResourceKind::Thumbnail, &request(raw, None, false))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
        assert_eq!(f.store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_even_with_a_valid_token() {
        let f = fixture();
        let token = f.verifier.issue(7, None).unwrap();

        let err = f
            .dispatcher
            .serve(ResourceKind::Export, &request("43", Some(token), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = f
            .dispatcher
            .serve(ResourceKind::Thumbnail, &request("99", None, false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn export_without_token_never_reaches_streaming() {
        let f = fixture();

        let err = f
            .dispatcher
            .serve(ResourceKind::Export, &request("42", None, false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(f.streamer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_with_token_for_another_film_is_unauthorized() {
        let f = fixture();
        let token = f.verifier.issue(8, None).unwrap();

        let err = f
            .dispatcher
            .serve(ResourceKind::Export, &request("42", Some(token), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert!(f.streamer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_with_matching_token_is_authorized_and_streamed_inline() {
        let f = fixture();
        let token = f.verifier.issue(7, None).unwrap();

        let plan = f
            .dispatcher
            .plan(ResourceKind::Export, &request("42", Some(token.clone()), false))
            .await
            .unwrap();
        assert_eq!(plan.authorization, Authorization::Authorized);
        assert_eq!(plan.cache, None);
        assert_eq!(plan.stream.attachment_filename, None);
        assert_eq!(
            plan.stream.path,
            std::path::PathBuf::from("/srv/archive/exports/42")
        );

        let response = f
            .dispatcher
            .serve(ResourceKind::Export, &request("42", Some(token), false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert!(!response.headers().contains_key(header::CACHE_CONTROL));

        let calls = f.streamer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].attachment_filename, None);
    }

    #[tokio::test]
    async fn download_flag_passes_display_filename() {
        let f = fixture();
        let token = f.verifier.issue(7, None).unwrap();

        f.dispatcher
            .serve(ResourceKind::Export, &request("42", Some(token), true))
            .await
            .unwrap();

        let calls = f.streamer.calls.lock().unwrap();
        assert_eq!(calls[0].attachment_filename.as_deref(), Some("reel.mp4"));
    }

    #[tokio::test]
    async fn thumbnail_streams_without_token_and_is_cached() {
        let f = fixture();

        let response = f
            .dispatcher
            .serve(ResourceKind::Thumbnail, &request("5", None, true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "max-age=600");

        let calls = f.streamer.calls.lock().unwrap();
        assert_eq!(calls[0].attachment_filename, None);
        assert_eq!(
            calls[0].path,
            std::path::PathBuf::from("/srv/archive/thumbs/5")
        );
    }

    #[tokio::test]
    async fn thumbnail_filename_never_becomes_an_attachment() {
        let mut store = CountingStore::default();
        store.records.insert(
            (ResourceKind::Thumbnail, 6),
            ResourceMetadata {
                mime_type: Some("image/jpeg".to_string()),
                display_filename: Some("thumb.jpg".to_string()),
                owning_parent_id: 7,
            },
        );
        let streamer = Arc::new(RecordingStreamer::default());
        let dispatcher = ResourceDispatcher::new(
            Arc::new(store),
            TokenVerifier::new(SECRET),
            ContentPaths::new("/srv/archive"),
            streamer.clone(),
        );

        let plan = dispatcher
            .plan(ResourceKind::Thumbnail, &request("6", None, true))
            .await
            .unwrap();
        assert_eq!(plan.stream.attachment_filename, None);

        dispatcher
            .serve(ResourceKind::Thumbnail, &request("6", None, true))
            .await
            .unwrap();
        assert_eq!(streamer.calls.lock().unwrap()[0].attachment_filename, None);
    }

    #[tokio::test]
    async fn repeated_requests_are_served_identically() {
        let f = fixture();
        let token = f.verifier.issue(7, None).unwrap();
        let req = request("42", Some(token), true);

        let first = f.dispatcher.serve(ResourceKind::Export, &req).await.unwrap();
        let second = f.dispatcher.serve(ResourceKind::Export, &req).await.unwrap();
        assert_eq!(first.status(), second.status());
        assert_eq!(
            first.headers()[header::CONTENT_TYPE],
            second.headers()[header::CONTENT_TYPE]
        );

        let calls = f.streamer.calls.lock().unwrap();
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn store_failure_is_an_internal_error() {
        let dispatcher = ResourceDispatcher::new(
            Arc::new(FailingStore),
            TokenVerifier::new(SECRET),
            ContentPaths::new("/srv/archive"),
            Arc::new(RecordingStreamer::default()),
        );

        let err = dispatcher
            .serve(ResourceKind::Thumbnail, &request("5", None, false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InternalError(_)));
    }

    #[tokio::test]
    async fn streamer_failure_is_an_internal_error() {
        let mut store = CountingStore::default();
        store.records.insert(
            (ResourceKind::Thumbnail, 5),
            ResourceMetadata {
                mime_type: None,
                display_filename: None,
                owning_parent_id: 7,
            },
        );
        let streamer = RecordingStreamer {
            fail: true,
            ..Default::default()
        };
        let dispatcher = ResourceDispatcher::new(
            Arc::new(store),
            TokenVerifier::new(SECRET),
            ContentPaths::new("/srv/archive"),
            Arc::new(streamer),
        );

        let err = dispatcher
            .serve(ResourceKind::Thumbnail, &request("5", None, false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InternalError(_)));
    }
}
