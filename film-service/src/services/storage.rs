//! Storage layout and byte delivery.
//!
//! Files live at `<root>/exports/<id>` and `<root>/thumbs/<id>`. The file is
//! opened before any header is committed so a missing or unreadable file is
//! still a clean error response; after that the transfer outcome is reported
//! through [`StreamHandle::outcome`].

use crate::models::ResourceKind;
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header, StatusCode},
    response::Response,
};
use futures::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

/// Maps (kind, id) to a location under the storage root.
#[derive(Debug, Clone)]
pub struct ContentPaths {
    root: PathBuf,
}

impl ContentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, kind: ResourceKind, id: i64) -> PathBuf {
        self.root.join(kind.storage_dir()).join(id.to_string())
    }
}

/// Everything the streamer needs to send one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub kind: ResourceKind,
    pub id: i64,
    pub path: PathBuf,
    pub mime_type: String,
    /// `Some` switches the response to attachment disposition.
    pub attachment_filename: Option<String>,
}

/// How a started transfer ended.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed { bytes_sent: u64 },
    ClientClosed { bytes_sent: u64 },
    IoFailure { bytes_sent: u64, error: io::Error },
    /// The body was dropped without ever being polled, as with `HEAD`.
    Discarded,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOutcome::Completed { .. } => "completed",
            StreamOutcome::ClientClosed { .. } => "client_closed",
            StreamOutcome::IoFailure { .. } => "io_failure",
            StreamOutcome::Discarded => "discarded",
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        match self {
            StreamOutcome::Completed { bytes_sent }
            | StreamOutcome::ClientClosed { bytes_sent }
            | StreamOutcome::IoFailure { bytes_sent, .. } => *bytes_sent,
            StreamOutcome::Discarded => 0,
        }
    }
}

/// Failure before any byte or header reached the client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("failed to build response: {0}")]
    Response(#[from] axum::http::Error),
}

/// A response ready to be sent plus a receiver for the transfer outcome.
pub struct StreamHandle {
    pub response: Response,
    pub outcome: oneshot::Receiver<StreamOutcome>,
}

#[async_trait]
pub trait ByteStreamer: Send + Sync {
    async fn stream(&self, request: StreamRequest) -> Result<StreamHandle, StreamError>;
}

/// Streams files from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStreamer;

#[async_trait]
impl ByteStreamer for LocalFileStreamer {
    async fn stream(&self, request: StreamRequest) -> Result<StreamHandle, StreamError> {
        let file = File::open(&request.path)
            .await
            .map_err(|source| StreamError::Open {
                path: request.path.clone(),
                source,
            })?;
        let metadata = file.metadata().await.map_err(|source| StreamError::Open {
            path: request.path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(StreamError::NotAFile(request.path));
        }

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, request.mime_type.as_str())
            .header(header::CONTENT_LENGTH, metadata.len().to_string());

        if let Some(filename) = &request.attachment_filename {
            builder = builder.header(header::CONTENT_DISPOSITION, attachment_disposition(filename));
        }

        let (tx, rx) = oneshot::channel();
        let body = DeliveryStream::new(ReaderStream::new(file), tx);
        let response = builder.body(Body::from_stream(body))?;

        Ok(StreamHandle {
            response,
            outcome: rx,
        })
    }
}

/// `attachment; filename="..."`, adding an RFC 5987 `filename*` when the name
/// is not plain printable ASCII.
pub fn attachment_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    if fallback == filename {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    }
}

/// Response body that counts bytes and reports how the transfer ended.
///
/// Dropping the stream before it is exhausted means hyper gave up on the
/// connection, which is reported as [`StreamOutcome::ClientClosed`]. A stream
/// dropped before its first poll is [`StreamOutcome::Discarded`]. The inner
/// reader (and its file handle) is released with the stream.
pub struct DeliveryStream<S> {
    inner: S,
    polled: bool,
    bytes_sent: u64,
    notify: Option<oneshot::Sender<StreamOutcome>>,
}

impl<S> DeliveryStream<S> {
    pub fn new(inner: S, notify: oneshot::Sender<StreamOutcome>) -> Self {
        Self {
            inner,
            polled: false,
            bytes_sent: 0,
            notify: Some(notify),
        }
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if let Some(notify) = self.notify.take() {
            // The receiver may already be gone; nothing left to tell.
            let _ = notify.send(outcome);
        }
    }
}

impl<S> Stream for DeliveryStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        this.polled = true;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                let reported = io::Error::new(error.kind(), error.to_string());
                this.finish(StreamOutcome::IoFailure {
                    bytes_sent: this.bytes_sent,
                    error: reported,
                });
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish(StreamOutcome::Completed {
                    bytes_sent: this.bytes_sent,
                });
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for DeliveryStream<S> {
    fn drop(&mut self) {
        let outcome = if self.polled {
            StreamOutcome::ClientClosed {
                bytes_sent: self.bytes_sent,
            }
        } else {
            StreamOutcome::Discarded
        };
        self.finish(outcome);
    }
}
