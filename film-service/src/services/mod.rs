pub mod authorization;
pub mod database;
pub mod dispatcher;
pub mod metrics;
pub mod storage;
pub mod token;

pub use self::authorization::{authorize, authorize_claims, Authorization};
pub use self::database::{MetadataStore, PgMetadataStore};
pub use self::dispatcher::{validate_id, DeliveryPlan, ResourceDispatcher, ResourceRequest};
pub use self::metrics::{get_metrics, init_metrics};
pub use self::storage::{
    ByteStreamer, ContentPaths, LocalFileStreamer, StreamError, StreamHandle, StreamOutcome,
    StreamRequest,
};
pub use self::token::{CapabilityClaims, InvalidToken, TokenVerifier};
