pub mod resource;

pub use resource::{CacheDirective, ResourceKind, ResourceMetadata};
