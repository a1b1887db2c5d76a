pub mod health;
pub mod resources;

pub use health::{health_check, metrics_endpoint, readiness_check};
pub use resources::{get_export, get_thumbnail};
