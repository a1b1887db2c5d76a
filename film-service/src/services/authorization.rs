//! Per-kind access decisions.
//!
//! Token verification (cryptographic) and the ownership comparison are kept
//! as separate steps: [`authorize_claims`] never sees a raw token and
//! [`TokenVerifier`] never sees resource metadata.

use crate::models::{ResourceKind, ResourceMetadata};
use crate::services::token::{CapabilityClaims, TokenVerifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Unauthorized,
}

/// A verified token grants access only to resources of the parent it names.
pub fn authorize_claims(claims: &CapabilityClaims, metadata: &ResourceMetadata) -> Authorization {
    if claims.resource_id == metadata.owning_parent_id {
        Authorization::Authorized
    } else {
        Authorization::Unauthorized
    }
}

pub fn authorize(
    kind: ResourceKind,
    metadata: &ResourceMetadata,
    token: Option<&str>,
    verifier: &TokenVerifier,
) -> Authorization {
    match kind {
        ResourceKind::Thumbnail => Authorization::Authorized,
        ResourceKind::Export => {
            let Some(token) = token else {
                return Authorization::Unauthorized;
            };
            match verifier.verify(token) {
                Ok(claims) => authorize_claims(&claims, metadata),
                Err(_) => Authorization::Unauthorized,
            }
        }
    }
}
