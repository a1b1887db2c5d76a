use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Claims carried by an export capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Film the bearer may fetch exports of.
    #[serde(rename = "resourceId")]
    pub resource_id: i64,
    /// Expiration time (Unix timestamp), checked when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

/// Any rejected token. The cause is deliberately not exposed.
#[derive(Debug, thiserror::Error)]
#[error("invalid capability token")]
pub struct InvalidToken;

/// HS256 capability token verification with the deployment secret.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        // Tokens without `exp` never expire; `resourceId` is checked by serde.
        validation.required_spec_claims = HashSet::new();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Validate signature, structure and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<CapabilityClaims, InvalidToken> {
        decode::<CapabilityClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Capability token rejected");
                InvalidToken
            })
    }

    /// Mint a token granting access to the exports of `resource_id`.
    pub fn issue(&self, resource_id: i64, ttl: Option<Duration>) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = CapabilityClaims {
            resource_id,
            exp: ttl.map(|ttl| (now + ttl).timestamp()),
            iat: Some(now.timestamp()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode capability token: {}", e))
    }
}
