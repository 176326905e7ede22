//! HMAC-SHA256 signatures over raw webhook bodies.

use std::fmt;

use hmac::{Hmac, KeyInit, Mac};
use revalidator_api_types::SIGNATURE_PREFIX;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("webhook secret is empty")]
    EmptySecret,
    #[error("invalid HMAC key")]
    InvalidKey,
}

/// Shared secret between the content source and this service.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self, SignatureError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(SignatureError::EmptySecret);
        }
        Ok(Self(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<redacted>)")
    }
}

/// Lowercase hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn compute_signature(secret: &WebhookSecret, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(secret.expose().as_bytes())
        .map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Full header value: `sha256=<hex>`.
pub fn signature_header_value(
    secret: &WebhookSecret,
    body: &[u8],
) -> Result<String, SignatureError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", compute_signature(secret, body)?))
}

/// Check `header_value` against the HMAC of `body`.
///
/// Missing prefix, non-hex digits and wrong lengths all yield `false`.
pub fn verify_signature(body: &[u8], header_value: &str, secret: &WebhookSecret) -> bool {
    let Some(provided_hex) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as KeyInit>::new_from_slice(secret.expose().as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}
