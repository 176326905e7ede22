use hmac::{Hmac, KeyInit, Mac};
use revalidator_api_types::SIGNATURE_PREFIX;
use sha2::Sha256;

use crate::client::CliError;

type HmacSha256 = Hmac<Sha256>;

/// `sha256=<hex>` header value for `body`.
pub fn signature_header(secret: &str, body: &[u8]) -> Result<String, CliError> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
        .map_err(|e| CliError::InvalidInput(e.to_string()))?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
