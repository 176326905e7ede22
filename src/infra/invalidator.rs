//! HTTP adapter that asks the rendering host to drop one cached path.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;

use crate::application::ports::{CacheInvalidator, InvalidationError};
use crate::config::InvalidatorSettings;
use crate::infra::error::InfraError;

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct InvalidateRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpInvalidator {
    client: Client,
    url: Url,
    token: Option<String>,
}

impl HttpInvalidator {
    pub fn new(settings: &InvalidatorSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("revalidator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self::with_client(
            client,
            settings.url.clone(),
            settings.token.clone(),
        ))
    }

    pub fn with_client(client: Client, url: Url, token: Option<String>) -> Self {
        Self { client, url, token }
    }
}

#[async_trait]
impl CacheInvalidator for HttpInvalidator {
    async fn invalidate(&self, path: &str) -> Result<(), InvalidationError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .json(&InvalidateRequest { path });
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| InvalidationError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        match status {
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                Err(InvalidationError::Unavailable(format!("status {}", status.as_u16())))
            }
            _ => Err(InvalidationError::Rejected {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
