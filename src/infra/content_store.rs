//! HTTP adapter for the document store's query API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::application::ports::{ContentStore, ContentStoreError};
use crate::config::ContentStoreSettings;
use crate::infra::error::InfraError;

const LATEST_QUERY: &str =
    r#"*[!(_id in path("drafts.**"))] | order(_updatedAt desc)[0]._updatedAt"#;
const CHANGED_QUERY: &str = r#"*[!(_id in path("drafts.**")) && _updatedAt > $since] | order(_updatedAt asc){_id, _type, _rev, slug, category}"#;

#[derive(Debug, Clone)]
pub struct HttpContentStore {
    client: Client,
    query_url: Url,
    token: Option<String>,
}

impl HttpContentStore {
    pub fn new(settings: &ContentStoreSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Self::with_client(
            client,
            &settings.base_url,
            &settings.api_version,
            &settings.dataset,
            settings.token.clone(),
        )
    }

    pub fn with_client(
        client: Client,
        base_url: &Url,
        api_version: &str,
        dataset: &str,
        token: Option<String>,
    ) -> Result<Self, InfraError> {
        let version = format!("v{api_version}");
        let mut query_url = base_url.clone();
        query_url
            .path_segments_mut()
            .map_err(|()| InfraError::configuration("content store URL cannot be a base"))?
            .pop_if_empty()
            .extend([version.as_str(), "data", "query", dataset]);
        Ok(Self {
            client,
            query_url,
            token,
        })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        params: &[(&str, String)],
    ) -> Result<T, ContentStoreError> {
        let mut url = self.query_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query", query);
            for (name, value) in params {
                pairs.append_pair(&format!("${name}"), value);
            }
        }

        let mut request = self.client.get(url);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ContentStoreError::Transport(err.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ContentStoreError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ContentStoreError::Transport(err.to_string()))?;
        decode_result(&bytes)
    }
}

/// Extract `result` from a `{ "result": ... }` envelope.
///
/// A missing key is a decode error even when `T` accepts `null`.
fn decode_result<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ContentStoreError> {
    let mut envelope: Map<String, Value> = serde_json::from_slice(bytes)
        .map_err(|err| ContentStoreError::Decode(err.to_string()))?;
    let result = envelope
        .remove("result")
        .ok_or_else(|| ContentStoreError::Decode("response has no `result` field".into()))?;
    serde_json::from_value(result).map_err(|err| ContentStoreError::Decode(err.to_string()))
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn latest_modification(&self) -> Result<Option<OffsetDateTime>, ContentStoreError> {
        let raw: Option<String> = self.query(LATEST_QUERY, &[]).await?;
        raw.map(|value| {
            OffsetDateTime::parse(&value, &Rfc3339)
                .map_err(|err| ContentStoreError::Decode(format!("`{value}`: {err}")))
        })
        .transpose()
    }

    async fn changed_since(&self, since: OffsetDateTime) -> Result<Vec<Value>, ContentStoreError> {
        let since = since
            .format(&Rfc3339)
            .map_err(|err| ContentStoreError::Decode(err.to_string()))?;
        // parameters are JSON literals
        let documents: Vec<Value> = self
            .query(CHANGED_QUERY, &[("since", Value::String(since).to_string())])
            .await?;
        debug!(
            target = "revalidator::infra::content_store",
            documents = documents.len(),
            "fetched changed documents"
        );
        Ok(documents)
    }
}

fn user_agent() -> &'static str {
    concat!("revalidator/", env!("CARGO_PKG_VERSION"))
}
