use std::fs;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use revalidator_api_types::{
    AdminActionRequest, AdminActionResponse, ChangeNotificationBody, HEALTH_PATH, HealthReport,
    RESET_METRICS_ACTION, RevalidateResponse, SIGNATURE_HEADER, WEBHOOK_PATH,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::args::Cli;
use crate::sign::signature_header;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("revalidator URL is required (use --url or REVALIDATOR_URL)")]
    MissingUrl,
    #[error("admin URL is required (use --admin-url or REVALIDATOR_ADMIN_URL)")]
    MissingAdminUrl,
    #[error("webhook secret is required (use --secret-file or REVALIDATOR_WEBHOOK_SECRET)")]
    MissingSecret,
    #[error("failed to read secret file: {0}")]
    SecretFile(std::io::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Option<Url>,
    pub admin: Option<Url>,
    pub secret: Option<String>,
    pub admin_token: Option<String>,
}

/// Status plus decoded body for endpoints whose failure statuses still carry the normal shape.
#[derive(Debug)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub body: T,
}

impl Ctx {
    pub fn new(base: Option<&str>, admin: Option<&str>) -> Result<Self, CliError> {
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self {
            client,
            base: base.map(parse_base).transpose()?,
            admin: admin.map(parse_base).transpose()?,
            secret: None,
            admin_token: None,
        })
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret;
        self
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    /// Contains the server's default user-agent hint so triggers are not flagged.
    pub fn user_agent() -> &'static str {
        concat!("revalidator-cli/", env!("CARGO_PKG_VERSION"), " (webhook trigger)")
    }

    fn webhook_url(&self) -> Result<Url, CliError> {
        let base = self.base.as_ref().ok_or(CliError::MissingUrl)?;
        base.join(WEBHOOK_PATH).map_err(CliError::Url)
    }

    fn health_url(&self) -> Result<Url, CliError> {
        let admin = self.admin.as_ref().ok_or(CliError::MissingAdminUrl)?;
        admin.join(HEALTH_PATH).map_err(CliError::Url)
    }

    /// POST a signed notification. 200, 207 and 503 all decode as a revalidation result.
    pub async fn trigger(
        &self,
        notification: &ChangeNotificationBody,
    ) -> Result<Reply<RevalidateResponse>, CliError> {
        let secret = self.secret.as_deref().ok_or(CliError::MissingSecret)?;
        let body = serde_json::to_vec(notification)
            .map_err(|e| CliError::InvalidInput(format!("failed to encode notification: {e}")))?;
        let signature = signature_header(secret, &body)?;

        let resp = self
            .client
            .post(self.webhook_url()?)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        Self::handle(
            resp,
            &[
                StatusCode::OK,
                StatusCode::MULTI_STATUS,
                StatusCode::SERVICE_UNAVAILABLE,
            ],
        )
        .await
    }

    /// GET the snapshot; 503 still carries a report.
    pub async fn health(&self) -> Result<Reply<HealthReport>, CliError> {
        let resp = self.client.get(self.health_url()?).send().await?;
        Self::handle(resp, &[StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE]).await
    }

    pub async fn reset_metrics(&self) -> Result<AdminActionResponse, CliError> {
        let mut req = self
            .client
            .post(self.health_url()?)
            .json(&AdminActionRequest {
                action: RESET_METRICS_ACTION.to_string(),
            });
        if let Some(token) = self.admin_token.as_deref() {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req.send().await?;
        Ok(Self::handle(resp, &[StatusCode::OK]).await?.body)
    }

    async fn handle<T: DeserializeOwned>(
        resp: Response,
        accepted: &[StatusCode],
    ) -> Result<Reply<T>, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !accepted.contains(&status) {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Err(CliError::Server(format!("status {status} body {text}")));
        }
        let body = serde_json::from_slice(&bytes)
            .map_err(|e| CliError::Server(format!("failed to parse body: {e}")))?;
        Ok(Reply { status, body })
    }
}

fn parse_base(value: &str) -> Result<Url, CliError> {
    Ok(Url::parse(value)?.join("/")?)
}

pub fn build_ctx_from_cli(cli: &Cli) -> Result<Ctx, CliError> {
    let secret = if let Some(path) = &cli.secret_file {
        Some(
            fs::read_to_string(path)
                .map_err(CliError::SecretFile)?
                .trim()
                .to_string(),
        )
    } else {
        cli.secret_env.clone()
    };

    Ok(Ctx::new(cli.url.as_deref(), cli.admin_url.as_deref())?
        .with_secret(secret.filter(|s| !s.is_empty()))
        .with_admin_token(cli.admin_token.clone()))
}
