//! Command-line surface for `revalidator-cli`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use revalidator_api_types::Operation;

#[derive(Parser, Debug)]
#[command(
    name = "revalidator-cli",
    version,
    about = "Trigger revalidation and inspect revalidator health",
    long_about = None
)]
pub struct Cli {
    /// Public listener base URL, e.g. <https://hooks.example.com>
    #[arg(long, env = "REVALIDATOR_URL")]
    pub url: Option<String>,

    /// Admin listener base URL, e.g. <http://127.0.0.1:3001>
    #[arg(long, env = "REVALIDATOR_ADMIN_URL")]
    pub admin_url: Option<String>,

    /// Path to a file containing the webhook secret (takes precedence over env)
    #[arg(long, env = "REVALIDATOR_SECRET_FILE")]
    pub secret_file: Option<PathBuf>,

    /// Webhook secret from env (no flag, keeps it out of shell history)
    #[arg(hide = true, env = "REVALIDATOR_WEBHOOK_SECRET")]
    pub secret_env: Option<String>,

    /// Bearer token for administrative actions
    #[arg(hide = true, env = "REVALIDATOR_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a signed synthetic change notification
    Trigger(TriggerArgs),
    /// Print the health snapshot
    Health,
    /// Clear request counters and close both circuit breakers
    ResetMetrics,
}

#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Content kind, e.g. gallery, post, event
    pub document_type: String,
    /// Document identifier
    pub document_id: String,
    #[arg(long)]
    pub slug: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub revision: Option<String>,
    #[arg(long, value_enum, default_value_t = OperationArg::Update)]
    pub operation: OperationArg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    Create,
    Update,
    Delete,
}

impl From<OperationArg> for Operation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Operation::Create,
            OperationArg::Update => Operation::Update,
            OperationArg::Delete => Operation::Delete,
        }
    }
}
