//! revalidator-cli: manual trigger and health client for the revalidator service.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod client;
mod sign;

#[cfg(test)]
mod tests;

use clap::Parser;
use revalidator_api_types::{ChangeNotificationBody, HealthStatus, SlugRef};
use serde::Serialize;

use args::{Cli, Commands, TriggerArgs};
use client::{CliError, Ctx, build_ctx_from_cli};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = build_ctx_from_cli(&cli)?;

    match cli.command {
        Commands::Trigger(args) => trigger(&ctx, args).await?,
        Commands::Health => health(&ctx).await?,
        Commands::ResetMetrics => print_json(&ctx.reset_metrics().await?)?,
    }

    Ok(())
}

pub(crate) fn notification_from_args(args: TriggerArgs) -> ChangeNotificationBody {
    ChangeNotificationBody {
        document_type: args.document_type,
        document_id: args.document_id,
        revision: args.revision,
        slug: args.slug.map(|current| SlugRef { current }),
        category: args.category,
        operation: Some(args.operation.into()),
        project_id: None,
        dataset: None,
    }
}

async fn trigger(ctx: &Ctx, args: TriggerArgs) -> Result<(), CliError> {
    let reply = ctx.trigger(&notification_from_args(args)).await?;
    print_json(&reply.body)?;
    if reply.status.is_server_error() {
        return Err(CliError::Server(format!(
            "revalidation failed with status {}",
            reply.status
        )));
    }
    Ok(())
}

async fn health(ctx: &Ctx) -> Result<(), CliError> {
    let reply = ctx.health().await?;
    print_json(&reply.body)?;
    if reply.body.status == HealthStatus::Unhealthy {
        return Err(CliError::Server("service is unhealthy".to_string()));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Server(format!("failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}
