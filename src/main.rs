use std::process;
use std::sync::Arc;

use revalidator::{
    application::{
        error::AppError,
        health::{HealthReporter, ServiceMetrics},
        logger::{LogSource, Logger},
        ports::{CacheInvalidator, ContentStore},
        watcher::ContentWatcher,
    },
    config::{self, Settings},
    infra::{
        content_store::HttpContentStore,
        error::InfraError,
        http::{self, AdminState, HttpState},
        invalidator::HttpInvalidator,
        telemetry,
    },
    resilience::{
        CircuitBreaker, FixedWindowRateLimiter, RateLimitConfig, RetryManager, TimerHandle,
    },
    revalidation::RevalidationManager,
    webhook::RequestValidator,
};
use tokio::sync::watch;
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => run_check_config(&settings),
    }
}

fn run_check_config(settings: &Settings) -> Result<(), AppError> {
    let store = settings.require_content_store()?;
    let invalidator = settings.require_invalidator()?;
    if settings.webhook.secret.is_none() {
        warn!(
            target = "revalidator::config",
            "webhook secret is not configured; every webhook will be refused"
        );
    }
    info!(
        target = "revalidator::config",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        content_store = %store.base_url,
        dataset = %store.dataset,
        invalidator = %invalidator.url,
        webhook_secret = settings.webhook.secret.is_some(),
        admin_token = settings.admin.token.is_some(),
        watcher_enabled = settings.watcher.enabled,
        "configuration is valid"
    );
    Ok(())
}

struct Application {
    http_state: HttpState,
    admin_state: AdminState,
    watcher: Option<Arc<ContentWatcher>>,
    limiters: Vec<Arc<FixedWindowRateLimiter>>,
}

fn build_application(settings: &Settings) -> Result<Application, AppError> {
    let logger = Logger::tracing(settings.logging.event_level);

    let content_store: Arc<dyn ContentStore> =
        Arc::new(HttpContentStore::new(settings.require_content_store()?)?);
    let invalidator: Arc<dyn CacheInvalidator> =
        Arc::new(HttpInvalidator::new(settings.require_invalidator()?)?);

    let webhook_breaker = Arc::new(
        CircuitBreaker::new("webhook", settings.breakers.webhook, logger.clone())
            .with_log_source(LogSource::Webhook),
    );
    let revalidation_breaker = Arc::new(CircuitBreaker::new(
        "revalidation",
        settings.breakers.revalidation,
        logger.clone(),
    ));

    let manager = Arc::new(RevalidationManager::new(
        invalidator,
        revalidation_breaker,
        RetryManager::new(logger.clone()),
        logger.clone(),
        settings.revalidation.clone(),
    ));

    let limit = |max_requests| RateLimitConfig {
        max_requests,
        window: settings.rate_limit.window,
    };
    let webhook_limiter = Arc::new(FixedWindowRateLimiter::new(
        "webhook",
        limit(settings.rate_limit.webhook),
    ));
    let failed_signature_limiter = Arc::new(FixedWindowRateLimiter::new(
        "failed_signature",
        limit(settings.rate_limit.failed_signature),
    ));
    let health_limiter = Arc::new(FixedWindowRateLimiter::new(
        "health",
        limit(settings.rate_limit.health),
    ));
    let limiters = vec![
        Arc::clone(&webhook_limiter),
        Arc::clone(&failed_signature_limiter),
        Arc::clone(&health_limiter),
    ];

    let metrics = Arc::new(ServiceMetrics::new());
    let health = Arc::new(
        HealthReporter::new(
            Arc::clone(&webhook_breaker),
            Arc::clone(&manager),
            Arc::clone(&content_store),
            Arc::clone(&metrics),
            settings.health,
            logger.clone(),
        )
        .with_limiters(limiters.clone()),
    );

    let watcher = settings.watcher.enabled.then(|| {
        Arc::new(ContentWatcher::new(
            content_store,
            Arc::clone(&manager),
            Arc::clone(&metrics),
            logger.clone(),
            settings.revalidation.debounce,
        ))
    });

    let validator = Arc::new(RequestValidator::new(
        logger.clone(),
        settings.webhook.max_body_bytes,
        settings.webhook.user_agent_hint.clone(),
    ));

    Ok(Application {
        http_state: HttpState {
            validator,
            secret: settings.webhook.secret.clone(),
            manager,
            webhook_breaker,
            webhook_limiter,
            failed_signature_limiter,
            metrics,
            logger: logger.clone(),
        },
        admin_state: AdminState {
            health,
            health_limiter,
            admin_token: settings.admin.token.as_deref().map(Arc::from),
            logger,
        },
        watcher,
        limiters,
    })
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let app = build_application(&settings)?;

    if app.http_state.secret.is_none() {
        warn!(
            target = "revalidator::serve",
            "webhook secret is not configured; every webhook will be refused"
        );
    }

    let mut background: Vec<TimerHandle> = app
        .limiters
        .iter()
        .map(|limiter| limiter.spawn_sweeper(settings.rate_limit.sweep_interval))
        .collect();
    if let Some(watcher) = app.watcher.clone() {
        background.push(watcher.spawn(settings.watcher.cadence));
    }

    let result = serve_http(&settings, app.http_state, app.admin_state).await;

    for handle in &background {
        handle.cancel();
    }
    result
}

async fn serve_http(
    settings: &Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let manager = Arc::clone(&http_state.manager);
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "revalidator::serve",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "revalidator::serve", error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!(target = "revalidator::serve", "shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let graceful = settings.server.graceful_shutdown;
    let deadline = async move {
        wait_for_shutdown(shutdown_rx).await;
        tokio::time::sleep(graceful).await;
    };

    tokio::select! {
        served = async { try_join!(public_server, admin_server) } => {
            served.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "revalidator::serve",
                timeout_secs = graceful.as_secs(),
                "graceful shutdown timed out"
            );
        }
    }

    let discarded = manager.clear_queue();
    if discarded > 0 {
        warn!(
            target = "revalidator::serve",
            discarded, "discarded queued revalidation work on shutdown"
        );
    }
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // sender gone without a signal; keep serving
            std::future::pending::<()>().await;
        }
    }
}
