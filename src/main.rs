/// PayFlow - Conta Azul receipt automation
///
/// Polls connected Conta Azul accounts for settled receivables and
/// emails each paid installment's PDF receipt exactly once.

mod api;
mod config;
mod context;
mod crypto;
mod db;
mod error;
mod mailer;
mod provider;
mod server;
mod tokens;
mod worker;

use config::AppConfig;
use context::AppContext;
use error::PayflowResult;
use mailer::SmtpMailer;
use provider::{client::FinancialClient, FinancialApi};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker::{ApiFactory, FinancialProcessor, PollScheduler};

#[tokio::main]
async fn main() -> PayflowResult<()> {
    let config = AppConfig::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("payflow={},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting PayFlow");

    let ctx = AppContext::new(config).await?;

    let mailer = Arc::new(SmtpMailer::new(ctx.config.smtp.clone())?);
    let api_base_url = ctx.config.provider.api_base_url.clone();
    let api_factory: ApiFactory = Arc::new(move |access_token| {
        let client = FinancialClient::new(&api_base_url, access_token)?;
        Ok(Arc::new(client) as Arc<dyn FinancialApi>)
    });

    let processor = Arc::new(FinancialProcessor::new(
        ctx.accounts.clone(),
        ctx.tokens.clone(),
        ctx.checkpoints.clone(),
        ctx.ledger.clone(),
        ctx.audit.clone(),
        mailer,
        api_factory,
        ctx.config.polling.recipient_fallback.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = PollScheduler::new(processor, ctx.config.polling.interval_secs);
    let worker_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    server::serve(ctx, shutdown_rx).await?;

    if let Err(e) = worker_handle.await {
        error!(error = %e, "Worker task panicked");
    }

    info!("PayFlow stopped");
    Ok(())
}
