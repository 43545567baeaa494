//! Rail Orchestrator - demo runner
//!
//! Runs one transaction through the full flow:
//!
//! ```text
//! ┌─────────────┐    ┌────────────┐    ┌──────────┐    ┌────────────┐
//! │ Eligibility │───▶│ Preprocess │───▶│ Confirm  │───▶│ Reconcile  │
//! │   (hints)   │    │  (quote)   │    │ (execute)│    │ (if unknown)│
//! └─────────────┘    └────────────┘    └──────────┘    └────────────┘
//! ```
//!
//! Usage:
//!
//! ```text
//! rail_orchestrator [--env dev] [--rail account_proxy] [--subtype mobile]
//!                   [--source A1] [--dest D1] [--amount 5000] [--currency USD]
//! ```
//!
//! Without `processor.base_url` in the config the in-memory simulated
//! processor is used (requires the `mock-api` feature).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use rail_orchestrator::config::AppConfig;
use rail_orchestrator::orchestration::{
    CurrencyCode, HttpProcessor, Money, OrchestrationError, PaymentRail, PaymentSubtype,
    ReconciliationOutcome, Stages, TransactionIntent, TransactionOrchestrator,
};
use tracing::{Instrument, info, warn};

const RECONCILE_ATTEMPTS: u32 = 5;

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn build_stages(app_config: &AppConfig) -> anyhow::Result<Stages> {
    if let Some(http_config) = app_config.processor.to_http_config() {
        info!(base_url = %http_config.base_url, "Using HTTP processor");
        let processor = HttpProcessor::new(http_config).context("Failed to build HTTP client")?;
        return Ok(Stages::from_processor(Arc::new(processor)));
    }

    simulated_stages()
}

#[cfg(feature = "mock-api")]
fn simulated_stages() -> anyhow::Result<Stages> {
    info!("No processor.base_url configured, using simulated processor");
    Ok(Stages::from_processor(Arc::new(
        rail_orchestrator::orchestration::SimulatedProcessor::demo(),
    )))
}

#[cfg(not(feature = "mock-api"))]
fn simulated_stages() -> anyhow::Result<Stages> {
    bail!("processor.base_url is required when built without the mock-api feature")
}

fn build_intent() -> anyhow::Result<TransactionIntent> {
    let rail: PaymentRail = get_arg(&["--rail"])
        .as_deref()
        .unwrap_or("account_proxy")
        .parse()?;
    let subtype: PaymentSubtype = get_arg(&["--subtype"])
        .as_deref()
        .unwrap_or("mobile")
        .parse()?;
    let amount: i64 = get_arg(&["--amount"])
        .as_deref()
        .unwrap_or("5000")
        .parse()
        .context("--amount must be an integer in minor units")?;
    let currency = CurrencyCode::new(get_arg(&["--currency"]).as_deref().unwrap_or("USD"))?;

    Ok(TransactionIntent::new(
        rail,
        subtype,
        get_arg(&["--source"]).unwrap_or_else(|| "A1".to_string()),
        get_arg(&["--dest"]).unwrap_or_else(|| "D1".to_string()),
        Money::new(amount, currency),
    )
    .with_remarks("demo run"))
}

async fn reconcile_until_known(orchestrator: &TransactionOrchestrator) -> anyhow::Result<()> {
    for attempt in 1..=RECONCILE_ATTEMPTS {
        match orchestrator.reconcile().await {
            Ok(ReconciliationOutcome::Confirmed(confirmation)) => {
                info!(reference = %confirmation.reference, "Reconciled: executed");
                return Ok(());
            }
            Ok(ReconciliationOutcome::NotExecuted { reason }) => {
                bail!("Reconciled: not executed ({})", reason);
            }
            Ok(ReconciliationOutcome::StillPending) => {
                info!(attempt, "Outcome still pending");
            }
            Err(e) => warn!(attempt, error = %e, "Status query failed"),
        }
        tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
    }
    bail!(
        "Run {} still has an unknown outcome; reconcile later",
        orchestrator.run_id()
    )
}

/// Eligibility, quote, confirm and, when the outcome is unknown, reconcile
async fn run_flow(
    orchestrator: &TransactionOrchestrator,
    intent: TransactionIntent,
) -> anyhow::Result<()> {
    let eligibility = orchestrator.start(intent.rail, intent.subtype).await?;
    for account in &eligibility.source_accounts {
        info!(id = %account.id, label = %account.label, "Eligible source account");
    }
    for destination in &eligibility.destinations {
        info!(id = %destination.id, label = %destination.label, "Eligible destination");
    }

    let quoted = orchestrator.preprocess(intent).await?;
    if let Some(intent) = orchestrator.quoted_intent() {
        info!(
            source = %intent.source_account,
            destination = %intent.destination,
            remarks = %intent.remarks,
            "Quoted intent"
        );
    }
    info!(
        token = %quoted.token,
        debit = %quoted.quote.debit,
        credit = %quoted.quote.credit,
        fee = ?quoted.quote.fee.as_ref().map(ToString::to_string),
        "Quote ready for review"
    );

    match orchestrator.confirm(&quoted.token).await {
        Ok(confirmation) => {
            info!(reference = %confirmation.reference, "Transaction confirmed");
        }
        Err(OrchestrationError::AmbiguousOutcome(message)) => {
            warn!(%message, "Confirm outcome unknown, reconciling");
            reconcile_until_known(orchestrator).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = rail_orchestrator::logging::init_logging(&app_config);

    info!(
        "Starting rail_orchestrator ({}) in {} mode",
        env!("GIT_HASH"),
        env
    );

    let stages = build_stages(&app_config)?;
    let orchestrator = TransactionOrchestrator::new(stages, app_config.orchestrator.to_config());
    let intent = build_intent()?;

    run_flow(&orchestrator, intent)
        .instrument(rail_orchestrator::logging::run_span(orchestrator.run_id()))
        .await?;

    info!(run_id = %orchestrator.run_id(), state = %orchestrator.state(), "Run finished");
    Ok(())
}
