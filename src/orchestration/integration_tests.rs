//! Integration Tests for Transaction Orchestration
//!
//! Full runs against the in-memory SimulatedProcessor, including injected
//! outages, delays and lost responses.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::orchestration::adapters::simulated::TokenStatus;
use crate::orchestration::adapters::{Operation, SimulatedProcessor, Stages};
use crate::orchestration::error::{ErrorKind, RetryHint};
use crate::orchestration::orchestrator::{
    OrchestratorConfig, ReconciliationOutcome, TransactionOrchestrator,
};
use crate::orchestration::state::{OrchestrationState, Stage};
use crate::orchestration::types::{
    ControlFlowToken, CurrencyCode, Money, PaymentRail, PaymentSubtype, TransactionIntent,
};

/// Orchestrator wired to a shared simulated processor
struct TestHarness {
    orchestrator: TransactionOrchestrator,
    processor: Arc<SimulatedProcessor>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    fn with_config(config: OrchestratorConfig) -> Self {
        let processor = Arc::new(SimulatedProcessor::demo());
        Self::on_processor(processor, config)
    }

    fn on_processor(processor: Arc<SimulatedProcessor>, config: OrchestratorConfig) -> Self {
        let orchestrator =
            TransactionOrchestrator::new(Stages::from_processor(processor.clone()), config);
        Self {
            orchestrator,
            processor,
        }
    }

    async fn quoted(&self, amount: i64) -> ControlFlowToken {
        self.orchestrator
            .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
            .await
            .unwrap();
        self.orchestrator
            .preprocess(proxy_intent(amount))
            .await
            .unwrap()
            .token
    }
}

fn proxy_intent(amount: i64) -> TransactionIntent {
    TransactionIntent::new(
        PaymentRail::AccountProxy,
        PaymentSubtype::Mobile,
        "A1",
        "D1",
        Money::new(amount, CurrencyCode::from_static("USD")),
    )
}

// ========================================================================
// Happy Path Tests
// ========================================================================

/// IDLE → ... → CONFIRMED, exactly one debit
#[tokio::test]
async fn test_happy_path() {
    let harness = TestHarness::new();
    let orchestrator = &harness.orchestrator;

    let eligibility = orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();
    assert!(eligibility.has_source("A1"));
    assert!(eligibility.has_destination("D1"));
    assert_eq!(orchestrator.state(), OrchestrationState::Eligible);

    let quoted = orchestrator
        .preprocess(proxy_intent(5000).with_remarks("rent"))
        .await
        .unwrap();
    assert_eq!(quoted.token.as_str(), "T1");
    assert_eq!(quoted.quote.fee.as_ref().map(|f| f.amount_minor), Some(150));
    assert_eq!(orchestrator.state(), OrchestrationState::Quoted);
    assert_eq!(
        orchestrator.quoted_intent(),
        Some(proxy_intent(5000).with_remarks("rent"))
    );

    let confirmation = orchestrator.confirm(&quoted.token).await.unwrap();
    assert_eq!(confirmation.reference.as_str(), "REF-001");
    assert_eq!(orchestrator.state(), OrchestrationState::Confirmed);
    assert_eq!(orchestrator.confirmation(), Some(confirmation));
    assert_eq!(
        harness.processor.balance("A1").map(|m| m.amount_minor),
        Some(100_000 - 5000 - 150)
    );

    // Second confirm with the same token never reaches the processor
    let err = orchestrator.confirm(&quoted.token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenAlreadyUsed);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 1);
}

#[tokio::test]
async fn test_cross_border_quote_carries_fx_rate() {
    let harness = TestHarness::new();
    let orchestrator = &harness.orchestrator;
    orchestrator
        .start(PaymentRail::CrossBorderWire, PaymentSubtype::ChargeShared)
        .await
        .unwrap();

    let intent = TransactionIntent::new(
        PaymentRail::CrossBorderWire,
        PaymentSubtype::ChargeShared,
        "A2",
        "W1",
        Money::new(10_000, CurrencyCode::from_static("USD")),
    );
    let quoted = orchestrator.preprocess(intent).await.unwrap();

    assert_eq!(quoted.quote.credit.currency.as_str(), "EUR");
    assert_eq!(quoted.quote.credit.amount_minor, 9_200);
    assert!(quoted.quote.fx_rate.is_some());
    orchestrator.confirm(&quoted.token).await.unwrap();
}

// ========================================================================
// Token Rules
// ========================================================================

#[tokio::test]
async fn test_requote_supersedes_previous_token() {
    let harness = TestHarness::new();
    let first = harness.quoted(5000).await;
    assert_eq!(first.as_str(), "T1");

    let second = harness
        .orchestrator
        .preprocess(proxy_intent(6000))
        .await
        .unwrap()
        .token;
    assert_eq!(second.as_str(), "T2");
    assert_eq!(
        harness.processor.token_status(&first),
        Some(TokenStatus::Superseded)
    );

    let err = harness.orchestrator.confirm(&first).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenSuperseded);
    assert_eq!(err.retry_hint(), RetryHint::Resubmit);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 0);

    // The current token still works
    harness.orchestrator.confirm(&second).await.unwrap();
    assert_eq!(
        harness.processor.balance("A1").map(|m| m.amount_minor),
        Some(100_000 - 6000 - 150)
    );
}

#[tokio::test(start_paused = true)]
async fn test_expired_quote_is_rejected_locally() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(
        harness.orchestrator.quote_time_remaining(),
        Some(Duration::ZERO)
    );

    let err = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExpired);
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Eligible);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 0);

    // Re-quote and confirm within the window
    let fresh = harness
        .orchestrator
        .preprocess(proxy_intent(5000))
        .await
        .unwrap()
        .token;
    harness.orchestrator.confirm(&fresh).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_processor_expiry_hint_shortens_window() {
    let processor = Arc::new(SimulatedProcessor::demo().with_quote_ttl(Duration::from_secs(5)));
    let harness = TestHarness::on_processor(processor, OrchestratorConfig::default());
    let token = harness.quoted(5000).await;

    let remaining = harness.orchestrator.quote_time_remaining().unwrap();
    assert!(remaining <= Duration::from_secs(5));

    tokio::time::advance(Duration::from_secs(6)).await;
    let err = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExpired);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 0);
}

#[tokio::test]
async fn test_foreign_token_rejected() {
    let harness = TestHarness::new();
    harness.quoted(5000).await;

    let forged = ControlFlowToken::from_processor("T999");
    let err = harness.orchestrator.confirm(&forged).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Quoted);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 0);
}

// ========================================================================
// Preprocess & Confirm Failures
// ========================================================================

#[tokio::test]
async fn test_insufficient_funds_at_preprocess_returns_to_eligible() {
    let harness = TestHarness::new();
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .preprocess(proxy_intent(1_000_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(err.retry_hint(), RetryHint::Resubmit);
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Eligible);

    // Corrected amount goes through
    harness
        .orchestrator
        .preprocess(proxy_intent(1_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_overflowing_amount_is_correctable() {
    let harness = TestHarness::new();
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .preprocess(proxy_intent(i64::MAX))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(err.retry_hint(), RetryHint::Resubmit);
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Eligible);
    assert!(harness.orchestrator.current_quote().is_none());
}

/// Two runs quote against the same balance; the second confirm loses
#[tokio::test]
async fn test_balance_change_between_quote_and_confirm() {
    let processor = Arc::new(SimulatedProcessor::demo());
    let first = TestHarness::on_processor(processor.clone(), OrchestratorConfig::default());
    let second = TestHarness::on_processor(processor, OrchestratorConfig::default());

    let t1 = first.quoted(90_000).await;
    let t2 = second.quoted(90_000).await;

    first.orchestrator.confirm(&t1).await.unwrap();
    let err = second.orchestrator.confirm(&t2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert_eq!(second.orchestrator.state(), OrchestrationState::Eligible);
    assert!(second.orchestrator.current_quote().is_none());
}

#[tokio::test]
async fn test_authentication_failure_fails_stage() {
    let harness = TestHarness::new();
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();

    harness.processor.set_session_expired(true);
    let err = harness
        .orchestrator
        .preprocess(proxy_intent(5000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::Failed {
            stage: Stage::Preprocess,
            kind: ErrorKind::AuthenticationRequired
        }
    );
    // Not retried
    assert_eq!(harness.processor.call_count(Operation::Preprocess), 1);

    harness.processor.set_session_expired(false);
    harness.orchestrator.reset().unwrap();
    harness.quoted(5000).await;
}

// ========================================================================
// Retry & Idempotency
// ========================================================================

#[tokio::test(start_paused = true)]
async fn test_eligibility_retried_with_fresh_tokens() {
    let harness = TestHarness::new();
    harness.processor.fail_next(Operation::Eligibility, 2);

    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();

    let seen = harness.processor.tokens_seen(Operation::Eligibility);
    assert_eq!(seen.len(), 3);
    let distinct: HashSet<_> = seen.iter().collect();
    assert_eq!(distinct.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fails_stage() {
    let harness = TestHarness::new();
    harness.processor.fail_next(Operation::Preprocess, 5);
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();

    let err = harness
        .orchestrator
        .preprocess(proxy_intent(5000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
    assert_eq!(err.retry_hint(), RetryHint::Restart);
    assert_eq!(harness.processor.call_count(Operation::Preprocess), 3);
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::Failed {
            stage: Stage::Preprocess,
            kind: ErrorKind::RemoteUnavailable
        }
    );
}

#[tokio::test]
async fn test_idempotency_tokens_unique_across_runs() {
    let processor = Arc::new(SimulatedProcessor::demo().with_account(
        "A3",
        "Treasury",
        Money::new(100_000_000, CurrencyCode::from_static("USD")),
    ));

    for _ in 0..20 {
        let harness = TestHarness::on_processor(processor.clone(), OrchestratorConfig::default());
        harness
            .orchestrator
            .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
            .await
            .unwrap();
        let mut intent = proxy_intent(100);
        intent.source_account = "A3".to_string();
        let first = harness.orchestrator.preprocess(intent.clone()).await.unwrap();
        let second = harness.orchestrator.preprocess(intent).await.unwrap();
        assert_ne!(first.token, second.token);
        harness.orchestrator.confirm(&second.token).await.unwrap();
    }

    let mut all = Vec::new();
    for op in [Operation::Eligibility, Operation::Preprocess, Operation::Confirm] {
        all.extend(processor.tokens_seen(op));
    }
    assert_eq!(all.len(), 20 * 4);
    let distinct: HashSet<_> = all.iter().collect();
    assert_eq!(distinct.len(), all.len());
}

// ========================================================================
// Ambiguous Outcome & Reconciliation
// ========================================================================

/// Confirm executed but the response was lost
#[tokio::test]
async fn test_lost_confirm_response_reconciles_to_confirmed() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;
    harness.processor.lose_next_confirm_response();

    let err = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousOutcome);
    assert_eq!(err.retry_hint(), RetryHint::Reconcile);
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::AmbiguousOutcome
    );

    // Sticky: nothing but reconcile moves the run
    let again = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::AmbiguousOutcome);
    assert_eq!(
        harness
            .orchestrator
            .preprocess(proxy_intent(5000))
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidState
    );
    assert!(harness.orchestrator.abandon().is_err());
    assert!(harness.orchestrator.reset().is_err());
    assert_eq!(harness.processor.call_count(Operation::Confirm), 1);

    let outcome = harness.orchestrator.reconcile().await.unwrap();
    match outcome {
        ReconciliationOutcome::Confirmed(confirmation) => {
            assert_eq!(confirmation.reference.as_str(), "REF-001")
        }
        other => panic!("expected Confirmed, got {:?}", other),
    }
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Confirmed);
    // Debited exactly once
    assert_eq!(
        harness.processor.balance("A1").map(|m| m.amount_minor),
        Some(100_000 - 5000 - 150)
    );
}

/// Confirm timed out before the processor acted
#[tokio::test(start_paused = true)]
async fn test_confirm_timeout_reconciles_to_not_executed() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;
    harness
        .processor
        .set_delay(Operation::Confirm, Some(Duration::from_secs(120)));

    let err = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousOutcome);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 1);

    harness.processor.return_pending_status(1);
    assert_eq!(
        harness.orchestrator.reconcile().await.unwrap(),
        ReconciliationOutcome::StillPending
    );
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::AmbiguousOutcome
    );

    let outcome = harness.orchestrator.reconcile().await.unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::NotExecuted { .. }));
    assert!(matches!(
        harness.orchestrator.state(),
        OrchestrationState::Failed {
            stage: Stage::Confirm,
            ..
        }
    ));
    assert_eq!(
        harness.processor.balance("A1").map(|m| m.amount_minor),
        Some(100_000)
    );

    // The old token stays dead after restarting
    harness.orchestrator.reset().unwrap();
    let err = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenSuperseded);
}

#[tokio::test]
async fn test_confirm_outage_is_ambiguous_not_retried() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;
    harness.processor.fail_next(Operation::Confirm, 1);

    let err = harness.orchestrator.confirm(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousOutcome);
    assert_eq!(harness.processor.call_count(Operation::Confirm), 1);
}

#[tokio::test]
async fn test_status_query_failure_keeps_ambiguity() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;
    harness.processor.lose_next_confirm_response();
    harness.orchestrator.confirm(&token).await.unwrap_err();

    harness.processor.fail_next(Operation::Status, 1);
    let err = harness.orchestrator.reconcile().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousOutcome);
    assert_eq!(err.retry_hint(), RetryHint::Reconcile);
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::AmbiguousOutcome
    );
    // Restarting could execute the transfer twice
    assert_eq!(
        harness.orchestrator.reset().unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    assert!(matches!(
        harness.orchestrator.reconcile().await.unwrap(),
        ReconciliationOutcome::Confirmed(_)
    ));
}

// ========================================================================
// Concurrency & Cancellation
// ========================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_preprocess_rejected() {
    let harness = TestHarness::new();
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();
    harness
        .processor
        .set_delay(Operation::Preprocess, Some(Duration::from_millis(500)));

    let (first, second) = tokio::join!(
        harness.orchestrator.preprocess(proxy_intent(5000)),
        harness.orchestrator.preprocess(proxy_intent(6000)),
    );

    assert!(first.is_ok());
    assert_eq!(
        second.unwrap_err().kind(),
        ErrorKind::ConcurrentOperationInProgress
    );
    assert_eq!(harness.processor.call_count(Operation::Preprocess), 1);
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Quoted);
}

#[tokio::test(start_paused = true)]
async fn test_confirm_during_preprocess_rejected() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;
    harness
        .processor
        .set_delay(Operation::Preprocess, Some(Duration::from_millis(500)));

    let (requote, confirm) = tokio::join!(
        harness.orchestrator.preprocess(proxy_intent(6000)),
        harness.orchestrator.confirm(&token),
    );

    assert!(requote.is_ok());
    assert_eq!(
        confirm.unwrap_err().kind(),
        ErrorKind::ConcurrentOperationInProgress
    );
    assert_eq!(harness.processor.call_count(Operation::Confirm), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_preprocess_returns_to_eligible() {
    let harness = TestHarness::new();
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();
    harness
        .processor
        .set_delay(Operation::Preprocess, Some(Duration::from_secs(5)));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        harness.orchestrator.preprocess(proxy_intent(5000)),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Eligible);
    assert!(harness.orchestrator.current_quote().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_confirm_is_ambiguous() {
    let harness = TestHarness::new();
    let token = harness.quoted(5000).await;
    harness
        .processor
        .set_delay(Operation::Confirm, Some(Duration::from_secs(5)));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        harness.orchestrator.confirm(&token),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::AmbiguousOutcome
    );

    harness.processor.set_delay(Operation::Confirm, None);
    assert!(matches!(
        harness.orchestrator.reconcile().await.unwrap(),
        ReconciliationOutcome::NotExecuted { .. }
    ));
}

// ========================================================================
// Eligibility Outcomes
// ========================================================================

#[tokio::test]
async fn test_no_source_accounts_fails_eligibility() {
    let processor = Arc::new(SimulatedProcessor::new());
    let harness = TestHarness::on_processor(processor, OrchestratorConfig::default());

    let err = harness
        .orchestrator
        .start(PaymentRail::BillPayment, PaymentSubtype::Utility)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IneligibleParty);
    assert_eq!(
        harness.orchestrator.state(),
        OrchestrationState::Failed {
            stage: Stage::Eligibility,
            kind: ErrorKind::IneligibleParty
        }
    );
}

#[tokio::test]
async fn test_membership_check_can_be_disabled() {
    let harness = TestHarness::with_config(OrchestratorConfig {
        enforce_eligibility_membership: false,
        ..OrchestratorConfig::default()
    });
    harness
        .orchestrator
        .start(PaymentRail::AccountProxy, PaymentSubtype::Mobile)
        .await
        .unwrap();

    let mut intent = proxy_intent(5000);
    intent.source_account = "A9".to_string();
    let err = harness.orchestrator.preprocess(intent).await.unwrap_err();

    // The processor rejects it instead
    assert_eq!(err.kind(), ErrorKind::IneligibleParty);
    assert_eq!(harness.processor.call_count(Operation::Preprocess), 1);
    assert_eq!(harness.orchestrator.state(), OrchestrationState::Eligible);
}
