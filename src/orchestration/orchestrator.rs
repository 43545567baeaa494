//! Transaction Orchestrator
//!
//! Sequences one transaction run through eligibility, preprocess and confirm.
//! The stages are stateless; every state transition happens here.
//!
//! One instance per run. The run state sits behind a mutex that is only held
//! for synchronous bookkeeping, never across a remote call, so a second call
//! made while one is in flight sees the in-flight state and is rejected
//! instead of racing.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::adapters::{ConfirmStage, EligibilityGate, PreprocessStage, Stages, StatusQuery};
use super::error::{ErrorKind, OrchestrationError};
use super::normalizer::{ErrorNormalizer, RemoteFailure};
use super::state::{OrchestrationState, Stage, TransitionRecord};
use super::token::{IdempotencyToken, IdempotencyTokenProvider, RandomTokenProvider};
use super::types::{
    ConfirmationResult, ControlFlowToken, EligibilityResult, PaymentRail, PaymentSubtype, Quote,
    QuoteResponse, RunId, TransactionIntent, TransactionStatus,
};

use OrchestrationState::*;

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a quote stays confirmable after it was received
    pub quote_ttl: Duration,
    /// Per remote call; an elapsed timeout counts as `RemoteUnavailable`
    pub call_timeout: Duration,
    /// Extra attempts for eligibility/preprocess on `RemoteUnavailable`.
    /// Confirm is never retried.
    pub max_retries: u32,
    /// Linear backoff step between attempts
    pub retry_backoff: Duration,
    /// Reject intents whose parties are absent from the eligibility result
    /// before calling the processor
    pub enforce_eligibility_membership: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quote_ttl: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
            enforce_eligibility_membership: true,
        }
    }
}

/// Result of resolving an ambiguous confirm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// The confirm did execute; the run is now `Confirmed`
    Confirmed(ConfirmationResult),
    /// Nothing executed; the run is `Failed` and must restart
    NotExecuted { reason: String },
    /// Still unknown; the run stays `AmbiguousOutcome`
    StillPending,
}

struct ActiveQuote {
    response: QuoteResponse,
    intent: TransactionIntent,
    expires_at: Instant,
}

struct RunState {
    state: OrchestrationState,
    eligibility: Option<EligibilityResult>,
    quote: Option<ActiveQuote>,
    superseded: HashSet<ControlFlowToken>,
    consumed: Option<ControlFlowToken>,
    confirmation: Option<ConfirmationResult>,
    /// Token and idempotency key of the confirm whose outcome is unknown
    pending_confirm: Option<(ControlFlowToken, IdempotencyToken)>,
    reconciling: bool,
    history: Vec<TransitionRecord>,
}

impl RunState {
    fn new() -> Self {
        Self {
            state: Idle,
            eligibility: None,
            quote: None,
            superseded: HashSet::new(),
            consumed: None,
            confirmation: None,
            pending_confirm: None,
            reconciling: false,
            history: Vec::new(),
        }
    }

    fn transition(&mut self, run_id: RunId, to: OrchestrationState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.history.push(TransitionRecord {
            from,
            to,
            at: Utc::now(),
        });

        match to {
            Failed { .. } | AmbiguousOutcome => {
                warn!(run_id = %run_id, from = %from, to = %to, "Run state transition")
            }
            _ => info!(run_id = %run_id, from = %from, to = %to, "Run state transition"),
        }
    }

    fn ensure_no_call_in_flight(&self) -> Result<(), OrchestrationError> {
        if self.state.is_in_flight() || self.reconciling {
            return Err(OrchestrationError::ConcurrentOperationInProgress(self.state));
        }
        Ok(())
    }

    /// Drop the outstanding quote; its token can never be confirmed afterwards
    fn supersede_quote(&mut self, run_id: RunId) -> Option<ControlFlowToken> {
        let token = self.quote.take()?.response.token;
        debug!(run_id = %run_id, token = %token, "Control-flow token superseded");
        self.superseded.insert(token.clone());
        Some(token)
    }

    fn finish_confirmed(
        &mut self,
        run_id: RunId,
        token: ControlFlowToken,
        confirmation: ConfirmationResult,
    ) {
        info!(
            run_id = %run_id,
            token = %token,
            reference = %confirmation.reference,
            "Transaction confirmed"
        );
        self.quote = None;
        self.pending_confirm = None;
        self.consumed = Some(token);
        self.confirmation = Some(confirmation);
        self.transition(run_id, Confirmed);
    }
}

/// Marks a remote call as outstanding
///
/// If the call's future is dropped before the result is applied, the run
/// falls back to `on_cancel` and nothing is retried.
struct InFlight<'a> {
    orchestrator: &'a TransactionOrchestrator,
    on_cancel: OrchestrationState,
    armed: bool,
}

impl InFlight<'_> {
    fn settle<T>(mut self, apply: impl FnOnce(&mut RunState) -> T) -> T {
        self.armed = false;
        let mut run = self.orchestrator.lock_run();
        run.reconciling = false;
        apply(&mut run)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let run_id = self.orchestrator.run_id;
        let mut run = self.orchestrator.lock_run();
        run.reconciling = false;
        warn!(
            run_id = %run_id,
            state = %run.state,
            fallback = %self.on_cancel,
            "In-flight call cancelled"
        );
        if self.on_cancel == Eligible {
            // Whatever the cancelled preprocess may have produced is unusable
            run.supersede_quote(run_id);
        }
        run.transition(run_id, self.on_cancel);
    }
}

/// Quote expiry: the earlier of the local window and the processor's hint
fn effective_expiry(quote: &Quote, quote_ttl: Duration) -> Instant {
    let now = Instant::now();
    let local = now + quote_ttl;
    match quote.expires_at {
        Some(hint) => {
            let remaining = (hint - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            local.min(now + remaining)
        }
        None => local,
    }
}

/// Transaction Orchestrator - one instance per transaction run
pub struct TransactionOrchestrator {
    run_id: RunId,
    stages: Stages,
    tokens: Arc<dyn IdempotencyTokenProvider>,
    config: OrchestratorConfig,
    run: Mutex<RunState>,
}

impl TransactionOrchestrator {
    pub fn new(stages: Stages, config: OrchestratorConfig) -> Self {
        Self::with_token_provider(stages, Arc::new(RandomTokenProvider), config)
    }

    pub fn with_token_provider(
        stages: Stages,
        tokens: Arc<dyn IdempotencyTokenProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            stages,
            tokens,
            config,
            run: Mutex::new(RunState::new()),
        }
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self, on_cancel: OrchestrationState) -> InFlight<'_> {
        InFlight {
            orchestrator: self,
            on_cancel,
            armed: true,
        }
    }

    // === Inspection ===

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn state(&self) -> OrchestrationState {
        self.lock_run().state
    }

    pub fn eligibility(&self) -> Option<EligibilityResult> {
        self.lock_run().eligibility.clone()
    }

    pub fn current_quote(&self) -> Option<QuoteResponse> {
        self.lock_run().quote.as_ref().map(|q| q.response.clone())
    }

    /// Intent the current quote was computed for
    pub fn quoted_intent(&self) -> Option<TransactionIntent> {
        self.lock_run().quote.as_ref().map(|q| q.intent.clone())
    }

    /// Time left before the current quote can no longer be confirmed
    pub fn quote_time_remaining(&self) -> Option<Duration> {
        self.lock_run()
            .quote
            .as_ref()
            .map(|q| q.expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn confirmation(&self) -> Option<ConfirmationResult> {
        self.lock_run().confirmation.clone()
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.lock_run().history.clone()
    }

    // === Remote call plumbing ===

    async fn call_once<T>(
        &self,
        stage: Stage,
        call: impl Future<Output = Result<T, RemoteFailure>>,
    ) -> Result<T, OrchestrationError> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(ErrorNormalizer::normalize(stage, failure)),
            Err(_) => Err(ErrorNormalizer::normalize(stage, RemoteFailure::Timeout)),
        }
    }

    /// Retry `RemoteUnavailable` with a fresh idempotency token per attempt.
    /// Only for stages without irreversible effects.
    async fn call_with_retry<T, F, Fut>(
        &self,
        stage: Stage,
        mut call: F,
    ) -> Result<T, OrchestrationError>
    where
        F: FnMut(IdempotencyToken) -> Fut,
        Fut: Future<Output = Result<T, RemoteFailure>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let token = self.tokens.next();
            debug!(
                run_id = %self.run_id,
                stage = %stage,
                attempt = attempt,
                idempotency = %token,
                "Calling processor"
            );

            match self.call_once(stage, call(token)).await {
                Err(e)
                    if e.kind() == ErrorKind::RemoteUnavailable
                        && attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    warn!(
                        run_id = %self.run_id,
                        stage = %stage,
                        attempt = attempt,
                        error = %e,
                        "Processor unavailable, retrying with a fresh idempotency token"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                outcome => return outcome,
            }
        }
    }

    // === Operations ===

    /// `Idle → CheckingEligibility → Eligible`
    pub async fn start(
        &self,
        rail: PaymentRail,
        subtype: PaymentSubtype,
    ) -> Result<EligibilityResult, OrchestrationError> {
        if !rail.accepts(subtype) {
            return Err(OrchestrationError::Validation(format!(
                "Subtype {} is not accepted on rail {}",
                subtype, rail
            )));
        }

        let guard = {
            let mut run = self.lock_run();
            run.ensure_no_call_in_flight()?;
            if run.state != Idle {
                return Err(OrchestrationError::InvalidState {
                    state: run.state,
                    operation: "start",
                });
            }
            run.transition(self.run_id, CheckingEligibility);
            self.in_flight(Idle)
        };

        let gate = self.stages.gate.clone();
        let result = self
            .call_with_retry(Stage::Eligibility, |token| {
                let gate = gate.clone();
                async move { gate.check_eligibility(rail, subtype, &token).await }
            })
            .await;

        let run_id = self.run_id;
        guard.settle(|run| match result {
            Ok(eligibility) if !eligibility.is_usable() => {
                run.transition(
                    run_id,
                    Failed {
                        stage: Stage::Eligibility,
                        kind: ErrorKind::IneligibleParty,
                    },
                );
                Err(OrchestrationError::IneligibleParty(format!(
                    "No eligible source account for {}/{}",
                    rail, subtype
                )))
            }
            Ok(eligibility) => {
                info!(
                    run_id = %run_id,
                    rail = %rail,
                    subtype = %subtype,
                    sources = eligibility.source_accounts.len(),
                    destinations = eligibility.destinations.len(),
                    "Eligibility received"
                );
                run.eligibility = Some(eligibility.clone());
                run.transition(run_id, Eligible);
                Ok(eligibility)
            }
            Err(e) => {
                run.transition(
                    run_id,
                    Failed {
                        stage: Stage::Eligibility,
                        kind: e.kind(),
                    },
                );
                Err(e)
            }
        })
    }

    fn check_against_eligibility(
        &self,
        run: &RunState,
        intent: &TransactionIntent,
    ) -> Result<(), OrchestrationError> {
        let eligibility = run
            .eligibility
            .as_ref()
            .ok_or(OrchestrationError::InvalidState {
                state: run.state,
                operation: "preprocess",
            })?;

        if intent.rail != eligibility.rail || intent.subtype != eligibility.subtype {
            return Err(OrchestrationError::Validation(format!(
                "Intent is {}/{} but eligibility was checked for {}/{}",
                intent.rail, intent.subtype, eligibility.rail, eligibility.subtype
            )));
        }

        if !self.config.enforce_eligibility_membership {
            return Ok(());
        }
        if !eligibility.has_source(&intent.source_account) {
            return Err(OrchestrationError::IneligibleParty(format!(
                "Source account {} is not eligible",
                intent.source_account
            )));
        }
        if !intent.rail.destination_is_free_form()
            && !eligibility.has_destination(&intent.destination)
        {
            return Err(OrchestrationError::IneligibleParty(format!(
                "Destination {} is not eligible",
                intent.destination
            )));
        }
        Ok(())
    }

    /// `Eligible|Quoted → Preprocessing → Quoted`
    ///
    /// Re-quoting supersedes the previous control-flow token before the new
    /// request is sent.
    pub async fn preprocess(
        &self,
        intent: TransactionIntent,
    ) -> Result<QuoteResponse, OrchestrationError> {
        let (guard, supersedes) = {
            let mut run = self.lock_run();
            run.ensure_no_call_in_flight()?;
            if !matches!(run.state, Eligible | Quoted) {
                return Err(OrchestrationError::InvalidState {
                    state: run.state,
                    operation: "preprocess",
                });
            }
            intent.validate()?;
            self.check_against_eligibility(&run, &intent)?;

            let supersedes = run.supersede_quote(self.run_id);
            run.transition(self.run_id, Preprocessing);
            (self.in_flight(Eligible), supersedes)
        };

        let stage = self.stages.preprocess.clone();
        let result = self
            .call_with_retry(Stage::Preprocess, |token| {
                let stage = stage.clone();
                let intent = intent.clone();
                let supersedes = supersedes.clone();
                async move { stage.preprocess(&intent, supersedes.as_ref(), &token).await }
            })
            .await;

        let run_id = self.run_id;
        let quote_ttl = self.config.quote_ttl;
        guard.settle(|run| match result {
            Ok(response) => {
                info!(
                    run_id = %run_id,
                    token = %response.token,
                    debit = %response.quote.debit,
                    credit = %response.quote.credit,
                    "Quote received"
                );
                run.quote = Some(ActiveQuote {
                    expires_at: effective_expiry(&response.quote, quote_ttl),
                    response: response.clone(),
                    intent,
                });
                run.transition(run_id, Quoted);
                Ok(response)
            }
            Err(e) => {
                match e.kind() {
                    // Correctable: stay eligible for a resubmission
                    ErrorKind::ValidationError
                    | ErrorKind::IneligibleParty
                    | ErrorKind::InsufficientFunds => run.transition(run_id, Eligible),
                    kind => run.transition(
                        run_id,
                        Failed {
                            stage: Stage::Preprocess,
                            kind,
                        },
                    ),
                }
                Err(e)
            }
        })
    }

    /// `Quoted → Confirming → Confirmed`
    ///
    /// `token` is the one the caller displayed to the user; anything other
    /// than the current, fresh quote is rejected without a remote call.
    pub async fn confirm(
        &self,
        token: &ControlFlowToken,
    ) -> Result<ConfirmationResult, OrchestrationError> {
        let (guard, idempotency) = {
            let mut run = self.lock_run();
            run.ensure_no_call_in_flight()?;

            if run.consumed.as_ref() == Some(token) {
                return Err(OrchestrationError::TokenAlreadyUsed(format!(
                    "{} was already confirmed",
                    token
                )));
            }
            if run.superseded.contains(token) {
                return Err(OrchestrationError::TokenSuperseded(format!(
                    "{} is no longer the current quote",
                    token
                )));
            }
            match run.state {
                Quoted => {}
                AmbiguousOutcome => {
                    return Err(OrchestrationError::AmbiguousOutcome(
                        "previous confirm has an unknown outcome".to_string(),
                    ));
                }
                state => {
                    return Err(OrchestrationError::InvalidState {
                        state,
                        operation: "confirm",
                    });
                }
            }
            let expires_at = match run.quote.as_ref() {
                Some(active) if active.response.token == *token => active.expires_at,
                _ => {
                    return Err(OrchestrationError::InvalidState {
                        state: run.state,
                        operation: "confirm with a token not issued to this run",
                    });
                }
            };

            if Instant::now() >= expires_at {
                warn!(run_id = %self.run_id, token = %token, "Quote expired before confirm");
                run.supersede_quote(self.run_id);
                run.transition(self.run_id, Eligible);
                return Err(OrchestrationError::TokenExpired(format!(
                    "quote {} expired, preprocess again",
                    token
                )));
            }

            let idempotency = self.tokens.next();
            run.pending_confirm = Some((token.clone(), idempotency.clone()));
            run.transition(self.run_id, Confirming);
            (self.in_flight(AmbiguousOutcome), idempotency)
        };

        debug!(
            run_id = %self.run_id,
            token = %token,
            idempotency = %idempotency,
            "Calling processor confirm"
        );
        let stage = self.stages.confirm.clone();
        let result = self
            .call_once(Stage::Confirm, stage.confirm(token, &idempotency))
            .await;

        let run_id = self.run_id;
        guard.settle(|run| match result {
            Ok(confirmation) => {
                run.finish_confirmed(run_id, token.clone(), confirmation.clone());
                Ok(confirmation)
            }
            Err(e) => {
                match e.kind() {
                    // pending_confirm is kept for reconciliation
                    ErrorKind::AmbiguousOutcome => run.transition(run_id, AmbiguousOutcome),
                    ErrorKind::TokenExpired
                    | ErrorKind::TokenSuperseded
                    | ErrorKind::IneligibleParty
                    | ErrorKind::InsufficientFunds => {
                        run.pending_confirm = None;
                        run.supersede_quote(run_id);
                        run.transition(run_id, Eligible);
                    }
                    ErrorKind::TokenAlreadyUsed => {
                        run.pending_confirm = None;
                        run.quote = None;
                        run.consumed = Some(token.clone());
                        run.transition(
                            run_id,
                            Failed {
                                stage: Stage::Confirm,
                                kind: ErrorKind::TokenAlreadyUsed,
                            },
                        );
                    }
                    kind => {
                        run.pending_confirm = None;
                        run.supersede_quote(run_id);
                        run.transition(
                            run_id,
                            Failed {
                                stage: Stage::Confirm,
                                kind,
                            },
                        );
                    }
                }
                Err(e)
            }
        })
    }

    /// Resolve `AmbiguousOutcome` with an explicit status query
    pub async fn reconcile(&self) -> Result<ReconciliationOutcome, OrchestrationError> {
        let (guard, token, confirm_idempotency) = {
            let mut run = self.lock_run();
            run.ensure_no_call_in_flight()?;
            if run.state != AmbiguousOutcome {
                return Err(OrchestrationError::InvalidState {
                    state: run.state,
                    operation: "reconcile",
                });
            }
            let Some((token, confirm_idempotency)) = run.pending_confirm.clone() else {
                return Err(OrchestrationError::InvalidState {
                    state: run.state,
                    operation: "reconcile without a pending confirm",
                });
            };
            run.reconciling = true;
            (self.in_flight(AmbiguousOutcome), token, confirm_idempotency)
        };

        let status = self.stages.status.clone();
        let idempotency = self.tokens.next();
        let result = self
            .call_once(
                Stage::Reconcile,
                status.query_status(&token, &confirm_idempotency, &idempotency),
            )
            .await;

        let run_id = self.run_id;
        guard.settle(|run| match result {
            Ok(TransactionStatus::Completed(confirmation)) => {
                run.finish_confirmed(run_id, token, confirmation.clone());
                Ok(ReconciliationOutcome::Confirmed(confirmation))
            }
            Ok(TransactionStatus::NotExecuted { reason }) => {
                info!(run_id = %run_id, token = %token, reason = %reason, "Confirm did not execute");
                run.pending_confirm = None;
                run.supersede_quote(run_id);
                run.transition(
                    run_id,
                    Failed {
                        stage: Stage::Confirm,
                        kind: ErrorKind::RemoteUnavailable,
                    },
                );
                Ok(ReconciliationOutcome::NotExecuted { reason })
            }
            Ok(TransactionStatus::Pending) => {
                debug!(run_id = %run_id, token = %token, "Confirm outcome still pending");
                Ok(ReconciliationOutcome::StillPending)
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Status query failed; outcome still unknown");
                // Still ambiguous: the only safe next step is another status query
                Err(OrchestrationError::AmbiguousOutcome(format!(
                    "status query failed: {}",
                    e
                )))
            }
        })
    }

    /// `Failed → Idle`; the only way out of a failed run
    pub fn reset(&self) -> Result<(), OrchestrationError> {
        let mut run = self.lock_run();
        match run.state {
            Failed { .. } => {
                run.supersede_quote(self.run_id);
                run.eligibility = None;
                run.pending_confirm = None;
                run.transition(self.run_id, Idle);
                Ok(())
            }
            state => Err(OrchestrationError::InvalidState {
                state,
                operation: "reset",
            }),
        }
    }

    /// Discard the flow from a settled, non-terminal state
    pub fn abandon(&self) -> Result<(), OrchestrationError> {
        let mut run = self.lock_run();
        run.ensure_no_call_in_flight()?;
        match run.state {
            Idle => Ok(()),
            Eligible | Quoted => {
                run.supersede_quote(self.run_id);
                run.eligibility = None;
                run.transition(self.run_id, Idle);
                Ok(())
            }
            state => Err(OrchestrationError::InvalidState {
                state,
                operation: "abandon",
            }),
        }
    }
}
