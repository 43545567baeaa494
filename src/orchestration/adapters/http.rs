//! HTTP Processor Adapter
//!
//! REST/JSON client for a remote payment processor:
//!
//! | Stage        | Request                              |
//! |--------------|--------------------------------------|
//! | eligibility  | `GET  {base}/eligibility?rail=&subtype=` |
//! | preprocess   | `POST {base}/preprocess`             |
//! | confirm      | `POST {base}/confirm`                |
//! | status query | `GET  {base}/transactions/status`    |
//!
//! The idempotency token travels in the `Idempotency-Key` header, separate
//! from the bearer session token.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConfirmStage, EligibilityGate, PreprocessStage, StatusQuery};
use crate::orchestration::normalizer::RemoteFailure;
use crate::orchestration::token::IdempotencyToken;
use crate::orchestration::types::{
    ConfirmationResult, ControlFlowToken, Destination, EligibilityResult, Money, PaymentRail,
    PaymentSubtype, Quote, QuoteResponse, SourceAccount, TransactionIntent, TransactionReference,
    TransactionStatus,
};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Connection settings for [`HttpProcessor`]
#[derive(Debug, Clone)]
pub struct HttpProcessorConfig {
    /// e.g. `https://processor.internal/api/v1`
    pub base_url: String,
    /// Caller session, sent as a bearer token
    pub session_token: Option<String>,
    pub timeout: Duration,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct EligibilityQuery<'a> {
    rail: &'a str,
    subtype: &'a str,
}

/// Both lists are required; a body missing either is malformed.
#[derive(Deserialize)]
struct EligibilityBody {
    source_accounts: Vec<SourceAccount>,
    destinations: Vec<Destination>,
}

#[derive(Serialize)]
struct PreprocessBody<'a> {
    rail: PaymentRail,
    subtype: PaymentSubtype,
    source_account: &'a str,
    destination: &'a str,
    amount: &'a Money,
    remarks: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    supersedes: Option<&'a ControlFlowToken>,
}

#[derive(Deserialize)]
struct PreprocessReply {
    control_flow_token: ControlFlowToken,
    quote: Quote,
}

#[derive(Serialize)]
struct ConfirmBody<'a> {
    control_flow_token: &'a ControlFlowToken,
}

#[derive(Deserialize)]
struct ConfirmReply {
    transaction_reference: TransactionReference,
    #[serde(default)]
    balance_after: Option<Money>,
    completed_at: DateTime<Utc>,
}

impl From<ConfirmReply> for ConfirmationResult {
    fn from(reply: ConfirmReply) -> Self {
        ConfirmationResult {
            reference: reply.transaction_reference,
            balance_after: reply.balance_after,
            completed_at: reply.completed_at,
        }
    }
}

#[derive(Serialize)]
struct StatusQueryParams<'a> {
    control_flow_token: &'a str,
    confirm_idempotency_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExecutionStatus {
    Completed,
    NotExecuted,
    Pending,
}

#[derive(Deserialize)]
struct StatusReply {
    status: ExecutionStatus,
    #[serde(default)]
    confirmation: Option<ConfirmReply>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Payment processor reached over HTTP
pub struct HttpProcessor {
    client: reqwest::Client,
    config: HttpProcessorConfig,
}

impl HttpProcessor {
    pub fn new(config: HttpProcessorConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Attach headers, send, and split success from failure
    async fn send<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        idempotency: &IdempotencyToken,
    ) -> Result<R, RemoteFailure> {
        let mut request = request.header(IDEMPOTENCY_HEADER, idempotency.to_string());
        if let Some(session) = &self.config.session_token {
            request = request.bearer_auth(session);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteFailure::Timeout
            } else {
                RemoteFailure::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| RemoteFailure::Malformed(e.to_string()));
        }

        let body = response.json::<ErrorBody>().await.ok();
        debug!(status = status.as_u16(), "Processor rejected request");
        Err(RemoteFailure::Rejected {
            status: Some(status.as_u16()),
            code: body.as_ref().and_then(|b| b.code.clone()),
            message: body
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.to_string()),
        })
    }
}

#[async_trait]
impl EligibilityGate for HttpProcessor {
    async fn check_eligibility(
        &self,
        rail: PaymentRail,
        subtype: PaymentSubtype,
        idempotency: &IdempotencyToken,
    ) -> Result<EligibilityResult, RemoteFailure> {
        let request = self.client.get(self.url("eligibility")).query(&EligibilityQuery {
            rail: rail.as_str(),
            subtype: subtype.as_str(),
        });
        let body: EligibilityBody = self.send(request, idempotency).await?;

        Ok(EligibilityResult {
            rail,
            subtype,
            source_accounts: body.source_accounts,
            destinations: body.destinations,
        })
    }
}

#[async_trait]
impl PreprocessStage for HttpProcessor {
    async fn preprocess(
        &self,
        intent: &TransactionIntent,
        supersedes: Option<&ControlFlowToken>,
        idempotency: &IdempotencyToken,
    ) -> Result<QuoteResponse, RemoteFailure> {
        let request = self.client.post(self.url("preprocess")).json(&PreprocessBody {
            rail: intent.rail,
            subtype: intent.subtype,
            source_account: &intent.source_account,
            destination: &intent.destination,
            amount: &intent.amount,
            remarks: &intent.remarks,
            supersedes,
        });
        let reply: PreprocessReply = self.send(request, idempotency).await?;

        Ok(QuoteResponse {
            token: reply.control_flow_token,
            quote: reply.quote,
        })
    }
}

#[async_trait]
impl ConfirmStage for HttpProcessor {
    async fn confirm(
        &self,
        token: &ControlFlowToken,
        idempotency: &IdempotencyToken,
    ) -> Result<ConfirmationResult, RemoteFailure> {
        let request = self.client.post(self.url("confirm")).json(&ConfirmBody {
            control_flow_token: token,
        });
        let reply: ConfirmReply = self.send(request, idempotency).await?;
        Ok(reply.into())
    }
}

#[async_trait]
impl StatusQuery for HttpProcessor {
    async fn query_status(
        &self,
        token: &ControlFlowToken,
        confirm_idempotency: &IdempotencyToken,
        idempotency: &IdempotencyToken,
    ) -> Result<TransactionStatus, RemoteFailure> {
        let request = self
            .client
            .get(self.url("transactions/status"))
            .query(&StatusQueryParams {
                control_flow_token: token.as_str(),
                confirm_idempotency_key: confirm_idempotency.to_string(),
            });
        let reply: StatusReply = self.send(request, idempotency).await?;

        match reply.status {
            ExecutionStatus::Completed => reply
                .confirmation
                .map(|c| TransactionStatus::Completed(c.into()))
                .ok_or_else(|| {
                    RemoteFailure::Malformed("completed status without confirmation".to_string())
                }),
            ExecutionStatus::NotExecuted => Ok(TransactionStatus::NotExecuted {
                reason: reply.reason.unwrap_or_else(|| "not executed".to_string()),
            }),
            ExecutionStatus::Pending => Ok(TransactionStatus::Pending),
        }
    }
}
