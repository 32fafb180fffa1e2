//! External ledger service boundary.
//!
//! Every money movement goes through the three idempotent operations below.
//! Retries reuse the same request id so the ledger can dedupe repeated
//! delivery; structured business rejections are terminal and never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitRequest {
    pub request_id: String,
    pub round_id: String,
    pub player_id: String,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub request_id: String,
    pub round_id: String,
    pub player_id: String,
    pub bet_amount: f64,
    pub multiplier: f64,
    pub win_amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originating_transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensateRequest {
    pub request_id: String,
    pub round_id: String,
    pub player_id: String,
    pub amount: f64,
    pub currency: String,
    pub originating_transaction_id: String,
    pub reason: String,
}

/// Successful ledger response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub transaction_id: String,
    pub new_balance: f64,
}

/// Structured business rejection body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerRejection {
    error_code: String,
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// The ledger understood the request and refused it. Terminal.
    #[error("ledger rejected the operation: {code}")]
    Rejected { code: String },

    #[error("ledger returned status {0}")]
    Status(u16),

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger request timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LedgerError::Rejected { .. })
    }
}

/// The settlement seam. Implementations must tolerate redelivery of the
/// same request id without double-applying.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn debit(&self, request: &DebitRequest) -> Result<LedgerReceipt, LedgerError>;
    async fn credit(&self, request: &CreditRequest) -> Result<LedgerReceipt, LedgerError>;
    async fn compensate(&self, request: &CompensateRequest)
        -> Result<LedgerReceipt, LedgerError>;
}

/// Retry budget for one logical ledger call. Backoff grows linearly with
/// the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * attempt
    }
}

/// HTTP ledger client.
pub struct HttpLedgerClient {
    base_url: String,
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            policy,
        })
    }

    async fn post_once<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<LedgerReceipt, LedgerError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_slice::<LedgerReceipt>(&bytes)
                .map_err(|e| LedgerError::Transport(format!("invalid receipt: {}", e)))
        } else if let Ok(rejection) = serde_json::from_slice::<LedgerRejection>(&bytes) {
            Err(LedgerError::Rejected {
                code: rejection.error_code,
            })
        } else {
            Err(LedgerError::Status(status.as_u16()))
        }
    }

    /// Run one logical call through the retry budget. A timed-out attempt
    /// counts against the budget; the in-flight request is not chased down
    /// on the ledger side, which dedupes on the request id.
    async fn post_with_retry<B: Serialize + Sync>(
        &self,
        path: &str,
        request_id: &str,
        body: &B,
    ) -> Result<LedgerReceipt, LedgerError> {
        let mut last = LedgerError::Transport("no attempts made".to_string());
        for attempt in 1..=self.policy.max_attempts {
            match tokio::time::timeout(self.policy.request_timeout, self.post_once(path, body))
                .await
            {
                Ok(Ok(receipt)) => {
                    if attempt > 1 {
                        debug!(
                            "ledger {} request {} succeeded on attempt {}",
                            path, request_id, attempt
                        );
                    }
                    return Ok(receipt);
                }
                Ok(Err(err)) if !err.is_retryable() => return Err(err),
                Ok(Err(err)) => last = err,
                Err(_) => last = LedgerError::Timeout(self.policy.request_timeout),
            }
            if attempt < self.policy.max_attempts {
                warn!(
                    "ledger {} request {} attempt {}/{} failed: {}",
                    path, request_id, attempt, self.policy.max_attempts, last
                );
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }
        Err(last)
    }
}

#[async_trait]
impl LedgerService for HttpLedgerClient {
    async fn debit(&self, request: &DebitRequest) -> Result<LedgerReceipt, LedgerError> {
        self.post_with_retry("debit", &request.request_id, request)
            .await
    }

    async fn credit(&self, request: &CreditRequest) -> Result<LedgerReceipt, LedgerError> {
        self.post_with_retry("credit", &request.request_id, request)
            .await
    }

    async fn compensate(
        &self,
        request: &CompensateRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.post_with_retry("compensate", &request.request_id, request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve_router(router: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), handle)
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            request_timeout: Duration::from_secs(1),
        }
    }

    fn debit_request() -> DebitRequest {
        DebitRequest {
            request_id: "req-1".to_string(),
            round_id: "round-1".to_string(),
            player_id: "p1".to_string(),
            amount: 10.0,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_statuses_until_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/debit",
                post(|State(counter): State<Arc<AtomicUsize>>| async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({
                            "transactionId": "tx-9",
                            "newBalance": 90.0
                        })))
                    }
                }),
            )
            .with_state(counter.clone());
        let (base_url, handle) = serve_router(router).await;

        let client = HttpLedgerClient::new(&base_url, quick_policy(3)).unwrap();
        let receipt = client.debit(&debit_request()).await.unwrap();
        assert_eq!(receipt.transaction_id, "tx-9");
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/debit",
                post(|State(counter): State<Arc<AtomicUsize>>| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::INTERNAL_SERVER_ERROR
                }),
            )
            .with_state(counter.clone());
        let (base_url, handle) = serve_router(router).await;

        let client = HttpLedgerClient::new(&base_url, quick_policy(3)).unwrap();
        let err = client.debit(&debit_request()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Status(500)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn test_business_rejection_not_retried() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/debit",
                post(|State(counter): State<Arc<AtomicUsize>>| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(serde_json::json!({ "errorCode": "INSUFFICIENT_FUNDS" })),
                    )
                }),
            )
            .with_state(counter.clone());
        let (base_url, handle) = serve_router(router).await;

        let client = HttpLedgerClient::new(&base_url, quick_policy(3)).unwrap();
        let err = client.debit(&debit_request()).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Rejected { ref code } if code == "INSUFFICIENT_FUNDS"
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_timeout_counts_against_budget() {
        let counter = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/credit",
                post(|State(counter): State<Arc<AtomicUsize>>| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    StatusCode::OK
                }),
            )
            .with_state(counter.clone());
        let (base_url, handle) = serve_router(router).await;

        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::ZERO,
            request_timeout: Duration::from_millis(50),
        };
        let client = HttpLedgerClient::new(&base_url, policy).unwrap();
        let request = CreditRequest {
            request_id: "req-2".to_string(),
            round_id: "round-1".to_string(),
            player_id: "p1".to_string(),
            bet_amount: 10.0,
            multiplier: 2.0,
            win_amount: 20.0,
            currency: "USD".to_string(),
            originating_transaction_id: Some("tx-1".to_string()),
        };
        let err = client.credit(&request).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        handle.abort();
    }
}
