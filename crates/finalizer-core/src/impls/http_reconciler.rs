//! HttpLedgerClient - ledger API への HTTP クライアント
//!
//! - `POST {base}/api/user_balance_update` … 残高の報告（BalanceReconciler）
//! - `GET  {base}/api/user_by_id/{userId}` … 残高の取得（serving layer 用）
//! - `POST {base}/api/balance_lock` … 残高ロック（serving layer 用、finalizer からは呼ばない）
//!
//! すべての呼び出しはタイムアウト付きで、同じ送信ヘルパーを通る。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::LedgerConfig;
use crate::domain::{FinalizerError, ReconcileFailure, Result, RetryPolicy, UserId};
use crate::ports::{BalanceReconciler, ReconcileAck};

const BALANCE_UPDATE_PATH: &str = "api/user_balance_update";
const USER_BY_ID_PATH: &str = "api/user_by_id";
const BALANCE_LOCK_PATH: &str = "api/balance_lock";

/// Error bodies are truncated to this many bytes in logs and errors.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceUpdate<'a> {
    user_id: &'a UserId,
    balance: f64,
    balance_unlock: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceLockRequest<'a> {
    user_id: &'a UserId,
}

/// `{ "status": "success", "data": { ... } }`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    balance: Option<serde_json::Value>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceLockData {
    #[serde(rename = "balanceLoct")]
    balance_locked: Option<serde_json::Value>,
}

/// A player's account as the ledger reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerAccount {
    pub balance: f64,
    pub username: Option<String>,
}

/// Ledger HTTP client.
#[derive(Clone)]
pub struct HttpLedgerClient {
    base_url: Url,
    http_client: HttpClient,
    retry_policy: RetryPolicy,
}

impl HttpLedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let http_client = HttpClient::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| FinalizerError::Config(format!("ledger http client: {e}")))?;

        Ok(Self {
            base_url,
            http_client,
            retry_policy: config.retry_policy(),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// `{base}/{path}`, keeping any path the base already has.
    fn endpoint(&self, path: &str) -> std::result::Result<Url, ReconcileFailure> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| ReconcileFailure::UnexpectedResponse(format!("endpoint url: {e}")))
    }

    /// Fetch the player's ledger balance.
    pub async fn fetch_user_balance(&self, user_id: &UserId) -> Result<LedgerAccount> {
        let ledger_err = |reason| FinalizerError::Ledger {
            call: "user_by_id",
            user_id: user_id.to_string(),
            reason,
        };
        let url = self
            .endpoint(&format!("{USER_BY_ID_PATH}/{user_id}"))
            .map_err(ledger_err)?;
        let response = self
            .send_with_retry(reqwest::Method::GET, || self.http_client.get(url.clone()))
            .await
            .map_err(ledger_err)?;
        let envelope: Envelope<UserData> = read_success_json(response).await.map_err(ledger_err)?;

        let data = envelope
            .data
            .filter(|_| envelope.status == "success")
            .ok_or_else(|| {
                ledger_err(ReconcileFailure::UnexpectedResponse(
                    "could not retrieve user balance".to_string(),
                ))
            })?;
        let balance = data.balance.as_ref().and_then(parse_balance).ok_or_else(|| {
            ledger_err(ReconcileFailure::UnexpectedResponse(
                "balance missing or not numeric".to_string(),
            ))
        })?;

        Ok(LedgerAccount {
            balance,
            username: data.username,
        })
    }

    /// Ask the ledger to lock the player's balance.
    pub async fn lock_balance(&self, user_id: &UserId) -> Result<serde_json::Value> {
        let ledger_err = |reason| FinalizerError::Ledger {
            call: "balance_lock",
            user_id: user_id.to_string(),
            reason,
        };
        let url = self.endpoint(BALANCE_LOCK_PATH).map_err(ledger_err)?;
        let body = BalanceLockRequest { user_id };
        let response = self
            .send_with_retry(reqwest::Method::POST, || {
                self.http_client.post(url.clone()).json(&body)
            })
            .await
            .map_err(ledger_err)?;
        let envelope: Envelope<BalanceLockData> =
            read_success_json(response).await.map_err(ledger_err)?;

        envelope
            .data
            .filter(|_| envelope.status == "success")
            .and_then(|data| data.balance_locked)
            .filter(is_truthy)
            .ok_or_else(|| {
                ledger_err(ReconcileFailure::UnexpectedResponse(
                    "could not lock user balance".to_string(),
                ))
            })
    }

    /// Send one request, retrying transient failures as the policy allows.
    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, ReconcileFailure> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match make_request().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success()
                        || !is_retryable_status(status)
                        || !self.retry_policy.allows_retry(attempts)
                    {
                        return Ok(response);
                    }
                    warn!(%method, %status, attempts, "ledger call failed, retrying");
                }
                Err(err) => {
                    if !is_retryable_error(&err) || !self.retry_policy.allows_retry(attempts) {
                        return Err(classify_error(err));
                    }
                    warn!(%method, error = %err, attempts, "ledger call failed, retrying");
                }
            }
            sleep(self.retry_policy.next_delay(attempts)).await;
        }
    }
}

#[async_trait]
impl BalanceReconciler for HttpLedgerClient {
    async fn reconcile(&self, user_id: &UserId, balance: f64) -> Result<ReconcileAck> {
        let reconcile_err = |reason| FinalizerError::Reconcile {
            user_id: user_id.to_string(),
            reason,
        };
        let url = self.endpoint(BALANCE_UPDATE_PATH).map_err(reconcile_err)?;
        let body = BalanceUpdate {
            user_id,
            balance,
            balance_unlock: true,
        };
        debug!(%user_id, balance, url = %url, "posting balance update");

        let response = self
            .send_with_retry(reqwest::Method::POST, || {
                self.http_client.post(url.clone()).json(&body)
            })
            .await
            .map_err(reconcile_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(reconcile_err(status_failure(response).await));
        }

        // 2xx is success even if the acknowledgement body is unreadable
        let body = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) => {
                warn!(%user_id, error = %e, "could not read ledger acknowledgement");
                None
            }
        };
        info!(%user_id, balance, %status, "balance reported to ledger");
        Ok(ReconcileAck { body })
    }
}

async fn status_failure(response: reqwest::Response) -> ReconcileFailure {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    ReconcileFailure::Status { status, body }
}

async fn read_success_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, ReconcileFailure> {
    if !response.status().is_success() {
        return Err(status_failure(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ReconcileFailure::UnexpectedResponse(e.to_string()))
}

/// The ledger sends balances as numbers or decimal strings.
fn parse_balance(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn classify_error(err: reqwest::Error) -> ReconcileFailure {
    if err.is_timeout() {
        ReconcileFailure::Timeout
    } else {
        ReconcileFailure::Transport(err.to_string())
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
