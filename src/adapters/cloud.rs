use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::market::{CustomerType, Market};

/// Channel id addressing the single outlet of every supported charger.
pub const CHANNEL_ID: &str = "1";

const HTTP_TIMEOUT_SECONDS: u64 = 30;

pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("credentials rejected by charger cloud")]
    Unauthorized,
    #[error("charger cloud answered with HTTP {0}")]
    Status(u16),
    #[error("charger cloud request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected charger cloud response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub recharge_spot_id: String,
    pub channel_id: String,
}

impl Channel {
    pub fn for_charger(idx: &str) -> Self {
        Self {
            recharge_spot_id: idx.to_string(),
            channel_id: CHANNEL_ID.to_string(),
        }
    }
}

/// Request surface of the charger cloud. Every call is one remote round trip.
#[async_trait::async_trait]
pub trait CloudClient: Send + Sync + 'static {
    async fn network_overview(&self) -> Result<Vec<Record>, CloudError>;
    async fn charger_overview(&self, idx: &str) -> Result<Vec<Record>, CloudError>;
    async fn client_search(&self, idx: &str) -> Result<Vec<Record>, CloudError>;
    async fn card_search(&self, idx: &str, customer_id: &str) -> Result<Vec<Record>, CloudError>;
    async fn start(
        &self,
        channel: &Channel,
        customer_id: &str,
        card_id: &str,
    ) -> Result<(), CloudError>;
    async fn stop(&self, channel: &Channel) -> Result<(), CloudError>;
    async fn soft_reset(&self, idx: &str) -> Result<(), CloudError>;
    async fn hard_reset(&self, idx: &str) -> Result<(), CloudError>;
    async fn unlock_connector(&self, idx: &str) -> Result<(), CloudError>;
    async fn block(&self, idx: &str) -> Result<(), CloudError>;
    async fn unblock(&self, idx: &str) -> Result<(), CloudError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    pub username: String,
    pub password: String,
    pub market: Market,
    pub customer_type: Option<CustomerType>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// HTTP client for the charger cloud portal. Logs in lazily with a form post
/// and keeps the session cookie; a rejected session triggers one re-login.
pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: String,
    credentials: CloudCredentials,
    logged_in: Mutex<bool>,
}

impl HttpCloudClient {
    pub fn new(credentials: CloudCredentials, base_url: Option<&str>) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()?;
        let base_url = base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| credentials.market.default_base_url());

        Ok(Self {
            http,
            base_url,
            credentials,
            logged_in: Mutex::new(false),
        })
    }

    async fn login(&self) -> Result<(), CloudError> {
        let mut form = vec![
            ("email", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("market", self.credentials.market.code()),
        ];
        if let Some(customer_type) = self.credentials.customer_type {
            form.push(("customer_type", customer_type.as_str()));
        }

        let response = self
            .http
            .post(format!("{}/api/login", self.base_url))
            .form(&form)
            .send()
            .await?;

        check_status(response.status())?;
        tracing::debug!(market = %self.credentials.market, "charger cloud login succeeded");
        Ok(())
    }

    async fn ensure_logged_in(&self, force: bool) -> Result<(), CloudError> {
        let mut logged_in = self.logged_in.lock().await;
        if force || !*logged_in {
            *logged_in = false;
            self.login().await?;
            *logged_in = true;
        }
        Ok(())
    }

    async fn request(&self, handler: &str, args: Value) -> Result<Value, CloudError> {
        self.ensure_logged_in(false).await?;

        match self.send_batch(handler, &args).await {
            Err(CloudError::Unauthorized) => {
                tracing::debug!(handler, "charger cloud session expired, logging in again");
                self.ensure_logged_in(true).await?;
                self.send_batch(handler, &args).await
            }
            other => other,
        }
    }

    async fn send_batch(&self, handler: &str, args: &Value) -> Result<Value, CloudError> {
        let response = self
            .http
            .post(format!("{}/api/requests", self.base_url))
            .json(&batch_body(handler, args))
            .send()
            .await?;

        check_status(response.status())?;

        let batch: BatchResponse = response.json().await?;
        batch
            .results
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::Malformed(format!("no result for {handler}")))
    }

    async fn rows(&self, handler: &str, args: Value) -> Result<Vec<Record>, CloudError> {
        let result = self.request(handler, args).await?;
        parse_rows(result)
    }

    async fn command(&self, handler: &str, args: Value) -> Result<(), CloudError> {
        self.request(handler, args).await.map(|_| ())
    }
}

fn batch_body(handler: &str, args: &Value) -> Value {
    json!({ "requests": [{ "handler": handler, "args": args }] })
}

fn check_status(status: reqwest::StatusCode) -> Result<(), CloudError> {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(CloudError::Unauthorized);
    }
    if !status.is_success() {
        return Err(CloudError::Status(status.as_u16()));
    }
    Ok(())
}

fn parse_rows(result: Value) -> Result<Vec<Record>, CloudError> {
    match result {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(CloudError::Malformed(format!(
                    "expected record object, got {other}"
                ))),
            })
            .collect(),
        Value::Object(record) => Ok(vec![record]),
        other => Err(CloudError::Malformed(format!(
            "expected list of records, got {other}"
        ))),
    }
}

#[async_trait::async_trait]
impl CloudClient for HttpCloudClient {
    async fn network_overview(&self) -> Result<Vec<Record>, CloudError> {
        self.rows("NetworkOverview", json!({})).await
    }

    async fn charger_overview(&self, idx: &str) -> Result<Vec<Record>, CloudError> {
        self.rows("Overview", json!({ "recharge_spot_id": idx })).await
    }

    async fn client_search(&self, idx: &str) -> Result<Vec<Record>, CloudError> {
        self.rows("ClientSearch", json!({ "recharge_spot_id": idx, "name": "" }))
            .await
    }

    async fn card_search(&self, idx: &str, customer_id: &str) -> Result<Vec<Record>, CloudError> {
        self.rows(
            "CardSearch",
            json!({ "recharge_spot_id": idx, "customer_id": customer_id }),
        )
        .await
    }

    async fn start(
        &self,
        channel: &Channel,
        customer_id: &str,
        card_id: &str,
    ) -> Result<(), CloudError> {
        self.command(
            "Start",
            json!({
                "recharge_spot_id": channel.recharge_spot_id,
                "channel_id": channel.channel_id,
                "customer_id": customer_id,
                "card_id": card_id,
            }),
        )
        .await
    }

    async fn stop(&self, channel: &Channel) -> Result<(), CloudError> {
        self.command(
            "Stop",
            json!({
                "recharge_spot_id": channel.recharge_spot_id,
                "channel_id": channel.channel_id,
            }),
        )
        .await
    }

    async fn soft_reset(&self, idx: &str) -> Result<(), CloudError> {
        self.command("SoftReset", json!({ "recharge_spot_id": idx }))
            .await
    }

    async fn hard_reset(&self, idx: &str) -> Result<(), CloudError> {
        self.command("HardReset", json!({ "recharge_spot_id": idx }))
            .await
    }

    async fn unlock_connector(&self, idx: &str) -> Result<(), CloudError> {
        self.command("UnlockConnector", json!({ "recharge_spot_id": idx }))
            .await
    }

    async fn block(&self, idx: &str) -> Result<(), CloudError> {
        self.command("Block", json!({ "recharge_spot_id": idx }))
            .await
    }

    async fn unblock(&self, idx: &str) -> Result<(), CloudError> {
        self.command("Unblock", json!({ "recharge_spot_id": idx }))
            .await
    }
}
