use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

use super::controller::WizardEvent;
use super::domain::{BrokerSummary, BrokerToken};

/// Lookup of a broker's public profile by referral token.
#[async_trait]
pub trait BrokerDirectory: Send + Sync {
    async fn lookup(&self, token: &BrokerToken) -> Result<BrokerSummary, BrokerLookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerLookupError {
    #[error("this referral link is not valid")]
    NotFound,
    #[error("this broker is no longer accepting applications")]
    Deactivated,
    #[error("broker directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves `token` and packages the outcome for the reducer.
pub async fn resolve_referral<B>(directory: &B, token: BrokerToken) -> WizardEvent
where
    B: BrokerDirectory + ?Sized,
{
    let outcome = directory.lookup(&token).await;
    match &outcome {
        Ok(broker) => info!(token = %token, broker = %broker.name, "referral resolved"),
        Err(err) => warn!(token = %token, error = %err, "referral could not be resolved"),
    }
    WizardEvent::BrokerResolved { token, outcome }
}

/// Directory backed by `GET {base}/brokers/public/{token}`.
#[derive(Debug, Clone)]
pub struct HttpBrokerDirectory {
    client: Client,
    base_url: String,
}

impl HttpBrokerDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn profile_url(&self, token: &BrokerToken) -> String {
        format!("{}/brokers/public/{}", self.base_url, token.as_str())
    }
}

#[async_trait]
impl BrokerDirectory for HttpBrokerDirectory {
    async fn lookup(&self, token: &BrokerToken) -> Result<BrokerSummary, BrokerLookupError> {
        let response = self
            .client
            .get(self.profile_url(token))
            .send()
            .await
            .map_err(|err| BrokerLookupError::Unavailable(err.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<BrokerSummary>()
                .await
                .map_err(|err| BrokerLookupError::Unavailable(err.to_string())),
            StatusCode::NOT_FOUND => Err(BrokerLookupError::NotFound),
            StatusCode::GONE => Err(BrokerLookupError::Deactivated),
            status => Err(BrokerLookupError::Unavailable(format!(
                "unexpected status {status}"
            ))),
        }
    }
}

/// Fixed directory for demos and tests. Unknown tokens resolve to `NotFound`.
#[derive(Debug, Default)]
pub struct InMemoryBrokerDirectory {
    entries: HashMap<BrokerToken, Result<BrokerSummary, BrokerLookupError>>,
    lookups: Mutex<Vec<BrokerToken>>,
}

impl InMemoryBrokerDirectory {
    pub fn with_broker(mut self, token: BrokerToken, broker: BrokerSummary) -> Self {
        self.entries.insert(token, Ok(broker));
        self
    }

    pub fn with_failure(mut self, token: BrokerToken, error: BrokerLookupError) -> Self {
        self.entries.insert(token, Err(error));
        self
    }

    pub fn lookups(&self) -> Vec<BrokerToken> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BrokerDirectory for InMemoryBrokerDirectory {
    async fn lookup(&self, token: &BrokerToken) -> Result<BrokerSummary, BrokerLookupError> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.clone());

        self.entries
            .get(token)
            .cloned()
            .unwrap_or(Err(BrokerLookupError::NotFound))
    }
}
