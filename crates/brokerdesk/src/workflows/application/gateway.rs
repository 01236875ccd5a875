use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::domain::{parse_amount, parse_years, ApplicationNumber, BrokerToken, FormValues};

/// Body of `POST /applications`. Derived review figures are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address_street: String,
    pub address_city: String,
    pub address_state: String,
    pub address_zip: String,
    pub citizenship_status: String,
    pub loan_type: String,
    pub property_value: Option<u64>,
    pub down_payment: Option<u64>,
    pub property_type: String,
    pub property_address: String,
    pub property_city: String,
    pub property_state: String,
    pub property_zip: String,
    pub loan_purpose: String,
    pub annual_income: Option<u64>,
    pub credit_score_range: String,
    pub income_type: String,
    pub employment_status: String,
    pub employer_name: String,
    pub years_employed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_token: Option<BrokerToken>,
}

impl ApplicationPayload {
    pub fn assemble(values: &FormValues, broker_token: Option<&BrokerToken>) -> Self {
        let text = |value: &str| value.trim().to_string();

        Self {
            first_name: text(&values.first_name),
            last_name: text(&values.last_name),
            email: text(&values.email),
            phone: text(&values.phone),
            address_street: text(&values.address_street),
            address_city: text(&values.address_city),
            address_state: values.address_state.trim().to_ascii_uppercase(),
            address_zip: text(&values.address_zip),
            citizenship_status: text(&values.citizenship_status),
            loan_type: text(&values.loan_type),
            property_value: parse_amount(&values.property_value),
            down_payment: parse_amount(&values.down_payment),
            property_type: text(&values.property_type),
            property_address: text(&values.property_address),
            property_city: text(&values.property_city),
            property_state: values.property_state.trim().to_ascii_uppercase(),
            property_zip: text(&values.property_zip),
            loan_purpose: text(&values.loan_purpose),
            annual_income: parse_amount(&values.annual_income),
            credit_score_range: text(&values.credit_score_range),
            income_type: text(&values.income_type),
            employment_status: text(&values.employment_status),
            employer_name: text(&values.employer_name),
            years_employed: parse_years(&values.years_employed),
            broker_token: broker_token.cloned(),
        }
    }
}

/// One submission attempt. The idempotency key is shared by every retry of the
/// same application so the backend can collapse duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub payload: ApplicationPayload,
    pub idempotency_key: Uuid,
}

#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest)
        -> Result<ApplicationNumber, SubmissionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("we could not reach the application service ({0}); please try again")]
    Transport(String),
}

#[derive(Debug, Deserialize)]
struct SubmissionAccepted {
    application_number: String,
}

#[derive(Debug, Deserialize)]
struct SubmissionRejected {
    error: String,
}

/// Gateway backed by `POST {base}/applications`.
#[derive(Debug, Clone)]
pub struct HttpSubmissionGateway {
    client: Client,
    base_url: String,
}

impl HttpSubmissionGateway {
    pub const IDEMPOTENCY_HEADER: &'static str = "Idempotency-Key";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

#[async_trait]
impl SubmissionGateway for HttpSubmissionGateway {
    async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<ApplicationNumber, SubmissionError> {
        let response = self
            .client
            .post(format!("{}/applications", self.base_url))
            .header(Self::IDEMPOTENCY_HEADER, request.idempotency_key.to_string())
            .json(&request.payload)
            .send()
            .await
            .map_err(|err| SubmissionError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let accepted = response
                .json::<SubmissionAccepted>()
                .await
                .map_err(|err| SubmissionError::Transport(err.to_string()))?;
            return Ok(ApplicationNumber(accepted.application_number));
        }

        let message = match response.json::<SubmissionRejected>().await {
            Ok(body) if !body.error.trim().is_empty() => body.error,
            _ => format!("application submission failed (status {})", status.as_u16()),
        };
        Err(SubmissionError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Gateway for demos and tests. Numbers are issued once per idempotency key.
#[derive(Debug)]
pub struct InMemorySubmissionGateway {
    sequence: AtomicU64,
    prefix: String,
    issued: Mutex<HashMap<Uuid, ApplicationNumber>>,
    scripted_failures: Mutex<VecDeque<SubmissionError>>,
    received: Mutex<Vec<SubmissionRequest>>,
}

impl Default for InMemorySubmissionGateway {
    fn default() -> Self {
        Self::with_prefix("BD")
    }
}

impl InMemorySubmissionGateway {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            sequence: AtomicU64::new(1),
            prefix: prefix.into(),
            issued: Mutex::new(HashMap::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Queues an error returned by the next attempt instead of an application number.
    pub fn fail_next(&self, error: SubmissionError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    pub fn received(&self) -> Vec<SubmissionRequest> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn issued_count(&self) -> usize {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SubmissionGateway for InMemorySubmissionGateway {
    async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<ApplicationNumber, SubmissionError> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let number = issued
            .entry(request.idempotency_key)
            .or_insert_with(|| {
                let id = self.sequence.fetch_add(1, Ordering::Relaxed);
                ApplicationNumber(format!("{}-{id:06}", self.prefix))
            })
            .clone();
        Ok(number)
    }
}
