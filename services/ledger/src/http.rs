//! REST ledger client
//!
//! Speaks the API served by [`crate::rest::router`]:
//!
//! | call     | request                              | failure mapping            |
//! |----------|--------------------------------------|----------------------------|
//! | `query`  | `GET /aggregates?deviceId=&providerId=&usageId=` |                |
//! | `get`    | `GET /aggregates/{id}`               | 404 → `NotFound`           |
//! | `add`    | `POST /aggregates`                   | 409 → `DuplicateKey`       |
//! | `update` | `PUT /aggregates/{id}`               | 404 → `NotFound`           |
//! | `emit`   | `POST /events`                       |                            |
//!
//! Transport failures surface as `Unavailable`. The client sets no timeout
//! of its own; callers bound each call.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use types::aggregate::Aggregate;
use types::events::UsageEvent;
use types::ids::UsageId;

use crate::client::{AggregateFilter, LedgerClient, LedgerError};
use crate::rest::ErrorBody;

#[derive(Clone)]
pub struct HttpLedgerClient {
    http_client: Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn aggregate_url(&self, usage_id: &UsageId) -> String {
        // Usage ids cannot contain '/', '?', '#' or '%', so no escaping needed.
        format!("{}/aggregates/{}", self.base_url, usage_id)
    }
}

fn unavailable(e: reqwest::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

/// Turn a non-success response into a `Rejected` error carrying the
/// server's message when it sent one.
async fn rejected(res: Response) -> LedgerError {
    let status = res.status().as_u16();
    let message = match res.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => format!("HTTP {}", status),
    };
    LedgerError::Rejected { status, message }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, LedgerError> {
    res.json::<T>()
        .await
        .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn query(&self, filter: &AggregateFilter) -> Result<Vec<Aggregate>, LedgerError> {
        let res = self
            .http_client
            .get(format!("{}/aggregates", self.base_url))
            .query(filter)
            .send()
            .await
            .map_err(unavailable)?;

        if !res.status().is_success() {
            return Err(rejected(res).await);
        }
        decode(res).await
    }

    async fn get(&self, usage_id: &UsageId) -> Result<Aggregate, LedgerError> {
        let res = self
            .http_client
            .get(self.aggregate_url(usage_id))
            .send()
            .await
            .map_err(unavailable)?;

        match res.status() {
            s if s.is_success() => decode(res).await,
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(usage_id.clone())),
            _ => Err(rejected(res).await),
        }
    }

    async fn add(&self, aggregate: Aggregate) -> Result<(), LedgerError> {
        let res = self
            .http_client
            .post(format!("{}/aggregates", self.base_url))
            .json(&aggregate)
            .send()
            .await
            .map_err(unavailable)?;

        match res.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(LedgerError::DuplicateKey(aggregate.usage_id)),
            _ => Err(rejected(res).await),
        }
    }

    async fn update(&self, aggregate: Aggregate) -> Result<(), LedgerError> {
        let res = self
            .http_client
            .put(self.aggregate_url(&aggregate.usage_id))
            .json(&aggregate)
            .send()
            .await
            .map_err(unavailable)?;

        match res.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(aggregate.usage_id)),
            _ => Err(rejected(res).await),
        }
    }

    async fn emit(&self, event: UsageEvent) -> Result<(), LedgerError> {
        let res = self
            .http_client
            .post(format!("{}/events", self.base_url))
            .json(&event)
            .send()
            .await
            .map_err(unavailable)?;

        if !res.status().is_success() {
            return Err(rejected(res).await);
        }
        Ok(())
    }
}
