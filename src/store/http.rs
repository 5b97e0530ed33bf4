use super::TableStore;
use super::protocol::*;
use super::types::*;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ATTEMPTS: usize = 3;

/// `TableStore` client for a remote table server.
///
/// Transport failures are retried with exponential backoff; any HTTP response,
/// including an error status, ends the retry loop. A replace whose response was
/// lost in transit and is then retried reports a conflict, since the first
/// attempt already changed the token.
pub struct HttpTableStore {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpTableStore {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
            attempts: DEFAULT_ATTEMPTS,
        }
    }

    fn table_url(&self, table: &str, suffix: &str) -> String {
        format!("{}{}/{}{}", self.base_url, ENDPOINT_TABLES, table, suffix)
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        url: String,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let mut request = self
                .http_client
                .request(method.clone(), url.clone())
                .timeout(self.timeout);
            if let Some(body) = &body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }

            match request.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(StoreError::Unavailable(e.to_string()));
                    }
                    tracing::debug!("Request to {} failed (attempt {}): {}", url, attempt + 1, e);
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(StoreError::Unavailable("Retry attempts exhausted".to_string()))
    }

    fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(payload).map_err(|e| StoreError::Protocol(e.to_string()))
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        table: &str,
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| StoreError::Protocol(e.to_string()));
        }

        let body: Option<ErrorResponse> = response.json().await.ok();
        let message = body
            .as_ref()
            .map(|b| b.error.clone())
            .unwrap_or_else(|| status.to_string());
        let key = body.and_then(|b| b.key);

        Err(match (status, key) {
            (StatusCode::PRECONDITION_FAILED, Some(key)) => StoreError::PreconditionFailed(key),
            (StatusCode::NOT_FOUND, _) => StoreError::TableNotFound(table.to_string()),
            (StatusCode::BAD_REQUEST, _) => StoreError::Protocol(message),
            _ => StoreError::Unavailable(message),
        })
    }
}

#[async_trait]
impl TableStore for HttpTableStore {
    async fn create_table_if_absent(&self, table: &str) -> Result<bool, StoreError> {
        let response = self
            .send_with_retry(reqwest::Method::POST, self.table_url(table, ""), None)
            .await?;
        let body: CreateTableResponse = self.decode(table, response).await?;
        Ok(body.created)
    }

    async fn delete_table(&self, table: &str) -> Result<bool, StoreError> {
        let response = self
            .send_with_retry(reqwest::Method::DELETE, self.table_url(table, ""), None)
            .await?;
        let body: DeleteTableResponse = self.decode(table, response).await?;
        Ok(body.deleted)
    }

    async fn scan(
        &self,
        table: &str,
        filter: &KeyFilter,
        continuation: Option<&RowKey>,
    ) -> Result<ScanPage, StoreError> {
        let payload = ScanRequest {
            filter: filter.clone(),
            continuation: continuation.cloned(),
        };
        let response = self
            .send_with_retry(
                reqwest::Method::POST,
                self.table_url(table, ENDPOINT_SCAN),
                Some(Self::encode(&payload)?),
            )
            .await?;
        let body: ScanResponse = self.decode(table, response).await?;
        Ok(ScanPage {
            rows: body.rows,
            continuation: body.continuation,
        })
    }

    async fn insert_if_absent(
        &self,
        table: &str,
        key: &RowKey,
        properties: Properties,
    ) -> Result<Option<ConcurrencyToken>, StoreError> {
        let payload = InsertRowRequest {
            key: key.clone(),
            properties,
        };
        let response = self
            .send_with_retry(
                reqwest::Method::POST,
                self.table_url(table, ENDPOINT_INSERT),
                Some(Self::encode(&payload)?),
            )
            .await?;
        let body: InsertRowResponse = self.decode(table, response).await?;
        Ok(body.token)
    }

    async fn conditional_replace(
        &self,
        table: &str,
        key: &RowKey,
        token: &ConcurrencyToken,
        properties: Properties,
    ) -> Result<ConcurrencyToken, StoreError> {
        let payload = ReplaceRowRequest {
            key: key.clone(),
            token: token.clone(),
            properties,
        };
        let response = self
            .send_with_retry(
                reqwest::Method::POST,
                self.table_url(table, ENDPOINT_REPLACE),
                Some(Self::encode(&payload)?),
            )
            .await?;
        let body: ReplaceRowResponse = self.decode(table, response).await?;
        Ok(body.token)
    }
}
