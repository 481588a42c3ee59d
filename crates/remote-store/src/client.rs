//! HTTP client for the remote blob-document service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use driftsync_core::{RemoteDocument, RemoteDocumentStore, RemoteStoreError, Snapshot, WriteReceipt};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Error envelope the service returns for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

/// Write acknowledgement body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptBody {
    id: String,
    last_modified: DateTime<Utc>,
}

/// Full document envelope returned by `GET /documents/{id}`.
///
/// `content` is kept as raw JSON so an unparseable snapshot can be reported
/// as a malformed document rather than a transport failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentEnvelope {
    #[allow(dead_code)]
    id: String,
    last_modified: DateTime<Utc>,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataBody {
    last_modified: DateTime<Utc>,
}

/// Client for the blob-document REST API.
#[derive(Debug, Clone)]
pub struct DocumentClient {
    client: reqwest::Client,
    base_url: String,
}

impl DocumentClient {
    /// Create a new document client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the document API (e.g., "https://api.example.com")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create headers for an API request.
    fn headers(&self, token: &str) -> Result<HeaderMap, RemoteStoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| RemoteStoreError::Auth("Invalid access token format".to_string()))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Sync] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Sync] API response error ({}): {}", status, preview);
    }

    fn api_error(status: reqwest::StatusCode, body: &str) -> RemoteStoreError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            return RemoteStoreError::api(
                status.as_u16(),
                format!("{}: {}", error.code, error.message),
            );
        }
        RemoteStoreError::api(status.as_u16(), format!("Request failed: {}", body))
    }

    /// Read the response body, surfacing API errors first.
    async fn success_body(response: reqwest::Response) -> Result<String, RemoteStoreError> {
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(Self::api_error(status, &body));
        }
        Ok(body)
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteStoreError> {
        let status = response.status();
        let body = Self::success_body(response).await?;

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "[Sync] Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            RemoteStoreError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }
}

fn transport(err: reqwest::Error) -> RemoteStoreError {
    RemoteStoreError::Network(err.to_string())
}

#[async_trait]
impl RemoteDocumentStore for DocumentClient {
    /// Create the document.
    ///
    /// POST /documents
    async fn create(&self, token: &str, doc: &Snapshot) -> Result<WriteReceipt, RemoteStoreError> {
        let url = format!("{}/documents", self.base_url);
        debug!("[Sync] Creating remote document");

        let response = self
            .client
            .post(&url)
            .headers(self.headers(token)?)
            .json(doc)
            .send()
            .await
            .map_err(transport)?;

        let receipt: ReceiptBody = Self::parse_response(response).await?;
        Ok(WriteReceipt {
            document_id: receipt.id,
            last_modified: receipt.last_modified,
        })
    }

    /// Read the document in full.
    ///
    /// GET /documents/{id}
    async fn read(
        &self,
        token: &str,
        document_id: &str,
    ) -> Result<RemoteDocument, RemoteStoreError> {
        let url = format!("{}/documents/{}", self.base_url, document_id);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(token)?)
            .send()
            .await
            .map_err(transport)?;

        let body = Self::success_body(response).await?;
        let envelope: DocumentEnvelope = serde_json::from_str(&body)
            .map_err(|e| RemoteStoreError::MalformedDocument(e.to_string()))?;
        let snapshot: Snapshot = serde_json::from_value(envelope.content)
            .map_err(|e| RemoteStoreError::MalformedDocument(e.to_string()))?;

        Ok(RemoteDocument {
            snapshot,
            last_modified: envelope.last_modified,
        })
    }

    /// Replace the document body.
    ///
    /// PATCH /documents/{id}
    async fn update(
        &self,
        token: &str,
        document_id: &str,
        doc: &Snapshot,
    ) -> Result<WriteReceipt, RemoteStoreError> {
        let url = format!("{}/documents/{}", self.base_url, document_id);

        let response = self
            .client
            .patch(&url)
            .headers(self.headers(token)?)
            .json(doc)
            .send()
            .await
            .map_err(transport)?;

        let receipt: ReceiptBody = Self::parse_response(response).await?;
        Ok(WriteReceipt {
            document_id: receipt.id,
            last_modified: receipt.last_modified,
        })
    }

    /// Fetch the document's modification timestamp without the body.
    ///
    /// GET /documents/{id}/metadata
    async fn read_metadata(
        &self,
        token: &str,
        document_id: &str,
    ) -> Result<DateTime<Utc>, RemoteStoreError> {
        let url = format!("{}/documents/{}/metadata", self.base_url, document_id);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(token)?)
            .send()
            .await
            .map_err(transport)?;

        let metadata: MetadataBody = Self::parse_response(response).await?;
        Ok(metadata.last_modified)
    }
}
