//! HTTP client for the remote schema service
//!
//! Content types live under `{base}/content-types`, their fields under
//! `{base}/content-types/{id}/fields` and `{base}/fields/{id}`. Responses
//! wrap their payload in a `{"data": ...}` envelope.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::error::RemoteError;
use super::models::{Envelope, FieldDraft, RemoteField, RemoteResource, ResourceDraft};
use super::service::RemoteService;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful response and whether its request may be sent again
struct Reply {
    response: Response,
    replayable: bool,
}

/// Classify a request that produced no usable response
fn lost(replayable: bool, never_sent: bool, err: reqwest::Error) -> RemoteError {
    if replayable || never_sent {
        RemoteError::transport(err.to_string())
    } else {
        RemoteError::interrupted(err.to_string())
    }
}

/// Schema service client authenticated with a bearer token
pub struct HttpSchemaClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpSchemaClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("typesync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    /// Send a request and map failures to [`RemoteError`]
    ///
    /// Only POST is not safe to replay. Once a POST may have reached the
    /// service, losing its response is reported as `Interrupted`.
    async fn send(&self, request: RequestBuilder) -> Result<Reply> {
        let request = request.build().context("Failed to build request")?;
        let replayable = *request.method() != Method::POST;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| lost(replayable, e.is_connect(), e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Reply {
                response,
                replayable,
            });
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };

        Err(RemoteError::from_status(status.as_u16(), retry_after, message).into())
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let reply = self.send(request).await?;
        let body = reply
            .response
            .bytes()
            .await
            .map_err(|e| lost(reply.replayable, false, e))?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::invalid_response(format!("invalid response body: {}", e)))?;
        Ok(envelope.data)
    }

    async fn fetch_with<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.fetch(self.request(method, path).json(&Envelope { data: body }))
            .await
    }
}

#[async_trait]
impl RemoteService for HttpSchemaClient {
    async fn list_resources(&self) -> Result<Vec<RemoteResource>> {
        self.fetch(self.request(Method::GET, "content-types")).await
    }

    async fn create_resource(&self, draft: &ResourceDraft) -> Result<RemoteResource> {
        self.fetch_with(Method::POST, "content-types", draft).await
    }

    async fn update_resource(&self, id: &str, draft: &ResourceDraft) -> Result<RemoteResource> {
        self.fetch_with(Method::PUT, &format!("content-types/{}", id), draft)
            .await
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("content-types/{}", id)))
            .await?;
        Ok(())
    }

    async fn list_fields(&self, resource_id: &str) -> Result<Vec<RemoteField>> {
        let path = format!("content-types/{}/fields", resource_id);
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn create_field(&self, resource_id: &str, draft: &FieldDraft) -> Result<RemoteField> {
        let path = format!("content-types/{}/fields", resource_id);
        self.fetch_with(Method::POST, &path, draft).await
    }

    async fn update_field(&self, field_id: &str, draft: &FieldDraft) -> Result<RemoteField> {
        self.fetch_with(Method::PUT, &format!("fields/{}", field_id), draft)
            .await
    }

    async fn delete_field(&self, field_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("fields/{}", field_id)))
            .await?;
        Ok(())
    }
}
