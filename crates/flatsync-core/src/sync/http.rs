//! `reqwest` implementation of [`SyncTransport`].

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::protocol::{SyncRequest, SyncResponse};
use super::transport::{SyncTransport, TransportError};
use crate::models::{EntityType, Operation, OutboxEntry};
use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

const SYNC_PATH: &str = "api/v1/sync";

/// HTTP client for the household API.
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Create a client for `base_url` authenticating with an optional bearer token.
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("HTTP client setup failed: {error}")))?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{path}", self.base_url))
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> std::result::Result<reqwest::Response, TransportError> {
        let response = builder.send().await.map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> std::result::Result<T, TransportError> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))
    }
}

impl SyncTransport for HttpTransport {
    async fn sync(&self, request: &SyncRequest) -> std::result::Result<SyncResponse, TransportError> {
        let builder = self.request(Method::POST, SYNC_PATH).json(request);
        match self.send_json(builder).await {
            Err(TransportError::NotFound) => Err(TransportError::Unsupported),
            other => other,
        }
    }

    async fn push_entity(&self, entry: &OutboxEntry) -> std::result::Result<Option<Value>, TransportError> {
        let collection = entry.entity_type.collection_path();
        let builder = match entry.operation {
            Operation::Create => {
                let path = match entry.entity_type {
                    EntityType::ShoppingListItem => {
                        let list_id = entry
                            .payload
                            .get("shopping_list_id")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                TransportError::Rejected {
                                    status: StatusCode::BAD_REQUEST.as_u16(),
                                    message: "item payload has no shopping_list_id".to_string(),
                                }
                            })?;
                        format!("{}/{list_id}/items", EntityType::ShoppingList.collection_path())
                    }
                    _ => collection.to_string(),
                };
                self.request(Method::POST, &path).json(&entry.payload)
            }
            Operation::Update => self
                .request(Method::PUT, &format!("{collection}/{}", entry.entity_id))
                .json(&entry.payload),
            Operation::Delete => {
                let path = format!("{collection}/{}", entry.entity_id);
                self.send(self.request(Method::DELETE, &path)).await?;
                return Ok(None);
            }
        };

        let response = self.send(builder).await?;
        let body = response.text().await.map_err(request_error)?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|error| TransportError::InvalidResponse(error.to_string()))
    }

    async fn fetch_collection(
        &self,
        entity_type: EntityType,
        household_id: &str,
        parent_id: Option<&str>,
    ) -> std::result::Result<Vec<Value>, TransportError> {
        let builder = match (entity_type, parent_id) {
            (EntityType::ShoppingListItem, Some(list_id)) => self.request(
                Method::GET,
                &format!("{}/{list_id}/items", EntityType::ShoppingList.collection_path()),
            ),
            _ => self
                .request(Method::GET, entity_type.collection_path())
                .query(&[("household_id", household_id)]),
        };
        self.send_json(builder).await
    }

    async fn fetch_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> std::result::Result<Option<Value>, TransportError> {
        let path = format!("{}/{id}", entity_type.collection_path());
        match self.send_json(self.request(Method::GET, &path)).await {
            Ok(value) => Ok(Some(value)),
            Err(TransportError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
    detail: Option<Value>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        let detail = payload.detail.map(|detail| match detail {
            Value::String(text) => text,
            other => other.to_string(),
        });
        if let Some(message) = payload.message.or(payload.error).or(detail) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn status_error(status: StatusCode, body: &str) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized,
        StatusCode::NOT_FOUND => TransportError::NotFound,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => TransportError::Unsupported,
        StatusCode::CONFLICT => TransportError::Conflict(parse_api_error(status, body)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            TransportError::Connection(parse_api_error(status, body))
        }
        status if status.is_server_error() => TransportError::Connection(parse_api_error(status, body)),
        status => TransportError::Rejected {
            status: status.as_u16(),
            message: parse_api_error(status, body),
        },
    }
}

fn request_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_decode() {
        TransportError::InvalidResponse(error.to_string())
    } else {
        TransportError::Connection(error.to_string())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("API base URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
