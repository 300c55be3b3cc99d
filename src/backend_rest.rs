//! HTTP backend for a PostgREST-style hosted database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::{Backend, BackendFactory};
use crate::errors::BackendError;
use crate::headers::HeaderSet;
use crate::query::{Operation, Query};

/// Error body returned by the hosted service.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

pub struct RestBackend {
    endpoint: String,
    http: reqwest::Client,
    headers: HeaderSet,
}

impl RestBackend {
    /// The header set is baked into the HTTP client; it cannot change later.
    pub fn new(
        endpoint: &str,
        api_key: &str,
        headers: HeaderSet,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut default_headers = headers
            .to_header_map()
            .map_err(|e| BackendError::other(e.to_string()))?;

        let key = HeaderValue::from_str(api_key)
            .map_err(|e| BackendError::other(format!("invalid api key: {e}")))?;
        default_headers.insert("apikey", key);
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::other(format!("failed to build http client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            headers,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.endpoint, table)
    }

    async fn decode(response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::other(format!("failed to read response: {e}")))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Array(Vec::new()));
            }
            return serde_json::from_str(&text)
                .map_err(|e| BackendError::other(format!("malformed response body: {e}")));
        }

        Err(error_from_body(status, &text))
    }
}

fn error_from_body(status: StatusCode, text: &str) -> BackendError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => {
            let mut message = body.message.unwrap_or_else(|| status.to_string());
            if let Some(details) = body.details {
                message = format!("{message} ({details})");
            }
            if let Some(hint) = body.hint {
                debug!(%hint, "backend hint");
            }
            let err = BackendError::classify(body.code.as_deref(), message);
            if status == StatusCode::NOT_FOUND && err.kind == crate::errors::BackendErrorKind::Other {
                BackendError::not_found(err.message)
            } else {
                err
            }
        }
        Err(_) => BackendError::classify(None, format!("{status}: {text}")),
    }
}

fn into_rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn execute(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let url = self.table_url(&query.table);
        let params = query.to_params();

        let (method, body) = match &query.operation {
            Operation::Select => (Method::GET, None),
            Operation::Insert(rows) => (Method::POST, Some(Value::Array(rows.clone()))),
            Operation::Upsert { rows, .. } => (Method::POST, Some(Value::Array(rows.clone()))),
            Operation::Update(patch) => (Method::PATCH, Some(patch.clone())),
            Operation::Delete => (Method::DELETE, None),
        };

        debug!(table = %query.table, %method, "backend request");

        let mut request = self.http.request(method, &url).query(&params);

        let mut extra = HeaderMap::new();
        match &query.operation {
            Operation::Select => {}
            Operation::Upsert { .. } => {
                extra.insert(
                    "Prefer",
                    HeaderValue::from_static("return=representation,resolution=merge-duplicates"),
                );
            }
            _ => {
                extra.insert("Prefer", HeaderValue::from_static("return=representation"));
            }
        }
        request = request.headers(extra);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::other(format!("request to {} failed: {e}", query.table)))?;

        Self::decode(response)
            .await
            .map(into_rows)
            .map_err(|e| e.on_table(&query.table))
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, BackendError> {
        let url = format!("{}/rest/v1/rpc/{}", self.endpoint, function);
        debug!(%function, "backend rpc");

        let response = self
            .http
            .post(&url)
            .json(&args)
            .send()
            .await
            .map_err(|e| BackendError::other(format!("rpc {function} failed: {e}")))?;

        Self::decode(response).await
    }

    fn headers(&self) -> &HeaderSet {
        &self.headers
    }
}

/// Builds `RestBackend`s for one endpoint and anonymous key.
pub struct RestBackendFactory {
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl RestBackendFactory {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout,
        }
    }
}

impl BackendFactory for RestBackendFactory {
    fn build(&self, headers: &HeaderSet) -> Result<Arc<dyn Backend>, BackendError> {
        let backend = RestBackend::new(&self.endpoint, &self.api_key, headers.clone(), self.timeout)?;
        Ok(Arc::new(backend))
    }

    fn base_credential(&self) -> &str {
        &self.api_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackendErrorKind;

    #[test]
    fn parses_undefined_table_error_body() {
        let body = r#"{"code":"42P01","message":"relation \"public.payment_methods\" does not exist","details":null,"hint":null}"#;
        let err = error_from_body(StatusCode::NOT_FOUND, body);
        assert_eq!(err.kind, BackendErrorKind::SchemaMissing);
    }

    #[test]
    fn plain_404_is_not_found() {
        let body = r#"{"code":"PGRST000","message":"nothing here"}"#;
        let err = error_from_body(StatusCode::NOT_FOUND, body);
        assert_eq!(err.kind, BackendErrorKind::NotFound);
    }

    #[test]
    fn builds_with_identity_headers() {
        let headers = HeaderSet {
            authorization: Some("Bearer anon".into()),
            identity_id: Some("u1".into()),
            identity_email: Some("a@b.com".into()),
        };
        let backend = RestBackend::new("http://localhost:54321/", "anon", headers.clone(), Duration::from_secs(5))
            .expect("client builds");
        assert_eq!(backend.headers(), &headers);
        assert_eq!(backend.table_url("users"), "http://localhost:54321/rest/v1/users");
    }
}
