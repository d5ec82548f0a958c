//! Authenticated JSON client for the plain (non-streaming) endpoints.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use reqwest::multipart::Form;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::transport::auth::{AuthCheck, AuthSession, authorize, check_response};

/// Errors from the plain JSON endpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The request could not be built.
    Request(String),
    /// Connection failure, DNS, refused, etc.
    Network(String),
    /// The server answered 401. Logout has already been triggered.
    Unauthorized,
    /// Non-success status other than 401.
    Status { status: u16, body: String },
    /// The body was not the JSON we expected.
    Parse(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Request(msg) => write!(f, "request error: {msg}"),
            ApiError::Network(msg) => write!(f, "network error: {msg}"),
            ApiError::Unauthorized => write!(f, "unauthorized"),
            ApiError::Status { status, body } => write!(f, "API error (HTTP {status}): {body}"),
            ApiError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Authenticated JSON client for the non-streaming endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthSession>,
}

impl ApiClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        auth: Arc<dyn AuthSession>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
        }
    }

    /// `GET base_url + path` with an optional query, decoded as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let mut request = self.client.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        self.send(request).await
    }

    /// `POST base_url + path` with a multipart body, decoded as JSON.
    pub async fn post_multipart_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} (multipart)", url);
        self.send(self.client.post(&url).multipart(form)).await
    }

    /// `PATCH base_url + path` with a JSON body. The response body is ignored.
    pub async fn patch_json<B: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("PATCH {}", url);
        self.execute(self.client.patch(&url).json(body)).await?;
        Ok(())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Sends with auth attached and turns 401 and other failures into errors.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = authorize(request, self.auth.as_ref())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if check_response(self.auth.as_ref(), response.status(), response.headers())
            == AuthCheck::Unauthorized
        {
            return Err(ApiError::Unauthorized);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            warn!("API request failed: {} - {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}
