//! Token Service HTTP client
//!
//! [`ApiClient`] knows only the base URL and transport. [`ApiHandle`] is a
//! client plus an optional [`Authorization`]; an authorized handle attaches
//! the delegation header to every call and merges `delegation` and
//! `principal` into JSON payloads.

use std::fmt;

use reqwest::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::session::{DelegationCredential, Principal, SessionError};

/// Header carrying the per-call id, reused across retries
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Credential material derived from a connected session
#[derive(Clone)]
pub struct Authorization {
    header: String,
    delegation: Value,
    principal: Principal,
}

impl Authorization {
    pub fn from_credential(
        credential: &DelegationCredential,
    ) -> std::result::Result<Self, SessionError> {
        Ok(Self {
            header: credential.authorization_value()?,
            delegation: credential.to_json()?,
            principal: credential.principal().clone(),
        })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// A prepared call: the payload as sent and the header, if any
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizedCall {
    pub payload: Value,
    pub authorization_header: Option<String>,
}

/// Unauthenticated Token Service client
#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    base_url: String,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout())
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Handle without credentials
    pub fn handle(&self) -> ApiHandle {
        ApiHandle {
            client: self.clone(),
            authorization: None,
        }
    }

    /// Handle that signs every call with `authorization`
    pub fn authenticated(&self, authorization: Authorization) -> ApiHandle {
        ApiHandle {
            client: self.clone(),
            authorization: Some(authorization),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Request-issuing handle, authenticated or not
#[derive(Debug, Clone)]
pub struct ApiHandle {
    client: ApiClient,
    authorization: Option<Authorization>,
}

impl ApiHandle {
    pub fn is_authenticated(&self) -> bool {
        self.authorization.is_some()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.authorization.as_ref().map(Authorization::principal)
    }

    pub fn authorization_header(&self) -> Option<&str> {
        self.authorization.as_ref().map(Authorization::header)
    }

    /// Attach credentials to `payload`
    ///
    /// Object payloads gain `delegation` and `principal` when authorized;
    /// anything else passes through unchanged.
    pub fn prepare(&self, mut payload: Value) -> AuthorizedCall {
        if let (Some(auth), Value::Object(map)) = (&self.authorization, &mut payload) {
            map.insert("delegation".to_string(), auth.delegation.clone());
            map.insert(
                "principal".to_string(),
                Value::String(auth.principal.to_string()),
            );
        }

        AuthorizedCall {
            payload,
            authorization_header: self.authorization_header().map(str::to_string),
        }
    }

    /// GET `path` and decode the JSON response
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.client.url(path);
        debug!(url = %url, authenticated = self.is_authenticated(), "GET");

        let mut request = self.client.http.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(header) = self.authorization_header() {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await.map_err(Error::NetworkError)?;
        read_response(response).await
    }

    /// POST `body` to `path` and decode the JSON response
    pub async fn post<B, T>(&self, path: &str, body: &B, request_id: Uuid) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.client.url(path);
        let call = self.prepare(serde_json::to_value(body)?);
        debug!(
            url = %url,
            request_id = %request_id,
            authenticated = self.is_authenticated(),
            "POST"
        );

        let mut request = self
            .client
            .http
            .post(&url)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .json(&call.payload);
        if let Some(header) = call.authorization_header {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await.map_err(Error::NetworkError)?;
        read_response(response).await
    }
}

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_from_response(status, response).await);
    }

    let body = response.bytes().await.map_err(Error::NetworkError)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Build [`Error::Api`] from a non-success response
///
/// Accepts `{"error": {"code", "message", "details"}}`, a flat
/// `{"code", "message", "details"}` object, or any other body as the message.
async fn error_from_response(status: reqwest::StatusCode, response: reqwest::Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    api_error(status.as_u16(), &body)
}

pub(crate) fn api_error(status: u16, body: &str) -> Error {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let object = parsed
        .as_ref()
        .map(|value| value.get("error").filter(|e| e.is_object()).unwrap_or(value))
        .filter(|value| value.is_object());

    let field = |name: &str| {
        object
            .and_then(|o| o.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let message = field("message")
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|v| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP error {}", status)
            } else {
                body.trim().to_string()
            }
        });

    Error::Api {
        status,
        code: field("code"),
        message,
        details: object.and_then(|o| o.get("details")).cloned(),
    }
}
