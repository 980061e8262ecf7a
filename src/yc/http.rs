//! HTTP utilities for Yandex Cloud REST API calls

use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const REQUEST_ID_HEADER: &str = "x-request-id";
const SERVER_TRACE_ID_HEADER: &str = "x-server-trace-id";
const CLIENT_REQUEST_ID_HEADER: &str = "x-client-request-id";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control() && c != ' ', "")
}

/// Error body returned by the REST gateway
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorBody {
    code: i32,
    message: String,
}

/// HTTP client wrapper for Yandex Cloud API calls
#[derive(Clone)]
pub struct YcHttpClient {
    client: Client,
}

impl YcHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("coi-deploy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// GET a JSON resource
    pub async fn get<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<T> {
        tracing::debug!("GET {}", url);
        let request = self.client.get(url).bearer_auth(token);
        self.send(request).await
    }

    /// POST a JSON body, optionally authenticated
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&str>,
        body: &B,
    ) -> Result<T> {
        tracing::debug!("POST {}", url);
        let mut request = self.client.post(url).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let client_request_id = uuid::Uuid::new_v4().to_string();
        let response = request
            .header(CLIENT_REQUEST_ID_HEADER, &client_request_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let body = response.text().await?;
        if body.is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Build an [`Error::Api`] from a failed response, keeping the support ids
async fn api_error(response: Response) -> Error {
    let status = response.status();
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    let request_id = header(REQUEST_ID_HEADER);
    let server_trace_id = header(SERVER_TRACE_ID_HEADER);

    let body = response.text().await.unwrap_or_default();
    // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
    tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));

    let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        format!("API request failed: {}", status)
    } else {
        format!("API request failed: {} (code {}): {}", status, parsed.code, parsed.message)
    };

    Error::Api {
        status: status.as_u16(),
        message,
        request_id,
        server_trace_id,
    }
}
