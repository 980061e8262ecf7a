//! Yandex Cloud Client
//!
//! Main client for interacting with Yandex Cloud APIs, combining authentication
//! and HTTP functionality.

use super::auth::{ServiceAccountKey, YcCredentials};
use super::http::YcHttpClient;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

const COMPUTE_ENDPOINT: &str = "https://compute.api.cloud.yandex.net";
const IAM_ENDPOINT: &str = "https://iam.api.cloud.yandex.net";
const OPERATION_ENDPOINT: &str = "https://operation.api.cloud.yandex.net";

/// Base URLs of the REST services used by this tool
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub compute: Url,
    pub iam: Url,
    pub operation: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: Url::parse(COMPUTE_ENDPOINT).expect("static endpoint URL"),
            iam: Url::parse(IAM_ENDPOINT).expect("static endpoint URL"),
            operation: Url::parse(OPERATION_ENDPOINT).expect("static endpoint URL"),
        }
    }
}

impl Endpoints {
    /// Route every service through one base URL (used against mock servers)
    pub fn single(base: Url) -> Self {
        Self {
            compute: base.clone(),
            iam: base.clone(),
            operation: base,
        }
    }
}

/// Main Yandex Cloud client
#[derive(Clone)]
pub struct YcClient {
    pub credentials: YcCredentials,
    pub http: YcHttpClient,
    pub endpoints: Endpoints,
}

impl YcClient {
    /// Create a new client from a service account key
    pub fn new(key: ServiceAccountKey, endpoints: Endpoints) -> Result<Self> {
        let http = YcHttpClient::new()?;
        let token_url = endpoints.iam.join("/iam/v1/tokens")?;
        let credentials = YcCredentials::new(key, token_url, http.clone())?;

        Ok(Self {
            credentials,
            http,
            endpoints,
        })
    }

    /// Make an authenticated GET request. A rejected token is refreshed once.
    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let token = self.credentials.get_token().await?;
        match self.http.get(url.clone(), &token).await {
            Err(Error::Api { status: 401, .. }) => {
                tracing::debug!("IAM token rejected, refreshing");
                let token = self.credentials.refresh_token().await?;
                self.http.get(url, &token).await
            }
            other => other,
        }
    }

    /// Make an authenticated POST request
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T> {
        let token = self.credentials.get_token().await?;
        match self.http.post(url.clone(), Some(&token), body).await {
            Err(Error::Api { status: 401, .. }) => {
                tracing::debug!("IAM token rejected, refreshing");
                let token = self.credentials.refresh_token().await?;
                self.http.post(url, Some(&token), body).await
            }
            other => other,
        }
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build Compute API URL
    pub fn compute_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.endpoints.compute, &format!("/compute/v1/{}", path), query)
    }

    /// Build IAM API URL
    pub fn iam_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.endpoints.iam, &format!("/iam/v1/{}", path), query)
    }

    /// Build Operation API URL
    pub fn operation_url(&self, operation_id: &str) -> Result<Url> {
        build_url(
            &self.endpoints.operation,
            &format!("/operations/{}", urlencoding::encode(operation_id)),
            &[],
        )
    }
}

fn build_url(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = base.join(path)?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Filter expression matching a resource by exact name
pub fn name_filter(name: &str) -> String {
    format!("name = '{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
}
