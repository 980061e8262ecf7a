//! Yandex Cloud Authentication
//!
//! Loads a service account authorized key (the JSON document produced by
//! `yc iam key create`) and exchanges a PS256-signed JWT for an IAM token.

use super::http::YcHttpClient;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use url::Url;

/// Audience expected by the IAM token endpoint
pub const IAM_TOKEN_AUDIENCE: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";

/// Lifetime of the signed JWT (the IAM service caps it at one hour)
const JWT_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Fallback TTL when the expiry returned by IAM is already in the past
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Service account authorized key
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub id: String,
    pub service_account_id: String,
    pub private_key: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub key_algorithm: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    /// Parse the JSON credential document
    pub fn from_json(document: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(document)
            .map_err(|e| Error::Credentials(format!("not a valid key document: {e}")))?;

        for (field, value) in [
            ("id", &key.id),
            ("service_account_id", &key.service_account_id),
            ("private_key", &key.private_key),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Credentials(format!("'{field}' is empty")));
            }
        }
        Ok(key)
    }

    /// PEM body of the private key. Keys issued by the console carry a
    /// warning line before the PEM armor, which is dropped here.
    pub fn private_key_pem(&self) -> &str {
        match self.private_key.find("-----BEGIN") {
            Some(start) => &self.private_key[start..],
            None => &self.private_key,
        }
    }

    fn encoding_key(&self) -> Result<EncodingKey> {
        EncodingKey::from_rsa_pem(self.private_key_pem().as_bytes())
            .map_err(|e| Error::Credentials(format!("unusable private key: {e}")))
    }

    /// Build the signed JWT that is exchanged for an IAM token
    pub fn signed_jwt(&self, now: DateTime<Utc>) -> Result<String> {
        sign_jwt(self, &self.encoding_key()?, now)
    }
}

fn sign_jwt(key: &ServiceAccountKey, encoding_key: &EncodingKey, now: DateTime<Utc>) -> Result<String> {
    let mut header = Header::new(Algorithm::PS256);
    header.kid = Some(key.id.clone());

    let claims = JwtClaims {
        iss: key.service_account_id.clone(),
        aud: IAM_TOKEN_AUDIENCE.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + JWT_LIFETIME.as_secs() as i64,
    };

    jsonwebtoken::encode(&header, &claims, encoding_key)
        .map_err(|e| Error::Credentials(format!("failed to sign JWT: {e}")))
}

#[derive(Debug, Serialize)]
struct CreateIamTokenRequest<'a> {
    jwt: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateIamTokenResponse {
    iam_token: String,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Authenticated session: hands out IAM tokens for the service account
#[derive(Clone)]
pub struct YcCredentials {
    key: Arc<ServiceAccountKey>,
    encoding_key: EncodingKey,
    token_url: Url,
    http: YcHttpClient,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl YcCredentials {
    /// Build credentials from a parsed key. Fails if the private key is unusable.
    pub fn new(key: ServiceAccountKey, token_url: Url, http: YcHttpClient) -> Result<Self> {
        let encoding_key = key.encoding_key()?;
        Ok(Self {
            key: Arc::new(key),
            encoding_key,
            token_url,
            http,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    pub fn service_account_id(&self) -> &str {
        &self.key.service_account_id
    }

    /// Get an IAM token, reusing the cached one while it is still valid
    pub async fn get_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached IAM token expired, fetching new token");
            }
        }

        let jwt = sign_jwt(&self.key, &self.encoding_key, Utc::now())?;
        let response: CreateIamTokenResponse = self
            .http
            .post(self.token_url.clone(), None, &CreateIamTokenRequest { jwt: &jwt })
            .await?;

        if response.iam_token.is_empty() {
            return Err(Error::Credentials(
                "IAM token endpoint returned an empty token".to_string(),
            ));
        }

        let ttl = response
            .expires_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .filter(|ttl| *ttl > TOKEN_EXPIRY_BUFFER)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let expires_at = Instant::now() + ttl - TOKEN_EXPIRY_BUFFER;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: response.iam_token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New IAM token cached, expires in ~{} minutes",
            (ttl - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(response.iam_token)
    }

    /// Drop the cached token and fetch a new one
    pub async fn refresh_token(&self) -> Result<String> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }
        self.get_token().await
    }
}
