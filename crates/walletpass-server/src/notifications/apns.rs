//! APNs HTTP/2 client with token-based authentication.
//!
//! Requests are authorized with a short ES256 JWT signed by the team's
//! `.p8` key. Apple rejects tokens older than an hour, so the token is
//! re-signed after [`TOKEN_TTL`].

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use super::{NotificationError, PushOutcome, PushSender};

const PRODUCTION_URL: &str = "https://api.push.apple.com";
const SANDBOX_URL: &str = "https://api.sandbox.push.apple.com";

/// Provider token lifetime before it is re-signed.
pub const TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: i64,
}

struct CachedToken {
    jwt: String,
    issued_at: Instant,
}

/// Client for the APNs provider API.
pub struct ApnsClient {
    http: reqwest::Client,
    base_url: String,
    topic: String,
    team_id: String,
    key_id: String,
    key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ApnsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsClient")
            .field("base_url", &self.base_url)
            .field("topic", &self.topic)
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ApnsClient {
    /// Create a client from a `.p8` key file downloaded from the developer
    /// portal.
    pub fn from_key_file(
        path: &Path,
        key_id: &str,
        team_id: &str,
        topic: &str,
        sandbox: bool,
    ) -> Result<Self, NotificationError> {
        let pem = std::fs::read(path).map_err(|e| {
            NotificationError::Credentials(format!(
                "Failed to read APNs key {}: {e}",
                path.display()
            ))
        })?;
        let base_url = if sandbox { SANDBOX_URL } else { PRODUCTION_URL };
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NotificationError::Request(e.to_string()))?;

        let client = Self::from_pem(http, base_url, &pem, key_id, team_id, topic)?;
        debug!(topic, sandbox, "APNs client initialized");
        Ok(client)
    }

    /// Create a client from PEM key bytes and a pre-built HTTP client.
    pub fn from_pem(
        http: reqwest::Client,
        base_url: &str,
        pem: &[u8],
        key_id: &str,
        team_id: &str,
        topic: &str,
    ) -> Result<Self, NotificationError> {
        let key = EncodingKey::from_ec_pem(pem)
            .map_err(|e| NotificationError::Credentials(format!("Invalid APNs key: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            topic: topic.to_string(),
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            key,
            token: Mutex::new(None),
        })
    }

    /// Current provider token, re-signed when older than [`TOKEN_TTL`].
    fn bearer_token(&self) -> Result<String, NotificationError> {
        let mut cached = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            if token.issued_at.elapsed() < TOKEN_TTL {
                return Ok(token.jwt.clone());
            }
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = Claims {
            iss: &self.team_id,
            iat: walletpass_core::db::unix_timestamp(),
        };
        let jwt = jsonwebtoken::encode(&header, &claims, &self.key).map_err(|e| {
            NotificationError::Credentials(format!("Failed to sign APNs token: {e}"))
        })?;

        *cached = Some(CachedToken {
            jwt: jwt.clone(),
            issued_at: Instant::now(),
        });
        Ok(jwt)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PushSender for ApnsClient {
    async fn send(&self, push_token: &str) -> Result<PushOutcome, NotificationError> {
        let jwt = self.bearer_token()?;
        let response = self
            .http
            .post(format!("{}/3/device/{push_token}", self.base_url))
            .header("authorization", format!("bearer {jwt}"))
            .header("apns-topic", &self.topic)
            .json(&serde_json::json!({ "aps": {} }))
            .send()
            .await
            .map_err(|e| NotificationError::Request(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                debug!("APNs push delivered");
                Ok(PushOutcome::Delivered)
            }
            StatusCode::GONE => {
                debug!("APNs reports token as no longer active");
                Ok(PushOutcome::TokenGone)
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<failed to read body>".to_string());
                warn!(status = status.as_u16(), body = %body, "APNs returned error");
                Err(NotificationError::ApiError {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::{Path as UrlPath, State};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::post;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    type Seen = Arc<AsyncMutex<Vec<(String, HeaderMap)>>>;

    fn test_key() -> Vec<u8> {
        rcgen::KeyPair::generate().unwrap().serialize_pem().into_bytes()
    }

    fn http() -> reqwest::Client {
        let _ = rustls::crypto::ring::default_provider().install_default();
        reqwest::Client::builder().build().expect("http client")
    }

    /// Fake APNs: token `gone` answers 410, `bad` answers 400, others 200.
    async fn fake_apns() -> (String, Seen) {
        async fn handler(
            State(seen): State<Seen>,
            UrlPath(token): UrlPath<String>,
            headers: HeaderMap,
        ) -> HttpStatus {
            seen.lock().await.push((token.clone(), headers));
            match token.as_str() {
                "gone" => HttpStatus::GONE,
                "bad" => HttpStatus::BAD_REQUEST,
                _ => HttpStatus::OK,
            }
        }

        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/3/device/{token}", post(handler))
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn client(base_url: &str) -> ApnsClient {
        ApnsClient::from_pem(http(), base_url, &test_key(), "KEY123", "TEAM123", "pass.com.example")
            .unwrap()
    }

    #[test]
    fn invalid_key_is_a_credentials_error() {
        let err = ApnsClient::from_pem(http(), PRODUCTION_URL, b"not a key", "K", "T", "pass.x")
            .unwrap_err();
        assert!(matches!(err, NotificationError::Credentials(_)));
    }

    #[test]
    fn missing_key_file_is_a_credentials_error() {
        let err = ApnsClient::from_key_file(
            Path::new("/nonexistent/key.p8"),
            "K",
            "T",
            "pass.x",
            true,
        )
        .unwrap_err();
        assert!(matches!(err, NotificationError::Credentials(_)));
    }

    #[test]
    fn token_is_cached_and_carries_key_id() {
        let client = client(PRODUCTION_URL);
        let first = client.bearer_token().unwrap();
        assert_eq!(client.bearer_token().unwrap(), first);

        let header = jsonwebtoken::decode_header(&first).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("KEY123"));
    }

    #[tokio::test]
    async fn send_maps_status_codes() {
        let (url, seen) = fake_apns().await;
        let client = client(&url);

        assert_eq!(client.send("alive").await.unwrap(), PushOutcome::Delivered);
        assert_eq!(client.send("gone").await.unwrap(), PushOutcome::TokenGone);
        assert!(matches!(
            client.send("bad").await,
            Err(NotificationError::ApiError { status: 400, .. })
        ));

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 3);
        let (token, headers) = &seen[0];
        assert_eq!(token, "alive");
        assert_eq!(headers["apns-topic"], "pass.com.example");
        assert!(headers["authorization"].to_str().unwrap().starts_with("bearer "));
    }
}
