// Home Assistant REST client
//
// Wraps `reqwest::Client` with bearer auth, URL construction relative to
// the configured base (which may itself carry a path, e.g. the supervisor
// proxy at `http://supervisor/core`), and HTTP status classification.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::local::models::{ApiStatus, EntityState};
use crate::transport::TransportConfig;

/// Raw HTTP client for the local control surface.
///
/// This is the only place the local-API credential lives: it is baked into
/// the default headers of the inner `reqwest::Client` and never handed out.
pub struct LocalClient {
    http: reqwest::Client,
    base_url: Url,
    timeout_secs: u64,
}

impl LocalClient {
    /// Create a client authenticating with a long-lived access token.
    pub fn new(
        base_url: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| Error::Authentication {
                message: "local API token contains invalid header characters".into(),
            })?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        Ok(Self {
            http: transport.build_client_with_headers(headers)?,
            base_url,
            timeout_secs: transport.timeout_secs(),
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout_secs: 0,
        }
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /api/` -- liveness and credential check.
    pub async fn api_status(&self) -> Result<ApiStatus, Error> {
        self.get("").await
    }

    /// `GET /api/states` -- every entity the surface knows about.
    pub async fn states(&self) -> Result<Vec<EntityState>, Error> {
        self.get("states").await
    }

    /// `GET /api/states/{entity_id}`.
    pub async fn state(&self, entity_id: &str) -> Result<EntityState, Error> {
        self.get(&format!("states/{entity_id}")).await
    }

    /// `POST /api/services/{domain}/{service}`.
    ///
    /// Returns the state objects that changed while the service ran.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &Map<String, Value>,
    ) -> Result<Vec<EntityState>, Error> {
        let path = format!("services/{domain}/{service}");
        let url = self.api_url(&path)?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(data)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.parse(resp, &path).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Build `{base}/api/{path}`, preserving any base path.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.api_url(path)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.parse(resp, path).await
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            Error::Transport(err)
        }
    }

    /// Classify the HTTP status, then decode the body as `T`.
    async fn parse<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        path: &str,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(Error::Authentication {
                message: format!("local API refused the access token (HTTP {status})"),
            });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = body.chars().take(200).collect::<String>();
            return Err(match status.as_u16() {
                404 => Error::NotFound {
                    path: format!("/api/{path}"),
                },
                code @ (400 | 405 | 422) => Error::Rejected {
                    status: code,
                    message,
                },
                code @ (502..=504) => Error::Unavailable { status: code },
                code => Error::LocalApi {
                    status: code,
                    message,
                },
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview = body.chars().take(200).collect::<String>();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}
