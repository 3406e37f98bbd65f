//! Portal API client with automatic token refresh
//!
//! Every call attaches the stored bearer token. A 401 triggers one
//! single-flight refresh and one replay of the original request; when the
//! refresh cannot recover the session, a logout event is broadcast and the
//! call fails with an authentication error.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{multipart, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::credential_store::CredentialStore;
use crate::error::{ClientError, Result};
use crate::refresh::RefreshCoordinator;
use crate::session::{LogoutReason, SessionEvents};
use crate::types::{ApiErrorBody, CredentialsRequest, TokenPairResponse};

/// Configuration for the portal client
#[derive(Debug, Clone)]
pub struct PortalClientConfig {
    /// Base URL of the portal API, e.g. `https://portal.example.org/api`
    pub base_url: String,

    /// Optional transport-level timeout. The pipeline itself imposes none;
    /// requests otherwise run to completion or failure.
    pub timeout: Option<Duration>,
}

impl PortalClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a 2xx response body should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Decode as JSON (the default). An empty body decodes as `null`.
    #[default]
    Json,
    /// Return the raw bytes, for file downloads.
    Bytes,
}

/// One field of a multipart form.
///
/// Multipart bodies are kept as field descriptors rather than a built form,
/// so the request can be rebuilt byte-for-byte when it is replayed after a
/// token refresh.
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub filename: Option<String>,
    pub mime: Option<String>,
    pub data: Bytes,
}

impl MultipartField {
    /// A plain text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            mime: None,
            data: Bytes::from(value.into().into_bytes()),
        }
    }

    /// A file field with filename and MIME type.
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        mime: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            mime: Some(mime.into()),
            data: data.into(),
        }
    }
}

/// Request body variants.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartField>),
}

/// Immutable description of one logical API call.
///
/// The executor replays exactly this value after a successful refresh; the
/// retry path is a pure function of the descriptor, never of captured
/// request state.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub response_type: ResponseType,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            response_type: ResponseType::Json,
        }
    }
}

/// Per-call options for the convenience wrappers.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers merged into the request.
    pub headers: HeaderMap,
    pub response_type: ResponseType,
}

impl RequestOptions {
    pub fn bytes() -> Self {
        Self {
            headers: HeaderMap::new(),
            response_type: ResponseType::Bytes,
        }
    }
}

/// Decoded 2xx response body.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(Value),
    Bytes(Bytes),
}

/// Outcome of a successful API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Deserialize the JSON body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            ResponseBody::Json(value) => Ok(serde_json::from_value(value.clone())?),
            ResponseBody::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// Raw bytes of a `ResponseType::Bytes` response.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Some(bytes),
            ResponseBody::Json(_) => None,
        }
    }
}

/// Portal API client
///
/// Owns the credential store, the refresh coordinator and the session
/// broadcaster; those are the only shared mutable pieces of the pipeline and
/// are never exposed for direct external mutation.
pub struct PortalClient {
    http_client: Client,
    base_url: String,
    store: Arc<dyn CredentialStore>,
    refresh: RefreshCoordinator,
    session: SessionEvents,
}

impl PortalClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `config` - Base URL and transport options
    /// * `store` - Credential store; inject `MemoryCredentialStore` in tests,
    ///   `FileCredentialStore` for a session that survives restarts
    pub fn new(config: PortalClientConfig, store: Arc<dyn CredentialStore>) -> Result<Arc<Self>> {
        if config.base_url.trim().is_empty() {
            return Err(ClientError::Configuration(
                "base URL must not be empty".to_string(),
            ));
        }
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let refresh =
            RefreshCoordinator::new(http_client.clone(), &base_url, Arc::clone(&store));

        Ok(Arc::new(Self {
            http_client,
            base_url,
            store,
            refresh,
            session: SessionEvents::new(),
        }))
    }

    /// Session lifecycle broadcaster; subscribe to react to forced logouts.
    pub fn session_events(&self) -> &SessionEvents {
        &self.session
    }

    /// The injected credential store (for advanced usage).
    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.execute(&Self::descriptor(Method::GET, path, RequestBody::Empty, options))
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        self.execute(&Self::descriptor(Method::POST, path, body, options))
            .await
    }

    pub async fn put(
        &self,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        self.execute(&Self::descriptor(Method::PUT, path, body, options))
            .await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<ApiResponse> {
        self.execute(&Self::descriptor(Method::DELETE, path, RequestBody::Empty, options))
            .await
    }

    fn descriptor(
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> RequestDescriptor {
        RequestDescriptor {
            method,
            path: path.to_string(),
            headers: options.headers,
            body,
            response_type: options.response_type,
        }
    }

    /// Perform one logical API call with automatic recovery from exactly one
    /// authentication failure.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
        let token = self.store.access_token();
        let response = self.send(descriptor, token.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(path = %descriptor.path, "Request rejected with 401, attempting token refresh");

            return match self.refresh.refresh().await {
                Some(fresh_token) => {
                    // Replay with the token the refresh resolved to, never
                    // one read before the await: a concurrently settled
                    // refresh may have rotated the store in the meantime.
                    let retry = self.send(descriptor, Some(&fresh_token)).await?;
                    if retry.status() == StatusCode::UNAUTHORIZED {
                        // Retry depth is bounded at one; a second 401 is
                        // terminal and must not start another refresh cycle.
                        return Err(ClientError::Authentication(
                            "request rejected again after token refresh".to_string(),
                        ));
                    }
                    self.finish(retry, descriptor.response_type).await
                }
                None => {
                    self.session.notify_logout(LogoutReason::SessionExpired);
                    Err(ClientError::Authentication(
                        "session ended: token refresh was not possible".to_string(),
                    ))
                }
            };
        }

        self.finish(response, descriptor.response_type).await
    }

    /// Authenticate with email and password, storing the returned token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        self.establish_session("/auth/login", email, password).await
    }

    /// Create an account, storing the returned token pair.
    pub async fn register(&self, email: &str, password: &str) -> Result<()> {
        self.establish_session("/auth/register", email, password)
            .await
    }

    /// End the session: clear stored credentials and broadcast the logout.
    /// Client-side only and idempotent.
    pub fn logout(&self) {
        self.store.clear();
        self.session.notify_logout(LogoutReason::UserLogout);
    }

    async fn establish_session(&self, path: &str, email: &str, password: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let request = CredentialsRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        // Not routed through execute(): a rejected password is a plain API
        // error and must not trigger a token refresh.
        let response = self.http_client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = response.bytes().await?;
        let pair: TokenPairResponse = serde_json::from_slice(&bytes)?;
        self.store
            .set_tokens(&pair.access_token, Some(&pair.refresh_token));
        info!("Session established");

        Ok(())
    }

    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, descriptor.path);
        let mut request = self
            .http_client
            .request(descriptor.method.clone(), &url)
            .headers(descriptor.headers.clone());

        request = match &descriptor.body {
            RequestBody::Empty => request,
            // .json sets the Content-Type header
            RequestBody::Json(value) => request.json(value),
            // The transport generates the multipart boundary header
            RequestBody::Multipart(fields) => request.multipart(build_form(fields)?),
        };

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        Ok(request.send().await?)
    }

    async fn finish(
        &self,
        response: Response,
        response_type: ResponseType,
    ) -> Result<ApiResponse> {
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = response.bytes().await?;
        let body = match response_type {
            ResponseType::Json => {
                if bytes.is_empty() {
                    ResponseBody::Json(Value::Null)
                } else {
                    ResponseBody::Json(serde_json::from_slice(&bytes)?)
                }
            }
            ResponseType::Bytes => ResponseBody::Bytes(bytes),
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Map a non-2xx response to an API error, extracting `detail` or `message`
/// from a structured body when present.
async fn error_from_response(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let message = match response.json::<ApiErrorBody>().await {
        Ok(body) => body.into_message(),
        // A malformed error body falls back to the status-coded message
        // rather than producing a secondary error.
        Err(_) => None,
    }
    .unwrap_or_else(|| format!("HTTP status {status}"));

    ClientError::Api { status, message }
}

fn build_form(fields: &[MultipartField]) -> Result<multipart::Form> {
    let mut form = multipart::Form::new();
    for field in fields {
        let mut part = multipart::Part::bytes(field.data.to_vec());
        if let Some(filename) = &field.filename {
            part = part.file_name(filename.clone());
        }
        if let Some(mime) = &field.mime {
            part = part.mime_str(mime).map_err(|e| {
                ClientError::Configuration(format!("invalid MIME type {mime}: {e}"))
            })?;
        }
        form = form.part(field.name.clone(), part);
    }
    Ok(form)
}
