//! Single-flight token refresh
//!
//! Multiple in-flight requests can observe an expired token at the same
//! time; naive per-request refresh logic would fire a thundering herd of
//! refresh calls. The coordinator collapses concurrent refresh demands into
//! one network call and fans the result out to every waiter.

use std::sync::Arc;

use async_singleflight::Group;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::credential_store::CredentialStore;
use crate::types::{RefreshRequest, RefreshResponse};

/// Singleflight key; there is only one logical refresh operation per process.
const REFRESH_FLIGHT_KEY: &str = "refresh";

/// Coordinates token refresh with single-flight semantics.
pub struct RefreshCoordinator {
    http_client: Client,
    refresh_url: String,
    store: Arc<dyn CredentialStore>,
    /// Singleflight group to prevent concurrent refresh calls.
    /// Error type is String because singleflight requires a shared error type.
    inflight: Group<String, String>,
}

impl RefreshCoordinator {
    pub fn new(http_client: Client, base_url: &str, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http_client,
            refresh_url: format!("{base_url}/auth/refresh"),
            store,
            inflight: Group::new(),
        }
    }

    /// Obtain a fresh access token, joining any refresh already in flight.
    ///
    /// Resolves to `None` when the session cannot be recovered: no refresh
    /// token is stored, the server rejected the refresh, or the call failed
    /// at the transport level. All of those clear both tokens from the store
    /// before this returns. A refresh is never retried; the next 401 starts
    /// a new cycle once this flight has settled.
    pub async fn refresh(&self) -> Option<String> {
        let (token, error, _shared) = self
            .inflight
            .work(REFRESH_FLIGHT_KEY, async {
                match self.do_refresh().await {
                    Ok(access_token) => Ok(access_token),
                    Err(reason) => {
                        warn!(%reason, "Token refresh failed, clearing credentials");
                        self.store.clear();
                        Err(reason)
                    }
                }
            })
            .await;

        match (token, error) {
            (Some(token), _) => Some(token),
            // Followers of a failed flight may see neither a token nor the
            // error value; both cases mean the session has ended.
            _ => None,
        }
    }

    async fn do_refresh(&self) -> std::result::Result<String, String> {
        let Some(refresh_token) = self.store.refresh_token() else {
            debug!("No refresh token stored, session cannot be recovered");
            return Err("no refresh token stored".to_string());
        };

        let request = RefreshRequest { refresh_token };
        let response = self
            .http_client
            .post(&self.refresh_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("refresh request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("refresh rejected with status {status}: {text}"));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed refresh response: {e}"))?;

        // Only the access token rotates; the stored refresh token stays.
        self.store.set_tokens(&refreshed.access_token, None);
        info!("Access token refreshed");

        Ok(refreshed.access_token)
    }
}
