//! HTTP refresh exchange.
//!
//! Sends `{"refreshToken": ...}` as JSON to the refresh endpoint and reads a
//! [`TokenGrant`] back.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::auth::tokens::TokenGrant;
use crate::auth::traits::RefreshExchange;
use crate::error::{Failure, NetworkFailure};
use crate::net::client::{HttpClient, REQUEST_TIMEOUT};
use crate::net::transport::classify;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`RefreshExchange`] over a REST endpoint.
#[derive(Debug, Clone)]
pub struct HttpRefreshExchange {
    client: HttpClient,
    endpoint: Url,
    timeout: Duration,
}

impl HttpRefreshExchange {
    pub fn new(client: HttpClient, endpoint: Url) -> Self {
        Self {
            client,
            endpoint,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(&self, refresh_token: &str) -> Result<TokenGrant, Failure> {
        let response = self
            .client
            .inner()
            .post(self.endpoint.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().await.map_err(classify)?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Refresh endpoint refused the exchange");
            if status.is_client_error() {
                return Err(Failure::rejected());
            }
            return Err(Failure::Network(NetworkFailure::Other(format!(
                "HTTP {}",
                status.as_u16()
            ))));
        }

        serde_json::from_str::<TokenGrant>(&body)
            .map_err(|e| Failure::Decode(format!("Failed to parse refresh response: {e}")))
    }
}

#[async_trait::async_trait]
impl RefreshExchange for HttpRefreshExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, Failure> {
        debug!(endpoint = %self.endpoint, "Exchanging refresh token");
        match tokio::time::timeout(self.timeout, self.post(refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(Failure::timeout()),
        }
    }
}
