//! Session token pair and the wire shape of login/refresh grants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Failure;

/// Access/refresh credential pair persisted by the token store.
///
/// Both tokens travel together: stores only ever set or clear the whole pair,
/// and the session refuses to persist a pair that is not
/// [complete](TokenPair::is_complete).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    /// Bearer credential attached to authenticated operations.
    pub access_token: String,

    /// Credential exchanged for a new pair when the access token is rejected.
    pub refresh_token: String,

    /// Unix timestamp when the access token expires, if known.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl TokenPair {
    /// Create a pair whose access token expires `expires_in` seconds from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Option<i64>,
    ) -> Self {
        let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);
        Self::with_expires_at(access_token, refresh_token, expires_at)
    }

    /// Create a pair with an absolute expiry timestamp.
    pub fn with_expires_at(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// The `Authorization` header value for this pair.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// True when both the access and the refresh token are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    /// True once the expiry timestamp has been reached.
    ///
    /// A pair without a known expiry never reports itself expired; the far end
    /// decides.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => exp <= chrono::Utc::now().timestamp(),
            None => false,
        }
    }

    /// True if the access token expires within `skew`.
    #[must_use]
    pub fn needs_refresh(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(exp) => exp <= chrono::Utc::now().timestamp() + skew.as_secs() as i64,
            None => false,
        }
    }

    /// Time left before the access token expires.
    ///
    /// Returns `Duration::ZERO` if already expired or no expiry is set.
    pub fn time_until_expiry(&self) -> Duration {
        match self.expires_at {
            Some(exp) => {
                let remaining = exp - chrono::Utc::now().timestamp();
                if remaining > 0 {
                    Duration::from_secs(remaining as u64)
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token grant as returned by the login operation and the refresh endpoint.
///
/// Accepts both camelCase and snake_case field names.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(alias = "access_token")]
    pub access_token: String,

    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,

    /// Lifetime in seconds.
    #[serde(default, alias = "expires_in")]
    pub expires_in: Option<i64>,

    /// Absolute expiry (unix seconds); wins over `expires_in` when both are sent.
    #[serde(default, alias = "expires_at")]
    pub expires_at: Option<i64>,
}

impl TokenGrant {
    /// Turn the grant into a storable pair.
    ///
    /// Refresh endpoints may omit the refresh token when they do not rotate
    /// it; `previous_refresh` is kept in that case. A grant that leaves the
    /// pair without any refresh token is rejected.
    pub fn into_pair(self, previous_refresh: Option<&str>) -> Result<TokenPair, Failure> {
        if self.access_token.is_empty() {
            return Err(Failure::Decode("token grant has an empty access token".into()));
        }

        let refresh_token = match self.refresh_token.filter(|rt| !rt.is_empty()) {
            Some(rt) => rt,
            None => match previous_refresh.filter(|rt| !rt.is_empty()) {
                Some(rt) => rt.to_string(),
                None => {
                    return Err(Failure::Decode(
                        "token grant carries no refresh token".into(),
                    ));
                }
            },
        };

        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|ei| chrono::Utc::now().timestamp() + ei));

        Ok(TokenPair::with_expires_at(
            self.access_token,
            refresh_token,
            expires_at,
        ))
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
