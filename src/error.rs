//! Failure taxonomy shared by every stage of the request pipeline.
//!
//! Only [`Failure::Authentication`] ever triggers the refresh path. Network
//! failures are classified and surfaced, application failures are surfaced
//! verbatim.

use serde::Serialize;

/// Why a call could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    /// No access token is stored; the call was never sent.
    #[error("no credential available")]
    MissingCredential,

    /// The far end refused the credential that was attached.
    #[error("credential rejected")]
    Rejected,

    /// The refresh exchange failed or no refresh token exists.
    ///
    /// Distinct from [`AuthFailure::Rejected`] so callers can redirect to a
    /// re-authentication flow.
    #[error("session expired")]
    SessionExpired,
}

/// Classified transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkFailure {
    #[error("request timed out")]
    Timeout,

    #[error("connectivity problem: {0}")]
    Connectivity(String),

    #[error("{0}")]
    Other(String),
}

/// Every way an operation submitted to the pipeline can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("Network error: {0}")]
    Network(NetworkFailure),

    /// Business-rule rejection returned by the far end. Never interpreted here.
    #[error("Application error ({code}): {message}")]
    Application { code: String, message: String },

    /// The far end answered but the payload does not match the declared result type.
    #[error("Unexpected response shape: {0}")]
    Decode(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Failure {
    pub fn missing_credential() -> Self {
        Self::Authentication(AuthFailure::MissingCredential)
    }

    pub fn rejected() -> Self {
        Self::Authentication(AuthFailure::Rejected)
    }

    pub fn session_expired() -> Self {
        Self::Authentication(AuthFailure::SessionExpired)
    }

    pub fn timeout() -> Self {
        Self::Network(NetworkFailure::Timeout)
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// True when the caller must send the user back through sign-in.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Authentication(AuthFailure::SessionExpired))
    }

    /// Stable snake_case tag, suitable for log fields and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(AuthFailure::MissingCredential) => "missing_credential",
            Self::Authentication(AuthFailure::Rejected) => "credential_rejected",
            Self::Authentication(AuthFailure::SessionExpired) => "session_expired",
            Self::Network(NetworkFailure::Timeout) => "timeout",
            Self::Network(NetworkFailure::Connectivity(_)) => "connectivity",
            Self::Network(NetworkFailure::Other(_)) => "network",
            Self::Application { .. } => "application",
            Self::Decode(_) => "decode",
            Self::Storage(_) => "storage",
            Self::Cancelled => "cancelled",
        }
    }

    /// Text a storefront page can show as-is.
    ///
    /// Application failures carry the far end's own message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication(AuthFailure::MissingCredential) => {
                "Please sign in to continue.".to_string()
            }
            Self::Authentication(AuthFailure::Rejected) => {
                "You are not allowed to perform this action.".to_string()
            }
            Self::Authentication(AuthFailure::SessionExpired) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Network(NetworkFailure::Timeout) => {
                "The server took too long to respond. Please try again.".to_string()
            }
            Self::Network(NetworkFailure::Connectivity(_)) => {
                "Unable to reach the server. Check your connection.".to_string()
            }
            Self::Network(NetworkFailure::Other(_)) => {
                "A network error occurred. Please try again later.".to_string()
            }
            Self::Application { message, .. } => message.clone(),
            Self::Decode(_) | Self::Storage(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
            Self::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authentication_is_authentication() {
        assert!(Failure::rejected().is_authentication());
        assert!(Failure::missing_credential().is_authentication());
        assert!(Failure::session_expired().is_authentication());
        assert!(!Failure::timeout().is_authentication());
        assert!(
            !Failure::Application {
                code: "FORBIDDEN".into(),
                message: "no".into()
            }
            .is_authentication()
        );
    }

    #[test]
    fn test_session_expired_is_distinguishable() {
        assert!(Failure::session_expired().is_session_expired());
        assert!(!Failure::rejected().is_session_expired());
        assert_ne!(Failure::session_expired(), Failure::rejected());
    }

    #[test]
    fn test_network_messages_are_distinct() {
        let timeout = Failure::timeout().user_message();
        let connectivity =
            Failure::Network(NetworkFailure::Connectivity("refused".into())).user_message();
        let other = Failure::Network(NetworkFailure::Other("reset".into())).user_message();
        assert_ne!(timeout, connectivity);
        assert_ne!(timeout, other);
        assert_ne!(connectivity, other);
    }

    #[test]
    fn test_application_message_surfaced_verbatim() {
        let failure = Failure::Application {
            code: "OUT_OF_STOCK".into(),
            message: "Sản phẩm đã hết hàng".into(),
        };
        assert_eq!(failure.user_message(), "Sản phẩm đã hết hàng");
        assert_eq!(
            failure.to_string(),
            "Application error (OUT_OF_STOCK): Sản phẩm đã hết hàng"
        );
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Failure::timeout().kind(), "timeout");
        assert_eq!(Failure::session_expired().kind(), "session_expired");
        assert_eq!(Failure::Cancelled.kind(), "cancelled");
        assert_eq!(Failure::Decode("x".into()).kind(), "decode");
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let failure: Failure = err.into();
        assert_eq!(failure.kind(), "decode");
    }
}
