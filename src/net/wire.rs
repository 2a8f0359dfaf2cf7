//! GraphQL-over-HTTP envelope and response classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Failure;
use crate::operation::Variables;

/// Error codes the far end uses for a missing, expired or rejected credential.
const AUTH_CODES: &[&str] = &["UNAUTHENTICATED", "UNAUTHORIZED", "TOKEN_EXPIRED"];

/// Body of an operation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope<'a> {
    pub operation_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<&'a str>,
    pub variables: &'a Variables,
}

/// Body of an operation response.
#[derive(Debug, Default, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<WireError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
    /// Some servers report the HTTP-equivalent status here instead of a code.
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl WireError {
    fn code(&self) -> Option<&str> {
        self.extensions.as_ref().and_then(|e| e.code.as_deref())
    }

    /// True if this error says the credential was missing, expired or rejected.
    pub fn is_authentication(&self) -> bool {
        if let Some(code) = self.code() {
            if AUTH_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return true;
            }
        }
        if self
            .extensions
            .as_ref()
            .and_then(|e| e.status_code)
            .is_some_and(|s| s == 401)
        {
            return true;
        }
        self.message.eq_ignore_ascii_case("unauthorized")
    }
}

impl ResponseEnvelope {
    /// Resolve the envelope into the payload or a classified failure.
    ///
    /// An authentication error anywhere in `errors` wins over the others so
    /// the refresh path always sees it.
    pub fn into_result(self) -> Result<Value, Failure> {
        if self.errors.iter().any(WireError::is_authentication) {
            return Err(Failure::rejected());
        }

        if let Some(first) = self.errors.into_iter().next() {
            return Err(Failure::Application {
                code: first
                    .code()
                    .map(str::to_string)
                    .unwrap_or_else(|| "APPLICATION_ERROR".to_string()),
                message: first.message,
            });
        }

        Ok(self.data.unwrap_or(Value::Null))
    }
}
