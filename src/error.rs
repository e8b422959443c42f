//! RPC error model and its wire shape.
//! Every failure that crosses the RPC boundary is an `RpcError`; internal error types
//! (store, verifier, wire) are mapped into it before a response is produced.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::{Display, Formatter};

use crate::validation::ValidationErrors;

/// Stable failure codes carried in `error.data.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,
    MethodNotSupported,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotSupported => 405,
            ErrorCode::InternalServerError => 500,
        }
    }

    /// JSON-RPC 2.0 style numeric code placed in `error.code`.
    pub fn rpc_code(self) -> i32 {
        match self {
            ErrorCode::BadRequest => -32600,
            ErrorCode::Unauthorized => -32001,
            ErrorCode::NotFound => -32004,
            ErrorCode::MethodNotSupported => -32005,
            ErrorCode::InternalServerError => -32603,
        }
    }
}

/// Tag distinguishing the two unauthenticated outcomes. Clients branch on this, never on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    NeedsRefresh,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCause {
    #[serde(rename = "type")]
    pub kind: AuthErrorCode,
    pub has_token: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    BadRequest { message: String, validation: Option<ValidationErrors> },
    Unauthorized { message: String, cause: AuthCause },
    NotFound { message: String },
    MethodNotSupported { message: String },
    /// `detail` is for logs only and never serialized.
    Internal { message: String, detail: Option<String> },
}

impl RpcError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::BadRequest { .. } => ErrorCode::BadRequest,
            RpcError::Unauthorized { .. } => ErrorCode::Unauthorized,
            RpcError::NotFound { .. } => ErrorCode::NotFound,
            RpcError::MethodNotSupported { .. } => ErrorCode::MethodNotSupported,
            RpcError::Internal { .. } => ErrorCode::InternalServerError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RpcError::BadRequest { message, .. }
            | RpcError::Unauthorized { message, .. }
            | RpcError::NotFound { message }
            | RpcError::MethodNotSupported { message }
            | RpcError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self { RpcError::BadRequest { message: msg.into(), validation: None } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { RpcError::NotFound { message: msg.into() } }
    pub fn method_not_supported<S: Into<String>>(msg: S) -> Self { RpcError::MethodNotSupported { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { RpcError::Internal { message: msg.into(), detail: None } }

    /// Internal failure with a stable public message and a private detail for the logs.
    pub fn internal_with<S: Into<String>, D: Display>(msg: S, detail: D) -> Self {
        RpcError::Internal { message: msg.into(), detail: Some(detail.to_string()) }
    }

    pub fn needs_refresh() -> Self {
        RpcError::Unauthorized {
            message: "Session expired, refresh required".into(),
            cause: AuthCause { kind: AuthErrorCode::NeedsRefresh, has_token: true },
        }
    }

    pub fn forbidden() -> Self {
        RpcError::Unauthorized {
            message: "Authentication required".into(),
            cause: AuthCause { kind: AuthErrorCode::Forbidden, has_token: false },
        }
    }

    pub fn validation(errors: ValidationErrors) -> Self {
        RpcError::BadRequest { message: errors.to_string(), validation: Some(errors) }
    }

    pub fn http_status(&self) -> u16 { self.code().http_status() }

    pub fn auth_cause(&self) -> Option<AuthErrorCode> {
        match self {
            RpcError::Unauthorized { cause, .. } => Some(cause.kind),
            _ => None,
        }
    }

    /// NEEDS_REFRESH and FORBIDDEN are ordinary control flow, not operational failures.
    pub fn is_expected_auth(&self) -> bool { self.auth_cause().is_some() }

    pub fn detail(&self) -> Option<&str> {
        match self {
            RpcError::Internal { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn to_shape(&self, path: Option<&str>) -> ErrorShape {
        let code = self.code();
        let (cause, validation_error) = match self {
            RpcError::Unauthorized { cause, .. } => (Some(*cause), None),
            RpcError::BadRequest { validation, .. } => (None, validation.clone()),
            _ => (None, None),
        };
        ErrorShape {
            message: self.message().to_string(),
            code: code.rpc_code(),
            data: ErrorData {
                code,
                http_status: code.http_status(),
                path: path.map(|p| p.to_string()),
                cause,
                validation_error,
            },
        }
    }

    /// Rebuild an error from its wire shape (client side).
    pub fn from_shape(shape: ErrorShape) -> Self {
        let ErrorShape { message, data, .. } = shape;
        match data.code {
            ErrorCode::BadRequest => RpcError::BadRequest { message, validation: data.validation_error },
            ErrorCode::Unauthorized => RpcError::Unauthorized {
                message,
                cause: data.cause.unwrap_or(AuthCause { kind: AuthErrorCode::Forbidden, has_token: false }),
            },
            ErrorCode::NotFound => RpcError::NotFound { message },
            ErrorCode::MethodNotSupported => RpcError::MethodNotSupported { message },
            ErrorCode::InternalServerError => RpcError::Internal { message, detail: None },
        }
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.auth_cause() {
            Some(AuthErrorCode::NeedsRefresh) => write!(f, "{}/NEEDS_REFRESH: {}", self.code().as_str(), self.message()),
            Some(AuthErrorCode::Forbidden) => write!(f, "{}/FORBIDDEN: {}", self.code().as_str(), self.message()),
            None => write!(f, "{}: {}", self.code().as_str(), self.message()),
        }
    }
}

impl std::error::Error for RpcError {}

pub type RpcResult<T> = Result<T, RpcError>;

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() { s }
    else if let Some(s) = payload.downcast_ref::<String>() { s.as_str() }
    else { "panic" }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::internal_with("Failed to serialize response", err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub message: String,
    pub code: i32,
    pub data: ErrorData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub code: ErrorCode,
    pub http_status: u16,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub cause: Option<AuthCause>,
    #[serde(default)]
    pub validation_error: Option<ValidationErrors>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_status_mapping() {
        assert_eq!(RpcError::bad_request("oops").http_status(), 400);
        assert_eq!(RpcError::needs_refresh().http_status(), 401);
        assert_eq!(RpcError::forbidden().http_status(), 401);
        assert_eq!(RpcError::not_found("missing").http_status(), 404);
        assert_eq!(RpcError::method_not_supported("GET only").http_status(), 405);
        assert_eq!(RpcError::internal("panic").http_status(), 500);
    }

    #[test]
    fn unauthorized_shape_carries_cause_tag() {
        let shape = RpcError::needs_refresh().to_shape(Some("user.getMetadata"));
        let v = serde_json::to_value(&shape).unwrap();
        assert_eq!(v["code"], json!(-32001));
        assert_eq!(v["data"]["code"], json!("UNAUTHORIZED"));
        assert_eq!(v["data"]["httpStatus"], json!(401));
        assert_eq!(v["data"]["path"], json!("user.getMetadata"));
        assert_eq!(v["data"]["cause"], json!({"type": "NEEDS_REFRESH", "hasToken": true}));

        let v = serde_json::to_value(RpcError::forbidden().to_shape(None)).unwrap();
        assert_eq!(v["data"]["cause"]["type"], json!("FORBIDDEN"));
        assert_eq!(v["data"]["cause"]["hasToken"], json!(false));
    }

    #[test]
    fn internal_detail_stays_out_of_the_shape() {
        let err = RpcError::internal_with("Status from metadata store was not OK", "connection reset by peer");
        assert_eq!(err.detail(), Some("connection reset by peer"));
        let text = serde_json::to_string(&err.to_shape(Some("user.editMetadata"))).unwrap();
        assert!(!text.contains("connection reset"));
        assert!(text.contains("INTERNAL_SERVER_ERROR"));
    }

    #[test]
    fn shape_round_trips_through_client_mapping() {
        for err in [RpcError::needs_refresh(), RpcError::forbidden(), RpcError::not_found("User not found")] {
            let text = serde_json::to_string(&err.to_shape(Some("p"))).unwrap();
            let shape: ErrorShape = serde_json::from_str(&text).unwrap();
            assert_eq!(RpcError::from_shape(shape), err);
        }
    }

    #[test]
    fn only_auth_causes_are_expected() {
        assert!(RpcError::needs_refresh().is_expected_auth());
        assert!(RpcError::forbidden().is_expected_auth());
        assert!(!RpcError::not_found("x").is_expected_auth());
        assert!(!RpcError::internal("x").is_expected_auth());
        assert_eq!(RpcError::needs_refresh().to_string(), "UNAUTHORIZED/NEEDS_REFRESH: Session expired, refresh required");
    }
}
