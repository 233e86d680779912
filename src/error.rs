//! Error types shared across the session controller
//!
//! Collaborator errors (transport, injection, assistant backend) are
//! recovered by the component that sees them and turned into a
//! [`SessionError`], which is what the UI and IPC clients observe.

use serde::{Deserialize, Serialize};

/// Errors raised by a recognition transport when opening or closing a stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("timed out after {0}ms waiting for the recognizer")]
    Timeout(u64),
}

/// Errors raised by the text-injection collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("injection failed: {0}")]
    Failed(String),
}

/// Errors raised while running an assistant turn
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    #[error("no assistant backend is configured")]
    Unavailable,

    #[error("failed to start assistant process: {0}")]
    Spawn(String),

    #[error("assistant protocol error: {0}")]
    Protocol(String),

    #[error("assistant backend error: {0}")]
    Backend(String),
}

/// Which capability a permission error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Microphone,
    Accessibility,
}

impl Permission {
    /// What the user has to do to fix the missing permission
    pub fn hint(&self) -> &'static str {
        match self {
            Permission::Microphone => "grant microphone access to the daemon and retry",
            Permission::Accessibility => {
                "grant Accessibility access to the daemon so it can type into other apps"
            }
        }
    }
}

/// User-visible errors, carried as state rather than thrown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionError {
    /// Recognition stream failed to open or dropped
    #[error("recognition connection error: {reason}")]
    Connection { reason: String },

    #[error("{permission:?} permission denied: {detail} ({hint})")]
    PermissionDenied {
        permission: Permission,
        detail: String,
        hint: String,
    },

    #[error("text injection failed: {reason}")]
    Injection { reason: String },

    #[error("assistant dispatch failed: {reason}")]
    AssistantDispatch { reason: String },

    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("session coordinator is no longer running")]
    Closed,
}

impl SessionError {
    pub fn permission(permission: Permission, detail: impl Into<String>) -> Self {
        SessionError::PermissionDenied {
            permission,
            detail: detail.into(),
            hint: permission.hint().to_string(),
        }
    }

    /// Stable machine-readable code used in IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Connection { .. } => "connection_error",
            SessionError::PermissionDenied { .. } => "permission_denied",
            SessionError::Injection { .. } => "injection_error",
            SessionError::AssistantDispatch { .. } => "assistant_dispatch_error",
            SessionError::InvalidCommand { .. } => "invalid_command",
            SessionError::Closed => "closed",
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(detail) => {
                SessionError::permission(Permission::Microphone, detail)
            }
            other => SessionError::Connection {
                reason: other.to_string(),
            },
        }
    }
}

impl From<InjectError> for SessionError {
    fn from(err: InjectError) -> Self {
        match err {
            InjectError::PermissionDenied(detail) => {
                SessionError::permission(Permission::Accessibility, detail)
            }
            InjectError::Failed(reason) => SessionError::Injection { reason },
        }
    }
}

impl From<AssistantError> for SessionError {
    fn from(err: AssistantError) -> Self {
        SessionError::AssistantDispatch {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_permission_maps_to_microphone() {
        let err: SessionError = TransportError::PermissionDenied("mic blocked".into()).into();
        match err {
            SessionError::PermissionDenied { permission, hint, .. } => {
                assert_eq!(permission, Permission::Microphone);
                assert!(hint.contains("microphone"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transport_timeout_is_connection_error() {
        let err: SessionError = TransportError::Timeout(5000).into();
        assert_eq!(err.code(), "connection_error");
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn test_inject_permission_maps_to_accessibility() {
        let err: SessionError = InjectError::PermissionDenied("no AX".into()).into();
        assert_eq!(err.code(), "permission_denied");
        assert!(err.to_string().contains("Accessibility"));
    }

    #[test]
    fn test_session_error_serialization() {
        let err = SessionError::Connection {
            reason: "socket closed".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""kind":"connection""#));
        let back: SessionError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
