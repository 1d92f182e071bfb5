use jumppad_runtime::ClientError;
use jumppad_schema::SchemaError;
use std::fmt;
use thiserror::Error;

/// A configuration the engine refuses to run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown resource type '{kind}' for {id}")]
    UnknownType { id: String, kind: String },
    #[error("malformed resource id: {0}")]
    MalformedId(String),
    #[error("cycle: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("{id} depends on {dependency}, which does not exist")]
    UnresolvedDependency { id: String, dependency: String },
    #[error("invalid field '{field}' on {id}: {reason}")]
    InvalidField {
        id: String,
        field: String,
        reason: String,
    },
    #[error("duplicate resource id: {0}")]
    DuplicateId(String),
    #[error("blueprint error: {0}")]
    Blueprint(String),
}

impl ConfigError {
    pub fn invalid(id: impl fmt::Display, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            id: id.to_string(),
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// A resource this one needs is missing or not ready.
    PreconditionFailed,
    AlreadyExists,
    ExternalUnavailable,
    Timeout,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    Cancelled,
    Internal,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreconditionFailed => "precondition failed",
            Self::AlreadyExists => "already exists",
            Self::ExternalUnavailable => "external service unavailable",
            Self::Timeout => "timed out",
            Self::InvalidArgument => "invalid argument",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::PreconditionFailed, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidArgument, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ProviderErrorKind::Cancelled, "operation cancelled")
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == ProviderErrorKind::ExternalUnavailable
    }
}

impl From<ClientError> for ProviderError {
    fn from(e: ClientError) -> Self {
        let kind = match &e {
            ClientError::NotFound(_) => ProviderErrorKind::NotFound,
            ClientError::AlreadyExists(_) => ProviderErrorKind::AlreadyExists,
            ClientError::Conflict(_) => ProviderErrorKind::PreconditionFailed,
            ClientError::Unavailable { .. } => ProviderErrorKind::ExternalUnavailable,
            ClientError::Timeout(_) => ProviderErrorKind::Timeout,
            ClientError::InvalidArgument(_) => ProviderErrorKind::InvalidArgument,
            ClientError::PermissionDenied(_) => ProviderErrorKind::PermissionDenied,
            ClientError::CommandFailed(_)
            | ClientError::Io(_)
            | ClientError::Serialization(_) => ProviderErrorKind::Internal,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<SchemaError> for ProviderError {
    fn from(e: SchemaError) -> Self {
        let kind = match &e {
            SchemaError::NotFound(_) => ProviderErrorKind::PreconditionFailed,
            SchemaError::Serialization(_) | SchemaError::Decode { .. } => ProviderErrorKind::Internal,
            _ => ProviderErrorKind::InvalidArgument,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<jumppad_store::StoreError> for ProviderError {
    fn from(e: jumppad_store::StoreError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ProviderErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ProviderErrorKind::PermissionDenied,
            _ => ProviderErrorKind::Internal,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        Self::internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_ids() {
        let e = ConfigError::Cycle(vec![
            "resource.container.a".to_owned(),
            "resource.container.b".to_owned(),
        ]);
        assert_eq!(
            e.to_string(),
            "cycle: resource.container.a, resource.container.b"
        );
    }

    #[test]
    fn client_errors_map_by_kind() {
        let cases = [
            (ClientError::NotFound("x".into()), ProviderErrorKind::NotFound),
            (
                ClientError::AlreadyExists("x".into()),
                ProviderErrorKind::AlreadyExists,
            ),
            (
                ClientError::unavailable("docker", "down"),
                ProviderErrorKind::ExternalUnavailable,
            ),
            (ClientError::Timeout("x".into()), ProviderErrorKind::Timeout),
            (
                ClientError::PermissionDenied("x".into()),
                ProviderErrorKind::PermissionDenied,
            ),
            (
                ClientError::CommandFailed("x".into()),
                ProviderErrorKind::Internal,
            ),
        ];
        for (client, kind) in cases {
            assert_eq!(ProviderError::from(client).kind, kind);
        }
    }

    #[test]
    fn provider_error_display() {
        let e = ProviderError::timeout("health check for web");
        assert_eq!(e.to_string(), "timed out: health check for web");
    }
}
