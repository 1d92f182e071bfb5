//! Resource model for the Jumppad engine.
//!
//! A [`Resource`] pairs the shared metadata envelope ([`Meta`]) with a
//! kind-specific payload ([`Spec`]). Payloads are decoded by dispatching on the
//! `type` tag through a [`KindDecoder`]; [`BuiltinKinds`] covers every kind this
//! crate defines. [`ResourceSet`] holds one run's resources in declaration order.

pub mod kinds;
pub mod resource;
pub mod status;
pub mod types;
pub mod validate;

pub use kinds::{
    decode_opaque, BuiltinKinds, DecodeFn, DriftSource, KindDecoder, KindEntry, Payload, Spec,
    SpecVariant, BUILTIN_KINDS,
};
pub use resource::{Meta, Resource, ResourceSet};
pub use status::Status;
pub use types::{normalize_reference, IdParts, ResourceId};
pub use validate::{fqdn, parse_duration, validate_cluster_name, validate_resource_name};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed resource id: {0}")]
    MalformedId(String),
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("resource has no 'type' field")]
    MissingType,
    #[error("unknown resource type: {0}")]
    UnknownType(String),
    #[error("failed to decode '{kind}' resource: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate resource id: {0}")]
    DuplicateId(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display_unknown_type() {
        let e = SchemaError::UnknownType("vm".to_owned());
        assert!(e.to_string().contains("vm"));
    }

    #[test]
    fn schema_error_display_invalid_name() {
        let e = SchemaError::InvalidName {
            name: "a b".to_owned(),
            reason: "bad".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("a b"));
        assert!(msg.contains("bad"));
    }
}
