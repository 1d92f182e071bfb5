//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so state files stay readable.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Fully qualified resource identifier: `resource.<type>.<module?>.<name>`.
    ResourceId
);

const RESOURCE_PREFIX: &str = "resource";

/// The parsed parts of a [`ResourceId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParts<'a> {
    pub kind: &'a str,
    pub module: Option<&'a str>,
    pub name: &'a str,
}

impl ResourceId {
    /// Build the canonical id for a resource of `kind` named `name` in `module`.
    pub fn for_resource(kind: &str, module: Option<&str>, name: &str) -> Self {
        match module {
            Some(m) if !m.is_empty() => Self(format!("{RESOURCE_PREFIX}.{kind}.{m}.{name}")),
            _ => Self(format!("{RESOURCE_PREFIX}.{kind}.{name}")),
        }
    }

    /// Split the id into kind, module, and name.
    ///
    /// The module segment may itself contain dots (`resource.container.a.b.web`
    /// has module `a.b`).
    pub fn parts(&self) -> Result<IdParts<'_>, SchemaError> {
        let malformed = || SchemaError::MalformedId(self.0.clone());
        let rest = self
            .0
            .strip_prefix(RESOURCE_PREFIX)
            .and_then(|r| r.strip_prefix('.'))
            .ok_or_else(malformed)?;
        let (kind, rest) = rest.split_once('.').ok_or_else(malformed)?;
        let (module, name) = match rest.rsplit_once('.') {
            Some((m, n)) => (Some(m), n),
            None => (None, rest),
        };
        if kind.is_empty() || name.is_empty() || module.is_some_and(str::is_empty) {
            return Err(malformed());
        }
        Ok(IdParts { kind, module, name })
    }

    /// True when the id addresses a whole module (`module.<name>`).
    pub fn is_module_ref(&self) -> bool {
        self.0.starts_with("module.")
    }

    /// The module name addressed by a `module.<name>` reference.
    pub fn module_name(&self) -> Option<&str> {
        self.0.strip_prefix("module.")
    }
}

/// Normalize a reference written inside a resource to a fully qualified id.
///
/// Short references (`network.n1`) are resolved against the referencing
/// resource's module. Fully qualified ids and `module.` references pass through.
pub fn normalize_reference(reference: &str, module: Option<&str>) -> ResourceId {
    if reference.starts_with("resource.") || reference.starts_with("module.") {
        return ResourceId::new(reference);
    }
    match reference.split_once('.') {
        Some((kind, name)) => ResourceId::for_resource(kind, module, name),
        None => ResourceId::new(reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_display_and_as_ref() {
        let id = ResourceId::new("resource.network.main");
        assert_eq!(id.to_string(), "resource.network.main");
        assert_eq!(id.as_str(), "resource.network.main");
        assert_eq!(AsRef::<str>::as_ref(&id), "resource.network.main");
    }

    #[test]
    fn resource_id_keys_look_up_by_str() {
        let mut index = std::collections::HashMap::new();
        index.insert(ResourceId::new("resource.network.main"), 0usize);
        assert_eq!(index.get("resource.network.main"), Some(&0));
        assert!(!index.contains_key("resource.network.other"));
    }

    #[test]
    fn resource_id_serde_is_plain_string() {
        let id = ResourceId::new("resource.container.web");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"resource.container.web\"");
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn for_resource_without_module() {
        let id = ResourceId::for_resource("network", None, "n1");
        assert_eq!(id, "resource.network.n1");
    }

    #[test]
    fn for_resource_with_module() {
        let id = ResourceId::for_resource("container", Some("consul"), "server");
        assert_eq!(id, "resource.container.consul.server");
    }

    #[test]
    fn parts_without_module() {
        let id = ResourceId::new("resource.k8s_cluster.k");
        let parts = id.parts().unwrap();
        assert_eq!(parts.kind, "k8s_cluster");
        assert_eq!(parts.module, None);
        assert_eq!(parts.name, "k");
    }

    #[test]
    fn parts_with_nested_module() {
        let id = ResourceId::new("resource.container.a.b.web");
        let parts = id.parts().unwrap();
        assert_eq!(parts.kind, "container");
        assert_eq!(parts.module, Some("a.b"));
        assert_eq!(parts.name, "web");
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for bad in ["", "resource", "resource.", "container.web", "resource.container", "resource..x"] {
            assert!(ResourceId::new(bad).parts().is_err(), "{bad} should be malformed");
        }
    }

    #[test]
    fn module_reference() {
        let id = ResourceId::new("module.consul");
        assert!(id.is_module_ref());
        assert_eq!(id.module_name(), Some("consul"));
        assert!(!ResourceId::new("resource.network.n1").is_module_ref());
    }

    #[test]
    fn normalize_short_reference() {
        assert_eq!(normalize_reference("network.n1", None), "resource.network.n1");
        assert_eq!(
            normalize_reference("network.n1", Some("m")),
            "resource.network.m.n1"
        );
        assert_eq!(
            normalize_reference("resource.network.n1", Some("m")),
            "resource.network.n1"
        );
        assert_eq!(normalize_reference("module.m", None), "module.m");
    }
}
