use crate::SchemaError;
use std::time::Duration;

const MAX_NAME_LEN: usize = 128;
const MAX_CLUSTER_NAME_LEN: usize = 35;

/// Resource names must match `[a-zA-Z0-9_-]` and be 1-128 characters.
pub fn validate_resource_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SchemaError::InvalidName {
            name: name.to_owned(),
            reason: format!("name must be 1-{MAX_NAME_LEN} characters"),
        });
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(SchemaError::InvalidName {
            name: name.to_owned(),
            reason: "name must match [a-zA-Z0-9_-]".to_owned(),
        });
    }
    Ok(())
}

/// Cluster names become container hostnames, so they must also be valid
/// RFC 1123 labels no longer than 35 characters.
pub fn validate_cluster_name(name: &str) -> Result<(), SchemaError> {
    validate_resource_name(name)?;
    if name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(SchemaError::InvalidName {
            name: name.to_owned(),
            reason: format!("cluster name must be at most {MAX_CLUSTER_NAME_LEN} characters"),
        });
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if !valid {
        return Err(SchemaError::InvalidName {
            name: name.to_owned(),
            reason: "cluster name must be a valid RFC 1123 hostname".to_owned(),
        });
    }
    Ok(())
}

/// Fully qualified domain name of a container-backed resource.
///
/// `<name>.<module?>.<type>.local.jumppad.dev` with every character outside
/// `[a-zA-Z0-9-.]` replaced by `-`.
pub fn fqdn(name: &str, module: Option<&str>, kind: &str) -> String {
    let raw = match module {
        Some(m) if !m.is_empty() => format!("{name}.{m}.{kind}.local.jumppad.dev"),
        _ => format!("{name}.{kind}.local.jumppad.dev"),
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Parse a human duration such as `30s` or `5m`; an empty string yields `default`.
pub fn parse_duration(value: &str, default: Duration) -> Result<Duration, SchemaError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(default);
    }
    humantime::parse_duration(value).map_err(|e| SchemaError::InvalidField {
        field: "timeout".to_owned(),
        reason: format!("'{value}' is not a duration: {e}"),
    })
}
