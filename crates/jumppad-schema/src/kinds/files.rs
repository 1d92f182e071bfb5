use super::{is_remote_source, DriftSource, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Renders an inline template to a destination file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    /// Template text.
    pub source: String,
    pub destination: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

impl Payload for Template {
    const KIND: &'static str = "template";

    fn drift_source(&self) -> Option<DriftSource> {
        let vars = serde_json::to_string(&self.variables).unwrap_or_default();
        Some(DriftSource::Content(format!("{}\n{vars}", self.source)))
    }
}

/// Copies a local path or a remote source to a destination directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCopy {
    pub source: String,
    pub destination: String,
    /// Octal mode applied to written files, e.g. `0644`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub permissions: String,

    pub copied_files: Vec<String>,
}

impl FileCopy {
    pub fn is_remote(&self) -> bool {
        is_remote_source(&self.source)
    }
}

impl Payload for FileCopy {
    const KIND: &'static str = "copy";
    const COMPUTED: &'static [&'static str] = &["copied_files"];

    fn drift_source(&self) -> Option<DriftSource> {
        if self.is_remote() {
            None
        } else {
            Some(DriftSource::Path(PathBuf::from(&self.source)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_copy_drifts_on_path() {
        let c = FileCopy {
            source: "./files".to_owned(),
            ..FileCopy::default()
        };
        assert_eq!(
            c.drift_source(),
            Some(DriftSource::Path(PathBuf::from("./files")))
        );
    }

    #[test]
    fn remote_copy_has_no_local_drift_source() {
        let c = FileCopy {
            source: "https://example.com/archive.zip".to_owned(),
            ..FileCopy::default()
        };
        assert!(c.is_remote());
        assert_eq!(c.drift_source(), None);
    }

    #[test]
    fn template_drift_covers_variables() {
        let mut t = Template {
            source: "hello {{ name }}".to_owned(),
            ..Template::default()
        };
        let before = t.drift_source();
        t.variables
            .insert("name".to_owned(), Value::String("world".to_owned()));
        assert_ne!(before, t.drift_source());
    }
}
