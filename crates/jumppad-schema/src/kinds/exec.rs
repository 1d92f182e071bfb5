use super::container::{Image, NetworkAttachment, User, Volume};
use super::{DriftSource, Payload};
use crate::validate::parse_duration;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs a script on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecLocal {
    pub script: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub working_directory: String,
    /// Leave the process running in the background and record its pid.
    pub daemon: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ExecLocal {
    pub fn timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.timeout, DEFAULT_EXEC_TIMEOUT)
    }
}

impl Payload for ExecLocal {
    const KIND: &'static str = "exec_local";
    const COMPUTED: &'static [&'static str] = &["exit_code", "pid"];

    fn drift_source(&self) -> Option<DriftSource> {
        Some(DriftSource::Content(self.script.clone()))
    }
}

/// Runs a script inside an existing container or a transient one built from `image`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecRemote {
    pub script: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub working_directory: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    /// Reference to a running container.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as: Option<User>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecRemote {
    pub fn timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.timeout, DEFAULT_EXEC_TIMEOUT)
    }
}

impl Payload for ExecRemote {
    const KIND: &'static str = "exec_remote";
    const COMPUTED: &'static [&'static str] = &["exit_code"];

    fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.networks.iter().map(|n| n.id.clone()).collect();
        if !self.target.is_empty() {
            refs.push(self.target.clone());
        }
        refs
    }

    fn drift_source(&self) -> Option<DriftSource> {
        Some(DriftSource::Content(self.script.clone()))
    }
}
