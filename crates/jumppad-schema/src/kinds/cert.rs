use super::Payload;
use serde::{Deserialize, Serialize};

/// A file written by a certificate provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertFile {
    pub filename: String,
    pub directory: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateCa {
    /// Output directory for `<name>.key` and `<name>.cert`.
    pub output: String,

    pub private_key: CertFile,
    pub certificate: CertFile,
}

impl Payload for CertificateCa {
    const KIND: &'static str = "certificate_ca";
    const COMPUTED: &'static [&'static str] = &["private_key", "certificate"];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateLeaf {
    /// Reference to a `certificate_ca`; takes precedence over the explicit paths.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca_cert: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    pub output: String,

    pub private_key: CertFile,
    pub certificate: CertFile,
}

impl Payload for CertificateLeaf {
    const KIND: &'static str = "certificate_leaf";
    const COMPUTED: &'static [&'static str] = &["private_key", "certificate"];

    fn references(&self) -> Vec<String> {
        if self.ca.is_empty() {
            Vec::new()
        } else {
            vec![self.ca.clone()]
        }
    }
}
