//! Certificate authority operations for the `certificate_ca` and
//! `certificate_leaf` kinds.

use crate::ClientError;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::net::IpAddr;

const ORGANIZATION: &str = "Jumppad";

/// PEM-encoded private key and certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairPem {
    pub private_key: String,
    pub certificate: String,
}

pub trait CertAuthority: Send + Sync {
    /// Generate a self-signed root CA.
    fn generate_ca(&self, common_name: &str) -> Result<KeyPairPem, ClientError>;

    /// Generate a leaf certificate signed by `ca`.
    fn generate_leaf(
        &self,
        ca: &KeyPairPem,
        common_name: &str,
        ip_addresses: &[String],
        dns_names: &[String],
    ) -> Result<KeyPairPem, ClientError>;
}

/// Certificates generated in-process with rcgen.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenAuthority;

fn subject(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_owned()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_owned()),
    );
    dn
}

fn subject_alt_names(ip_addresses: &[String], dns_names: &[String]) -> Result<Vec<SanType>, ClientError> {
    let mut sans = Vec::with_capacity(ip_addresses.len() + dns_names.len());
    for ip in ip_addresses {
        let addr: IpAddr = ip
            .parse()
            .map_err(|e| ClientError::InvalidArgument(format!("ip address '{ip}': {e}")))?;
        sans.push(SanType::IpAddress(addr));
    }
    for name in dns_names {
        let dns = Ia5String::try_from(name.as_str())
            .map_err(|e| ClientError::InvalidArgument(format!("dns name '{name}': {e}")))?;
        sans.push(SanType::DnsName(dns));
    }
    Ok(sans)
}

fn generation_failed(what: &str, e: &rcgen::Error) -> ClientError {
    ClientError::CommandFailed(format!("{what}: {e}"))
}

impl CertAuthority for RcgenAuthority {
    fn generate_ca(&self, common_name: &str) -> Result<KeyPairPem, ClientError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = subject(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let key = KeyPair::generate().map_err(|e| generation_failed("generate CA key", &e))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| generation_failed("self-sign CA", &e))?;
        Ok(KeyPairPem {
            private_key: key.serialize_pem(),
            certificate: cert.pem(),
        })
    }

    fn generate_leaf(
        &self,
        ca: &KeyPairPem,
        common_name: &str,
        ip_addresses: &[String],
        dns_names: &[String],
    ) -> Result<KeyPairPem, ClientError> {
        let ca_key = KeyPair::from_pem(&ca.private_key)
            .map_err(|e| ClientError::InvalidArgument(format!("CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(&ca.certificate, &ca_key)
            .map_err(|e| ClientError::InvalidArgument(format!("CA certificate: {e}")))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject(common_name);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            rcgen::ExtendedKeyUsagePurpose::ClientAuth,
            rcgen::ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.subject_alt_names = subject_alt_names(ip_addresses, dns_names)?;

        let key = KeyPair::generate().map_err(|e| generation_failed("generate leaf key", &e))?;
        let cert = params
            .signed_by(&key, &issuer)
            .map_err(|e| generation_failed("sign leaf", &e))?;
        Ok(KeyPairPem {
            private_key: key.serialize_pem(),
            certificate: cert.pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_then_leaf() {
        let ca = RcgenAuthority.generate_ca("root").unwrap();
        assert!(ca.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.private_key.contains("PRIVATE KEY"));

        let leaf = RcgenAuthority
            .generate_leaf(
                &ca,
                "leaf",
                &["127.0.0.1".to_owned()],
                &["localhost".to_owned(), "server.local.jumppad.dev".to_owned()],
            )
            .unwrap();
        assert!(leaf.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_ne!(leaf.certificate, ca.certificate);
    }

    #[test]
    fn bad_ip_is_invalid_argument() {
        let ca = RcgenAuthority.generate_ca("root").unwrap();
        let err = RcgenAuthority
            .generate_leaf(&ca, "leaf", &["not-an-ip".to_owned()], &[])
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
    }

    #[test]
    fn garbage_ca_rejected() {
        let ca = KeyPairPem {
            private_key: "nope".to_owned(),
            certificate: "nope".to_owned(),
        };
        assert!(RcgenAuthority.generate_leaf(&ca, "leaf", &[], &[]).is_err());
    }
}
