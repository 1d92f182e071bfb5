//! Certificate authorities and leaf certificates written as PEM files.

use super::{payload, payload_mut, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::KeyPairPem;
use jumppad_schema::kinds::{CertFile, CertificateCa, CertificateLeaf};
use jumppad_schema::Resource;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct CertificateCaProvider;

#[derive(Debug, Default)]
pub struct CertificateLeafProvider;

fn output_dir(output: &str, ctx: &ProviderContext<'_>) -> PathBuf {
    if output.is_empty() {
        ctx.layout.certs_dir()
    } else {
        PathBuf::from(output)
    }
}

fn cert_file(dir: &Path, filename: String) -> CertFile {
    CertFile {
        path: dir.join(&filename).display().to_string(),
        directory: dir.display().to_string(),
        filename,
    }
}

/// Write `<name>.key` and `<name>.cert` into `dir`.
fn write_pair(dir: &Path, name: &str, pair: &KeyPairPem) -> Result<(CertFile, CertFile), ProviderError> {
    fs::create_dir_all(dir)?;
    let key = cert_file(dir, format!("{name}.key"));
    let cert = cert_file(dir, format!("{name}.cert"));
    fs::write(&key.path, &pair.private_key)?;
    fs::write(&cert.path, &pair.certificate)?;
    debug!(key = %key.path, cert = %cert.path, "wrote key pair");
    Ok((key, cert))
}

fn remove_pair(key: &CertFile, cert: &CertFile) -> Result<(), ProviderError> {
    for file in [key, cert] {
        if file.path.is_empty() {
            continue;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn files_exist(key: &CertFile, cert: &CertFile) -> bool {
    !key.path.is_empty() && Path::new(&key.path).exists() && Path::new(&cert.path).exists()
}

impl Provider for CertificateCaProvider {
    fn kind(&self) -> &'static str {
        "certificate_ca"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let ca: CertificateCa = payload(resource)?;
        let name = resource.info().name.clone();
        info!(id = %resource.id(), "generating root certificate {name}");
        let pair = ctx.clients.certs.generate_ca(&name)?;
        let (key, cert) = write_pair(&output_dir(&ca.output, ctx), &name, &pair)?;
        let out = payload_mut::<CertificateCa>(resource)?;
        out.private_key = key;
        out.certificate = cert;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        let ca: CertificateCa = payload(resource)?;
        remove_pair(&ca.private_key, &ca.certificate)
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let ca: CertificateCa = payload(resource)?;
        Ok(vec![ca.private_key.path, ca.certificate.path])
    }

    fn changed(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let ca: CertificateCa = payload(resource)?;
        Ok(!files_exist(&ca.private_key, &ca.certificate))
    }

    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        if self.changed(resource, ctx)? {
            self.create(resource, ctx)?;
        }
        Ok(())
    }
}

impl CertificateLeafProvider {
    /// The signing pair, from a referenced CA resource or explicit paths.
    fn signer(&self, leaf: &CertificateLeaf, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<KeyPairPem, ProviderError> {
        let (key, cert) = if leaf.ca.is_empty() {
            (leaf.ca_key.clone(), leaf.ca_cert.clone())
        } else {
            let ca = ctx.find_payload::<CertificateCa>(&leaf.ca, resource)?;
            (ca.private_key.path.clone(), ca.certificate.path.clone())
        };
        if key.is_empty() || cert.is_empty() {
            return Err(ProviderError::invalid(format!(
                "{} needs a ca reference or ca_key and ca_cert paths",
                resource.id()
            )));
        }
        let read = |path: &str| {
            fs::read_to_string(path).map_err(|e| {
                ProviderError::precondition(format!("unable to read CA file {path}: {e}"))
            })
        };
        Ok(KeyPairPem {
            private_key: read(&key)?,
            certificate: read(&cert)?,
        })
    }
}

impl Provider for CertificateLeafProvider {
    fn kind(&self) -> &'static str {
        "certificate_leaf"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let leaf: CertificateLeaf = payload(resource)?;
        let name = resource.info().name.clone();
        let ca = self.signer(&leaf, resource, ctx)?;
        info!(id = %resource.id(), dns = ?leaf.dns_names, "generating leaf certificate {name}");
        let pair = ctx
            .clients
            .certs
            .generate_leaf(&ca, &name, &leaf.ip_addresses, &leaf.dns_names)?;
        let (key, cert) = write_pair(&output_dir(&leaf.output, ctx), &name, &pair)?;
        let out = payload_mut::<CertificateLeaf>(resource)?;
        out.private_key = key;
        out.certificate = cert;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        let leaf: CertificateLeaf = payload(resource)?;
        remove_pair(&leaf.private_key, &leaf.certificate)
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let leaf: CertificateLeaf = payload(resource)?;
        Ok(vec![leaf.private_key.path, leaf.certificate.path])
    }
}
