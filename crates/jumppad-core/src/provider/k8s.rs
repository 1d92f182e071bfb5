//! Kubernetes manifests and Helm releases applied to a k3s cluster.

use super::cluster::kubeconfig_for;
use super::healthcheck::poll;
use super::{payload, payload_mut, tolerate, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::HelmInstall;
use jumppad_schema::kinds::{Helm, K8sConfig, KubernetesHealthCheck};
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MANIFEST_EXTENSIONS: [&str; 4] = ["yaml", "yml", "json", "hcl"];

/// Expand `paths` into the manifest files they name. Directories contribute
/// their direct children with a manifest extension, sorted by name.
pub(crate) fn manifest_files(paths: &[String]) -> Result<Vec<PathBuf>, ProviderError> {
    let mut files = Vec::new();
    for raw in paths {
        let path = Path::new(raw);
        let meta = fs::metadata(path)
            .map_err(|e| ProviderError::invalid(format!("manifest path {raw}: {e}")))?;
        if meta.is_dir() {
            let mut children: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e))
                })
                .collect();
            children.sort();
            files.extend(children);
        } else {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

pub(crate) fn file_digest(path: &Path) -> Result<String, ProviderError> {
    let content = fs::read(path)?;
    Ok(blake3::hash(&content).to_hex().to_string())
}

fn digests(files: &[PathBuf]) -> Result<BTreeMap<String, String>, ProviderError> {
    files
        .iter()
        .map(|f| Ok((f.display().to_string(), file_digest(f)?)))
        .collect()
}

/// Wait until every selector in the health check has Ready pods.
fn wait_for_pods(
    ctx: &ProviderContext<'_>,
    what: &str,
    kubeconfig: &Path,
    check: &KubernetesHealthCheck,
) -> Result<(), ProviderError> {
    if check.pods.is_empty() {
        return Ok(());
    }
    poll(what, check.timeout()?, ctx.cancel, || {
        for selector in &check.pods {
            if !ctx.clients.kubernetes.pods_ready(kubeconfig, selector)? {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

#[derive(Debug, Default)]
pub struct K8sConfigProvider;

impl K8sConfigProvider {
    fn apply(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let config: K8sConfig = payload(resource)?;
        let kubeconfig = kubeconfig_for(ctx, &config.cluster, resource)?;
        let files = manifest_files(&config.paths)?;
        let wait = config.wait_until_ready.then_some(ctx.default_timeout);
        info!(id = %resource.id(), files = files.len(), "applying kubernetes manifests");
        ctx.clients.kubernetes.apply(&kubeconfig, &files, wait)?;
        if let Some(check) = &config.health_check {
            wait_for_pods(ctx, &format!("pods of {}", resource.id()), &kubeconfig, check)?;
        }
        payload_mut::<K8sConfig>(resource)?.checksums = digests(&files)?;
        Ok(())
    }
}

impl Provider for K8sConfigProvider {
    fn kind(&self) -> &'static str {
        "k8s_config"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        self.apply(resource, ctx)
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let config: K8sConfig = payload(resource)?;
        // The cluster may already be gone, taking the objects with it.
        let kubeconfig = match kubeconfig_for(ctx, &config.cluster, resource) {
            Ok(k) if k.exists() => k,
            _ => {
                warn!(id = %resource.id(), "cluster unavailable, skipping manifest delete");
                return Ok(());
            }
        };
        let existing: Vec<String> = config
            .paths
            .iter()
            .filter(|p| Path::new(p).exists())
            .cloned()
            .collect();
        let files = manifest_files(&existing)?;
        tolerate(
            ctx.clients.kubernetes.delete(&kubeconfig, &files).map_err(Into::into),
            &format!("delete manifests of {}", resource.id()),
            force,
        )?;
        payload_mut::<K8sConfig>(resource)?.checksums.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let config: K8sConfig = payload(resource)?;
        Ok(config.checksums.into_keys().collect())
    }

    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        if self.changed(resource, ctx)? {
            info!(id = %resource.id(), "manifests changed, re-applying");
            self.apply(resource, ctx)?;
        }
        Ok(())
    }

    fn changed(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let config: K8sConfig = payload(resource)?;
        let current = digests(&manifest_files(&config.paths)?)?;
        Ok(current != config.checksums)
    }
}

#[derive(Debug, Default)]
pub struct HelmProvider;

impl Provider for HelmProvider {
    fn kind(&self) -> &'static str {
        "helm"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let helm: Helm = payload(resource)?;
        let kubeconfig = kubeconfig_for(ctx, &helm.cluster, resource)?;
        let name = resource.info().name.clone();

        if let Some(repo) = &helm.repository {
            ctx.clients.helm.upsert_repository(&repo.name, &repo.url)?;
        }
        let chart = match &helm.repository {
            Some(repo) if !helm.chart.contains('/') => format!("{}/{}", repo.name, helm.chart),
            _ => helm.chart.clone(),
        };
        let release = HelmInstall {
            name: name.clone(),
            chart,
            version: helm.version.clone(),
            namespace: helm.namespace().to_owned(),
            create_namespace: helm.create_namespace,
            skip_crds: helm.skip_crds,
            values_files: if helm.values.is_empty() {
                Vec::new()
            } else {
                vec![PathBuf::from(&helm.values)]
            },
            values: helm.values_string.clone(),
            timeout: Some(helm.timeout()?),
        };

        info!(id = %resource.id(), chart = %release.chart, "installing helm chart {name}");
        let mut attempt = 0;
        loop {
            ctx.check_cancelled()?;
            match ctx.clients.helm.install(&kubeconfig, &release) {
                Ok(()) => break,
                Err(e) if attempt < helm.retry => {
                    attempt += 1;
                    warn!(id = %resource.id(), attempt, "helm install failed, retrying: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(check) = &helm.health_check {
            wait_for_pods(ctx, &format!("pods of {}", resource.id()), &kubeconfig, check)?;
        }
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let helm: Helm = payload(resource)?;
        let kubeconfig = match kubeconfig_for(ctx, &helm.cluster, resource) {
            Ok(k) if k.exists() => k,
            _ => {
                warn!(id = %resource.id(), "cluster unavailable, skipping helm uninstall");
                return Ok(());
            }
        };
        let name = resource.info().name.clone();
        tolerate(
            ctx.clients
                .helm
                .uninstall(&kubeconfig, &name, helm.namespace())
                .map_err(Into::into),
            &format!("uninstall release {name}"),
            force,
        )
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(vec![resource.info().name.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::Harness;
    use crate::ProviderErrorKind;
    use jumppad_schema::kinds::{HelmRepository, K8sCluster, KubeConfig};

    fn with_cluster(h: Harness) -> Harness {
        let kubeconfig = h.dir.path().join("kubeconfig.yaml");
        fs::write(&kubeconfig, "apiVersion: v1\n").unwrap();
        let cluster = Resource::new(
            "k",
            K8sCluster {
                kubeconfig: KubeConfig {
                    path: kubeconfig.display().to_string(),
                    docker_path: String::new(),
                },
                ..K8sCluster::default()
            },
        );
        h.with(cluster)
    }

    fn manifests(h: &Harness) -> PathBuf {
        let dir = h.dir.path().join("manifests");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.yaml"), "kind: Deployment\n").unwrap();
        fs::write(dir.join("b.yml"), "kind: Service\n").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn manifest_directories_expand_to_files() {
        let h = Harness::new();
        let dir = manifests(&h);
        let files = manifest_files(&[dir.display().to_string()]).unwrap();
        assert_eq!(files, vec![dir.join("a.yaml"), dir.join("b.yml")]);
        assert!(manifest_files(&["/no/such/path".to_owned()]).is_err());
    }

    #[test]
    fn config_apply_records_checksums_and_detects_edits() {
        let h = with_cluster(Harness::new());
        let dir = manifests(&h);
        let mut r = Resource::new(
            "app",
            K8sConfig {
                cluster: "resource.k8s_cluster.k".to_owned(),
                paths: vec![dir.display().to_string()],
                wait_until_ready: true,
                ..K8sConfig::default()
            },
        );
        K8sConfigProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(h.mock.applied_manifests().len(), 2);
        assert_eq!(r.payload::<K8sConfig>().unwrap().checksums.len(), 2);
        assert!(!K8sConfigProvider.changed(&r, &h.ctx()).unwrap());

        fs::write(dir.join("a.yaml"), "kind: StatefulSet\n").unwrap();
        assert!(K8sConfigProvider.changed(&r, &h.ctx()).unwrap());
        K8sConfigProvider.refresh(&mut r, &h.ctx()).unwrap();
        assert!(!K8sConfigProvider.changed(&r, &h.ctx()).unwrap());
        assert_eq!(h.mock.count("k8s_apply"), 2);

        K8sConfigProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert!(h.mock.applied_manifests().is_empty());
    }

    #[test]
    fn config_health_check_times_out() {
        let h = with_cluster(Harness::new());
        h.mock.set_pods_ready(false);
        let dir = manifests(&h);
        let mut r = Resource::new(
            "app",
            K8sConfig {
                cluster: "resource.k8s_cluster.k".to_owned(),
                paths: vec![dir.display().to_string()],
                health_check: Some(KubernetesHealthCheck {
                    timeout: "1s".to_owned(),
                    pods: vec!["app=web".to_owned()],
                }),
                ..K8sConfig::default()
            },
        );
        let err = K8sConfigProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
    }

    #[test]
    fn cluster_without_kubeconfig_is_a_precondition_failure() {
        let h = Harness::new().with(Resource::new("k", K8sCluster::default()));
        let mut r = Resource::new(
            "app",
            K8sConfig {
                cluster: "resource.k8s_cluster.k".to_owned(),
                ..K8sConfig::default()
            },
        );
        let err = K8sConfigProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::PreconditionFailed);
    }

    #[test]
    fn helm_install_prefixes_repository_and_retries() {
        let h = with_cluster(Harness::new());
        let mut r = Resource::new(
            "vault",
            Helm {
                cluster: "resource.k8s_cluster.k".to_owned(),
                repository: Some(HelmRepository {
                    name: "hashicorp".to_owned(),
                    url: "https://helm.releases.hashicorp.com".to_owned(),
                }),
                chart: "vault".to_owned(),
                retry: 1,
                ..Helm::default()
            },
        );
        h.mock.fail("helm_install", "vault");
        let err = HelmProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert!(!err.message.is_empty());
        assert_eq!(h.mock.count("helm_install"), 2);

        h.mock.clear_failures();
        HelmProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(h.mock.release_names(), vec!["vault".to_owned()]);
        let calls = h.mock.calls_of("helm_repo");
        assert_eq!(calls.len(), 2);

        HelmProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert!(h.mock.release_names().is_empty());
        HelmProvider.destroy(&mut r, &h.ctx(), false).unwrap();
    }
}
