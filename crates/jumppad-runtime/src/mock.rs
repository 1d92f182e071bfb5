//! In-memory implementations of every client capability.
//!
//! `MockClients` keeps containers, networks, volumes, cluster objects and jobs
//! in one mutex-guarded world and records every call with its start and end
//! instants, so tests can assert on ordering, concurrency and side effects
//! without a container engine.

use crate::certs::{CertAuthority, KeyPairPem};
use crate::command::{CommandOutcome, CommandRunner, CommandSpec};
use crate::container::{ContainerConfig, ContainerInfo, ContainerRuntime, ImageRef};
use crate::getter::FileGetter;
use crate::helm::{HelmClient, HelmInstall};
use crate::http::HttpClient;
use crate::kubernetes::KubernetesClient;
use crate::network::{NetworkAttachment, NetworkConfig, NetworkInfo, NetworkRuntime};
use crate::nomad::NomadClient;
use crate::{ClientError, Clients};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const MOCK_KUBECONFIG: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: bW9jaw==
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
";

/// One recorded client call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub op: &'static str,
    pub target: String,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    name: String,
    image: String,
    image_id: String,
    labels: BTreeMap<String, String>,
    running: bool,
    /// Network name → address.
    networks: BTreeMap<String, String>,
    logs: String,
}

#[derive(Debug, Clone)]
struct MockNetwork {
    id: String,
    subnet: String,
    containers: Vec<String>,
}

#[derive(Debug)]
struct World {
    next_id: u64,
    containers: BTreeMap<String, MockContainer>,
    networks: BTreeMap<String, MockNetwork>,
    volumes: BTreeSet<String>,
    images: BTreeMap<String, String>,
    manifests: BTreeSet<PathBuf>,
    releases: BTreeMap<String, HelmInstall>,
    repositories: BTreeMap<String, String>,
    jobs: BTreeMap<String, PathBuf>,
    daemons: BTreeSet<u32>,
    failures: Vec<(String, String)>,
    silent: Vec<String>,
    pods_ready: bool,
    http_status: u16,
    exit_code: i32,
    delay: Duration,
    calls: Vec<MockCall>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            next_id: 0,
            containers: BTreeMap::new(),
            networks: BTreeMap::new(),
            volumes: BTreeSet::new(),
            images: BTreeMap::new(),
            manifests: BTreeSet::new(),
            releases: BTreeMap::new(),
            repositories: BTreeMap::new(),
            jobs: BTreeMap::new(),
            daemons: BTreeSet::new(),
            failures: Vec::new(),
            silent: Vec::new(),
            pods_ready: true,
            http_status: 200,
            exit_code: 0,
            delay: Duration::ZERO,
            calls: Vec::new(),
        }
    }
}

impl World {
    fn id(&mut self) -> String {
        self.next_id += 1;
        format!("mock-{:08x}", self.next_id)
    }

    fn container(&mut self, id: &str) -> Result<&mut MockContainer, ClientError> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("no such container: {id}")))
    }

    fn next_address(network: &MockNetwork) -> String {
        let host = (network.containers.len() + 2).to_string();
        let base = network.subnet.split('/').next().unwrap_or("10.0.0.0");
        let mut octets: Vec<&str> = base.split('.').collect();
        if let Some(last) = octets.last_mut() {
            *last = &host;
        }
        octets.join(".")
    }
}

#[derive(Debug, Default)]
pub struct MockClients {
    world: Mutex<World>,
}

impl MockClients {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A client bundle where every capability is this mock.
    pub fn clients(self: &Arc<Self>) -> Clients {
        Clients {
            containers: self.clone(),
            networks: self.clone(),
            kubernetes: self.clone(),
            nomad: self.clone(),
            helm: self.clone(),
            http: self.clone(),
            getter: self.clone(),
            commands: self.clone(),
            certs: self.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, World>, ClientError> {
        self.world
            .lock()
            .map_err(|e| ClientError::CommandFailed(format!("mutex poisoned: {e}")))
    }

    fn peek(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the world, honouring injected failures and delay, and
    /// record the call.
    fn call<T>(
        &self,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut World) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let started = Instant::now();
        let (injected, delay) = {
            let world = self.lock()?;
            let injected = world
                .failures
                .iter()
                .any(|(o, t)| o == op && target.contains(t.as_str()));
            (injected, world.delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut world = self.lock()?;
        let result = if injected {
            Err(ClientError::CommandFailed(format!(
                "injected failure: {op} {target}"
            )))
        } else {
            f(&mut *world)
        };
        world.calls.push(MockCall {
            op,
            target: target.to_owned(),
            started,
            finished: Instant::now(),
        });
        result
    }

    /// Make every call of `op` whose target contains `target` fail.
    pub fn fail(&self, op: &str, target: &str) {
        self.peek().failures.push((op.to_owned(), target.to_owned()));
    }

    pub fn clear_failures(&self) {
        self.peek().failures.clear();
    }

    /// Sleep for `delay` at the start of every call.
    pub fn set_delay(&self, delay: Duration) {
        self.peek().delay = delay;
    }

    /// Containers whose name contains `name` produce no logs.
    pub fn silence(&self, name: &str) {
        self.peek().silent.push(name.to_owned());
    }

    pub fn set_pods_ready(&self, ready: bool) {
        self.peek().pods_ready = ready;
    }

    pub fn set_http_status(&self, status: u16) {
        self.peek().http_status = status;
    }

    /// Exit code reported by container exec and local scripts.
    pub fn set_exit_code(&self, code: i32) {
        self.peek().exit_code = code;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.peek().calls.clone()
    }

    pub fn calls_of(&self, op: &str) -> Vec<MockCall> {
        self.peek()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.peek().calls.iter().filter(|c| c.op == op).count()
    }

    /// Replace the local copy of `image` with a new build, as a pull of an
    /// updated tag would. Returns the new image id.
    pub fn rebuild_image(&self, image: &str) -> String {
        let mut world = self.peek();
        let id = format!("sha256:{}", world.id());
        world.images.insert(image.to_owned(), id.clone());
        id
    }

    /// Ids of every container, in creation order.
    pub fn container_ids(&self) -> Vec<String> {
        self.peek().containers.keys().cloned().collect()
    }

    pub fn container_count(&self) -> usize {
        self.peek().containers.len()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.peek().containers.values().map(|c| c.name.clone()).collect()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.peek().networks.keys().cloned().collect()
    }

    pub fn network_subnet(&self, name: &str) -> Option<String> {
        self.peek().networks.get(name).map(|n| n.subnet.clone())
    }

    /// Names of the containers attached to `network`.
    pub fn attached_to(&self, network: &str) -> Vec<String> {
        let world = self.peek();
        world
            .containers
            .values()
            .filter(|c| c.networks.contains_key(network))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn volume_exists(&self, name: &str) -> bool {
        self.peek().volumes.contains(name)
    }

    pub fn release_names(&self) -> Vec<String> {
        self.peek().releases.keys().cloned().collect()
    }

    pub fn applied_manifests(&self) -> Vec<PathBuf> {
        self.peek().manifests.iter().cloned().collect()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.peek().jobs.keys().cloned().collect()
    }
}

impl ContainerRuntime for MockClients {
    fn pull_image(&self, image: &ImageRef, force: bool) -> Result<String, ClientError> {
        self.call("pull_image", &image.name, |w| {
            if let Some(id) = w.images.get(&image.name) {
                if !force {
                    return Ok(id.clone());
                }
            }
            let id = format!("sha256:{}", w.id());
            w.images.insert(image.name.clone(), id.clone());
            Ok(id)
        })
    }

    fn image_id(&self, image: &str) -> Result<Option<String>, ClientError> {
        self.call("image_id", image, |w| Ok(w.images.get(image).cloned()))
    }

    fn create_container(&self, config: &ContainerConfig) -> Result<String, ClientError> {
        self.call("create_container", &config.name, |w| {
            if w.containers.values().any(|c| c.name == config.name) {
                return Err(ClientError::AlreadyExists(format!(
                    "container name {} is already in use",
                    config.name
                )));
            }
            let id = w.id();
            let image_id = w.images.get(&config.image).cloned().unwrap_or_default();
            w.containers.insert(
                id.clone(),
                MockContainer {
                    id: id.clone(),
                    name: config.name.clone(),
                    image: config.image.clone(),
                    image_id,
                    labels: config.labels.clone(),
                    running: false,
                    networks: BTreeMap::new(),
                    logs: String::new(),
                },
            );
            Ok(id)
        })
    }

    fn start_container(&self, id: &str) -> Result<(), ClientError> {
        self.call("start_container", id, |w| {
            let silent = w.silent.clone();
            let c = w.container(id)?;
            c.running = true;
            if !silent.iter().any(|s| c.name.contains(s.as_str())) {
                c.logs = format!("starting {}\nRunning kubelet\n", c.image);
            }
            Ok(())
        })
    }

    fn remove_container(&self, id: &str, _force: bool) -> Result<(), ClientError> {
        self.call("remove_container", id, |w| {
            if w.containers.remove(id).is_none() {
                return Err(ClientError::NotFound(format!("no such container: {id}")));
            }
            for net in w.networks.values_mut() {
                net.containers.retain(|c| c != id);
            }
            Ok(())
        })
    }

    fn find_containers(&self, name: &str) -> Result<Vec<String>, ClientError> {
        self.call("find_containers", name, |w| {
            Ok(w.containers
                .values()
                .filter(|c| c.name == name)
                .map(|c| c.id.clone())
                .collect())
        })
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ClientError> {
        self.call("inspect_container", id, |w| {
            let c = w.container(id)?;
            Ok(ContainerInfo {
                id: c.id.clone(),
                name: c.name.clone(),
                running: c.running,
                image_id: c.image_id.clone(),
                labels: c.labels.clone(),
                addresses: c.networks.clone(),
            })
        })
    }

    fn container_logs(&self, id: &str) -> Result<String, ClientError> {
        self.call("container_logs", id, |w| Ok(w.container(id)?.logs.clone()))
    }

    fn exec(
        &self,
        id: &str,
        command: &[String],
        _user: Option<&str>,
        output: &mut dyn Write,
    ) -> Result<i32, ClientError> {
        let code = self.call("exec", id, |w| {
            let code = w.exit_code;
            let c = w.container(id)?;
            if !c.running {
                return Err(ClientError::Conflict(format!("container {id} is not running")));
            }
            Ok(code)
        })?;
        writeln!(output, "exec: {}", command.join(" "))?;
        Ok(code)
    }

    fn copy_to_container(&self, id: &str, source: &Path, destination: &str) -> Result<(), ClientError> {
        self.call("copy_to_container", id, |w| {
            w.container(id)?;
            if !source.exists() {
                return Err(ClientError::NotFound(source.display().to_string()));
            }
            tracing::trace!(id, destination, "mock copy into container");
            Ok(())
        })
    }

    fn copy_from_container(&self, id: &str, source: &str, destination: &Path) -> Result<(), ClientError> {
        self.call("copy_from_container", id, |w| {
            w.container(id)?;
            Ok(())
        })?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = if source.ends_with(".yaml") {
            MOCK_KUBECONFIG.to_owned()
        } else {
            format!("copied from {id}:{source}\n")
        };
        std::fs::write(destination, content)?;
        Ok(())
    }

    fn create_volume(&self, name: &str) -> Result<(), ClientError> {
        self.call("create_volume", name, |w| {
            w.volumes.insert(name.to_owned());
            Ok(())
        })
    }

    fn remove_volume(&self, name: &str) -> Result<(), ClientError> {
        self.call("remove_volume", name, |w| {
            w.volumes.remove(name);
            Ok(())
        })
    }

    fn save_images(&self, images: &[String], destination: &Path) -> Result<(), ClientError> {
        self.call("save_images", &images.join(","), |_| Ok(()))?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(destination, images.join("\n"))?;
        Ok(())
    }
}

impl NetworkRuntime for MockClients {
    fn create_network(&self, config: &NetworkConfig) -> Result<String, ClientError> {
        self.call("create_network", &config.name, |w| {
            if w.networks.contains_key(&config.name) {
                return Err(ClientError::AlreadyExists(format!(
                    "network with name {} already exists",
                    config.name
                )));
            }
            let id = w.id();
            w.networks.insert(
                config.name.clone(),
                MockNetwork {
                    id: id.clone(),
                    subnet: config.subnet.clone(),
                    containers: Vec::new(),
                },
            );
            Ok(id)
        })
    }

    fn find_network(&self, name: &str) -> Result<Option<NetworkInfo>, ClientError> {
        self.call("find_network", name, |w| {
            Ok(w.networks.get(name).map(|n| NetworkInfo {
                id: n.id.clone(),
                name: name.to_owned(),
                subnet: n.subnet.clone(),
                containers: n.containers.clone(),
            }))
        })
    }

    fn remove_network(&self, name: &str) -> Result<(), ClientError> {
        self.call("remove_network", name, |w| {
            let net = w
                .networks
                .get(name)
                .ok_or_else(|| ClientError::NotFound(format!("network {name} not found")))?;
            if !net.containers.is_empty() {
                return Err(ClientError::Conflict(format!(
                    "network {name} has active endpoints"
                )));
            }
            w.networks.remove(name);
            Ok(())
        })
    }

    fn attach(&self, network: &str, container_id: &str, attachment: &NetworkAttachment) -> Result<(), ClientError> {
        self.call("attach", &format!("{network}/{container_id}"), |w| {
            let net = w
                .networks
                .get(network)
                .ok_or_else(|| ClientError::NotFound(format!("network {network} not found")))?;
            let address = attachment
                .ip_address
                .clone()
                .unwrap_or_else(|| World::next_address(net));
            let c = w.container(container_id)?;
            if c.networks.contains_key(network) {
                return Err(ClientError::AlreadyExists(format!(
                    "endpoint {container_id} already exists in network {network}"
                )));
            }
            c.networks.insert(network.to_owned(), address);
            if let Some(net) = w.networks.get_mut(network) {
                net.containers.push(container_id.to_owned());
            }
            Ok(())
        })
    }

    fn detach(&self, network: &str, container_id: &str) -> Result<(), ClientError> {
        self.call("detach", &format!("{network}/{container_id}"), |w| {
            let c = w.container(container_id)?;
            if c.networks.remove(network).is_none() {
                return Err(ClientError::NotFound(format!(
                    "container {container_id} is not connected to network {network}"
                )));
            }
            if let Some(net) = w.networks.get_mut(network) {
                net.containers.retain(|c| c != container_id);
            }
            Ok(())
        })
    }
}

impl KubernetesClient for MockClients {
    fn apply(&self, kubeconfig: &Path, paths: &[PathBuf], _wait: Option<Duration>) -> Result<(), ClientError> {
        self.call("k8s_apply", &kubeconfig.display().to_string(), |w| {
            w.manifests.extend(paths.iter().cloned());
            Ok(())
        })
    }

    fn delete(&self, kubeconfig: &Path, paths: &[PathBuf]) -> Result<(), ClientError> {
        self.call("k8s_delete", &kubeconfig.display().to_string(), |w| {
            for p in paths {
                w.manifests.remove(p);
            }
            Ok(())
        })
    }

    fn pods_ready(&self, _kubeconfig: &Path, selector: &str) -> Result<bool, ClientError> {
        self.call("pods_ready", selector, |w| Ok(w.pods_ready))
    }
}

impl HelmClient for MockClients {
    fn install(&self, _kubeconfig: &Path, release: &HelmInstall) -> Result<(), ClientError> {
        self.call("helm_install", &release.name, |w| {
            w.releases.insert(release.name.clone(), release.clone());
            Ok(())
        })
    }

    fn uninstall(&self, _kubeconfig: &Path, name: &str, _namespace: &str) -> Result<(), ClientError> {
        self.call("helm_uninstall", name, |w| {
            w.releases
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| ClientError::NotFound(format!("release: {name} not found")))
        })
    }

    fn upsert_repository(&self, name: &str, url: &str) -> Result<(), ClientError> {
        self.call("helm_repo", name, |w| {
            w.repositories.insert(name.to_owned(), url.to_owned());
            Ok(())
        })
    }
}

impl NomadClient for MockClients {
    fn ready_nodes(&self, address: &str) -> Result<usize, ClientError> {
        self.call("nomad_nodes", address, |w| {
            Ok(w.containers
                .values()
                .filter(|c| c.running && c.image.contains("nomad"))
                .count())
        })
    }

    fn apply_job(&self, address: &str, path: &Path) -> Result<String, ClientError> {
        self.call("nomad_apply", address, |w| {
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| ClientError::InvalidArgument(path.display().to_string()))?;
            w.jobs.insert(id.clone(), path.to_path_buf());
            Ok(id)
        })
    }

    fn stop_job(&self, address: &str, job_id: &str) -> Result<(), ClientError> {
        self.call("nomad_stop", address, |w| {
            w.jobs.remove(job_id);
            Ok(())
        })
    }

    fn job_running(&self, _address: &str, job_id: &str) -> Result<bool, ClientError> {
        self.call("nomad_job_running", job_id, |w| Ok(w.jobs.contains_key(job_id)))
    }
}

impl HttpClient for MockClients {
    fn status(&self, _method: &str, url: &str) -> Result<u16, ClientError> {
        self.call("http", url, |w| Ok(w.http_status))
    }

    fn dial(&self, address: &str) -> Result<(), ClientError> {
        self.call("dial", address, |_| Ok(()))
    }
}

impl FileGetter for MockClients {
    fn get(&self, source: &str, destination: &Path) -> Result<(), ClientError> {
        self.call("get", source, |_| Ok(()))?;
        std::fs::create_dir_all(destination)?;
        std::fs::write(destination.join("README.md"), format!("fetched from {source}\n"))?;
        Ok(())
    }
}

impl CommandRunner for MockClients {
    fn run(&self, spec: &CommandSpec, output: &mut dyn Write) -> Result<CommandOutcome, ClientError> {
        let outcome = self.call("run", &spec.script, |w| {
            if spec.daemon {
                let pid = 10_000 + w.daemons.len() as u32;
                w.daemons.insert(pid);
                return Ok(CommandOutcome {
                    exit_code: None,
                    pid: Some(pid),
                });
            }
            Ok(CommandOutcome {
                exit_code: Some(w.exit_code),
                pid: None,
            })
        })?;
        if !spec.daemon {
            writeln!(output, "run: {}", spec.script)?;
        }
        Ok(outcome)
    }

    fn kill(&self, pid: u32) -> Result<(), ClientError> {
        self.call("kill", &pid.to_string(), |w| {
            w.daemons.remove(&pid);
            Ok(())
        })
    }
}

fn fake_pem(label: &str, body: &str) -> String {
    format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----\n")
}

impl CertAuthority for MockClients {
    fn generate_ca(&self, common_name: &str) -> Result<KeyPairPem, ClientError> {
        self.call("generate_ca", common_name, |_| {
            Ok(KeyPairPem {
                private_key: fake_pem("PRIVATE KEY", &format!("ca-key-{common_name}")),
                certificate: fake_pem("CERTIFICATE", &format!("ca-{common_name}")),
            })
        })
    }

    fn generate_leaf(
        &self,
        ca: &KeyPairPem,
        common_name: &str,
        ip_addresses: &[String],
        dns_names: &[String],
    ) -> Result<KeyPairPem, ClientError> {
        self.call("generate_leaf", common_name, |_| {
            if ca.certificate.is_empty() || ca.private_key.is_empty() {
                return Err(ClientError::InvalidArgument("empty CA".to_owned()));
            }
            let sans = ip_addresses
                .iter()
                .chain(dns_names)
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            Ok(KeyPairPem {
                private_key: fake_pem("PRIVATE KEY", &format!("leaf-key-{common_name}")),
                certificate: fake_pem("CERTIFICATE", &format!("leaf-{common_name} [{sans}]")),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_attach_assigns_addresses_and_blocks_removal() {
        let mock = MockClients::new();
        mock.create_network(&NetworkConfig {
            name: "n1".to_owned(),
            subnet: "10.5.0.0/16".to_owned(),
            ..NetworkConfig::default()
        })
        .unwrap();
        let id = mock
            .create_container(&ContainerConfig {
                name: "c1".to_owned(),
                image: "alpine:3".to_owned(),
                ..ContainerConfig::default()
            })
            .unwrap();
        mock.attach("n1", &id, &NetworkAttachment::default()).unwrap();
        assert_eq!(
            mock.inspect_container(&id).unwrap().addresses["n1"],
            "10.5.0.2"
        );
        assert!(matches!(
            mock.remove_network("n1"),
            Err(ClientError::Conflict(_))
        ));
        mock.remove_container(&id, true).unwrap();
        mock.remove_network("n1").unwrap();
        assert!(mock.network_names().is_empty());
    }

    #[test]
    fn injected_failures_match_target_substring() {
        let mock = MockClients::new();
        mock.fail("create_container", "b-");
        let cfg = |name: &str| ContainerConfig {
            name: name.to_owned(),
            ..ContainerConfig::default()
        };
        assert!(mock.create_container(&cfg("a-1")).is_ok());
        assert!(mock.create_container(&cfg("b-1")).is_err());
        assert_eq!(mock.count("create_container"), 2);
        assert_eq!(mock.container_count(), 1);
    }

    #[test]
    fn clients_bundle_shares_one_world() {
        let mock = MockClients::new();
        let clients = mock.clients();
        clients.containers.create_volume("images").unwrap();
        assert!(mock.volume_exists("images"));
    }

    #[test]
    fn silenced_containers_have_no_logs() {
        let mock = MockClients::new();
        mock.silence("server.k");
        let id = mock
            .create_container(&ContainerConfig {
                name: "server.k.k8s-cluster.local.jumppad.dev".to_owned(),
                ..ContainerConfig::default()
            })
            .unwrap();
        mock.start_container(&id).unwrap();
        assert!(mock.container_logs(&id).unwrap().is_empty());
    }
}
