use crate::cli;
use crate::container::{ContainerConfig, ContainerInfo, ContainerRuntime, ImageRef, MountKind};
use crate::network::{NetworkAttachment, NetworkConfig, NetworkInfo, NetworkRuntime};
use crate::ClientError;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::Command;

const PROGRAM: &str = "docker";

/// Container engine client backed by the `docker` CLI.
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: PROGRAM.to_owned(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a compatible binary such as `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn run<I, S>(&self, args: I) -> Result<String, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        cli::output(PROGRAM, self.command().args(args))
    }

    fn login(&self, image: &ImageRef) -> Result<(), ClientError> {
        let (Some(user), Some(password)) = (&image.username, &image.password) else {
            return Ok(());
        };
        cli::output_with_stdin(
            PROGRAM,
            self.command()
                .args(["login", "--username", user.as_str(), "--password-stdin", image.registry()]),
            password.as_bytes(),
        )?;
        Ok(())
    }
}

/// Arguments for `docker create` from a container config.
pub(crate) fn create_args(config: &ContainerConfig) -> Vec<String> {
    let mut args = vec![
        "create".to_owned(),
        "--name".to_owned(),
        config.name.clone(),
    ];
    match &config.network_mode {
        Some(mode) => {
            args.push("--network".to_owned());
            args.push(mode.clone());
        }
        None => {
            args.push("--hostname".to_owned());
            args.push(config.name.clone());
        }
    }
    if config.privileged {
        args.push("--privileged".to_owned());
    }
    for (k, v) in &config.environment {
        args.push("--env".to_owned());
        args.push(format!("{k}={v}"));
    }
    for (k, v) in &config.labels {
        args.push("--label".to_owned());
        args.push(format!("{k}={v}"));
    }
    for v in &config.volumes {
        match v.kind {
            MountKind::Tmpfs => {
                args.push("--tmpfs".to_owned());
                args.push(v.destination.clone());
            }
            MountKind::Bind | MountKind::Volume => {
                let kind = if v.kind == MountKind::Bind { "bind" } else { "volume" };
                let mut spec = format!("type={kind},source={},target={}", v.source, v.destination);
                if v.read_only {
                    spec.push_str(",readonly");
                }
                args.push("--mount".to_owned());
                args.push(spec);
            }
        }
    }
    for p in &config.ports {
        let proto = if p.protocol.is_empty() { "tcp" } else { p.protocol.as_str() };
        let host = p.host.unwrap_or(p.local);
        args.push("--publish".to_owned());
        args.push(format!("{host}:{}/{proto}", p.local));
    }
    for d in &config.dns {
        args.push("--dns".to_owned());
        args.push(d.clone());
    }
    if let Some(cpu) = config.cpu {
        args.push("--cpus".to_owned());
        args.push(format!("{:.2}", f64::from(cpu) / 1000.0));
    }
    if let Some(mem) = config.memory_mb {
        args.push("--memory".to_owned());
        args.push(format!("{mem}m"));
    }
    if config.max_restart_count > 0 {
        args.push("--restart".to_owned());
        args.push(format!("on-failure:{}", config.max_restart_count));
    }
    if let Some(user) = &config.run_as {
        args.push("--user".to_owned());
        args.push(user.clone());
    }
    if let Some((first, rest)) = config.entrypoint.split_first() {
        args.push("--entrypoint".to_owned());
        args.push(first.clone());
        args.push(config.image.clone());
        args.extend(rest.iter().cloned());
    } else {
        args.push(config.image.clone());
    }
    args.extend(config.command.iter().cloned());
    args
}

fn parse_container_info(raw: &str) -> Result<ContainerInfo, ClientError> {
    let v: Value = serde_json::from_str(raw)?;
    let c = v
        .get(0)
        .ok_or_else(|| ClientError::NotFound("container".to_owned()))?;
    let mut info = ContainerInfo {
        id: c["Id"].as_str().unwrap_or_default().to_owned(),
        name: c["Name"]
            .as_str()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_owned(),
        running: c["State"]["Running"].as_bool().unwrap_or(false),
        image_id: c["Image"].as_str().unwrap_or_default().to_owned(),
        ..ContainerInfo::default()
    };
    if let Some(labels) = c["Config"]["Labels"].as_object() {
        for (k, v) in labels {
            info.labels.insert(k.clone(), v.as_str().unwrap_or_default().to_owned());
        }
    }
    if let Some(networks) = c["NetworkSettings"]["Networks"].as_object() {
        for (name, n) in networks {
            if let Some(ip) = n["IPAddress"].as_str().filter(|s| !s.is_empty()) {
                info.addresses.insert(name.clone(), ip.to_owned());
            }
        }
    }
    Ok(info)
}

fn parse_network_info(raw: &str) -> Result<Option<NetworkInfo>, ClientError> {
    let v: Value = serde_json::from_str(raw)?;
    let Some(n) = v.get(0) else {
        return Ok(None);
    };
    Ok(Some(NetworkInfo {
        id: n["Id"].as_str().unwrap_or_default().to_owned(),
        name: n["Name"].as_str().unwrap_or_default().to_owned(),
        subnet: n["IPAM"]["Config"][0]["Subnet"]
            .as_str()
            .unwrap_or_default()
            .to_owned(),
        containers: n["Containers"]
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default(),
    }))
}

impl ContainerRuntime for DockerCli {
    fn pull_image(&self, image: &ImageRef, force: bool) -> Result<String, ClientError> {
        if !force {
            if let Some(id) = self.image_id(&image.name)? {
                tracing::debug!(image = %image.name, "image cached, skipping pull");
                return Ok(id);
            }
        }
        self.login(image)?;
        tracing::info!(image = %image.name, "pulling image");
        self.run(["pull", "--quiet", image.name.as_str()])?;
        self.image_id(&image.name)?
            .ok_or_else(|| ClientError::NotFound(format!("image {} after pull", image.name)))
    }

    fn image_id(&self, image: &str) -> Result<Option<String>, ClientError> {
        match self.run(["image", "inspect", "--format", "{{.Id}}", image]) {
            Ok(out) => Ok(Some(out.trim().to_owned())),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_container(&self, config: &ContainerConfig) -> Result<String, ClientError> {
        let out = self.run(create_args(config))?;
        Ok(out.trim().to_owned())
    }

    fn start_container(&self, id: &str) -> Result<(), ClientError> {
        self.run(["start", id]).map(|_| ())
    }

    fn remove_container(&self, id: &str, force: bool) -> Result<(), ClientError> {
        let mut args = vec!["rm", "--volumes"];
        if force {
            args.push("--force");
        }
        args.push(id);
        self.run(args).map(|_| ())
    }

    fn find_containers(&self, name: &str) -> Result<Vec<String>, ClientError> {
        let filter = format!("name=^/{name}$");
        let out = self.run(["ps", "--all", "--quiet", "--no-trunc", "--filter", filter.as_str()])?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect())
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ClientError> {
        parse_container_info(&self.run(["container", "inspect", id])?)
    }

    fn container_logs(&self, id: &str) -> Result<String, ClientError> {
        let out = self
            .command()
            .args(["logs", id])
            .output()
            .map_err(|e| cli::spawn_error(PROGRAM, &e))?;
        if !out.status.success() {
            return Err(ClientError::from_stderr(PROGRAM, &String::from_utf8_lossy(&out.stderr)));
        }
        let mut logs = String::from_utf8_lossy(&out.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(logs)
    }

    fn exec(
        &self,
        id: &str,
        command: &[String],
        user: Option<&str>,
        output: &mut dyn Write,
    ) -> Result<i32, ClientError> {
        let mut cmd = self.command();
        cmd.arg("exec");
        if let Some(u) = user {
            cmd.args(["--user", u]);
        }
        cmd.arg(id).args(command);
        cli::stream(PROGRAM, &mut cmd, output)
    }

    fn copy_to_container(&self, id: &str, source: &Path, destination: &str) -> Result<(), ClientError> {
        let target = format!("{id}:{destination}");
        let mut cmd = self.command();
        cmd.arg("cp").arg(source).arg(target);
        cli::output(PROGRAM, &mut cmd).map(|_| ())
    }

    fn copy_from_container(&self, id: &str, source: &str, destination: &Path) -> Result<(), ClientError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let from = format!("{id}:{source}");
        let mut cmd = self.command();
        cmd.arg("cp").arg(from).arg(destination);
        cli::output(PROGRAM, &mut cmd).map(|_| ())
    }

    fn create_volume(&self, name: &str) -> Result<(), ClientError> {
        self.run(["volume", "create", name]).map(|_| ())
    }

    fn remove_volume(&self, name: &str) -> Result<(), ClientError> {
        match self.run(["volume", "rm", name]) {
            Ok(_) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn save_images(&self, images: &[String], destination: &Path) -> Result<(), ClientError> {
        let mut cmd = self.command();
        cmd.arg("save").arg("--output").arg(destination).args(images);
        cli::output(PROGRAM, &mut cmd).map(|_| ())
    }
}

impl NetworkRuntime for DockerCli {
    fn create_network(&self, config: &NetworkConfig) -> Result<String, ClientError> {
        let mut args = vec![
            "network".to_owned(),
            "create".to_owned(),
            "--driver".to_owned(),
            "bridge".to_owned(),
        ];
        if !config.subnet.is_empty() {
            args.push("--subnet".to_owned());
            args.push(config.subnet.clone());
        }
        if config.enable_ipv6 {
            args.push("--ipv6".to_owned());
        }
        for (k, v) in &config.labels {
            args.push("--label".to_owned());
            args.push(format!("{k}={v}"));
        }
        args.push(config.name.clone());
        Ok(self.run(args)?.trim().to_owned())
    }

    fn find_network(&self, name: &str) -> Result<Option<NetworkInfo>, ClientError> {
        match self.run(["network", "inspect", name]) {
            Ok(raw) => parse_network_info(&raw),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_network(&self, name: &str) -> Result<(), ClientError> {
        self.run(["network", "rm", name]).map(|_| ())
    }

    fn attach(&self, network: &str, container_id: &str, attachment: &NetworkAttachment) -> Result<(), ClientError> {
        let mut args = vec!["network".to_owned(), "connect".to_owned()];
        if let Some(ip) = &attachment.ip_address {
            args.push("--ip".to_owned());
            args.push(ip.clone());
        }
        for alias in &attachment.aliases {
            args.push("--alias".to_owned());
            args.push(alias.clone());
        }
        args.push(network.to_owned());
        args.push(container_id.to_owned());
        self.run(args).map(|_| ())
    }

    fn detach(&self, network: &str, container_id: &str) -> Result<(), ClientError> {
        self.run(["network", "disconnect", "--force", network, container_id])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{PortMapping, VolumeMount};

    #[test]
    fn create_args_for_full_config() {
        let mut config = ContainerConfig {
            name: "web.container.local.jumppad.dev".to_owned(),
            image: "nginx:1".to_owned(),
            command: vec!["nginx".to_owned(), "-g".to_owned()],
            privileged: true,
            volumes: vec![
                VolumeMount {
                    source: "/data".to_owned(),
                    destination: "/srv".to_owned(),
                    kind: MountKind::Bind,
                    read_only: true,
                },
                VolumeMount {
                    destination: "/tmp".to_owned(),
                    kind: MountKind::Tmpfs,
                    ..VolumeMount::default()
                },
            ],
            ports: vec![PortMapping {
                local: 80,
                host: Some(8080),
                protocol: String::new(),
            }],
            memory_mb: Some(512),
            max_restart_count: 3,
            ..ContainerConfig::default()
        };
        config.environment.insert("A".to_owned(), "1".to_owned());
        let args = create_args(&config).join(" ");
        assert!(args.starts_with("create --name web.container.local.jumppad.dev"));
        assert!(args.contains("--hostname web.container.local.jumppad.dev"));
        assert!(args.contains("--privileged"));
        assert!(args.contains("--env A=1"));
        assert!(args.contains("--mount type=bind,source=/data,target=/srv,readonly"));
        assert!(args.contains("--tmpfs /tmp"));
        assert!(args.contains("--publish 8080:80/tcp"));
        assert!(args.contains("--memory 512m"));
        assert!(args.contains("--restart on-failure:3"));
        assert!(args.ends_with("nginx:1 nginx -g"));
    }

    #[test]
    fn create_args_entrypoint_precedes_image() {
        let config = ContainerConfig {
            name: "c".to_owned(),
            image: "alpine".to_owned(),
            entrypoint: vec!["/bin/sh".to_owned(), "-c".to_owned()],
            command: vec!["sleep 1".to_owned()],
            network_mode: Some("container:abc".to_owned()),
            ..ContainerConfig::default()
        };
        let args = create_args(&config);
        let joined = args.join(" ");
        assert!(joined.contains("--network container:abc"));
        assert!(!joined.contains("--hostname"));
        assert!(joined.ends_with("--entrypoint /bin/sh alpine -c sleep 1"));
    }

    #[test]
    fn parses_container_inspect() {
        let raw = r#"[{"Id":"abc","Name":"/web","State":{"Running":true},"Image":"sha256:1",
            "Config":{"Labels":{"created_by":"jumppad"}},
            "NetworkSettings":{"Networks":{"n1":{"IPAddress":"10.5.0.2"},"bridge":{"IPAddress":""}}}}]"#;
        let info = parse_container_info(raw).unwrap();
        assert_eq!(info.id, "abc");
        assert_eq!(info.name, "web");
        assert!(info.running);
        assert_eq!(info.image_id, "sha256:1");
        assert_eq!(info.labels.get("created_by").map(String::as_str), Some("jumppad"));
        assert_eq!(info.addresses.get("n1").map(String::as_str), Some("10.5.0.2"));
        assert!(!info.addresses.contains_key("bridge"));
    }

    #[test]
    fn parses_network_inspect() {
        let raw = r#"[{"Id":"nid","Name":"n1","IPAM":{"Config":[{"Subnet":"10.5.0.0/16"}]},
            "Containers":{"c1":{},"c2":{}}}]"#;
        let info = parse_network_info(raw).unwrap().unwrap();
        assert_eq!(info.subnet, "10.5.0.0/16");
        assert_eq!(info.containers.len(), 2);
        assert!(parse_network_info("[]").unwrap().is_none());
    }
}
