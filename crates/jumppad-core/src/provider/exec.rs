//! Scripts run on the host or inside a container.

use super::container::{image_ref, labels, launch, mounts, run_as, Launch};
use super::{payload, payload_mut, remove_containers_named, tolerate, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::{CommandSpec, ContainerConfig, LogWriter};
use jumppad_schema::kinds::{Container, ExecLocal, ExecRemote};
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing::{info, warn};

const SCRIPT_PATH: &str = "/tmp/exec.sh";

fn check_exit(resource: &Resource, code: Option<i32>) -> Result<(), ProviderError> {
    match code {
        Some(0) | None => Ok(()),
        Some(code) => Err(ProviderError::internal(format!(
            "{} exited with code {code}",
            resource.id()
        ))),
    }
}

#[derive(Debug, Default)]
pub struct ExecLocalProvider;

impl Provider for ExecLocalProvider {
    fn kind(&self) -> &'static str {
        "exec_local"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let exec: ExecLocal = payload(resource)?;
        let name = resource.info().name.clone();
        let log_file = exec.daemon.then(|| ctx.layout.logs_dir().join(format!("exec-{name}.log")));
        if log_file.is_some() {
            std::fs::create_dir_all(ctx.layout.logs_dir())?;
        }
        let spec = CommandSpec {
            script: exec.script.clone(),
            working_directory: (!exec.working_directory.is_empty())
                .then(|| PathBuf::from(&exec.working_directory)),
            environment: exec.environment.clone(),
            timeout: Some(exec.timeout()?),
            daemon: exec.daemon,
            log_file,
        };
        info!(id = %resource.id(), daemon = exec.daemon, "running local script");
        let mut out = LogWriter::new(resource.id().to_string());
        let outcome = ctx.clients.commands.run(&spec, &mut out)?;
        out.flush()?;

        let computed = payload_mut::<ExecLocal>(resource)?;
        computed.exit_code = outcome.exit_code;
        computed.pid = outcome.pid;
        check_exit(resource, outcome.exit_code)
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let exec: ExecLocal = payload(resource)?;
        if let Some(pid) = exec.pid {
            info!(id = %resource.id(), pid, "stopping daemon");
            tolerate(
                ctx.clients.commands.kill(pid).map_err(Into::into),
                &format!("stop process {pid}"),
                force,
            )?;
            payload_mut::<ExecLocal>(resource)?.pid = None;
        }
        Ok(())
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let exec: ExecLocal = payload(resource)?;
        Ok(exec.pid.map(|p| p.to_string()).into_iter().collect())
    }
}

#[derive(Debug, Default)]
pub struct ExecRemoteProvider;

/// The script with its environment and working directory folded in, since
/// container exec takes neither.
fn wrapped_script(exec: &ExecRemote) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for (k, v) in &exec.environment {
        let _ = writeln!(script, "export {k}='{}'", v.replace('\'', "'\\''"));
    }
    if !exec.working_directory.is_empty() {
        let _ = writeln!(script, "cd '{}'", exec.working_directory);
    }
    script.push_str(&exec.script);
    script.push('\n');
    script
}

fn transient_name(resource: &Resource) -> String {
    format!("exec.{}", resource.fqdn())
}

impl ExecRemoteProvider {
    /// Run the script in `container` and return its exit code, giving up
    /// after `timeout`.
    fn run_in(
        &self,
        ctx: &ProviderContext<'_>,
        resource: &Resource,
        container: &str,
        exec: &ExecRemote,
    ) -> Result<i32, ProviderError> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("exec.sh");
        std::fs::write(&local, wrapped_script(exec))?;
        ctx.clients.containers.copy_to_container(container, &local, SCRIPT_PATH)?;

        let runtime = ctx.clients.containers.clone();
        let id = container.to_owned();
        let user = run_as(exec.run_as.as_ref());
        let mut out = LogWriter::new(resource.id().to_string());
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let command = ["sh".to_owned(), SCRIPT_PATH.to_owned()];
            let result = runtime.exec(&id, &command, user.as_deref(), &mut out);
            let _ = tx.send(result);
        });

        let timeout = exec.timeout()?;
        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ProviderError::timeout(format!(
                "{} still running after {}s",
                resource.id(),
                timeout.as_secs()
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ProviderError::internal("exec worker exited without a result"))
            }
        }
    }
}

impl Provider for ExecRemoteProvider {
    fn kind(&self) -> &'static str {
        "exec_remote"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let exec: ExecRemote = payload(resource)?;
        let code = if exec.target.is_empty() {
            let Some(image) = &exec.image else {
                return Err(ProviderError::invalid(format!(
                    "{} needs either a target or an image",
                    resource.id()
                )));
            };
            let config = ContainerConfig {
                name: transient_name(resource),
                image: image.name.clone(),
                entrypoint: vec!["tail".to_owned()],
                command: vec!["-f".to_owned(), "/dev/null".to_owned()],
                labels: labels(resource, &BTreeMap::new()),
                volumes: mounts(&exec.volumes)?,
                ..ContainerConfig::default()
            };
            info!(id = %resource.id(), image = %image.name, "running script in a transient container");
            let launched = launch(
                ctx,
                resource,
                Launch {
                    config,
                    image: image_ref(image),
                    networks: &exec.networks,
                    health_check: None,
                    existing: ctx.clients.containers.find_containers(&transient_name(resource))?,
                },
            )?;
            let result = self.run_in(ctx, resource, &launched.id, &exec);
            if let Err(e) = ctx.clients.containers.remove_container(&launched.id, true) {
                warn!(id = %resource.id(), "unable to remove transient container: {e}");
            }
            result?
        } else {
            let target = ctx.find_payload::<Container>(&exec.target, resource)?;
            if target.container_id.is_empty() {
                return Err(ProviderError::precondition(format!(
                    "exec target {} has no running container",
                    exec.target
                )));
            }
            info!(id = %resource.id(), target = %exec.target, "running script in container");
            self.run_in(ctx, resource, &target.container_id, &exec)?
        };

        payload_mut::<ExecRemote>(resource)?.exit_code = Some(code);
        check_exit(resource, Some(code))
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_containers_named(ctx, &transient_name(resource), force)
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::container::ContainerProvider;
    use crate::provider::testing::Harness;
    use crate::ProviderErrorKind;
    use jumppad_schema::kinds::Image;

    fn local(script: &str, daemon: bool) -> Resource {
        Resource::new(
            "setup",
            ExecLocal {
                script: script.to_owned(),
                daemon,
                ..ExecLocal::default()
            },
        )
    }

    #[test]
    fn local_exec_records_exit_code() {
        let h = Harness::new();
        let mut r = local("echo hi", false);
        ExecLocalProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(r.payload::<ExecLocal>().unwrap().exit_code, Some(0));

        h.mock.set_exit_code(3);
        let err = ExecLocalProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert!(err.message.contains("exited with code 3"));
        assert_eq!(r.payload::<ExecLocal>().unwrap().exit_code, Some(3));
    }

    #[test]
    fn local_daemon_is_killed_on_destroy() {
        let h = Harness::new();
        let mut r = local("sleep 100", true);
        ExecLocalProvider.create(&mut r, &h.ctx()).unwrap();
        let pid = r.payload::<ExecLocal>().unwrap().pid.unwrap();
        assert!(pid >= 10_000);
        assert_eq!(ExecLocalProvider.lookup(&r, &h.ctx()).unwrap(), vec![pid.to_string()]);
        ExecLocalProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert_eq!(h.mock.count("kill"), 1);
        assert_eq!(r.payload::<ExecLocal>().unwrap().pid, None);
    }

    #[test]
    fn wrapped_script_exports_environment() {
        let exec = ExecRemote {
            script: "echo $GREETING".to_owned(),
            working_directory: "/work".to_owned(),
            environment: [("GREETING".to_owned(), "it's me".to_owned())].into(),
            ..ExecRemote::default()
        };
        let s = wrapped_script(&exec);
        assert!(s.starts_with("#!/bin/sh\n"));
        assert!(s.contains("export GREETING='it'\\''s me'\n"));
        assert!(s.contains("cd '/work'\n"));
        assert!(s.ends_with("echo $GREETING\n"));
    }

    #[test]
    fn remote_exec_in_transient_container_cleans_up() {
        let h = Harness::new();
        let mut r = Resource::new(
            "migrate",
            ExecRemote {
                script: "./migrate.sh".to_owned(),
                image: Some(Image::named("alpine:3")),
                ..ExecRemote::default()
            },
        );
        ExecRemoteProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(r.payload::<ExecRemote>().unwrap().exit_code, Some(0));
        assert_eq!(h.mock.count("copy_to_container"), 1);
        assert_eq!(h.mock.count("exec"), 1);
        assert_eq!(h.mock.container_count(), 0);
    }

    #[test]
    fn remote_exec_in_target_container() {
        let h0 = Harness::new();
        let mut target = Resource::new(
            "app",
            Container {
                image: Image::named("alpine:3"),
                ..Container::default()
            },
        );
        ContainerProvider.create(&mut target, &h0.ctx()).unwrap();
        let h = h0.with(target);
        let mut r = Resource::new(
            "seed",
            ExecRemote {
                script: "seed".to_owned(),
                target: "resource.container.app".to_owned(),
                ..ExecRemote::default()
            },
        );
        ExecRemoteProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(h.mock.container_count(), 1);
        assert_eq!(h.mock.count("exec"), 1);
    }

    #[test]
    fn remote_exec_needs_target_or_image() {
        let h = Harness::new();
        let mut r = Resource::new("x", ExecRemote::default());
        let err = ExecRemoteProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidArgument);
    }
}
