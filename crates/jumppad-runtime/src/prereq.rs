use std::fmt;
use std::process::Command;

/// A host tool Jumppad shells out to, with install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const TOOLS: &[MissingPrereq] = &[
    MissingPrereq {
        name: "docker",
        purpose: "containers, networks, volumes and cluster nodes",
        install_hint: "https://docs.docker.com/engine/install/ or podman-docker",
    },
    MissingPrereq {
        name: "kubectl",
        purpose: "applying k8s_config resources",
        install_hint: "https://kubernetes.io/docs/tasks/tools/",
    },
    MissingPrereq {
        name: "helm",
        purpose: "installing helm releases",
        install_hint: "https://helm.sh/docs/intro/install/",
    },
    MissingPrereq {
        name: "git",
        purpose: "fetching git sources for copy and module resources",
        install_hint: "zypper install git | apt install git | dnf install git | pacman -S git",
    },
];

/// Check every host tool the system clients shell out to.
/// An empty list means all of them were found on PATH.
pub fn check_prereqs() -> Vec<MissingPrereq> {
    check_with(command_exists)
}

fn check_with(exists: impl Fn(&str) -> bool) -> Vec<MissingPrereq> {
    TOOLS
        .iter()
        .filter(|t| !exists(t.name))
        .map(|t| MissingPrereq {
            name: t.name,
            purpose: t.purpose,
            install_hint: t.install_hint,
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nResources that need these tools will fail when applied.");
    msg
}
