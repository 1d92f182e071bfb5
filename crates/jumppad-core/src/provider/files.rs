//! Rendered templates and copied files.

use super::{payload, payload_mut, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::copy_tree;
use jumppad_schema::kinds::{FileCopy, Template};
use jumppad_schema::Resource;
use minijinja::{Environment, UndefinedBehavior, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn quote(value: &Value) -> String {
    format!("\"{}\"", value.to_string().replace('"', "\\\""))
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("quote", quote);
    env
}

/// Render `source` with `variables` using the template filters.
pub fn render(source: &str, variables: &BTreeMap<String, serde_json::Value>) -> Result<String, ProviderError> {
    environment()
        .render_str(source, Value::from_serialize(variables))
        .map_err(|e| ProviderError::invalid(format!("template error: {e}")))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct TemplateProvider;

impl Provider for TemplateProvider {
    fn kind(&self) -> &'static str {
        "template"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let template: Template = payload(resource)?;
        if template.destination.is_empty() {
            return Err(ProviderError::invalid(format!("{} has no destination", resource.id())));
        }
        let rendered = render(&template.source, &template.variables)?;
        let destination = Path::new(&template.destination);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, rendered)?;
        info!(id = %resource.id(), "rendered template to {}", destination.display());
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        let template: Template = payload(resource)?;
        if !template.destination.is_empty() {
            remove_if_exists(Path::new(&template.destination))?;
        }
        Ok(())
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let template: Template = payload(resource)?;
        Ok(vec![template.destination])
    }
}

/// blake3 over every file below `root`, keyed by relative path.
pub(crate) fn tree_digest(root: &Path) -> io::Result<String> {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, files)?;
            } else {
                files.push(path);
            }
        }
        Ok(())
    }
    let mut files = Vec::new();
    if root.is_dir() {
        walk(root, &mut files)?;
    } else {
        files.push(root.to_path_buf());
    }
    files.sort();
    let mut hasher = blake3::Hasher::new();
    for file in files {
        let rel = file.strip_prefix(root).unwrap_or(&file);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(&fs::read(&file)?);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn set_permissions(files: &[PathBuf], mode: &str) -> Result<(), ProviderError> {
    if mode.is_empty() {
        return Ok(());
    }
    let bits = u32::from_str_radix(mode.trim_start_matches("0o"), 8)
        .map_err(|_| ProviderError::invalid(format!("invalid permissions '{mode}'")))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for f in files {
            fs::set_permissions(f, fs::Permissions::from_mode(bits))?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (files, bits);
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct CopyProvider;

impl CopyProvider {
    /// Fetch a remote source into a temporary directory.
    fn fetch(&self, source: &str, ctx: &ProviderContext<'_>) -> Result<tempfile::TempDir, ProviderError> {
        let dir = tempfile::tempdir()?;
        ctx.clients.getter.get(source, dir.path())?;
        Ok(dir)
    }

    fn copy(&self, resource: &mut Resource, from: &Path, copy: &FileCopy) -> Result<(), ProviderError> {
        fs::create_dir_all(&copy.destination)?;
        let written = copy_tree(from, Path::new(&copy.destination))?;
        set_permissions(&written, &copy.permissions)?;
        info!(id = %resource.id(), files = written.len(), "copied {} to {}", copy.source, copy.destination);
        payload_mut::<FileCopy>(resource)?.copied_files =
            written.iter().map(|p| p.display().to_string()).collect();
        Ok(())
    }

    fn remove_copied(&self, resource: &mut Resource) -> Result<(), ProviderError> {
        let copy: FileCopy = payload(resource)?;
        for file in &copy.copied_files {
            remove_if_exists(Path::new(file))?;
        }
        payload_mut::<FileCopy>(resource)?.copied_files.clear();
        Ok(())
    }
}

impl Provider for CopyProvider {
    fn kind(&self) -> &'static str {
        "copy"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let copy: FileCopy = payload(resource)?;
        if copy.is_remote() {
            let fetched = self.fetch(&copy.source, ctx)?;
            let digest = tree_digest(fetched.path())?;
            self.copy(resource, fetched.path(), &copy)?;
            resource.info_mut().checksum = Some(digest);
        } else {
            let source = Path::new(&copy.source);
            if !source.exists() {
                return Err(ProviderError::invalid(format!(
                    "{}: source {} does not exist",
                    resource.id(),
                    copy.source
                )));
            }
            self.copy(resource, source, &copy)?;
        }
        Ok(())
    }

    /// Removes only the files recorded as copied, never the source.
    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        self.remove_copied(resource)
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let copy: FileCopy = payload(resource)?;
        Ok(copy.copied_files)
    }

    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let copy: FileCopy = payload(resource)?;
        if !copy.is_remote() {
            return Ok(());
        }
        let fetched = self.fetch(&copy.source, ctx)?;
        let digest = tree_digest(fetched.path())?;
        if resource.info().checksum.as_deref() == Some(digest.as_str()) {
            debug!(id = %resource.id(), "remote source unchanged");
            return Ok(());
        }
        info!(id = %resource.id(), "remote source changed, copying again");
        self.remove_copied(resource)?;
        self.copy(resource, fetched.path(), &copy)?;
        resource.info_mut().checksum = Some(digest);
        Ok(())
    }

    fn changed(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let copy: FileCopy = payload(resource)?;
        if !copy.is_remote() {
            return Ok(false);
        }
        let fetched = match self.fetch(&copy.source, ctx) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(id = %resource.id(), "unable to fetch {}: {e}", copy.source);
                return Ok(false);
            }
        };
        let digest = tree_digest(fetched.path())?;
        Ok(resource.info().checksum.as_deref() != Some(digest.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::Harness;
    use crate::ProviderErrorKind;
    use serde_json::json;

    #[test]
    fn template_renders_with_filters() {
        let vars: BTreeMap<_, _> = [
            ("name".to_owned(), json!("  web  ")),
            ("port".to_owned(), json!(8080)),
        ]
        .into();
        let out = render("host = {{ name | trim | quote }}\nport = {{ port }}", &vars).unwrap();
        assert_eq!(out, "host = \"web\"\nport = 8080");
        let err = render("{{ missing }}", &vars).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidArgument);
    }

    #[test]
    fn template_writes_and_removes_destination() {
        let h = Harness::new();
        let dest = h.dir.path().join("out/config.hcl");
        let mut r = Resource::new(
            "cfg",
            Template {
                source: "data_dir = {{ dir | quote }}".to_owned(),
                destination: dest.display().to_string(),
                variables: [("dir".to_owned(), json!("/data"))].into(),
            },
        );
        TemplateProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "data_dir = \"/data\"");
        TemplateProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert!(!dest.exists());
        TemplateProvider.destroy(&mut r, &h.ctx(), false).unwrap();
    }

    #[test]
    fn local_copy_records_and_removes_only_copied_files() {
        let h = Harness::new();
        let src = h.dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();
        let dest = h.dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "mine").unwrap();

        let mut r = Resource::new(
            "files",
            FileCopy {
                source: src.display().to_string(),
                destination: dest.display().to_string(),
                permissions: "0600".to_owned(),
                ..FileCopy::default()
            },
        );
        CopyProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(r.payload::<FileCopy>().unwrap().copied_files.len(), 2);
        assert!(dest.join("nested/b.txt").exists());

        CopyProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert!(!dest.join("a.txt").exists());
        assert!(dest.join("keep.txt").exists());
        assert!(src.join("a.txt").exists());
    }

    #[test]
    fn missing_local_source_is_invalid() {
        let h = Harness::new();
        let mut r = Resource::new(
            "files",
            FileCopy {
                source: "/no/such/source".to_owned(),
                destination: h.dir.path().join("d").display().to_string(),
                ..FileCopy::default()
            },
        );
        let err = CopyProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidArgument);
    }

    #[test]
    fn remote_copy_refetches_and_compares_digest() {
        let h = Harness::new();
        let dest = h.dir.path().join("remote");
        let mut r = Resource::new(
            "docs",
            FileCopy {
                source: "https://example.com/docs.zip".to_owned(),
                destination: dest.display().to_string(),
                ..FileCopy::default()
            },
        );
        CopyProvider.create(&mut r, &h.ctx()).unwrap();
        assert!(dest.join("README.md").exists());
        assert!(r.info().checksum.is_some());
        assert!(!CopyProvider.changed(&r, &h.ctx()).unwrap());

        r.info_mut().checksum = Some("stale".to_owned());
        assert!(CopyProvider.changed(&r, &h.ctx()).unwrap());
        CopyProvider.refresh(&mut r, &h.ctx()).unwrap();
        assert_ne!(r.info().checksum.as_deref(), Some("stale"));
        assert_eq!(h.mock.count("get"), 4);
    }

    #[test]
    fn tree_digest_depends_on_names_and_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "1").unwrap();
        let first = tree_digest(dir.path()).unwrap();
        fs::write(dir.path().join("a"), "2").unwrap();
        let second = tree_digest(dir.path()).unwrap();
        assert_ne!(first, second);
        fs::rename(dir.path().join("a"), dir.path().join("b")).unwrap();
        assert_ne!(second, tree_digest(dir.path()).unwrap());
    }
}
