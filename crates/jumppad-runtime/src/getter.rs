use crate::cli;
use crate::http::classify;
use crate::ClientError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Fetches a source (local path, git repository, or HTTP URL) into a directory.
pub trait FileGetter: Send + Sync {
    fn get(&self, source: &str, destination: &Path) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceKind {
    Git(String),
    Http(String),
    Local(PathBuf),
}

fn classify_source(source: &str) -> SourceKind {
    if let Some(rest) = source.strip_prefix("git::") {
        SourceKind::Git(rest.to_owned())
    } else if source.starts_with("github.com/") {
        SourceKind::Git(format!("https://{source}"))
    } else if source.ends_with(".git") && source.contains("://") {
        SourceKind::Git(source.to_owned())
    } else if source.starts_with("http://") || source.starts_with("https://") {
        SourceKind::Http(source.to_owned())
    } else {
        SourceKind::Local(PathBuf::from(source.strip_prefix("file://").unwrap_or(source)))
    }
}

pub struct SourceGetter {
    agent: ureq::Agent,
}

impl Default for SourceGetter {
    fn default() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl SourceGetter {
    pub fn new() -> Self {
        Self::default()
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), ClientError> {
        let resp = self.agent.get(url).call().map_err(|e| classify("http", url, e))?;
        let name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("download");
        fs::create_dir_all(destination)?;
        let mut reader = resp.into_body().into_reader();
        let mut file = fs::File::create(destination.join(name))?;
        std::io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        Ok(())
    }
}

impl FileGetter for SourceGetter {
    fn get(&self, source: &str, destination: &Path) -> Result<(), ClientError> {
        tracing::debug!(source, destination = %destination.display(), "fetching source");
        match classify_source(source) {
            SourceKind::Git(url) => {
                if destination.exists() {
                    fs::remove_dir_all(destination)?;
                }
                let mut cmd = Command::new("git");
                cmd.args(["clone", "--depth", "1", &url]).arg(destination);
                cli::output("git", &mut cmd).map(|_| ())
            }
            SourceKind::Http(url) => self.download(&url, destination),
            SourceKind::Local(path) => {
                if !path.exists() {
                    return Err(ClientError::NotFound(path.display().to_string()));
                }
                copy_tree(&path, destination)?;
                Ok(())
            }
        }
    }
}

/// Copy a file or directory tree. A file copied onto an existing directory
/// lands inside it. Returns every file written, in traversal order.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut written = Vec::new();
    if source.is_file() {
        let target = match source.file_name() {
            Some(name) if destination.is_dir() => destination.join(name),
            _ => destination.to_path_buf(),
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &target)?;
        written.push(target);
        return Ok(written);
    }

    fs::create_dir_all(destination)?;
    let mut entries: Vec<_> = fs::read_dir(source)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let from = entry.path();
        let to = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            written.extend(copy_tree(&from, &to)?);
        } else {
            fs::copy(&from, &to)?;
            written.push(to);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_classification() {
        assert_eq!(
            classify_source("github.com/jumppad-labs/examples"),
            SourceKind::Git("https://github.com/jumppad-labs/examples".to_owned())
        );
        assert_eq!(
            classify_source("git::https://example.com/repo"),
            SourceKind::Git("https://example.com/repo".to_owned())
        );
        assert_eq!(
            classify_source("https://example.com/file.txt"),
            SourceKind::Http("https://example.com/file.txt".to_owned())
        );
        assert_eq!(
            classify_source("./files"),
            SourceKind::Local(PathBuf::from("./files"))
        );
    }

    #[test]
    fn copy_tree_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("sub").join("b.txt"), "b").unwrap();

        let dst = dir.path().join("dst");
        let written = copy_tree(&src, &dst).unwrap();
        assert_eq!(written, vec![dst.join("a.txt"), dst.join("sub").join("b.txt")]);
        assert_eq!(fs::read_to_string(dst.join("sub").join("b.txt")).unwrap(), "b");
    }

    #[test]
    fn copy_file_into_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("f.txt");
        fs::write(&src, "x").unwrap();
        let dst = dir.path().join("out");
        fs::create_dir_all(&dst).unwrap();
        let written = copy_tree(&src, &dst).unwrap();
        assert_eq!(written, vec![dst.join("f.txt")]);
    }

    #[test]
    fn local_getter_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceGetter::new()
            .get(&dir.path().join("nope").display().to_string(), &dir.path().join("d"))
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }
}
