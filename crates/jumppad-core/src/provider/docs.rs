//! Documentation sites: books made of chapters made of pages, served by a
//! docs container. Tasks track the checks a reader completes.

use super::container::{image_ref, labels, launch, Launch};
use super::{payload, payload_mut, remove_containers_named, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::{ContainerConfig, MountKind, PortMapping, VolumeMount};
use jumppad_schema::kinds::{Book, BookIndex, Chapter, ChapterIndex, Docs, Image, PageIndex, Task};
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DOCS_IMAGE: &str = "ghcr.io/jumppad-labs/docs:v0.5.1";
const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Default)]
pub struct ChapterProvider;

impl Provider for ChapterProvider {
    fn kind(&self) -> &'static str {
        "chapter"
    }

    fn create(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let chapter: Chapter = payload(resource)?;
        let name = resource.info().name.clone();
        let title = if chapter.title.is_empty() {
            name.clone()
        } else {
            chapter.title.clone()
        };
        let pages = chapter
            .pages
            .iter()
            .map(|p| PageIndex {
                title: p.name.clone(),
                uri: format!("/docs/{name}/{}", p.name),
            })
            .collect();
        payload_mut::<Chapter>(resource)?.index = ChapterIndex { title, pages };
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<Chapter>(resource)?.index = ChapterIndex::default();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct BookProvider;

impl Provider for BookProvider {
    fn kind(&self) -> &'static str {
        "book"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let book: Book = payload(resource)?;
        let mut chapters = Vec::with_capacity(book.chapters.len());
        for reference in &book.chapters {
            let chapter = ctx.find_payload::<Chapter>(reference, resource)?;
            if chapter.index.title.is_empty() {
                return Err(ProviderError::precondition(format!(
                    "chapter {reference} has not been indexed"
                )));
            }
            chapters.push(chapter.index.clone());
        }
        payload_mut::<Book>(resource)?.index = BookIndex {
            title: book.title,
            chapters,
        };
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<Book>(resource)?.index = BookIndex::default();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct TaskProvider;

impl Provider for TaskProvider {
    fn kind(&self) -> &'static str {
        "task"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let task: Task = payload(resource)?;
        for c in &task.conditions {
            if c.check.is_empty() {
                return Err(ProviderError::invalid(format!(
                    "{}: condition '{}' has no check",
                    resource.id(),
                    c.id
                )));
            }
        }
        let mut status = "open";
        for reference in &task.prerequisites {
            let prerequisite = ctx.find_payload::<Task>(reference, resource)?;
            if prerequisite.progress_status != "completed" {
                status = "locked";
            }
        }
        payload_mut::<Task>(resource)?.progress_status = status.to_owned();
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        payload_mut::<Task>(resource)?.progress_status.clear();
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct DocsProvider;

/// Book name with its index and every page of its chapters.
struct BookContent {
    name: String,
    index: BookIndex,
    pages: BTreeMap<PathBuf, String>,
}

impl DocsProvider {
    fn content(&self, docs: &Docs, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<BookContent>, ProviderError> {
        let mut books = Vec::with_capacity(docs.content.len());
        for reference in &docs.content {
            let book_resource = ctx.find(reference, resource)?;
            let book = ctx.find_payload::<Book>(reference, resource)?;
            let book_name = book_resource.info().name.clone();
            let mut pages = BTreeMap::new();
            for chapter_ref in &book.chapters {
                let chapter_resource = ctx.find(chapter_ref, book_resource)?;
                let chapter = ctx.find_payload::<Chapter>(chapter_ref, book_resource)?;
                let chapter_name = &chapter_resource.info().name;
                for page in &chapter.pages {
                    let path = Path::new(&book_name)
                        .join(chapter_name)
                        .join(format!("{}.mdx", page.name));
                    pages.insert(path, page.content.clone());
                }
            }
            books.push(BookContent {
                name: book_name,
                index: book.index.clone(),
                pages,
            });
        }
        Ok(books)
    }

    fn checksum(books: &[BookContent]) -> Result<String, ProviderError> {
        let mut hasher = blake3::Hasher::new();
        for book in books {
            hasher.update(book.name.as_bytes());
            hasher.update(serde_json::to_string(&book.index)?.as_bytes());
            for (path, content) in &book.pages {
                hasher.update(path.to_string_lossy().as_bytes());
                hasher.update(content.as_bytes());
            }
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    fn content_dir(resource: &Resource, ctx: &ProviderContext<'_>) -> PathBuf {
        ctx.layout.data_path(&format!("docs-{}", resource.info().name))
    }

    /// Replace the site content directory with the rendered books.
    fn write_content(dir: &Path, books: &[BookContent]) -> Result<(), ProviderError> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;
        let navigation: Vec<&BookIndex> = books.iter().map(|b| &b.index).collect();
        fs::write(dir.join("navigation.json"), serde_json::to_string_pretty(&navigation)?)?;
        for book in books {
            for (path, content) in &book.pages {
                let file = dir.join(path);
                if let Some(parent) = file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(file, content)?;
            }
        }
        Ok(())
    }
}

impl Provider for DocsProvider {
    fn kind(&self) -> &'static str {
        "docs"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let docs: Docs = payload(resource)?;
        let books = self.content(&docs, resource, ctx)?;
        let dir = Self::content_dir(resource, ctx);
        Self::write_content(&dir, &books)?;

        let image = docs.image.clone().unwrap_or_else(|| Image::named(DOCS_IMAGE));
        let port = if docs.port == 0 { DEFAULT_PORT } else { docs.port };
        let name = resource.fqdn();
        info!(id = %resource.id(), port, "starting docs site {name}");
        let config = ContainerConfig {
            name: name.clone(),
            image: image.name.clone(),
            labels: labels(resource, &BTreeMap::new()),
            volumes: vec![VolumeMount {
                source: dir.display().to_string(),
                destination: "/jumppad/content".to_owned(),
                kind: MountKind::Bind,
                read_only: true,
            }],
            ports: vec![PortMapping {
                local: DEFAULT_PORT,
                host: Some(port),
                protocol: "tcp".to_owned(),
            }],
            ..ContainerConfig::default()
        };
        launch(
            ctx,
            resource,
            Launch {
                config,
                image: image_ref(&image),
                networks: &docs.networks,
                health_check: None,
                existing: self.lookup(resource, ctx)?,
            },
        )?;

        let out = payload_mut::<Docs>(resource)?;
        out.container_name = name;
        out.content_checksum = Self::checksum(&books)?;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_containers_named(ctx, &resource.fqdn(), force)?;
        let dir = Self::content_dir(resource, ctx);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(ctx.clients.containers.find_containers(&resource.fqdn())?)
    }

    fn changed(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let docs: Docs = payload(resource)?;
        let books = self.content(&docs, resource, ctx)?;
        Ok(Self::checksum(&books)? != docs.content_checksum)
    }

    /// Rewrites the mounted content in place; the container keeps serving.
    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let docs: Docs = payload(resource)?;
        let books = self.content(&docs, resource, ctx)?;
        let checksum = Self::checksum(&books)?;
        if checksum != docs.content_checksum {
            info!(id = %resource.id(), "docs content changed, rewriting");
            Self::write_content(&Self::content_dir(resource, ctx), &books)?;
            payload_mut::<Docs>(resource)?.content_checksum = checksum;
        }
        Ok(())
    }
}
