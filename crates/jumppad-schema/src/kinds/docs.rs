use super::container::{Image, NetworkAttachment};
use super::Payload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A documentation site served from a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Docs {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    /// References to `book` resources.
    pub content: Vec<String>,
    pub port: u16,

    pub container_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_checksum: String,
}

impl Payload for Docs {
    const KIND: &'static str = "docs";
    const COMPUTED: &'static [&'static str] = &["container_name", "content_checksum"];

    fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.networks.iter().map(|n| n.id.clone()).collect();
        refs.extend(self.content.iter().cloned());
        refs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageIndex {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterIndex {
    pub title: String,
    pub pages: Vec<PageIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookIndex {
    pub title: String,
    pub chapters: Vec<ChapterIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Book {
    pub title: String,
    /// References to `chapter` resources, in reading order.
    pub chapters: Vec<String>,

    pub index: BookIndex,
}

impl Payload for Book {
    const KIND: &'static str = "book";
    const COMPUTED: &'static [&'static str] = &["index"];

    fn references(&self) -> Vec<String> {
        self.chapters.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chapter {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub pages: Vec<Page>,
    /// Page name → reference to a `task` resource.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tasks: BTreeMap<String, String>,

    pub index: ChapterIndex,
}

impl Payload for Chapter {
    const KIND: &'static str = "chapter";
    const COMPUTED: &'static [&'static str] = &["index"];

    fn references(&self) -> Vec<String> {
        self.tasks.values().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    pub id: String,
    pub description: String,
    pub check: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub solve: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// References to tasks that must be completed first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
    pub conditions: Vec<Condition>,

    pub progress_status: String,
}

impl Payload for Task {
    const KIND: &'static str = "task";
    const COMPUTED: &'static [&'static str] = &["progress_status"];

    fn references(&self) -> Vec<String> {
        self.prerequisites.clone()
    }
}
