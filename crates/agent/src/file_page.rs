//! Host page backed by a JSON element-tree file.
//!
//! Reads come from the last loaded tree. Submitted composer text is appended
//! to `<page>.outbox.jsonl`, one `{"text": ...}` object per line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::json;
use tracing::info;

use crate::page::{Element, HostPage, InsertMethod, MemoryPage, PageError};

pub fn load_tree(path: &Path) -> anyhow::Result<Element> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading page file {}", path.display()))?;
    let mut tree: Element = serde_json::from_str(&raw)
        .with_context(|| format!("parsing page file {}", path.display()))?;
    tree.assign_missing_ids();
    Ok(tree)
}

pub fn outbox_path(page: &Path) -> PathBuf {
    let mut name = page.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".outbox.jsonl");
    page.with_file_name(name)
}

pub struct FilePage {
    path: PathBuf,
    outbox: PathBuf,
    inner: MemoryPage,
}

impl FilePage {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let tree = load_tree(&path)?;
        Ok(Self {
            outbox: outbox_path(&path),
            path,
            inner: MemoryPage::new(tree),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    /// Re-read the file. Returns true when the tree changed.
    pub fn reload(&self) -> anyhow::Result<bool> {
        let tree = load_tree(&self.path)?;
        if tree == self.inner.document() {
            return Ok(false);
        }
        self.inner.set_document(tree);
        Ok(true)
    }

    fn flush_submissions(&self, before: usize) -> Result<(), PageError> {
        let submitted = self.inner.submitted();
        if submitted.len() <= before {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outbox)
            .map_err(|e| PageError::Rejected(format!("outbox: {}", e)))?;
        for text in &submitted[before..] {
            writeln!(file, "{}", json!({ "text": text }))
                .map_err(|e| PageError::Rejected(format!("outbox: {}", e)))?;
            info!(
                component = "file_page",
                event = "file_page.submitted",
                outbox = %self.outbox.display(),
                "Reply written to outbox"
            );
        }
        Ok(())
    }
}

impl HostPage for FilePage {
    fn document(&self) -> Element {
        self.inner.document()
    }

    fn focus(&self, node: &str) -> Result<(), PageError> {
        self.inner.focus(node)
    }

    fn clear(&self, node: &str) -> Result<(), PageError> {
        self.inner.clear(node)
    }

    fn insert_text(&self, node: &str, text: &str, method: InsertMethod) -> Result<(), PageError> {
        self.inner.insert_text(node, text, method)
    }

    fn press_key(&self, node: &str, key: &str) -> Result<(), PageError> {
        let before = self.inner.submitted().len();
        self.inner.press_key(node, key)?;
        self.flush_submissions(before)
    }

    fn click(&self, node: &str) -> Result<(), PageError> {
        let before = self.inner.submitted().len();
        self.inner.click(node)?;
        self.flush_submissions(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
      "tag": "div",
      "id": "root",
      "children": [
        {"tag": "div", "attributes": {"role": "row"},
         "children": [{"tag": "span", "attributes": {"dir": "auto", "data-sender": "them"}, "text": "Still for sale?"}]},
        {"tag": "div", "id": "composer", "attributes": {"role": "textbox", "contenteditable": "true"}}
      ]
    }"#;

    #[test]
    fn outbox_sits_next_to_page() {
        assert_eq!(
            outbox_path(Path::new("/tmp/chat.json")),
            PathBuf::from("/tmp/chat.json.outbox.jsonl")
        );
    }

    #[test]
    fn submitted_text_is_appended_to_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        std::fs::write(&path, PAGE).unwrap();

        let page = FilePage::open(&path).unwrap();
        page.insert_text("composer", "Yes it is", InsertMethod::InputEvents)
            .unwrap();
        page.press_key("composer", "Enter").unwrap();

        let outbox = std::fs::read_to_string(page.outbox()).unwrap();
        assert_eq!(outbox.trim(), r#"{"text":"Yes it is"}"#);
    }

    #[test]
    fn reload_reports_changes_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.json");
        std::fs::write(&path, PAGE).unwrap();
        let page = FilePage::open(&path).unwrap();
        assert!(!page.reload().unwrap());

        std::fs::write(&path, r#"{"tag": "div"}"#).unwrap();
        assert!(page.reload().unwrap());
        assert!(page.document().children.is_empty());
    }
}
