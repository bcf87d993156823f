//! Host page model.
//!
//! The page is seen as a tree of [`Element`]s (read surface) plus a small set
//! of input operations addressed by node id (write surface). Lookups go
//! through ordered [`MatcherChain`]s: first matching strategy wins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("No element with id {0}")]
    UnknownNode(String),

    #[error("Insertion method {0:?} not supported by this page")]
    Unsupported(InsertMethod),

    #[error("Page rejected the operation: {0}")]
    Rejected(String),
}

/// How text reaches the composer, most event-faithful first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMethod {
    /// Editing command that fires the same input events as typing.
    InputEvents,
    /// Direct value assignment followed by a synthetic `input` event.
    SetValue,
}

pub const INSERT_METHODS: [InsertMethod; 2] = [InsertMethod::InputEvents, InsertMethod::SetValue];

/// One node of the page tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn role(&self) -> Option<&str> {
        self.attr("role")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn is_editable(&self) -> bool {
        matches!(self.attr("contenteditable"), Some("true") | Some(""))
            || self.tag.eq_ignore_ascii_case("textarea")
    }

    pub fn is_visible(&self) -> bool {
        if self.attributes.contains_key("hidden") || self.attr("aria-hidden") == Some("true") {
            return false;
        }
        !self.attr("style").is_some_and(|style| {
            style
                .split(';')
                .any(|decl| decl.replace(' ', "").eq_ignore_ascii_case("display:none"))
        })
    }

    /// Own text followed by every descendant's text, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for el in self.descendants() {
            out.push_str(&el.text);
        }
        out
    }

    /// Pre-order traversal, including `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Give every id-less node a path id (`@`, `@0`, `@0.2`, ...).
    ///
    /// Path ids depend only on tree shape, so reloading an unchanged page
    /// yields the same ids. Existing ids are kept.
    pub fn assign_missing_ids(&mut self) {
        self.assign_missing_ids_at("@".to_string());
    }

    fn assign_missing_ids_at(&mut self, path: String) {
        if self.id.is_empty() {
            self.id = path.clone();
        }
        let prefix = if path == "@" { path } else { format!("{}.", path) };
        for (i, child) in self.children.iter_mut().enumerate() {
            child.assign_missing_ids_at(format!("{}{}", prefix, i));
        }
    }

    /// An empty id never names a node.
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if id.is_empty() {
            return None;
        }
        self.descendants().find(|el| el.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if id.is_empty() {
            return None;
        }
        self.find_by_id_mut_inner(id)
    }

    fn find_by_id_mut_inner(&mut self, id: &str) -> Option<&mut Element> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_id_mut_inner(id))
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let el = self.stack.pop()?;
        self.stack.extend(el.children.iter().rev());
        Some(el)
    }
}

type Predicate = dyn Fn(&Element) -> bool + Send + Sync;

/// A named element predicate
#[derive(Clone)]
pub struct ElementMatcher {
    pub name: &'static str,
    predicate: Arc<Predicate>,
}

impl fmt::Debug for ElementMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ElementMatcher").field(&self.name).finish()
    }
}

impl ElementMatcher {
    pub fn new(
        name: &'static str,
        predicate: impl Fn(&Element) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, el: &Element) -> bool {
        (self.predicate)(el)
    }

    pub fn attr_eq(name: &'static str, attr: &'static str, value: &'static str) -> Self {
        Self::new(name, move |el| el.attr(attr) == Some(value))
    }

    /// First descendant of `root` (inclusive) that matches.
    pub fn find<'a>(&self, root: &'a Element) -> Option<&'a Element> {
        root.descendants().find(|el| self.matches(el))
    }

    pub fn find_all<'a>(&self, root: &'a Element) -> Vec<&'a Element> {
        root.descendants().filter(|el| self.matches(el)).collect()
    }
}

/// Ordered fallback list of matchers
#[derive(Debug, Clone, Default)]
pub struct MatcherChain {
    matchers: Vec<ElementMatcher>,
}

impl MatcherChain {
    pub fn new(matchers: Vec<ElementMatcher>) -> Self {
        Self { matchers }
    }

    /// Try each strategy in order; returns the winning strategy's name and element.
    pub fn first_match<'a>(&self, root: &'a Element) -> Option<(&'static str, &'a Element)> {
        self.matchers
            .iter()
            .find_map(|m| m.find(root).map(|el| (m.name, el)))
    }
}

/// Read and write surface of the page the agent is attached to.
pub trait HostPage: Send + Sync {
    /// Current tree of the watched subtree.
    fn document(&self) -> Element;

    fn focus(&self, node: &str) -> Result<(), PageError>;

    /// Remove any placeholder or stale content from an editable node.
    fn clear(&self, node: &str) -> Result<(), PageError>;

    fn insert_text(&self, node: &str, text: &str, method: InsertMethod) -> Result<(), PageError>;

    fn press_key(&self, node: &str, key: &str) -> Result<(), PageError>;

    fn click(&self, node: &str) -> Result<(), PageError>;
}

/// Record of a write made to a [`MemoryPage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    Focus(String),
    Clear(String),
    Insert {
        node: String,
        text: String,
        method: InsertMethod,
    },
    Key {
        node: String,
        key: String,
    },
    Click(String),
    /// Text that left the composer through Enter or a send control.
    Submitted(String),
}

/// In-memory page: a replaceable tree plus an action log.
pub struct MemoryPage {
    inner: Mutex<MemoryPageInner>,
    supported: Vec<InsertMethod>,
}

struct MemoryPageInner {
    document: Element,
    actions: Vec<PageAction>,
    pending: Option<String>,
}

impl MemoryPage {
    pub fn new(document: Element) -> Self {
        Self::with_methods(document, INSERT_METHODS.to_vec())
    }

    pub fn with_methods(mut document: Element, supported: Vec<InsertMethod>) -> Self {
        document.assign_missing_ids();
        Self {
            inner: Mutex::new(MemoryPageInner {
                document,
                actions: Vec::new(),
                pending: None,
            }),
            supported,
        }
    }

    pub fn set_document(&self, mut document: Element) {
        document.assign_missing_ids();
        self.lock().document = document;
    }

    pub fn actions(&self) -> Vec<PageAction> {
        self.lock().actions.clone()
    }

    /// Texts submitted so far, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.lock()
            .actions
            .iter()
            .filter_map(|a| match a {
                PageAction::Submitted(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryPageInner> {
        // A poisoned test page is still readable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_node<T>(
        &self,
        node: &str,
        f: impl FnOnce(&mut MemoryPageInner) -> T,
    ) -> Result<T, PageError> {
        let mut inner = self.lock();
        if inner.document.find_by_id(node).is_none() {
            return Err(PageError::UnknownNode(node.to_string()));
        }
        Ok(f(&mut inner))
    }

    fn submit(inner: &mut MemoryPageInner) {
        if let Some(text) = inner.pending.take() {
            inner.actions.push(PageAction::Submitted(text));
        }
    }
}

impl HostPage for MemoryPage {
    fn document(&self) -> Element {
        self.lock().document.clone()
    }

    fn focus(&self, node: &str) -> Result<(), PageError> {
        self.with_node(node, |inner| inner.actions.push(PageAction::Focus(node.to_string())))
    }

    fn clear(&self, node: &str) -> Result<(), PageError> {
        self.with_node(node, |inner| {
            if let Some(el) = inner.document.find_by_id_mut(node) {
                el.text.clear();
                el.children.clear();
            }
            inner.pending = None;
            inner.actions.push(PageAction::Clear(node.to_string()));
        })
    }

    fn insert_text(&self, node: &str, text: &str, method: InsertMethod) -> Result<(), PageError> {
        if !self.supported.contains(&method) {
            return Err(PageError::Unsupported(method));
        }
        self.with_node(node, |inner| {
            if let Some(el) = inner.document.find_by_id_mut(node) {
                el.text.push_str(text);
            }
            inner
                .pending
                .get_or_insert_with(String::new)
                .push_str(text);
            inner.actions.push(PageAction::Insert {
                node: node.to_string(),
                text: text.to_string(),
                method,
            });
        })
    }

    fn press_key(&self, node: &str, key: &str) -> Result<(), PageError> {
        self.with_node(node, |inner| {
            inner.actions.push(PageAction::Key {
                node: node.to_string(),
                key: key.to_string(),
            });
            if key == "Enter" {
                Self::submit(inner);
            }
        })
    }

    fn click(&self, node: &str) -> Result<(), PageError> {
        self.with_node(node, |inner| {
            inner.actions.push(PageAction::Click(node.to_string()));
            Self::submit(inner);
        })
    }
}
