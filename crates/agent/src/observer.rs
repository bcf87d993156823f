//! Page observer: extracts chat turns and metadata from the host page and
//! pushes them to the panel when the conversation signature changes.
//!
//! Change detection compares `(count, last text, last sender)` only. Edits to
//! earlier turns that keep the tail identical go unnoticed until something
//! else changes.

use negotiagent_protocol::{
    ChannelMessage, ChatTurn, ConversationMetadata, ConversationSnapshot, Party, Signature,
};
use tracing::{debug, info};

use crate::channel::{ChannelError, MessagingHost};
use crate::page::{Element, ElementMatcher, HostPage, MatcherChain};

/// How a metadata field is read from a matched element
#[derive(Debug, Clone, Copy)]
pub enum FieldSource {
    Text,
    Attr {
        name: &'static str,
        strip_prefix: Option<&'static str>,
    },
}

#[derive(Debug, Clone)]
pub struct FieldStrategy {
    pub matcher: ElementMatcher,
    pub source: FieldSource,
}

impl FieldStrategy {
    fn read(&self, el: &Element) -> Option<String> {
        let raw = match self.source {
            FieldSource::Text => el.text_content(),
            FieldSource::Attr { name, strip_prefix } => {
                let value = el.attr(name)?;
                match strip_prefix {
                    Some(prefix) => value.strip_prefix(prefix)?.to_string(),
                    None => value.to_string(),
                }
            }
        };
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Where and how to read the conversation out of a page tree.
#[derive(Debug, Clone)]
pub struct ScrapeProfile {
    /// Message-row strategies; the first one that matches anything is used.
    pub rows: Vec<ElementMatcher>,
    /// Text-bearing element inside a row.
    pub text: MatcherChain,
    /// Attribute carrying an explicit `me` / `them` marker.
    pub sender_attr: &'static str,
    /// Class tokens marking a turn as ours.
    pub outgoing_classes: Vec<String>,
    /// Class tokens marking a turn as the counterparty's.
    pub incoming_classes: Vec<String>,
    pub counterparty: Vec<FieldStrategy>,
    pub item: Vec<FieldStrategy>,
}

impl Default for ScrapeProfile {
    fn default() -> Self {
        Self {
            rows: vec![
                ElementMatcher::attr_eq("row-role", "role", "row"),
                ElementMatcher::new("message-attr", |el| {
                    el.attributes.contains_key("data-message-id")
                }),
            ],
            text: MatcherChain::new(vec![
                ElementMatcher::attr_eq("dir-auto", "dir", "auto"),
                ElementMatcher::new("message-text-class", |el| el.has_class("message-text")),
            ]),
            sender_attr: "data-sender",
            outgoing_classes: vec!["outgoing".into()],
            incoming_classes: vec!["incoming".into()],
            counterparty: vec![
                FieldStrategy {
                    matcher: ElementMatcher::new("counterparty-attr", |el| {
                        el.attributes.contains_key("data-counterparty")
                    }),
                    source: FieldSource::Attr {
                        name: "data-counterparty",
                        strip_prefix: None,
                    },
                },
                FieldStrategy {
                    matcher: ElementMatcher::new("conversation-label", |el| {
                        el.attr("aria-label")
                            .is_some_and(|l| l.starts_with("Conversation with "))
                    }),
                    source: FieldSource::Attr {
                        name: "aria-label",
                        strip_prefix: Some("Conversation with "),
                    },
                },
            ],
            item: vec![
                FieldStrategy {
                    matcher: ElementMatcher::new("item-attr", |el| {
                        el.attributes.contains_key("data-item")
                    }),
                    source: FieldSource::Attr {
                        name: "data-item",
                        strip_prefix: None,
                    },
                },
                FieldStrategy {
                    matcher: ElementMatcher::new("item-link", |el| {
                        el.tag.eq_ignore_ascii_case("a")
                            && el.attr("href").is_some_and(|h| h.contains("/item/"))
                    }),
                    source: FieldSource::Text,
                },
            ],
        }
    }
}

impl ScrapeProfile {
    fn sender_of(&self, el: &Element) -> Option<Party> {
        match el.attr(self.sender_attr) {
            Some("me") => return Some(Party::Me),
            Some("them") => return Some(Party::Them),
            _ => {}
        }
        if self.outgoing_classes.iter().any(|c| el.has_class(c)) {
            return Some(Party::Me);
        }
        if self.incoming_classes.iter().any(|c| el.has_class(c)) {
            return Some(Party::Them);
        }
        None
    }

    fn extract_turn(&self, row: &Element) -> Option<ChatTurn> {
        let (_, text_el) = self.text.first_match(row)?;
        let sender = self
            .sender_of(text_el)
            .or_else(|| self.sender_of(row))
            .unwrap_or(Party::Them);
        ChatTurn::new(text_el.text_content(), sender)
    }

    pub fn scan_document(&self, doc: &Element) -> ConversationSnapshot {
        let rows = self
            .rows
            .iter()
            .map(|m| m.find_all(doc))
            .find(|found| !found.is_empty())
            .unwrap_or_default();
        rows.into_iter()
            .filter(|row| row.is_visible())
            .filter_map(|row| self.extract_turn(row))
            .collect()
    }

    pub fn metadata_from_document(&self, doc: &Element) -> ConversationMetadata {
        fn first(strategies: &[FieldStrategy], doc: &Element) -> Option<String> {
            strategies.iter().find_map(|s| {
                s.matcher
                    .find_all(doc)
                    .into_iter()
                    .find_map(|el| s.read(el))
            })
        }
        ConversationMetadata {
            counterparty_name: first(&self.counterparty, doc),
            item_description: first(&self.item, doc),
        }
    }
}

/// What a sync did with one record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Sent,
    Suppressed,
    /// Nothing worth sending was found on the page.
    Empty,
    /// No listener; the record will be offered again on the next scan.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub history: SyncOutcome,
    pub metadata: SyncOutcome,
}

/// Owns the last delivered signature and metadata for one page.
pub struct PageObserver {
    profile: ScrapeProfile,
    last_signature: Option<Signature>,
    last_metadata: Option<ConversationMetadata>,
}

impl PageObserver {
    pub fn new(profile: ScrapeProfile) -> Self {
        Self {
            profile,
            last_signature: None,
            last_metadata: None,
        }
    }

    pub fn profile(&self) -> &ScrapeProfile {
        &self.profile
    }

    pub fn last_signature(&self) -> Option<&Signature> {
        self.last_signature.as_ref()
    }

    pub fn scan(&self, page: &dyn HostPage) -> ConversationSnapshot {
        self.profile.scan_document(&page.document())
    }

    pub fn scan_metadata(&self, page: &dyn HostPage) -> ConversationMetadata {
        self.profile.metadata_from_document(&page.document())
    }

    pub fn compute_signature(snapshot: &ConversationSnapshot) -> Signature {
        snapshot.signature()
    }

    /// Scan once and deliver whatever changed. `force` bypasses suppression.
    ///
    /// Only `Invalidated` is returned as an error; a missing listener leaves
    /// the stored signature untouched so the next scan retries.
    pub async fn sync(
        &mut self,
        page: &dyn HostPage,
        host: &dyn MessagingHost,
        force: bool,
    ) -> Result<SyncReport, ChannelError> {
        let doc = page.document();
        let snapshot = self.profile.scan_document(&doc);
        let metadata = self.profile.metadata_from_document(&doc);

        let history = self.sync_history(snapshot, host, force).await?;
        let metadata = self.sync_metadata(metadata, host, force).await?;
        Ok(SyncReport { history, metadata })
    }

    async fn sync_history(
        &mut self,
        snapshot: ConversationSnapshot,
        host: &dyn MessagingHost,
        force: bool,
    ) -> Result<SyncOutcome, ChannelError> {
        if snapshot.is_empty() {
            return Ok(SyncOutcome::Empty);
        }
        let signature = Self::compute_signature(&snapshot);
        if !force && self.last_signature.as_ref() == Some(&signature) {
            return Ok(SyncOutcome::Suppressed);
        }

        let count = snapshot.len();
        match host
            .send(ChannelMessage::FullHistory { messages: snapshot })
            .await
        {
            Ok(_) => {
                info!(
                    component = "observer",
                    event = "observer.history_sent",
                    count,
                    forced = force,
                    "Sent conversation snapshot"
                );
                self.last_signature = Some(signature);
                Ok(SyncOutcome::Sent)
            }
            Err(ChannelError::NoListener) => Ok(SyncOutcome::Dropped),
            Err(err) => Err(err),
        }
    }

    async fn sync_metadata(
        &mut self,
        metadata: ConversationMetadata,
        host: &dyn MessagingHost,
        force: bool,
    ) -> Result<SyncOutcome, ChannelError> {
        if metadata.is_empty() {
            return Ok(SyncOutcome::Empty);
        }
        if !force && self.last_metadata.as_ref() == Some(&metadata) {
            return Ok(SyncOutcome::Suppressed);
        }
        match host
            .send(ChannelMessage::Metadata {
                metadata: metadata.clone(),
            })
            .await
        {
            Ok(_) => {
                debug!(
                    component = "observer",
                    event = "observer.metadata_sent",
                    "Sent conversation metadata"
                );
                self.last_metadata = Some(metadata);
                Ok(SyncOutcome::Sent)
            }
            Err(ChannelError::NoListener) => Ok(SyncOutcome::Dropped),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::LocalHost;
    use crate::page::MemoryPage;
    use std::time::Duration;

    pub(crate) fn row(text: &str, sender: &str) -> Element {
        Element::new("div").with_attr("role", "row").with_child(
            Element::new("div")
                .with_attr("dir", "auto")
                .with_attr("data-sender", sender)
                .with_text(text),
        )
    }

    pub(crate) fn chat(rows: &[(&str, &str)]) -> Element {
        rows.iter().fold(
            Element::new("div").with_id("root"),
            |root, (text, sender)| root.with_child(row(text, sender)),
        )
    }

    #[test]
    fn scan_reads_rows_in_order_and_skips_empty_text() {
        let doc = chat(&[("Is this available?", "them"), ("   ", "me"), ("Yes", "me")]);
        let snapshot = ScrapeProfile::default().scan_document(&doc);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.turns()[0].sender(), Party::Them);
        assert_eq!(snapshot.last().unwrap().text(), "Yes");
    }

    #[test]
    fn sender_falls_back_to_classes_then_them() {
        let doc = Element::new("div")
            .with_child(
                Element::new("div")
                    .with_attr("role", "row")
                    .with_attr("class", "bubble outgoing")
                    .with_child(Element::new("span").with_attr("dir", "auto").with_text("mine")),
            )
            .with_child(
                Element::new("div")
                    .with_attr("role", "row")
                    .with_child(Element::new("span").with_attr("dir", "auto").with_text("theirs")),
            );
        let snapshot = ScrapeProfile::default().scan_document(&doc);
        assert_eq!(snapshot.turns()[0].sender(), Party::Me);
        assert_eq!(snapshot.turns()[1].sender(), Party::Them);
    }

    #[test]
    fn no_rows_gives_empty_snapshot() {
        let doc = Element::new("div").with_text("Loading…");
        assert!(ScrapeProfile::default().scan_document(&doc).is_empty());
    }

    #[test]
    fn second_row_strategy_used_when_first_finds_nothing() {
        let doc = Element::new("div").with_child(
            Element::new("li")
                .with_attr("data-message-id", "m1")
                .with_child(Element::new("p").with_attr("class", "message-text").with_text("hey")),
        );
        let snapshot = ScrapeProfile::default().scan_document(&doc);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn metadata_reads_label_prefix_and_item_link() {
        let doc = Element::new("div")
            .with_attr("aria-label", "Conversation with Dana")
            .with_child(
                Element::new("a")
                    .with_attr("href", "https://market.example/item/42")
                    .with_text(" Oak desk "),
            );
        let metadata = ScrapeProfile::default().metadata_from_document(&doc);
        assert_eq!(metadata.counterparty_name.as_deref(), Some("Dana"));
        assert_eq!(metadata.item_description.as_deref(), Some("Oak desk"));
    }

    #[test]
    fn signatures_differ_on_tail_changes_only() {
        let profile = ScrapeProfile::default();
        let base = profile.scan_document(&chat(&[("a", "them"), ("b", "me")]));
        let edited_head = profile.scan_document(&chat(&[("z", "them"), ("b", "me")]));
        let edited_tail = profile.scan_document(&chat(&[("a", "them"), ("c", "me")]));
        let longer = profile.scan_document(&chat(&[("a", "them"), ("b", "me"), ("b", "me")]));
        let sig = PageObserver::compute_signature(&base);
        assert_eq!(sig, PageObserver::compute_signature(&edited_head));
        assert_ne!(sig, PageObserver::compute_signature(&edited_tail));
        assert_ne!(sig, PageObserver::compute_signature(&longer));
    }

    async fn drain(mut sub: crate::channel::Subscription) -> Vec<ChannelMessage> {
        let mut out = Vec::new();
        while let Ok(Some(envelope)) =
            tokio::time::timeout(Duration::from_millis(50), sub.recv()).await
        {
            out.push(envelope.message);
        }
        out
    }

    #[tokio::test]
    async fn identical_signature_is_sent_once() {
        let page = MemoryPage::new(chat(&[("hi", "them"), ("hello", "me"), ("ok", "me")]));
        let host = LocalHost::new("to-panel", Duration::from_millis(10));
        let sub = host.subscribe().unwrap();
        let mut observer = PageObserver::new(ScrapeProfile::default());

        let first = observer.sync(&page, &host, false).await.unwrap();
        let second = observer.sync(&page, &host, false).await.unwrap();
        assert_eq!(first.history, SyncOutcome::Sent);
        assert_eq!(second.history, SyncOutcome::Suppressed);
        assert_eq!(
            observer.last_signature(),
            Some(&Signature {
                count: 3,
                last_text: Some("ok".into()),
                last_sender: Some(Party::Me),
            })
        );

        let sent = drain(sub).await;
        let histories = sent
            .iter()
            .filter(|m| matches!(m, ChannelMessage::FullHistory { .. }))
            .count();
        assert_eq!(histories, 1);
    }

    #[tokio::test]
    async fn force_bypasses_suppression() {
        let page = MemoryPage::new(chat(&[("hi", "them")]));
        let host = LocalHost::new("to-panel", Duration::from_millis(10));
        let _sub = host.subscribe().unwrap();
        let mut observer = PageObserver::new(ScrapeProfile::default());
        observer.sync(&page, &host, false).await.unwrap();
        let forced = observer.sync(&page, &host, true).await.unwrap();
        assert_eq!(forced.history, SyncOutcome::Sent);
    }

    #[tokio::test]
    async fn dropped_send_is_retried_on_next_scan() {
        let page = MemoryPage::new(chat(&[("hi", "them")]));
        let host = LocalHost::new("to-panel", Duration::from_millis(10));
        let mut observer = PageObserver::new(ScrapeProfile::default());

        let report = observer.sync(&page, &host, false).await.unwrap();
        assert_eq!(report.history, SyncOutcome::Dropped);
        assert!(observer.last_signature().is_none());

        let _sub = host.subscribe().unwrap();
        let report = observer.sync(&page, &host, false).await.unwrap();
        assert_eq!(report.history, SyncOutcome::Sent);
    }

    #[tokio::test]
    async fn empty_page_sends_nothing_and_metadata_needs_a_field() {
        let page = MemoryPage::new(Element::new("div"));
        let host = LocalHost::new("to-panel", Duration::from_millis(10));
        let sub = host.subscribe().unwrap();
        let mut observer = PageObserver::new(ScrapeProfile::default());
        let report = observer.sync(&page, &host, true).await.unwrap();
        assert_eq!(report.history, SyncOutcome::Empty);
        assert_eq!(report.metadata, SyncOutcome::Empty);
        assert!(drain(sub).await.is_empty());
    }

    #[tokio::test]
    async fn invalidated_host_is_an_error() {
        let page = MemoryPage::new(chat(&[("hi", "them")]));
        let host = LocalHost::new("to-panel", Duration::from_millis(10));
        host.invalidate();
        let mut observer = PageObserver::new(ScrapeProfile::default());
        assert_eq!(
            observer.sync(&page, &host, false).await,
            Err(ChannelError::Invalidated)
        );
    }
}
