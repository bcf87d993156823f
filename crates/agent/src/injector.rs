//! Writes approved reply text into the page composer and submits it.

use std::time::Duration;

use tracing::{info, warn};

use crate::page::{ElementMatcher, HostPage, MatcherChain, PageError, INSERT_METHODS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Submitted { clicked_send: bool },
    ComposerNotFound,
}

pub struct ReplyInjector {
    composer: MatcherChain,
    send_control: MatcherChain,
    submit_delay: Duration,
}

fn default_composer() -> MatcherChain {
    MatcherChain::new(vec![
        ElementMatcher::new("textbox-role", |el| {
            el.role() == Some("textbox") && el.is_editable()
        }),
        ElementMatcher::new("contenteditable", |el| {
            el.attr("contenteditable") == Some("true") && el.is_visible()
        }),
        ElementMatcher::new("textarea", |el| {
            el.tag.eq_ignore_ascii_case("textarea") && el.is_visible()
        }),
        ElementMatcher::new("composer-class", |el| el.has_class("composer")),
    ])
}

fn default_send_control() -> MatcherChain {
    MatcherChain::new(vec![ElementMatcher::new("send-button", |el| {
        el.role() == Some("button")
            && el.is_visible()
            && el
                .attr("aria-label")
                .is_some_and(|label| label.to_ascii_lowercase().contains("send"))
    })])
}

impl ReplyInjector {
    pub fn new(submit_delay: Duration) -> Self {
        Self::with_locators(default_composer(), default_send_control(), submit_delay)
    }

    pub fn with_locators(
        composer: MatcherChain,
        send_control: MatcherChain,
        submit_delay: Duration,
    ) -> Self {
        Self {
            composer,
            send_control,
            submit_delay,
        }
    }

    pub async fn inject(
        &self,
        page: &dyn HostPage,
        text: &str,
    ) -> Result<InjectOutcome, PageError> {
        let doc = page.document();
        let Some((strategy, composer)) = self.composer.first_match(&doc) else {
            warn!(
                component = "injector",
                event = "injector.composer_not_found",
                "No composer on page"
            );
            return Ok(InjectOutcome::ComposerNotFound);
        };
        let node = composer.id.clone();
        if node.is_empty() {
            return Err(PageError::UnknownNode(node));
        }

        page.focus(&node)?;
        page.clear(&node)?;
        self.insert(page, &node, text)?;

        tokio::time::sleep(self.submit_delay).await;

        let send_node = self
            .send_control
            .first_match(&page.document())
            .map(|(_, el)| el.id.clone())
            .filter(|id| !id.is_empty());

        let (key_result, click_result) = tokio::join!(
            async { page.press_key(&node, "Enter") },
            async {
                match &send_node {
                    Some(id) => Some(page.click(id)),
                    None => None,
                }
            }
        );
        let clicked_send = matches!(click_result, Some(Ok(())));
        if let Some(Err(err)) = &click_result {
            warn!(component = "injector", error = %err, "Send control click failed");
        }
        if let Err(err) = key_result {
            if !clicked_send {
                return Err(err);
            }
            warn!(component = "injector", error = %err, "Enter key dispatch failed");
        }

        info!(
            component = "injector",
            event = "injector.submitted",
            strategy,
            clicked_send,
            "Reply submitted"
        );
        Ok(InjectOutcome::Submitted { clicked_send })
    }

    fn insert(&self, page: &dyn HostPage, node: &str, text: &str) -> Result<(), PageError> {
        for method in INSERT_METHODS {
            match page.insert_text(node, text, method) {
                Ok(()) => return Ok(()),
                Err(PageError::Unsupported(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(PageError::Rejected("no text insertion method accepted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Element, InsertMethod, MemoryPage, PageAction};

    fn page_with(children: Vec<Element>) -> Element {
        children
            .into_iter()
            .fold(Element::new("div").with_id("root"), |root, c| root.with_child(c))
    }

    fn textbox() -> Element {
        Element::new("div")
            .with_id("composer")
            .with_attr("role", "textbox")
            .with_attr("contenteditable", "true")
            .with_text("Aa")
    }

    fn send_button() -> Element {
        Element::new("div")
            .with_id("send")
            .with_attr("role", "button")
            .with_attr("aria-label", "Press Enter to send")
    }

    #[tokio::test]
    async fn inserts_then_submits_once() {
        let page = MemoryPage::new(page_with(vec![textbox(), send_button()]));
        let injector = ReplyInjector::new(Duration::ZERO);
        let outcome = injector.inject(&page, "Would you take $80?").await.unwrap();
        assert_eq!(outcome, InjectOutcome::Submitted { clicked_send: true });
        assert_eq!(page.submitted(), vec!["Would you take $80?".to_string()]);

        let actions = page.actions();
        assert_eq!(actions[0], PageAction::Focus("composer".into()));
        assert_eq!(actions[1], PageAction::Clear("composer".into()));
        assert!(matches!(
            &actions[2],
            PageAction::Insert { method: InsertMethod::InputEvents, .. }
        ));
    }

    #[tokio::test]
    async fn missing_composer_is_reported_not_raised() {
        let page = MemoryPage::new(page_with(vec![send_button()]));
        let injector = ReplyInjector::new(Duration::ZERO);
        let outcome = injector.inject(&page, "hi").await.unwrap();
        assert_eq!(outcome, InjectOutcome::ComposerNotFound);
        assert!(page.actions().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_structural_locator_and_value_assignment() {
        let page = MemoryPage::with_methods(
            page_with(vec![Element::new("textarea").with_id("ta")]),
            vec![InsertMethod::SetValue],
        );
        let injector = ReplyInjector::new(Duration::ZERO);
        let outcome = injector.inject(&page, "ok").await.unwrap();
        assert_eq!(outcome, InjectOutcome::Submitted { clicked_send: false });
        assert!(page.actions().contains(&PageAction::Insert {
            node: "ta".into(),
            text: "ok".into(),
            method: InsertMethod::SetValue,
        }));
    }

    #[tokio::test]
    async fn id_less_composer_is_addressed_without_touching_the_chat() {
        let doc = Element::new("div")
            .with_child(
                Element::new("div")
                    .with_attr("role", "row")
                    .with_child(Element::new("span").with_attr("dir", "auto").with_text("50?")),
            )
            .with_child(
                Element::new("div")
                    .with_attr("role", "textbox")
                    .with_attr("contenteditable", "true"),
            );
        let page = MemoryPage::new(doc);
        let outcome = ReplyInjector::new(Duration::ZERO)
            .inject(&page, "How about 70?")
            .await
            .unwrap();

        assert_eq!(outcome, InjectOutcome::Submitted { clicked_send: false });
        assert_eq!(page.submitted(), vec!["How about 70?".to_string()]);
        assert_eq!(page.actions()[1], PageAction::Clear("@1".into()));
        let after = page.document();
        assert_eq!(after.children.len(), 2);
        assert_eq!(after.children[0].text_content(), "50?");
    }

    #[tokio::test]
    async fn hidden_send_control_is_not_clicked() {
        let hidden = send_button().with_attr("aria-hidden", "true");
        let page = MemoryPage::new(page_with(vec![textbox(), hidden]));
        let outcome = ReplyInjector::new(Duration::ZERO)
            .inject(&page, "hi")
            .await
            .unwrap();
        assert_eq!(outcome, InjectOutcome::Submitted { clicked_send: false });
    }
}
