//! `negotiagent scan <page.json>`: run one scan and print what the panel would receive.

use std::path::Path;

use negotiagent_protocol::{ConversationMetadata, ConversationSnapshot, Signature};
use serde::Serialize;

use crate::file_page::load_tree;
use crate::observer::{PageObserver, ScrapeProfile};

#[derive(Debug, Serialize)]
struct ScanReport {
    messages: ConversationSnapshot,
    signature: Signature,
    metadata: ConversationMetadata,
}

fn scan(page: &Path) -> anyhow::Result<ScanReport> {
    let doc = load_tree(page)?;
    let profile = ScrapeProfile::default();
    let messages = profile.scan_document(&doc);
    Ok(ScanReport {
        signature: PageObserver::compute_signature(&messages),
        metadata: profile.metadata_from_document(&doc),
        messages,
    })
}

pub fn run(page: &Path) -> anyhow::Result<()> {
    let report = scan(page)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
