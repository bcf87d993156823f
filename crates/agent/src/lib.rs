//! Negotiagent
//!
//! Marketplace chat sync and negotiation reply assistant: a page observer
//! that mirrors the conversation into a panel, an LLM-backed drafting panel,
//! a reply injector, and the AI relay proxy.

pub mod auth;
pub mod backend;
pub mod channel;
pub mod cmd_draft;
pub mod cmd_listings;
pub mod cmd_scan;
pub mod cmd_settings;
pub mod cmd_watch;
pub mod config;
pub mod file_page;
pub mod injector;
pub mod listings;
pub mod logging;
pub mod observer;
pub mod page;
pub mod page_runtime;
pub mod panel_actor;
pub mod panel_command;
pub mod paths;
pub mod proxy_server;
pub mod settings;
pub mod store;
pub mod transition;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
