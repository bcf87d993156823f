//! File logging for every subcommand.
//!
//! stdout carries command output (scan reports, drafts, watch events), so
//! tracing output goes only to `<data dir>/logs/negotiagent.log`. Each run
//! tags its first line with the subcommand and a run id.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::paths;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";
const LOG_FILE: &str = "negotiagent.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// `pretty` (any case) selects pretty output; anything else is JSON.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(v) if v.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Filter directive in effect: `NEGOTIAGENT_LOG_FILTER`, then `RUST_LOG`,
/// then the default. Unparsable directives fall through to the next source.
pub fn resolve_filter(own: Option<&str>, rust_log: Option<&str>) -> String {
    [own, rust_log]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|d| !d.is_empty() && EnvFilter::try_new(d).is_ok())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

pub struct LoggingHandle {
    pub run_id: String,
    pub command: &'static str,
    pub guard: WorkerGuard,
}

pub fn init_logging(command: &'static str) -> anyhow::Result<LoggingHandle> {
    let log_dir = paths::log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    if std::env::var("NEGOTIAGENT_TRUNCATE_LOG_ON_START").as_deref() == Ok("1") {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
    }

    let directive = resolve_filter(
        std::env::var("NEGOTIAGENT_LOG_FILTER").ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    );
    let format = LogFormat::parse(std::env::var("NEGOTIAGENT_LOG_FORMAT").ok().as_deref());

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(&directive));
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init(),
    }

    let run_id = std::env::var("NEGOTIAGENT_RUN_ID").unwrap_or_else(|_| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{}-{}-{}", command, std::process::id(), now)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        command,
        log_path = %log_path.display(),
        format = ?format,
        filter = %directive,
    );

    Ok(LoggingHandle {
        run_id,
        command,
        guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        assert_eq!(LogFormat::parse(None), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("Pretty ")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("compact")), LogFormat::Json);
    }

    #[test]
    fn filter_prefers_own_variable_then_rust_log() {
        assert_eq!(resolve_filter(Some("debug"), Some("warn")), "debug");
        assert_eq!(resolve_filter(None, Some("warn")), "warn");
        assert_eq!(resolve_filter(Some("  "), None), DEFAULT_FILTER);
        assert_eq!(resolve_filter(Some("=[bad"), Some("trace")), "trace");
    }
}
