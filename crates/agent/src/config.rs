//! Runtime timing configuration.
//!
//! Defaults are tuned for a chat page that renders incrementally. Every
//! value can be overridden through a `NEGOTIAGENT_*_MS` environment variable.

use std::ops::Range;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Delay before the first scan after the page runtime starts.
    pub warm_up: Duration,
    /// Quiet period that coalesces a burst of mutations into one scan.
    pub debounce: Duration,
    /// Period of the mutation-independent rescan.
    pub fallback_period: Duration,
    /// Pause between inserting text and dispatching submission.
    pub submit_delay: Duration,
    /// Bounded wait for an optional channel response.
    pub reply_wait: Duration,
    /// Randomized pause before an auto-sent reply.
    pub human_delay: Range<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            warm_up: Duration::from_millis(2000),
            debounce: Duration::from_millis(500),
            fallback_period: Duration::from_millis(3000),
            submit_delay: Duration::from_millis(150),
            reply_wait: Duration::from_millis(2000),
            human_delay: Duration::from_secs(5)..Duration::from_secs(10),
        }
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(err) => {
            warn!(
                component = "config",
                variable = name,
                value = %raw,
                error = %err,
                "Ignoring invalid duration override"
            );
            None
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_ms("NEGOTIAGENT_WARM_UP_MS") {
            config.warm_up = v;
        }
        if let Some(v) = env_ms("NEGOTIAGENT_DEBOUNCE_MS") {
            config.debounce = v;
        }
        if let Some(v) = env_ms("NEGOTIAGENT_FALLBACK_MS") {
            // tokio intervals panic on a zero period.
            config.fallback_period = v.max(Duration::from_millis(100));
        }
        if let Some(v) = env_ms("NEGOTIAGENT_SUBMIT_DELAY_MS") {
            config.submit_delay = v;
        }
        if let Some(v) = env_ms("NEGOTIAGENT_REPLY_WAIT_MS") {
            config.reply_wait = v;
        }
        let min = env_ms("NEGOTIAGENT_HUMAN_DELAY_MIN_MS").unwrap_or(config.human_delay.start);
        let max = env_ms("NEGOTIAGENT_HUMAN_DELAY_MAX_MS").unwrap_or(config.human_delay.end);
        config.human_delay = min.min(max)..max.max(min);
        config
    }

    /// Pick a pause from `human_delay`.
    pub fn sample_human_delay(&self) -> Duration {
        use rand::Rng;

        let Range { start, end } = self.human_delay;
        if end <= start {
            return start;
        }
        rand::rng().random_range(start..end)
    }

    /// Zero every delay; handy for tests and one-shot commands.
    pub fn immediate() -> Self {
        Self {
            warm_up: Duration::ZERO,
            debounce: Duration::ZERO,
            fallback_period: Duration::from_millis(100),
            submit_delay: Duration::ZERO,
            reply_wait: Duration::from_millis(500),
            human_delay: Duration::ZERO..Duration::ZERO,
        }
    }
}
