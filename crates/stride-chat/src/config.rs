use std::time::Duration;

use anyhow::Context;

use stride_types::relay::{DEFAULT_CONTENT_TOPIC, HISTORY_PAGE_SIZE};

/// Client-side transport settings.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub relay_url: String,
    pub content_topic: String,
    /// How long `start` waits for a relay offering store, filter and light push.
    pub peer_timeout: Duration,
    pub send_timeout: Duration,
    pub history_page_size: u32,
    /// Store replay stops after this many pages.
    pub history_max_pages: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:3100/relay".into(),
            content_topic: DEFAULT_CONTENT_TOPIC.into(),
            peer_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            history_page_size: HISTORY_PAGE_SIZE,
            history_max_pages: 40,
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `STRIDE_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let relay_url = std::env::var("STRIDE_RELAY_URL").unwrap_or(defaults.relay_url);
        let content_topic = std::env::var("STRIDE_CONTENT_TOPIC").unwrap_or(defaults.content_topic);

        let peer_timeout = match std::env::var("STRIDE_PEER_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(v.parse().context("STRIDE_PEER_TIMEOUT_SECS")?),
            Err(_) => defaults.peer_timeout,
        };
        let send_timeout = match std::env::var("STRIDE_SEND_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(v.parse().context("STRIDE_SEND_TIMEOUT_SECS")?),
            Err(_) => defaults.send_timeout,
        };
        let history_page_size: u32 = match std::env::var("STRIDE_HISTORY_PAGE_SIZE") {
            Ok(v) => v.parse().context("STRIDE_HISTORY_PAGE_SIZE")?,
            Err(_) => defaults.history_page_size,
        };
        let history_max_pages: u32 = match std::env::var("STRIDE_HISTORY_MAX_PAGES") {
            Ok(v) => v.parse().context("STRIDE_HISTORY_MAX_PAGES")?,
            Err(_) => defaults.history_max_pages,
        };

        anyhow::ensure!(history_page_size > 0, "STRIDE_HISTORY_PAGE_SIZE must be positive");

        Ok(Self {
            relay_url,
            content_topic,
            peer_timeout,
            send_timeout,
            history_page_size,
            history_max_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_relay_constants() {
        let config = ChatConfig::default();
        assert_eq!(config.content_topic, DEFAULT_CONTENT_TOPIC);
        assert_eq!(config.history_page_size, 25);
        assert_eq!(config.peer_timeout, Duration::from_secs(10));
    }
}
