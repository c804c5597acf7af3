//! Client configuration - passed from higher layers or read from the environment

use std::env;
use std::time::Duration;

use crate::account::ChainConfig;
use crate::subscription::SubscriptionConfig;
use crate::watcher::WatcherConfig;

pub const ENV_DOMAIN: &str = "BEEINBOX_DOMAIN";
pub const ENV_ORIGIN: &str = "BEEINBOX_ORIGIN";
pub const ENV_EXPLORER: &str = "BEEINBOX_EXPLORER";
pub const ENV_CHAIN_ID: &str = "BEEINBOX_CHAIN_ID";
pub const ENV_WATCH_INTERVAL_MS: &str = "BEEINBOX_WATCH_INTERVAL_MS";
pub const ENV_SUBSCRIBE_TIMEOUT_MS: &str = "BEEINBOX_SUBSCRIBE_TIMEOUT_MS";

/// Client configuration. Higher layers construct this.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Domain the identity challenge is issued for
    pub app_domain: String,
    /// Origin used for notification icons and links
    pub app_origin: String,
    pub block_explorer: String,
    pub chain: ChainConfig,
    pub subscription: SubscriptionConfig,
    pub watcher: WatcherConfig,
    /// Start the block watcher on bind
    pub watch_blocks: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_domain: "hackers.gm.walletconnect.com".into(),
            app_origin: "https://hackers.gm.walletconnect.com".into(),
            block_explorer: "https://etherscan.io/block".into(),
            chain: ChainConfig::default(),
            subscription: SubscriptionConfig::default(),
            watcher: WatcherConfig::default(),
            watch_blocks: false,
        }
    }
}

impl ClientConfig {
    pub fn new(app_domain: impl Into<String>) -> Self {
        let app_domain = app_domain.into();
        Self { app_origin: format!("https://{app_domain}"), app_domain, ..Default::default() }
    }
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self { self.app_origin = origin.into(); self }
    pub fn with_explorer(mut self, url: impl Into<String>) -> Self { self.block_explorer = url.into(); self }
    pub fn with_chain(mut self, chain: ChainConfig) -> Self { self.chain = chain; self }
    pub fn with_subscription(mut self, c: SubscriptionConfig) -> Self { self.subscription = c; self }
    pub fn with_watcher(mut self, c: WatcherConfig) -> Self { self.watcher = c; self }
    pub fn watch_blocks(mut self) -> Self { self.watch_blocks = true; self }

    /// Defaults overridden by `BEEINBOX_*` variables. Unparseable numbers and a
    /// zero watch interval are ignored.
    pub fn from_env() -> Self {
        let mut config = match env_string(ENV_DOMAIN) {
            Some(domain) => Self::new(domain),
            None => Self::default(),
        };
        if let Some(origin) = env_string(ENV_ORIGIN) {
            config.app_origin = origin;
        }
        if let Some(explorer) = env_string(ENV_EXPLORER) {
            config.block_explorer = explorer;
        }
        if let Some(chain_id) = env_number(ENV_CHAIN_ID) {
            config.chain.chain_id = chain_id;
        }
        match env_number(ENV_WATCH_INTERVAL_MS) {
            Some(0) => tracing::warn!(key = ENV_WATCH_INTERVAL_MS, "ignoring zero interval"),
            Some(ms) => config.watcher.interval_ms = ms,
            None => {}
        }
        if let Some(ms) = env_number(ENV_SUBSCRIBE_TIMEOUT_MS) {
            config.subscription.timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
        }
        config
    }

    /// Watcher config carrying this client's links.
    pub fn watcher_config(&self) -> WatcherConfig {
        self.watcher.clone().with_links(&self.app_origin, &self.block_explorer)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_number(key: &str) -> Option<u64> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric setting");
            None
        }
    }
}
