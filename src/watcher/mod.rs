//! Block watcher - polls chain height, notifies on new blocks.
//!
//! Every `interval` the watcher reads the current height while the
//! subscription is active. A height different from the last observed one is
//! dispatched as a transactional "New block" notification.
//!
//! ```text
//! tick ──▶ active? ──no──▶ Inactive (chain not read, last height kept)
//!             │yes
//!             ▼
//!        read height ──same──▶ Unchanged
//!             │new
//!             ▼
//!     first observation? ──yes──▶ Primed (unless notify_on_first_observation)
//!             │no
//!             ▼
//!        dispatch ──▶ Dispatched
//! ```
//!
//! The last observed height is owned by the watcher alone.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::account::Session;
use crate::dispatch::{NotificationDispatcher, NotificationPayload};
use crate::error::{InboxError, InboxResult};
use crate::runtime::{Shutdown, ShutdownSignal};
use crate::service::ChainReader;

pub const DEFAULT_INTERVAL_MS: u64 = 12_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Poll interval in milliseconds
    pub interval_ms: u64,
    /// Dispatch for the very first height seen instead of only recording it
    pub notify_on_first_observation: bool,
    /// App origin used for the notification icon
    pub origin: String,
    /// Block explorer prefix; the height is appended
    pub explorer: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            notify_on_first_observation: false,
            origin: "https://hackers.gm.walletconnect.com".into(),
            explorer: "https://etherscan.io/block".into(),
        }
    }
}

impl WatcherConfig {
    /// A zero interval is ignored.
    pub fn with_interval_ms(mut self, ms: u64) -> Self {
        if ms == 0 {
            tracing::warn!(current_ms = self.interval_ms, "ignoring zero block watcher interval");
        } else {
            self.interval_ms = ms;
        }
        self
    }
    pub fn notify_on_first_observation(mut self) -> Self { self.notify_on_first_observation = true; self }
    pub fn with_links(mut self, origin: impl Into<String>, explorer: impl Into<String>) -> Self {
        self.origin = origin.into();
        self.explorer = explorer.into();
        self
    }
    /// Poll period; a zero `interval_ms` falls back to the default.
    pub fn interval(&self) -> Duration {
        match self.interval_ms {
            0 => Duration::from_millis(DEFAULT_INTERVAL_MS),
            ms => Duration::from_millis(ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// No active subscription; nothing read.
    Inactive,
    /// First height recorded without dispatch.
    Primed { height: u64 },
    Unchanged { height: u64 },
    Dispatched { height: u64 },
}

pub struct BlockWatcher {
    session: Session,
    chain: Arc<dyn ChainReader>,
    dispatcher: Arc<NotificationDispatcher>,
    config: WatcherConfig,
    last_height: Option<u64>,
}

impl BlockWatcher {
    pub fn new(
        session: Session,
        chain: Arc<dyn ChainReader>,
        dispatcher: Arc<NotificationDispatcher>,
        config: WatcherConfig,
    ) -> Self {
        Self { session, chain, dispatcher, config, last_height: None }
    }

    pub fn last_height(&self) -> Option<u64> { self.last_height }
    pub fn interval(&self) -> Duration { self.config.interval() }

    fn active_account(&self) -> InboxResult<Option<crate::account::Account>> {
        let Some(account) = self.session.account() else { return Ok(None) };
        Ok(self.session.read(|s| s.is_active())?.then_some(account))
    }

    /// One poll. Dispatch failures are returned; the height is already recorded.
    pub async fn tick(&mut self) -> InboxResult<TickOutcome> {
        let Some(account) = self.active_account()? else {
            return Ok(TickOutcome::Inactive);
        };

        let height = self
            .chain
            .current_block_height()
            .await
            .map_err(|e| InboxError::Transport(format!("block height: {e}")))?;

        // Subscription may have ended while the read was in flight.
        if self.active_account()?.as_ref() != Some(&account) {
            return Ok(TickOutcome::Inactive);
        }
        if self.last_height == Some(height) {
            tracing::debug!(height, "block unchanged");
            return Ok(TickOutcome::Unchanged { height });
        }

        let first = self.last_height.is_none();
        self.last_height = Some(height);
        if first && !self.config.notify_on_first_observation {
            tracing::debug!(height, "block height primed");
            return Ok(TickOutcome::Primed { height });
        }

        let payload = NotificationPayload::new_block(height, &self.config.origin, &self.config.explorer);
        if self.dispatcher.send(&account, &payload).await? {
            Ok(TickOutcome::Dispatched { height })
        } else {
            Ok(TickOutcome::Inactive)
        }
    }

    /// Run the poll loop until `shutdown` fires.
    pub fn spawn(mut self, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        let interval = self.config.interval();

        tokio::spawn(async move {
            tracing::info!(interval_ms = interval.as_millis() as u64, "block watcher started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        match self.tick().await {
                            Ok(outcome) => tracing::debug!(?outcome, "block watcher tick"),
                            Err(e) if e.is_silent() => tracing::debug!(error = %e, "block watcher tick discarded"),
                            Err(e) => tracing::warn!(error = %e, "block watcher tick failed"),
                        }
                    }
                }
            }
            tracing::info!("block watcher stopped");
        })
    }

    /// Spawn with a fresh shutdown handle.
    pub fn start(self) -> WatcherHandle {
        let shutdown = Shutdown::new();
        let join = self.spawn(shutdown.subscribe());
        WatcherHandle { shutdown, join }
    }
}

/// Cancellable handle to a running watcher.
pub struct WatcherHandle {
    shutdown: Shutdown,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signal the loop to stop without waiting.
    pub fn cancel(&self) { self.shutdown.trigger(); }

    pub async fn stop(self) {
        self.shutdown.trigger();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "block watcher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool { self.join.is_finished() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interval_is_twelve_seconds() {
        let config = WatcherConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(12));
        assert!(!config.notify_on_first_observation);
    }

    #[test]
    fn config_builders() {
        let config = WatcherConfig::default()
            .with_interval_ms(500)
            .notify_on_first_observation()
            .with_links("https://a.example", "https://scan.example/block");
        assert_eq!(config.interval_ms, 500);
        assert!(config.notify_on_first_observation);
        assert_eq!(config.explorer, "https://scan.example/block");
    }

    #[test]
    fn zero_interval_is_ignored() {
        let config = WatcherConfig::default().with_interval_ms(500).with_interval_ms(0);
        assert_eq!(config.interval_ms, 500);

        let zeroed = WatcherConfig { interval_ms: 0, ..WatcherConfig::default() };
        assert_eq!(zeroed.interval(), Duration::from_secs(12));
    }

    #[test]
    fn outcome_serializes_tagged() {
        let value = serde_json::to_value(TickOutcome::Dispatched { height: 101 }).unwrap();
        assert_eq!(value["outcome"], "dispatched");
        assert_eq!(value["height"], 101);
    }
}
