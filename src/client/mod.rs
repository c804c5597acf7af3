//! InboxClient - one bound wallet account, its identity, subscription and inbox
//!
//! Components share a [`Session`]; the client wires them to the external
//! collaborators and keeps the optional block watcher running.
//!
//! Responses for an account that has since been unbound or replaced are
//! dropped: façade methods return `Ok(None)` / `Ok(false)` for them instead of
//! an error.

mod config;

pub use config::ClientConfig;

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::account::{Account, AccountBinding, Session, SessionSnapshot};
use crate::dispatch::{NotificationDispatcher, NotificationPayload};
use crate::error::{InboxError, InboxResult};
use crate::identity::{Identity, IdentityRegistrar, IdentitySigner};
use crate::inbox::{Message, MessageInbox};
use crate::scopes::{ScopePreferences, ScopeSet};
use crate::service::{ChainReader, NotifyService, WalletSigner};
use crate::subscription::{SubscriptionManager, SubscriptionRecord, SubscriptionState};
use crate::watcher::{BlockWatcher, WatcherHandle};

/// External systems the client talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn NotifyService>,
    pub chain: Arc<dyn ChainReader>,
    pub wallet: Arc<dyn WalletSigner>,
}

impl Collaborators {
    pub fn new(service: Arc<dyn NotifyService>, chain: Arc<dyn ChainReader>, wallet: Arc<dyn WalletSigner>) -> Self {
        Self { service, chain, wallet }
    }
}

pub struct InboxClient {
    config: ClientConfig,
    session: Session,
    binding: AccountBinding,
    signer: IdentitySigner,
    chain: Arc<dyn ChainReader>,
    registrar: IdentityRegistrar,
    subscriptions: SubscriptionManager,
    scopes: ScopePreferences,
    inbox: MessageInbox,
    dispatcher: Arc<NotificationDispatcher>,
    watcher: Mutex<Option<WatcherHandle>>,
}

impl InboxClient {
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Self {
        let Collaborators { service, chain, wallet } = collaborators;
        let session = Session::new(config.chain.clone());

        Self {
            binding: AccountBinding::new(session.clone()),
            signer: IdentitySigner::new(wallet),
            registrar: IdentityRegistrar::new(session.clone(), service.clone(), config.app_domain.clone()),
            subscriptions: SubscriptionManager::new(session.clone(), service.clone(), config.subscription.clone()),
            scopes: ScopePreferences::new(session.clone(), service.clone()),
            inbox: MessageInbox::new(session.clone(), service.clone()),
            dispatcher: Arc::new(NotificationDispatcher::new(session.clone(), service)),
            chain,
            session,
            config,
            watcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig { &self.config }
    pub fn session(&self) -> &Session { &self.session }
    pub fn binding(&self) -> &AccountBinding { &self.binding }
    pub fn registrar(&self) -> &IdentityRegistrar { &self.registrar }
    pub fn subscriptions(&self) -> &SubscriptionManager { &self.subscriptions }
    pub fn preferences(&self) -> &ScopePreferences { &self.scopes }
    pub fn inbox(&self) -> &MessageInbox { &self.inbox }
    pub fn dispatcher(&self) -> &NotificationDispatcher { &self.dispatcher }

    // Account

    /// Bind the wallet account at `address`. Rebinding the same account keeps
    /// all state; a different account starts from scratch, including the
    /// block watcher's last height.
    pub fn bind(&self, address: &str) -> InboxResult<Account> {
        let previous = self.binding.current();
        let account = self.binding.bind(address)?;
        if previous.as_ref() == Some(&account) {
            return Ok(account);
        }

        let was_watching = self.cancel_watcher()?;
        if self.config.watch_blocks || was_watching {
            if tokio::runtime::Handle::try_current().is_ok() {
                self.start_block_watcher()?;
            } else {
                tracing::warn!(account = %account, "no async runtime; block watcher not started");
            }
        }
        Ok(account)
    }

    /// Forget the bound account. In-flight responses for it are discarded.
    pub fn unbind(&self) -> InboxResult<Option<Account>> {
        self.cancel_watcher()?;
        self.binding.unbind()
    }

    pub fn account(&self) -> Option<Account> { self.binding.current() }

    fn bound(&self) -> InboxResult<Account> {
        self.binding.current().ok_or(InboxError::NotBound)
    }

    // Identity

    pub fn identity(&self) -> InboxResult<Option<Identity>> { self.registrar.identity() }

    /// Register the bound account's identity key, prompting the wallet once.
    pub async fn register(&self) -> InboxResult<Option<Identity>> {
        let account = self.bound()?;
        settle(self.registrar.register(&account, &self.signer).await)
    }

    // Subscription

    pub fn subscription_state(&self) -> InboxResult<SubscriptionState> { self.subscriptions.state() }
    pub fn is_subscribed(&self) -> bool { self.subscriptions.is_subscribed() }
    pub fn is_subscribing(&self) -> bool { self.subscriptions.is_subscribing() }
    pub fn is_unsubscribing(&self) -> bool { self.subscriptions.is_unsubscribing() }

    /// Subscribe, registering first when the account has no identity yet.
    /// Scopes and messages are pulled once the subscription is active.
    pub async fn subscribe(&self) -> InboxResult<Option<SubscriptionRecord>> {
        let account = self.bound()?;
        if self.registrar.identity()?.is_none() && self.register().await?.is_none() {
            return Ok(None);
        }
        let Some(record) = settle(self.subscriptions.subscribe(&account).await)? else {
            return Ok(None);
        };
        self.pull(&account).await;
        Ok(Some(record))
    }

    pub async fn unsubscribe(&self) -> InboxResult<bool> {
        let account = self.bound()?;
        Ok(settle(self.subscriptions.unsubscribe(&account).await)?.is_some())
    }

    // Preferences

    pub fn scopes(&self) -> InboxResult<ScopeSet> {
        self.scopes.read(&self.bound()?)
    }

    /// Enable exactly `keys`; every other scope is disabled.
    pub async fn update_scopes<I, S>(&self, keys: I) -> InboxResult<Option<ScopeSet>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let account = self.bound()?;
        settle(self.scopes.update(&account, keys).await)
    }

    // Inbox

    pub fn messages(&self) -> InboxResult<Vec<Message>> {
        self.inbox.list(&self.bound()?)
    }

    /// Record a pushed message. Returns whether it was new.
    pub fn receive(&self, message: Message) -> InboxResult<bool> {
        let account = self.bound()?;
        Ok(settle(self.inbox.receive(&account, message))?.unwrap_or(false))
    }

    /// Pull scopes and messages from the service.
    pub async fn refresh(&self) -> InboxResult<Option<Vec<Message>>> {
        let account = self.bound()?;
        if settle(self.scopes.refresh(&account).await)?.is_none() {
            return Ok(None);
        }
        settle(self.inbox.refresh(&account).await)
    }

    /// Delete locally at once; returns whether the service acknowledged it.
    pub async fn delete_message(&self, id: u64) -> InboxResult<bool> {
        let account = self.bound()?;
        Ok(settle(self.inbox.delete(&account, id).await)?.unwrap_or(false))
    }

    // Dispatch

    pub fn is_sending(&self) -> bool { self.dispatcher.is_sending() }

    pub async fn send(&self, payload: &NotificationPayload) -> InboxResult<bool> {
        let account = self.bound()?;
        Ok(settle(self.dispatcher.send(&account, payload).await)?.unwrap_or(false))
    }

    pub async fn send_test_notification(&self) -> InboxResult<bool> {
        self.send(&NotificationPayload::test_notification(&self.config.app_origin)).await
    }

    // Block watcher

    /// A watcher wired to this client, not yet running.
    pub fn block_watcher(&self) -> BlockWatcher {
        BlockWatcher::new(
            self.session.clone(),
            self.chain.clone(),
            self.dispatcher.clone(),
            self.config.watcher_config(),
        )
    }

    /// Start polling, replacing any watcher already running. Needs a tokio runtime.
    pub fn start_block_watcher(&self) -> InboxResult<()> {
        let handle = self.block_watcher().start();
        let previous = self
            .watcher
            .lock()
            .map_err(|_| InboxError::Lock("watcher"))?
            .replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .map(|w| w.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the watcher and wait for its loop to exit.
    pub async fn stop_block_watcher(&self) -> InboxResult<()> {
        let handle = self.watcher.lock().map_err(|_| InboxError::Lock("watcher"))?.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        Ok(())
    }

    /// Returns whether a watcher was running.
    fn cancel_watcher(&self) -> InboxResult<bool> {
        let handle = self.watcher.lock().map_err(|_| InboxError::Lock("watcher"))?.take();
        Ok(match handle {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.cancel();
                running
            }
            None => false,
        })
    }

    /// Stop background work and release the account.
    pub async fn close(&self) -> InboxResult<()> {
        self.stop_block_watcher().await?;
        self.binding.unbind()?;
        Ok(())
    }

    // Observation

    pub fn snapshot(&self) -> SessionSnapshot { self.session.snapshot() }
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> { self.session.watch() }

    async fn pull(&self, account: &Account) {
        if let Err(e) = self.scopes.refresh(account).await {
            log_pull_error("scopes", &e);
        }
        if let Err(e) = self.inbox.refresh(account).await {
            log_pull_error("messages", &e);
        }
    }
}

impl Drop for InboxClient {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.cancel();
            }
        }
    }
}

fn log_pull_error(what: &str, e: &InboxError) {
    if e.is_silent() {
        tracing::debug!(what, error = %e, "refresh discarded");
    } else {
        tracing::warn!(what, error = %e, "refresh after subscribe failed");
    }
}

/// Responses for a replaced account become `None`.
fn settle<T>(result: InboxResult<T>) -> InboxResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_silent() => {
            tracing::debug!(error = %e, "dropping response for unbound account");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_hides_stale() {
        let stale: InboxResult<u8> = Err(InboxError::Stale("eip155:1:0xabc".into()));
        assert_eq!(settle(stale), Ok(None));
        assert_eq!(settle(Ok(7u8)), Ok(Some(7)));
        let failed: InboxResult<u8> = Err(InboxError::NotSubscribed);
        assert_eq!(settle(failed), Err(InboxError::NotSubscribed));
    }
}
