//! Session - process-wide context holding the bound account and its state.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::{Account, ChainConfig};
use crate::error::{InboxError, InboxResult};
use crate::identity::Identity;
use crate::inbox::Message;
use crate::scopes::ScopeSet;
use crate::subscription::{SubscriptionRecord, SubscriptionState};

/// Per-account state. Reset wholesale on unbind.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub(crate) identity: Option<Identity>,
    pub(crate) subscription: SubscriptionState,
    pub(crate) record: Option<SubscriptionRecord>,
    pub(crate) scopes: ScopeSet,
    pub(crate) messages: BTreeMap<u64, Message>,
    pub(crate) dismissed: BTreeSet<u64>,
}

impl AccountState {
    pub fn identity(&self) -> Option<&Identity> { self.identity.as_ref() }
    pub fn subscription(&self) -> SubscriptionState { self.subscription }
    pub fn is_active(&self) -> bool { self.subscription == SubscriptionState::Active }

    /// Drop everything that belongs to the subscription.
    pub(crate) fn clear_subscription(&mut self) {
        self.record = None;
        self.scopes = ScopeSet::default();
        self.messages.clear();
        self.dismissed.clear();
    }

    pub(crate) fn messages_desc(&self) -> Vec<Message> {
        self.messages.values().rev().cloned().collect()
    }
}

/// Proof that an operation started against a specific binding.
///
/// Results are only applied while the session generation still matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    account: Account,
    generation: u64,
}

impl Ticket {
    pub fn account(&self) -> &Account { &self.account }
    pub fn generation(&self) -> u64 { self.generation }
}

/// Read-only view published to the UI after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub account: Option<String>,
    pub identity_key: Option<String>,
    pub subscription: SubscriptionState,
    pub is_subscribed: bool,
    pub is_subscribing: bool,
    pub is_unsubscribing: bool,
    pub record: Option<SubscriptionRecord>,
    pub scopes: ScopeSet,
    pub messages: Vec<Message>,
}

impl SessionSnapshot {
    pub fn has_identity(&self) -> bool { self.identity_key.is_some() }
}

struct SessionInner {
    account: Option<Account>,
    generation: u64,
    state: AccountState,
}

impl SessionInner {
    fn snapshot(&self) -> SessionSnapshot {
        let state = &self.state;
        SessionSnapshot {
            account: self.account.as_ref().map(Account::id),
            identity_key: state.identity.as_ref().map(|i| i.key.clone()),
            subscription: state.subscription,
            is_subscribed: state.subscription == SubscriptionState::Active,
            is_subscribing: state.subscription == SubscriptionState::PendingSubscribe,
            is_unsubscribing: state.subscription == SubscriptionState::PendingUnsubscribe,
            record: state.record.clone(),
            scopes: state.scopes.clone(),
            messages: state.messages_desc(),
        }
    }
}

/// Shared session context. Cheap to clone; every component takes one.
#[derive(Clone)]
pub struct Session {
    chain: ChainConfig,
    inner: Arc<Mutex<SessionInner>>,
    snapshots: Arc<watch::Sender<SessionSnapshot>>,
}

impl Session {
    pub fn new(chain: ChainConfig) -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            chain,
            inner: Arc::new(Mutex::new(SessionInner { account: None, generation: 0, state: AccountState::default() })),
            snapshots: Arc::new(tx),
        }
    }

    pub fn chain(&self) -> &ChainConfig { &self.chain }

    pub fn account(&self) -> Option<Account> {
        self.inner.lock().ok().and_then(|g| g.account.clone())
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().map(|g| g.generation).unwrap_or(0)
    }

    /// Returns true when the binding changed.
    pub(crate) fn bind_account(&self, account: Account) -> InboxResult<bool> {
        let mut guard = self.inner.lock().map_err(|_| InboxError::Lock("session"))?;
        if guard.account.as_ref() == Some(&account) {
            return Ok(false);
        }
        guard.account = Some(account);
        guard.generation += 1;
        guard.state = AccountState::default();
        self.publish(&guard);
        Ok(true)
    }

    pub(crate) fn unbind(&self) -> InboxResult<Option<Account>> {
        let mut guard = self.inner.lock().map_err(|_| InboxError::Lock("session"))?;
        let previous = guard.account.take();
        if previous.is_some() {
            guard.generation += 1;
            guard.state = AccountState::default();
            self.publish(&guard);
        }
        Ok(previous)
    }

    /// Start an operation for `account`, which must be the bound account.
    pub fn ticket(&self, account: &Account) -> InboxResult<Ticket> {
        let guard = self.inner.lock().map_err(|_| InboxError::Lock("session"))?;
        match guard.account.as_ref() {
            None => Err(InboxError::NotBound),
            Some(bound) if bound == account => Ok(Ticket { account: bound.clone(), generation: guard.generation }),
            Some(_) => Err(InboxError::Stale(account.id())),
        }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.inner.lock().map(|g| g.generation == ticket.generation).unwrap_or(false)
    }

    /// Read the state of the bound account.
    pub fn read<R>(&self, f: impl FnOnce(&AccountState) -> R) -> InboxResult<R> {
        let guard = self.inner.lock().map_err(|_| InboxError::Lock("session"))?;
        Ok(f(&guard.state))
    }

    /// Mutate the state if `ticket` still names the bound account.
    /// A stale ticket leaves state untouched and yields `InboxError::Stale`.
    pub(crate) fn apply<R>(
        &self,
        ticket: &Ticket,
        f: impl FnOnce(&mut AccountState) -> InboxResult<R>,
    ) -> InboxResult<R> {
        let mut guard = self.inner.lock().map_err(|_| InboxError::Lock("session"))?;
        if guard.generation != ticket.generation {
            tracing::debug!(account = %ticket.account, "discarding response for unbound account");
            return Err(InboxError::Stale(ticket.account.id()));
        }
        let result = f(&mut guard.state);
        self.publish(&guard);
        result
    }

    pub fn snapshot(&self) -> SessionSnapshot { self.snapshots.borrow().clone() }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> { self.snapshots.subscribe() }

    fn publish(&self, inner: &SessionInner) {
        self.snapshots.send_replace(inner.snapshot());
    }
}
