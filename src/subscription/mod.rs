//! Subscription - opt-in state machine against the notification service.
//!
//! ```text
//!            subscribe()                 ok
//!   Absent ─────────────▶ PendingSubscribe ─────▶ Active
//!     ▲                        │ err/timeout        │
//!     └────────────────────────┘                    │ unsubscribe()
//!     ▲          ok                                 ▼
//!     └──────────────── PendingUnsubscribe ◀────────┘
//!                              │ err/timeout
//!                              └──────────▶ Active
//! ```
//!
//! One transition at a time: requests while pending are rejected with
//! `InboxError::Busy`. Failures always land in the last stable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::account::{Account, Session, Ticket};
use crate::error::{InboxError, InboxResult};
use crate::service::{NotifyService, ServiceResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionState {
    #[default]
    Absent,
    PendingSubscribe,
    Active,
    PendingUnsubscribe,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Absent => "absent",
            SubscriptionState::PendingSubscribe => "pending-subscribe",
            SubscriptionState::Active => "active",
            SubscriptionState::PendingUnsubscribe => "pending-unsubscribe",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SubscriptionState::PendingSubscribe | SubscriptionState::PendingUnsubscribe)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Service-side record of an active subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub topic: String,
    pub account: String,
    pub app_domain: String,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Upper bound on a subscribe/unsubscribe call. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self { Self { timeout: Some(Duration::from_secs(30)) } }
}

impl SubscriptionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = Some(timeout); self }
    pub fn without_timeout(mut self) -> Self { self.timeout = None; self }
}

pub struct SubscriptionManager {
    session: Session,
    service: Arc<dyn NotifyService>,
    config: SubscriptionConfig,
}

impl SubscriptionManager {
    pub fn new(session: Session, service: Arc<dyn NotifyService>, config: SubscriptionConfig) -> Self {
        Self { session, service, config }
    }

    pub fn state(&self) -> InboxResult<SubscriptionState> { self.session.read(|s| s.subscription) }
    pub fn is_subscribed(&self) -> bool { self.state().map(|s| s == SubscriptionState::Active).unwrap_or(false) }
    pub fn is_subscribing(&self) -> bool { self.state().map(|s| s == SubscriptionState::PendingSubscribe).unwrap_or(false) }
    pub fn is_unsubscribing(&self) -> bool { self.state().map(|s| s == SubscriptionState::PendingUnsubscribe).unwrap_or(false) }
    pub fn record(&self) -> InboxResult<Option<SubscriptionRecord>> { self.session.read(|s| s.record.clone()) }

    /// `Absent -> PendingSubscribe -> Active | Absent`. Needs a registered identity.
    pub async fn subscribe(&self, account: &Account) -> InboxResult<SubscriptionRecord> {
        let ticket = self.session.ticket(account)?;
        let transition = self.begin(ticket, "subscribe", SubscriptionState::Absent, SubscriptionState::PendingSubscribe, |state| {
            if state.identity.is_none() {
                return Err(InboxError::IdentityMissing(account.id()));
            }
            Ok(())
        })?;
        tracing::debug!(account = %account, "subscribing");

        let outcome = self.call(self.service.subscribe(account)).await;
        let ticket = transition.complete();
        self.session.apply(&ticket, |state| match outcome {
            Ok(record) => {
                state.subscription = SubscriptionState::Active;
                state.record = Some(record.clone());
                tracing::info!(account = %account, topic = %record.topic, "subscribed");
                Ok(record)
            }
            Err(reason) => {
                state.subscription = SubscriptionState::Absent;
                tracing::warn!(account = %account, %reason, "subscribe failed");
                Err(InboxError::SubscriptionFailed(reason))
            }
        })
    }

    /// `Active -> PendingUnsubscribe -> Absent | Active`.
    pub async fn unsubscribe(&self, account: &Account) -> InboxResult<()> {
        let ticket = self.session.ticket(account)?;
        let transition =
            self.begin(ticket, "unsubscribe", SubscriptionState::Active, SubscriptionState::PendingUnsubscribe, |_| Ok(()))?;
        tracing::debug!(account = %account, "unsubscribing");

        let outcome = self.call(self.service.unsubscribe(account)).await;
        let ticket = transition.complete();
        self.session.apply(&ticket, |state| match outcome {
            Ok(()) => {
                state.subscription = SubscriptionState::Absent;
                state.clear_subscription();
                tracing::info!(account = %account, "unsubscribed");
                Ok(())
            }
            Err(reason) => {
                state.subscription = SubscriptionState::Active;
                tracing::warn!(account = %account, %reason, "unsubscribe failed");
                Err(InboxError::UnsubscriptionFailed(reason))
            }
        })
    }

    /// Enter the pending state. The returned guard rolls back to `from` if the
    /// call is dropped before it completes.
    fn begin(
        &self,
        ticket: Ticket,
        action: &'static str,
        from: SubscriptionState,
        to: SubscriptionState,
        guard: impl FnOnce(&crate::account::AccountState) -> InboxResult<()>,
    ) -> InboxResult<Transition<'_>> {
        self.session.apply(&ticket, |state| {
            if state.subscription.is_pending() {
                return Err(InboxError::Busy(state.subscription));
            }
            if state.subscription != from {
                return Err(InboxError::InvalidTransition { action, state: state.subscription });
            }
            guard(state)?;
            state.subscription = to;
            Ok(())
        })?;
        Ok(Transition { session: &self.session, ticket, from, pending: to, armed: true })
    }

    async fn call<T>(&self, fut: impl Future<Output = ServiceResult<T>>) -> Result<T, String> {
        let result = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => return Err(format!("timed out after {}ms", limit.as_millis())),
            },
            None => fut.await,
        };
        result.map_err(|e| e.to_string())
    }
}

/// An in-flight transition. Dropping it before `complete` puts the state
/// back to where the transition started.
struct Transition<'a> {
    session: &'a Session,
    ticket: Ticket,
    from: SubscriptionState,
    pending: SubscriptionState,
    armed: bool,
}

impl Transition<'_> {
    /// The call finished; the caller now owns the outcome.
    fn complete(mut self) -> Ticket {
        self.armed = false;
        self.ticket.clone()
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (from, pending) = (self.from, self.pending);
        let reverted = self.session.apply(&self.ticket, |state| {
            if state.subscription == pending {
                state.subscription = from;
            }
            Ok(())
        });
        match reverted {
            Ok(()) => tracing::warn!(account = %self.ticket.account(), state = %from, "transition abandoned; state restored"),
            Err(e) => tracing::debug!(error = %e, "abandoned transition not restored"),
        }
    }
}
