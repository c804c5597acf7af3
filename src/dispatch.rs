//! Outbound notifications sent on behalf of the subscribed account.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::account::{Account, Session};
use crate::error::{InboxError, InboxResult};
use crate::service::NotifyService;

pub const PROMOTIONAL: &str = "promotional";
pub const TRANSACTIONAL: &str = "transactional";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon_url: String,
    pub url: String,
    /// Scope key the notification is filed under.
    pub category: String,
}

impl NotificationPayload {
    /// Test notification offered to freshly subscribed users.
    pub fn test_notification(origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        Self {
            title: "GM Hacker".into(),
            body: "Hack it until you make it!".into(),
            icon_url: format!("{origin}/WalletConnect-blue.svg"),
            url: format!("{origin}/"),
            category: PROMOTIONAL.into(),
        }
    }

    pub fn new_block(height: u64, origin: &str, explorer: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        let explorer = explorer.trim_end_matches('/');
        Self {
            title: "New block".into(),
            body: height.to_string(),
            icon_url: format!("{origin}/eth-glyph-colored.png"),
            url: format!("{explorer}/{height}"),
            category: TRANSACTIONAL.into(),
        }
    }
}

pub struct NotificationDispatcher {
    session: Session,
    service: Arc<dyn NotifyService>,
    /// Sends in flight.
    sending: AtomicUsize,
}

impl NotificationDispatcher {
    pub fn new(session: Session, service: Arc<dyn NotifyService>) -> Self {
        Self { session, service, sending: AtomicUsize::new(0) }
    }

    pub fn is_sending(&self) -> bool { self.sending.load(Ordering::SeqCst) > 0 }

    /// Send `payload`. Without an active subscription this is a no-op
    /// returning `Ok(false)`. Failures are reported, never retried.
    pub async fn send(&self, account: &Account, payload: &NotificationPayload) -> InboxResult<bool> {
        let ticket = self.session.ticket(account)?;
        if !self.session.read(|s| s.is_active())? {
            tracing::debug!(account = %account, title = %payload.title, "not subscribed; skipping send");
            return Ok(false);
        }

        let result = {
            let _in_flight = InFlight::enter(&self.sending);
            self.service.send_notification(account, payload).await
        };

        if !self.session.is_current(&ticket) {
            return Err(InboxError::Stale(account.id()));
        }
        match result {
            Ok(()) => {
                tracing::info!(account = %account, title = %payload.title, category = %payload.category, "notification sent");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "notification dispatch failed");
                Err(InboxError::DispatchFailed(e.to_string()))
            }
        }
    }
}

/// Counts one send for as long as it lives, including when the send is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountBinding, ChainConfig};
    use crate::identity::{IdentityRegistrar, IdentitySigner};
    use crate::memory::{InMemoryService, LocalSigner, Op};
    use crate::subscription::{SubscriptionConfig, SubscriptionManager};
    use std::time::Duration;

    const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    struct Fixture {
        binding: AccountBinding,
        account: Account,
        service: Arc<InMemoryService>,
        manager: SubscriptionManager,
        dispatcher: NotificationDispatcher,
    }

    async fn fixture() -> Fixture {
        let session = Session::new(ChainConfig::default());
        let binding = AccountBinding::new(session.clone());
        let account = binding.bind(ADDRESS).unwrap();
        let service = Arc::new(InMemoryService::new());
        let signer = IdentitySigner::new(Arc::new(LocalSigner::new("secret")));
        IdentityRegistrar::new(session.clone(), service.clone(), "example.org")
            .register(&account, &signer)
            .await
            .unwrap();
        let manager = SubscriptionManager::new(session.clone(), service.clone(), SubscriptionConfig::default());
        let dispatcher = NotificationDispatcher::new(session, service.clone());
        Fixture { binding, account, service, manager, dispatcher }
    }

    #[tokio::test]
    async fn send_without_subscription_is_noop() {
        let f = fixture().await;
        let payload = NotificationPayload::test_notification("https://app.example");
        assert!(!f.dispatcher.send(&f.account, &payload).await.unwrap());
        assert_eq!(f.service.calls(Op::SendNotification), 0);
    }

    #[tokio::test]
    async fn send_failure_is_reported_once() {
        let f = fixture().await;
        f.manager.subscribe(&f.account).await.unwrap();
        let payload = NotificationPayload::test_notification("https://app.example");

        f.service.fail_next(Op::SendNotification);
        let err = f.dispatcher.send(&f.account, &payload).await.unwrap_err();
        assert!(matches!(err, InboxError::DispatchFailed(_)));
        assert_eq!(f.service.calls(Op::SendNotification), 1);
        assert!(!f.dispatcher.is_sending());

        assert!(f.dispatcher.send(&f.account, &payload).await.unwrap());
        assert_eq!(f.service.sent(), vec![payload]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_send_clears_sending_flag() {
        let f = fixture().await;
        f.manager.subscribe(&f.account).await.unwrap();
        f.service.set_latency(Duration::from_secs(60));
        let payload = NotificationPayload::test_notification("https://app.example");

        let cut = tokio::time::timeout(Duration::from_secs(1), f.dispatcher.send(&f.account, &payload)).await;
        assert!(cut.is_err());
        assert!(!f.dispatcher.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_sends_keep_flag_until_last() {
        let f = fixture().await;
        f.manager.subscribe(&f.account).await.unwrap();
        f.service.set_latency(Duration::from_millis(100));
        let payload = NotificationPayload::test_notification("https://app.example");
        let block = NotificationPayload::new_block(101, "https://app.example", "https://etherscan.io/block");

        let (first, second, _) = tokio::join!(
            f.dispatcher.send(&f.account, &payload),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                f.dispatcher.send(&f.account, &block).await
            },
            async {
                // First send done, second still in flight.
                tokio::time::sleep(Duration::from_millis(120)).await;
                assert!(f.dispatcher.is_sending());
            }
        );
        assert!(first.unwrap());
        assert!(second.unwrap());
        assert!(!f.dispatcher.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn sending_flag_and_unbind() {
        let f = fixture().await;
        f.manager.subscribe(&f.account).await.unwrap();
        f.service.set_latency(Duration::from_millis(100));
        let payload = NotificationPayload::test_notification("https://app.example");

        let (result, _) = tokio::join!(f.dispatcher.send(&f.account, &payload), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(f.dispatcher.is_sending());
            f.binding.unbind().unwrap();
        });
        assert!(result.unwrap_err().is_silent());
        assert!(!f.dispatcher.is_sending());
    }

    #[test]
    fn block_payload() {
        let payload = NotificationPayload::new_block(19_000_000, "https://app.example/", "https://etherscan.io/block/");
        assert_eq!(payload.title, "New block");
        assert_eq!(payload.body, "19000000");
        assert_eq!(payload.url, "https://etherscan.io/block/19000000");
        assert_eq!(payload.icon_url, "https://app.example/eth-glyph-colored.png");
        assert_eq!(payload.category, TRANSACTIONAL);
    }

    #[test]
    fn test_payload_is_promotional() {
        let payload = NotificationPayload::test_notification("https://app.example");
        assert_eq!(payload.category, PROMOTIONAL);
        assert_eq!(payload.url, "https://app.example/");
        assert_eq!(serde_json::to_value(&payload).unwrap()["iconUrl"], "https://app.example/WalletConnect-blue.svg");
    }
}
