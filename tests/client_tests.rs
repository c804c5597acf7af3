//! Client Tests: full inbox lifecycle against in-memory collaborators
//!
//! These tests verify:
//! 1. Bind → register → subscribe → preferences → notify → inbox
//! 2. Optimistic delete survives a failing service
//! 3. Unbind discards state and in-flight responses
//! 4. Operations that need an active subscription

use beeinbox::memory::{InMemoryChain, InMemoryService, LocalSigner, Op};
use beeinbox::{
    ClientConfig, Collaborators, InboxClient, InboxError, Message, NotificationPayload, SubscriptionState,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const ADDRESS: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
const OTHER: &str = "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe";

struct Harness {
    client: InboxClient,
    service: Arc<InMemoryService>,
    signer: Arc<LocalSigner>,
}

fn harness() -> Harness {
    let service = Arc::new(InMemoryService::new());
    let signer = Arc::new(LocalSigner::new("test-wallet"));
    let chain = Arc::new(InMemoryChain::advancing(100));
    let client = InboxClient::new(
        ClientConfig::default(),
        Collaborators::new(service.clone(), chain, signer.clone()),
    );
    Harness { client, service, signer }
}

/// Test: complete flow from bind to a delivered notification
#[tokio::test]
async fn bind_subscribe_notify_flow() {
    let Harness { client, service, signer } = harness();

    let account = client.bind(ADDRESS).expect("bind");
    assert_eq!(account.id(), format!("eip155:1:{ADDRESS}"));
    assert_eq!(client.subscription_state().expect("state"), SubscriptionState::Absent);

    let record = client.subscribe().await.expect("subscribe").expect("record");
    assert_eq!(record.account, account.id());
    assert!(client.is_subscribed());
    assert_eq!(signer.prompts(), 1);
    assert_eq!(service.registrations(), 1);
    assert!(client.identity().expect("identity").is_some());

    // Scopes pulled after subscribe
    let scopes = client.scopes().expect("scopes");
    assert!(scopes.is_enabled("promotional"));
    assert!(scopes.is_enabled("transactional"));

    // Exactly the listed keys stay enabled
    let updated = client.update_scopes(["promotional"]).await.expect("update").expect("scopes");
    assert!(updated.is_enabled("promotional"));
    assert!(!updated.is_enabled("transactional"));
    assert_eq!(client.scopes().expect("scopes"), updated);

    assert!(client.send_test_notification().await.expect("send"));
    // Transactional is disabled: accepted, never delivered
    let block = NotificationPayload::new_block(101, "https://app.example", "https://etherscan.io/block");
    assert!(client.send(&block).await.expect("send"));
    assert_eq!(service.sent().len(), 2);

    let messages = client.refresh().await.expect("refresh").expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "GM Hacker");
    assert_eq!(client.messages().expect("messages"), messages);

    let snapshot = client.snapshot();
    assert_eq!(snapshot.account.as_deref(), Some(account.id().as_str()));
    assert!(snapshot.is_subscribed);
    assert!(snapshot.has_identity());
    assert_eq!(snapshot.messages.len(), 1);
}

/// Test: subscribing again after unsubscribe reuses the identity
#[tokio::test]
async fn unsubscribe_then_resubscribe() {
    let Harness { client, service, signer } = harness();
    let account = client.bind(ADDRESS).expect("bind");
    client.subscribe().await.expect("subscribe");

    assert!(client.unsubscribe().await.expect("unsubscribe"));
    assert_eq!(client.subscription_state().expect("state"), SubscriptionState::Absent);
    assert!(!service.is_subscribed(&account));
    assert_eq!(client.messages(), Err(InboxError::NotSubscribed));

    client.subscribe().await.expect("resubscribe");
    assert!(client.is_subscribed());
    assert_eq!(signer.prompts(), 1);
    assert_eq!(service.calls(Op::RegisterIdentity), 1);
}

/// Test: delete removes locally even when the service call fails
#[tokio::test]
async fn delete_is_optimistic() {
    let Harness { client, service, .. } = harness();
    client.bind(ADDRESS).expect("bind");
    client.subscribe().await.expect("subscribe");
    client.send_test_notification().await.expect("send");
    let messages = client.refresh().await.expect("refresh").expect("messages");
    let id = messages[0].id;

    service.fail_next(Op::DeleteMessage);
    let acknowledged = client.delete_message(id).await.expect("delete");
    assert!(!acknowledged);
    assert!(client.messages().expect("messages").is_empty());

    // Still on the server, but a refresh does not bring it back
    let messages = client.refresh().await.expect("refresh").expect("messages");
    assert!(messages.is_empty());
}

/// Test: pushed messages land in the inbox newest first
#[tokio::test]
async fn received_messages_are_newest_first() {
    let Harness { client, .. } = harness();
    client.bind(ADDRESS).expect("bind");
    client.subscribe().await.expect("subscribe");

    let message = |id: u64, minutes_ago: i64| Message {
        id,
        title: format!("message {id}"),
        body: String::new(),
        icon_url: String::new(),
        url: String::new(),
        received_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
    };
    assert!(client.receive(message(1, 10)).expect("receive"));
    assert!(client.receive(message(2, 1)).expect("receive"));
    assert!(!client.receive(message(2, 1)).expect("receive"));

    let ids: Vec<u64> = client.messages().expect("messages").iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![2, 1]);
}

/// Test: declined wallet prompt leaves the account unsubscribed
#[tokio::test]
async fn rejected_signature_blocks_subscribe() {
    let Harness { client, service, signer } = harness();
    client.bind(ADDRESS).expect("bind");
    signer.set_approve(false);

    let err = client.subscribe().await.unwrap_err();
    assert!(matches!(err, InboxError::SignatureRejected(_)));
    assert_eq!(client.subscription_state().expect("state"), SubscriptionState::Absent);
    assert_eq!(service.calls(Op::Subscribe), 0);
    assert!(client.identity().expect("identity").is_none());
}

/// Test: nothing works before a bind
#[tokio::test]
async fn unbound_client_rejects_operations() {
    let Harness { client, .. } = harness();
    assert_eq!(client.subscribe().await, Err(InboxError::NotBound));
    assert_eq!(client.send_test_notification().await, Err(InboxError::NotBound));
    assert_eq!(client.messages(), Err(InboxError::NotBound));
}

/// Test: subscription-gated operations before subscribing
#[tokio::test]
async fn operations_require_active_subscription() {
    let Harness { client, service, .. } = harness();
    client.bind(ADDRESS).expect("bind");

    assert_eq!(client.scopes(), Err(InboxError::NotSubscribed));
    assert!(matches!(
        client.update_scopes(["promotional"]).await,
        Err(InboxError::PreferencesUpdateFailed(_))
    ));
    assert!(!client.send_test_notification().await.expect("send"));
    assert_eq!(service.calls(Op::SendNotification), 0);
    assert!(matches!(client.unsubscribe().await, Err(InboxError::InvalidTransition { .. })));
}

/// Test: unbind clears state; rebinding starts fresh
#[tokio::test]
async fn unbind_clears_account_state() {
    let Harness { client, .. } = harness();
    client.bind(ADDRESS).expect("bind");
    client.subscribe().await.expect("subscribe");

    let previous = client.unbind().expect("unbind").expect("account");
    assert_eq!(previous.address(), ADDRESS);
    assert!(client.account().is_none());
    assert!(!client.is_subscribed());
    assert_eq!(client.snapshot().account, None);

    client.bind(ADDRESS).expect("rebind");
    assert_eq!(client.subscription_state().expect("state"), SubscriptionState::Absent);
    assert!(client.identity().expect("identity").is_none());
}

/// Test: switching accounts keeps no state from the first one
#[tokio::test]
async fn switching_accounts_resets_state() {
    let Harness { client, .. } = harness();
    client.bind(ADDRESS).expect("bind");
    client.subscribe().await.expect("subscribe");

    let other = client.bind(OTHER).expect("bind other");
    assert_eq!(client.account(), Some(other));
    assert!(!client.is_subscribed());
    assert!(client.identity().expect("identity").is_none());
}

/// Test: the same address in another casing is the same account
#[tokio::test]
async fn rebinding_other_casing_keeps_subscription() {
    let Harness { client, service, .. } = harness();
    let account = client.bind(ADDRESS).expect("bind");
    client.subscribe().await.expect("subscribe");

    let lower = client.bind(&ADDRESS.to_lowercase()).expect("rebind");
    assert_eq!(lower, account);
    assert!(client.is_subscribed());
    assert!(client.identity().expect("identity").is_some());
    assert_eq!(client.account().expect("account").address(), ADDRESS);
    assert_eq!(service.calls(Op::Subscribe), 1);
}

/// Test: unbinding mid-subscribe drops the response without an error
#[tokio::test(start_paused = true)]
async fn unbind_during_subscribe_is_silent() {
    let Harness { client, service, .. } = harness();
    client.bind(ADDRESS).expect("bind");
    service.set_latency(Duration::from_secs(1));

    let (result, _) = tokio::join!(client.subscribe(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.unbind().expect("unbind");
    });

    assert_eq!(result, Ok(None));
    assert!(client.account().is_none());
    assert!(!client.snapshot().is_subscribed);
}

/// Test: observers see every state change
#[tokio::test]
async fn snapshots_are_published() {
    let Harness { client, .. } = harness();
    let mut rx = client.watch();
    assert!(rx.borrow_and_update().account.is_none());

    client.bind(ADDRESS).expect("bind");
    assert!(rx.has_changed().expect("sender alive"));
    assert!(rx.borrow_and_update().account.is_some());

    client.subscribe().await.expect("subscribe");
    let snapshot = rx.borrow_and_update().clone();
    assert!(snapshot.is_subscribed);
    assert_eq!(snapshot.subscription, SubscriptionState::Active);
    assert!(snapshot.scopes.is_enabled("transactional"));
}
