//! Collaborators - wallet signer, notification service, chain reader.
//!
//! The client only orchestrates; transport lives behind these traits.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::account::Account;
use crate::dispatch::NotificationPayload;
use crate::error::{ServiceError, SignerError};
use crate::identity::SignedChallenge;
use crate::inbox::Message;
use crate::scopes::ScopeSet;
use crate::subscription::SubscriptionRecord;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Wallet message signing. May prompt the user.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn sign(&self, message: &str) -> Result<String, SignerError>;
}

/// Notification delivery backend.
#[async_trait]
pub trait NotifyService: Send + Sync {
    /// Returns the registered identity key.
    async fn register_identity(&self, account: &Account, challenge: &SignedChallenge) -> ServiceResult<String>;
    async fn subscribe(&self, account: &Account) -> ServiceResult<SubscriptionRecord>;
    async fn unsubscribe(&self, account: &Account) -> ServiceResult<()>;
    async fn get_scopes(&self, account: &Account) -> ServiceResult<ScopeSet>;
    /// Replaces the enabled subset with `enabled` and returns the new set.
    async fn update_scopes(&self, account: &Account, enabled: &BTreeSet<String>) -> ServiceResult<ScopeSet>;
    async fn list_messages(&self, account: &Account) -> ServiceResult<Vec<Message>>;
    async fn delete_message(&self, id: u64) -> ServiceResult<()>;
    async fn send_notification(&self, account: &Account, payload: &NotificationPayload) -> ServiceResult<()>;
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn current_block_height(&self) -> ServiceResult<u64>;
}
