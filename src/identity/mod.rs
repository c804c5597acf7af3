//! Identity - one-time registration of an account's notification key.
//!
//! The wallet signs a challenge; the service answers with the identity key.
//! Result is cached in the session, so a second `register` never prompts again.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::account::{Account, Session};
use crate::error::{InboxError, InboxResult, ServiceError};
use crate::service::{NotifyService, WalletSigner};

const STATEMENT: &str = "I further authorize this app to send me notifications.";

/// Wallet signing wrapped with the client's error taxonomy.
#[derive(Clone)]
pub struct IdentitySigner {
    wallet: Arc<dyn WalletSigner>,
}

impl IdentitySigner {
    pub fn new(wallet: Arc<dyn WalletSigner>) -> Self { Self { wallet } }

    pub async fn sign(&self, message: &str) -> InboxResult<String> {
        let signature = self.wallet.sign(message).await?;
        if signature.trim().is_empty() {
            return Err(InboxError::SignatureRejected("empty signature".into()));
        }
        Ok(signature)
    }
}

/// Fresh challenge per registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationChallenge {
    pub account: String,
    pub domain: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

impl RegistrationChallenge {
    pub fn new(account: &Account, domain: &str) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            account: account.id(),
            domain: domain.to_string(),
            nonce: hex::encode(nonce),
            issued_at: Utc::now(),
        }
    }

    /// Text shown in the wallet prompt.
    pub fn message(&self) -> String {
        format!(
            "{domain} wants you to sign in with your account:\n{account}\n\n{STATEMENT}\n\nURI: https://{domain}\nNonce: {nonce}\nIssued At: {issued}",
            domain = self.domain,
            account = self.account,
            nonce = self.nonce,
            issued = self.issued_at.to_rfc3339(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedChallenge {
    pub challenge: RegistrationChallenge,
    pub message: String,
    pub signature: String,
}

/// Registered identity key for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account: String,
    pub key: String,
    pub registered_at: DateTime<Utc>,
}

pub struct IdentityRegistrar {
    session: Session,
    service: Arc<dyn NotifyService>,
    domain: String,
    // Serializes registrations so concurrent callers share one prompt.
    in_flight: AsyncMutex<()>,
}

impl IdentityRegistrar {
    pub fn new(session: Session, service: Arc<dyn NotifyService>, domain: impl Into<String>) -> Self {
        Self { session, service, domain: domain.into(), in_flight: AsyncMutex::new(()) }
    }

    pub fn identity(&self) -> InboxResult<Option<Identity>> {
        self.session.read(|s| s.identity.clone())
    }

    pub async fn register(&self, account: &Account, signer: &IdentitySigner) -> InboxResult<Identity> {
        let ticket = self.session.ticket(account)?;
        let _guard = self.in_flight.lock().await;

        if !self.session.is_current(&ticket) {
            return Err(InboxError::Stale(account.id()));
        }
        if let Some(identity) = self.identity()? {
            return Ok(identity);
        }

        let challenge = RegistrationChallenge::new(account, &self.domain);
        let message = challenge.message();
        let signature = signer.sign(&message).await.inspect_err(|e| {
            tracing::warn!(account = %account, error = %e, "identity signature not obtained");
        })?;

        // Wallet may have disconnected while the prompt was open.
        if !self.session.is_current(&ticket) {
            tracing::debug!(account = %account, "dropping signature for unbound account");
            return Err(InboxError::Stale(account.id()));
        }

        let signed = SignedChallenge { challenge, message, signature };
        let key = self
            .service
            .register_identity(account, &signed)
            .await
            .map_err(|e| match e {
                ServiceError::Rejected(msg) => InboxError::RegistrationRejected(msg),
                ServiceError::Transport(msg) => InboxError::Transport(msg),
            })
            .inspect_err(|e| tracing::warn!(account = %account, error = %e, "identity registration failed"))?;
        if key.trim().is_empty() {
            return Err(InboxError::RegistrationRejected("empty identity key".into()));
        }

        let identity = Identity { account: account.id(), key, registered_at: Utc::now() };
        let identity = self
            .session
            .apply(&ticket, |state| Ok(state.identity.get_or_insert(identity).clone()))?;
        tracing::info!(account = %account, key = %identity.key, "identity registered");
        Ok(identity)
    }
}
