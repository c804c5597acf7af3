//! Errors for the inbox client and its collaborators.

use thiserror::Error;

use crate::subscription::SubscriptionState;

pub type InboxResult<T> = Result<T, InboxError>;

/// Failure reported by the notification service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("transport: {0}")]
    Transport(String),
}

/// Failure reported by the wallet while signing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// User dismissed the wallet prompt.
    #[error("user rejected the signature request")]
    Rejected,

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Inbox client errors.
///
/// Every variant except `Lock` is recoverable at the user-action level: the
/// state machine is back in a stable state and the action can be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InboxError {
    #[error("signature rejected: {0}")]
    SignatureRejected(String),

    #[error("identity registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("unsubscription failed: {0}")]
    UnsubscriptionFailed(String),

    #[error("preferences update failed: {0}")]
    PreferencesUpdateFailed(String),

    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no account bound")]
    NotBound,

    #[error("no identity registered for {0}")]
    IdentityMissing(String),

    #[error("no active subscription")]
    NotSubscribed,

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: SubscriptionState,
    },

    #[error("transition in flight: {0}")]
    Busy(SubscriptionState),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Response arrived for an account that has since been unbound.
    #[error("response for unbound account {0} discarded")]
    Stale(String),

    #[error("state lock poisoned: {0}")]
    Lock(&'static str),
}

impl InboxError {
    /// Errors the UI layer must not display.
    pub fn is_silent(&self) -> bool {
        matches!(self, InboxError::Stale(_))
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, InboxError::Lock(_))
    }
}

impl From<SignerError> for InboxError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::Rejected => InboxError::SignatureRejected(e.to_string()),
            SignerError::Unavailable(msg) => InboxError::Transport(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_is_silent() {
        assert!(InboxError::Stale("eip155:1:0xabc".into()).is_silent());
        assert!(!InboxError::NotBound.is_silent());
        assert!(!InboxError::SubscriptionFailed("boom".into()).is_silent());
    }

    #[test]
    fn only_lock_is_fatal() {
        assert!(!InboxError::Lock("session").is_recoverable());
        assert!(InboxError::DispatchFailed("x".into()).is_recoverable());
        assert!(InboxError::Busy(SubscriptionState::PendingSubscribe).is_recoverable());
    }

    #[test]
    fn signer_errors_map() {
        assert!(matches!(InboxError::from(SignerError::Rejected), InboxError::SignatureRejected(_)));
        assert_eq!(
            InboxError::from(SignerError::Unavailable("no wallet".into())),
            InboxError::Transport("no wallet".into())
        );
    }
}
