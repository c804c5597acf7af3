//! Message inbox for the active subscription.
//!
//! Local state is the source of truth for display. Deleting removes the
//! message locally first; the remote delete is best-effort and a failure
//! does not bring the message back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::{Account, Session};
use crate::error::{InboxError, InboxResult};
use crate::service::NotifyService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub icon_url: String,
    pub url: String,
    pub received_at: DateTime<Utc>,
}

pub struct MessageInbox {
    session: Session,
    service: Arc<dyn NotifyService>,
}

impl MessageInbox {
    pub fn new(session: Session, service: Arc<dyn NotifyService>) -> Self { Self { session, service } }

    /// Messages newest first, recomputed on every call.
    pub fn list(&self, account: &Account) -> InboxResult<Vec<Message>> {
        self.session.ticket(account)?;
        self.session.read(|s| if s.is_active() { Ok(s.messages_desc()) } else { Err(InboxError::NotSubscribed) })?
    }

    /// Record a delivered message. Dismissed ids are ignored.
    pub fn receive(&self, account: &Account, message: Message) -> InboxResult<bool> {
        let ticket = self.session.ticket(account)?;
        self.session.apply(&ticket, |state| {
            if !state.is_active() {
                return Err(InboxError::NotSubscribed);
            }
            if state.dismissed.contains(&message.id) {
                return Ok(false);
            }
            Ok(state.messages.insert(message.id, message).is_none())
        })
    }

    /// Replace local messages with the service's list, minus dismissed ones.
    pub async fn refresh(&self, account: &Account) -> InboxResult<Vec<Message>> {
        let ticket = self.session.ticket(account)?;
        if !self.session.read(|s| s.is_active())? {
            return Err(InboxError::NotSubscribed);
        }
        let remote = self.service.list_messages(account).await.map_err(|e| InboxError::Transport(e.to_string()))?;
        self.session.apply(&ticket, |state| {
            if !state.is_active() {
                return Err(InboxError::NotSubscribed);
            }
            state.messages = remote
                .into_iter()
                .filter(|m| !state.dismissed.contains(&m.id))
                .map(|m| (m.id, m))
                .collect();
            Ok(state.messages_desc())
        })
    }

    /// Remove `id` locally, then ask the service to delete it.
    /// Returns whether the service acknowledged the delete.
    pub async fn delete(&self, account: &Account, id: u64) -> InboxResult<bool> {
        let ticket = self.session.ticket(account)?;
        self.session.apply(&ticket, |state| {
            if !state.is_active() {
                return Err(InboxError::NotSubscribed);
            }
            state.messages.remove(&id);
            state.dismissed.insert(id);
            Ok(())
        })?;

        match self.service.delete_message(id).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(account = %account, id, error = %e, "remote delete failed; message stays dismissed");
                Ok(false)
            }
        }
    }
}
