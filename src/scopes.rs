//! Scope preferences - which notification categories the user receives.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::account::{Account, Session};
use crate::error::{InboxError, InboxResult};
use crate::service::NotifyService;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

impl Scope {
    pub fn new(description: impl Into<String>, enabled: bool) -> Self {
        Self { enabled, description: description.into() }
    }
}

/// Scope key -> scope, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeMap<String, Scope>);

impl ScopeSet {
    pub fn new() -> Self { Self::default() }

    pub fn with_scope(mut self, key: impl Into<String>, description: impl Into<String>, enabled: bool) -> Self {
        self.0.insert(key.into(), Scope::new(description, enabled));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Scope> { self.0.get(key) }
    pub fn is_enabled(&self, key: &str) -> bool { self.0.get(key).is_some_and(|s| s.enabled) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scope)> { self.0.iter().map(|(k, v)| (k.as_str(), v)) }

    pub fn enabled_keys(&self) -> BTreeSet<String> {
        self.0.iter().filter(|(_, s)| s.enabled).map(|(k, _)| k.clone()).collect()
    }

    /// Same scopes with exactly `enabled` switched on. Keys not in the set are
    /// switched off; unknown keys in `enabled` are ignored.
    pub fn with_enabled(&self, enabled: &BTreeSet<String>) -> ScopeSet {
        ScopeSet(
            self.0
                .iter()
                .map(|(k, s)| (k.clone(), Scope { enabled: enabled.contains(k), description: s.description.clone() }))
                .collect(),
        )
    }
}

impl FromIterator<(String, Scope)> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = (String, Scope)>>(iter: I) -> Self { ScopeSet(iter.into_iter().collect()) }
}

pub struct ScopePreferences {
    session: Session,
    service: Arc<dyn NotifyService>,
}

impl ScopePreferences {
    pub fn new(session: Session, service: Arc<dyn NotifyService>) -> Self { Self { session, service } }

    /// Last server-confirmed scopes. Needs an active subscription.
    pub fn read(&self, account: &Account) -> InboxResult<ScopeSet> {
        self.session.ticket(account)?;
        self.session.read(|s| if s.is_active() { Ok(s.scopes.clone()) } else { Err(InboxError::NotSubscribed) })?
    }

    /// Pull scopes from the service.
    pub async fn refresh(&self, account: &Account) -> InboxResult<ScopeSet> {
        let ticket = self.session.ticket(account)?;
        if !self.session.read(|s| s.is_active())? {
            return Err(InboxError::NotSubscribed);
        }
        let scopes = self.service.get_scopes(account).await.map_err(|e| InboxError::Transport(e.to_string()))?;
        self.session.apply(&ticket, |state| {
            if !state.is_active() {
                return Err(InboxError::NotSubscribed);
            }
            state.scopes = scopes.clone();
            Ok(scopes)
        })
    }

    /// Replace the enabled subset with `enabled`. All-or-nothing: on failure the
    /// local scopes are untouched.
    pub async fn update<I, S>(&self, account: &Account, enabled: I) -> InboxResult<ScopeSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ticket = self.session.ticket(account)?;
        let enabled: BTreeSet<String> = enabled.into_iter().map(Into::into).collect();
        if !self.session.read(|s| s.is_active())? {
            return Err(InboxError::PreferencesUpdateFailed("no active subscription".into()));
        }

        let updated = self
            .service
            .update_scopes(account, &enabled)
            .await
            .map_err(|e| InboxError::PreferencesUpdateFailed(e.to_string()))
            .inspect_err(|e| tracing::warn!(account = %account, error = %e, "scope update failed"))?;

        self.session.apply(&ticket, |state| {
            if !state.is_active() {
                return Err(InboxError::PreferencesUpdateFailed("subscription ended during update".into()));
            }
            state.scopes = updated.clone();
            Ok(updated)
        })
        .inspect(|scopes| tracing::info!(account = %account, enabled = ?scopes.enabled_keys(), "scopes updated"))
    }
}
