//! In-memory collaborators: notification service, chain reader, wallet signer.
//!
//! Used by the CLI demo and tests. Behaviour mirrors the real backend closely
//! enough to exercise every client path, and each call can be delayed or
//! failed on demand.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::account::Account;
use crate::dispatch::{NotificationPayload, PROMOTIONAL, TRANSACTIONAL};
use crate::error::{ServiceError, SignerError};
use crate::identity::SignedChallenge;
use crate::inbox::Message;
use crate::scopes::ScopeSet;
use crate::service::{ChainReader, NotifyService, ServiceResult, WalletSigner};
use crate::subscription::SubscriptionRecord;

/// Service operations, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    RegisterIdentity,
    Subscribe,
    Unsubscribe,
    GetScopes,
    UpdateScopes,
    ListMessages,
    DeleteMessage,
    SendNotification,
}

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

pub fn default_scopes() -> ScopeSet {
    ScopeSet::new()
        .with_scope(PROMOTIONAL, "Product news and offers", true)
        .with_scope(TRANSACTIONAL, "New blocks and account activity", true)
}

struct Subscriber {
    record: SubscriptionRecord,
    scopes: ScopeSet,
    messages: Vec<Message>,
}

#[derive(Default)]
struct ServiceState {
    identities: HashMap<String, String>,
    subscribers: HashMap<String, Subscriber>,
    next_message_id: u64,
    calls: HashMap<Op, usize>,
    failures: HashSet<Op>,
    reject_registration: bool,
    latency: Duration,
    sent: Vec<(String, NotificationPayload)>,
}

pub struct InMemoryService {
    app_domain: String,
    default_scopes: ScopeSet,
    state: Mutex<ServiceState>,
}

impl Default for InMemoryService {
    fn default() -> Self { Self::new() }
}

impl InMemoryService {
    pub fn new() -> Self {
        Self {
            app_domain: "hackers.gm.walletconnect.com".into(),
            default_scopes: default_scopes(),
            state: Mutex::new(ServiceState { next_message_id: 1, ..Default::default() }),
        }
    }

    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self { self.default_scopes = scopes; self }
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self { self.app_domain = domain.into(); self }

    fn lock(&self) -> ServiceResult<MutexGuard<'_, ServiceState>> {
        self.state.lock().map_err(|_| ServiceError::Transport("service state poisoned".into()))
    }

    /// Fail the next call of `op` with a transport error.
    pub fn fail_next(&self, op: Op) {
        if let Ok(mut s) = self.state.lock() { s.failures.insert(op); }
    }

    pub fn set_reject_registration(&self, reject: bool) {
        if let Ok(mut s) = self.state.lock() { s.reject_registration = reject; }
    }

    /// Delay applied to every call before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut s) = self.state.lock() { s.latency = latency; }
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().map(|s| s.calls.get(&op).copied().unwrap_or(0)).unwrap_or(0)
    }

    /// Identities registered so far.
    pub fn registrations(&self) -> usize {
        self.state.lock().map(|s| s.identities.len()).unwrap_or(0)
    }

    pub fn is_subscribed(&self, account: &Account) -> bool {
        self.state.lock().map(|s| s.subscribers.contains_key(&account.id())).unwrap_or(false)
    }

    /// Every payload accepted by `send_notification`, in order.
    pub fn sent(&self) -> Vec<NotificationPayload> {
        self.state.lock().map(|s| s.sent.iter().map(|(_, p)| p.clone()).collect()).unwrap_or_default()
    }

    async fn enter(&self, op: Op) -> ServiceResult<()> {
        let (latency, fail) = {
            let mut s = self.lock()?;
            *s.calls.entry(op).or_default() += 1;
            (s.latency, s.failures.remove(&op))
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(ServiceError::Transport(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    fn subscriber<'a>(s: &'a mut ServiceState, account: &Account) -> ServiceResult<&'a mut Subscriber> {
        s.subscribers
            .get_mut(&account.id())
            .ok_or_else(|| ServiceError::Rejected(format!("{account} is not subscribed")))
    }
}

#[async_trait]
impl NotifyService for InMemoryService {
    async fn register_identity(&self, account: &Account, challenge: &SignedChallenge) -> ServiceResult<String> {
        self.enter(Op::RegisterIdentity).await?;
        let mut s = self.lock()?;
        if s.reject_registration {
            return Err(ServiceError::Rejected("signature verification failed".into()));
        }
        if challenge.challenge.account != account.id() || challenge.message != challenge.challenge.message() {
            return Err(ServiceError::Rejected("challenge does not match account".into()));
        }
        if challenge.signature.trim().is_empty() {
            return Err(ServiceError::Rejected("missing signature".into()));
        }
        let key = s
            .identities
            .entry(account.id())
            .or_insert_with(|| sha256_hex(&["identity", account.id().as_str(), challenge.signature.as_str()]))
            .clone();
        Ok(key)
    }

    async fn subscribe(&self, account: &Account) -> ServiceResult<SubscriptionRecord> {
        self.enter(Op::Subscribe).await?;
        let mut s = self.lock()?;
        if !s.identities.contains_key(&account.id()) {
            return Err(ServiceError::Rejected("identity not registered".into()));
        }
        let record = SubscriptionRecord {
            topic: sha256_hex(&["topic", self.app_domain.as_str(), account.id().as_str()]),
            account: account.id(),
            app_domain: self.app_domain.clone(),
            expiry: Utc::now() + ChronoDuration::days(30),
        };
        let scopes = self.default_scopes.clone();
        let entry = s
            .subscribers
            .entry(account.id())
            .or_insert_with(|| Subscriber { record, scopes, messages: Vec::new() });
        Ok(entry.record.clone())
    }

    async fn unsubscribe(&self, account: &Account) -> ServiceResult<()> {
        self.enter(Op::Unsubscribe).await?;
        let mut s = self.lock()?;
        s.subscribers
            .remove(&account.id())
            .map(|_| ())
            .ok_or_else(|| ServiceError::Rejected(format!("{account} is not subscribed")))
    }

    async fn get_scopes(&self, account: &Account) -> ServiceResult<ScopeSet> {
        self.enter(Op::GetScopes).await?;
        let mut s = self.lock()?;
        Ok(Self::subscriber(&mut s, account)?.scopes.clone())
    }

    async fn update_scopes(&self, account: &Account, enabled: &BTreeSet<String>) -> ServiceResult<ScopeSet> {
        self.enter(Op::UpdateScopes).await?;
        let mut s = self.lock()?;
        let sub = Self::subscriber(&mut s, account)?;
        if let Some(unknown) = enabled.iter().find(|k| sub.scopes.get(k).is_none()) {
            return Err(ServiceError::Rejected(format!("unknown scope: {unknown}")));
        }
        sub.scopes = sub.scopes.with_enabled(enabled);
        Ok(sub.scopes.clone())
    }

    async fn list_messages(&self, account: &Account) -> ServiceResult<Vec<Message>> {
        self.enter(Op::ListMessages).await?;
        let mut s = self.lock()?;
        Ok(Self::subscriber(&mut s, account)?.messages.clone())
    }

    async fn delete_message(&self, id: u64) -> ServiceResult<()> {
        self.enter(Op::DeleteMessage).await?;
        let mut s = self.lock()?;
        for sub in s.subscribers.values_mut() {
            if let Some(pos) = sub.messages.iter().position(|m| m.id == id) {
                sub.messages.remove(pos);
                return Ok(());
            }
        }
        Err(ServiceError::Rejected(format!("unknown message {id}")))
    }

    async fn send_notification(&self, account: &Account, payload: &NotificationPayload) -> ServiceResult<()> {
        self.enter(Op::SendNotification).await?;
        let mut s = self.lock()?;
        let id = s.next_message_id;
        let sub = Self::subscriber(&mut s, account)?;
        // Only categories the user left enabled reach the inbox.
        if sub.scopes.is_enabled(&payload.category) {
            sub.messages.push(Message {
                id,
                title: payload.title.clone(),
                body: payload.body.clone(),
                icon_url: payload.icon_url.clone(),
                url: payload.url.clone(),
                received_at: Utc::now(),
            });
            s.next_message_id += 1;
        }
        s.sent.push((account.id(), payload.clone()));
        Ok(())
    }
}

enum Heights {
    Scripted { queue: VecDeque<u64>, last: u64 },
    Advancing { next: u64 },
}

/// Chain height source. Scripted heights repeat the last value once drained.
pub struct InMemoryChain {
    heights: Mutex<Heights>,
    reads: AtomicUsize,
    fail_next: AtomicBool,
}

impl InMemoryChain {
    pub fn from_heights(heights: impl IntoIterator<Item = u64>) -> Self {
        let queue: VecDeque<u64> = heights.into_iter().collect();
        Self::with(Heights::Scripted { queue, last: 0 })
    }

    /// Height grows by one on every read, starting at `start`.
    pub fn advancing(start: u64) -> Self { Self::with(Heights::Advancing { next: start }) }

    fn with(heights: Heights) -> Self {
        Self { heights: Mutex::new(heights), reads: AtomicUsize::new(0), fail_next: AtomicBool::new(false) }
    }

    pub fn reads(&self) -> usize { self.reads.load(Ordering::SeqCst) }
    pub fn fail_next(&self) { self.fail_next.store(true, Ordering::SeqCst); }
}

#[async_trait]
impl ChainReader for InMemoryChain {
    async fn current_block_height(&self) -> ServiceResult<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::Transport("rpc unavailable".into()));
        }
        let mut heights = self.heights.lock().map_err(|_| ServiceError::Transport("chain state poisoned".into()))?;
        Ok(match &mut *heights {
            Heights::Scripted { queue, last } => {
                if let Some(h) = queue.pop_front() { *last = h; }
                *last
            }
            Heights::Advancing { next } => {
                let h = *next;
                *next += 1;
                h
            }
        })
    }
}

/// Deterministic signer standing in for a wallet prompt.
pub struct LocalSigner {
    secret: String,
    approve: AtomicBool,
    prompts: AtomicUsize,
}

impl LocalSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into(), approve: AtomicBool::new(true), prompts: AtomicUsize::new(0) }
    }

    /// Whether the simulated user approves the next prompts.
    pub fn set_approve(&self, approve: bool) { self.approve.store(approve, Ordering::SeqCst); }
    pub fn prompts(&self) -> usize { self.prompts.load(Ordering::SeqCst) }
}

#[async_trait]
impl WalletSigner for LocalSigner {
    async fn sign(&self, message: &str) -> Result<String, SignerError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if !self.approve.load(Ordering::SeqCst) {
            return Err(SignerError::Rejected);
        }
        Ok(format!("0x{}", sha256_hex(&[self.secret.as_str(), message])))
    }
}
