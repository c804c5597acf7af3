//! Account - chain address bound to the session.
//!
//! An account id is `<namespace>:<chain_id>:<address>` (CAIP-10 style).
//! Binding is pure composition; unbinding wipes every per-account state
//! (identity, subscription, scopes, inbox) and invalidates in-flight tickets.

mod session;

pub use session::{AccountState, Session, SessionSnapshot, Ticket};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{InboxError, InboxResult};

pub const EIP155: &str = "eip155";

/// Chain the wallet is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub namespace: String,
    pub chain_id: u64,
}

impl Default for ChainConfig {
    fn default() -> Self { Self { namespace: EIP155.into(), chain_id: 1 } }
}

impl ChainConfig {
    pub fn new(namespace: impl Into<String>, chain_id: u64) -> Self {
        Self { namespace: namespace.into(), chain_id }
    }
    pub fn with_chain_id(mut self, chain_id: u64) -> Self { self.chain_id = chain_id; self }
}

/// eip155 addresses compare case-insensitively; the bound casing is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    namespace: String,
    chain_id: u64,
    address: String,
}

impl Account {
    pub fn new(chain: &ChainConfig, address: &str) -> InboxResult<Self> {
        let address = address.trim();
        validate_address(&chain.namespace, address)?;
        Ok(Self { namespace: chain.namespace.clone(), chain_id: chain.chain_id, address: address.to_string() })
    }

    /// Parse `<namespace>:<chain_id>:<address>`.
    pub fn parse(id: &str) -> InboxResult<Self> {
        let mut parts = id.trim().splitn(3, ':');
        let (Some(namespace), Some(chain_id), Some(address)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(InboxError::InvalidAddress(format!("not an account id: {id}")));
        };
        let chain_id = chain_id
            .parse()
            .map_err(|_| InboxError::InvalidAddress(format!("bad chain id in {id}")))?;
        Self::new(&ChainConfig::new(namespace, chain_id), address)
    }

    pub fn id(&self) -> String { self.to_string() }
    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn chain_id(&self) -> u64 { self.chain_id }
    pub fn address(&self) -> &str { &self.address }
}

impl Account {
    fn hex_insensitive(&self) -> bool { self.namespace == EIP155 }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.chain_id == other.chain_id
            && if self.hex_insensitive() {
                self.address.eq_ignore_ascii_case(&other.address)
            } else {
                self.address == other.address
            }
    }
}

impl Eq for Account {}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.chain_id.hash(state);
        if self.hex_insensitive() {
            self.address.to_ascii_lowercase().hash(state);
        } else {
            self.address.hash(state);
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.chain_id, self.address)
    }
}

fn validate_address(namespace: &str, address: &str) -> InboxResult<()> {
    if namespace.is_empty() || namespace.contains(':') {
        return Err(InboxError::InvalidAddress(format!("bad namespace: {namespace:?}")));
    }
    if address.is_empty() || address.contains(':') {
        return Err(InboxError::InvalidAddress(format!("bad address: {address:?}")));
    }
    if namespace == EIP155 {
        let hex_part = address
            .strip_prefix("0x")
            .ok_or_else(|| InboxError::InvalidAddress(format!("missing 0x prefix: {address}")))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InboxError::InvalidAddress(format!("expected 20 hex bytes: {address}")));
        }
    }
    Ok(())
}

/// Maps wallet connect/disconnect onto the session.
#[derive(Clone)]
pub struct AccountBinding {
    session: Session,
}

impl AccountBinding {
    pub fn new(session: Session) -> Self { Self { session } }

    /// Bind `address` on the session's chain. Rebinding the same address is a no-op
    /// returning an equal account; binding a different one drops the old account's state.
    pub fn bind(&self, address: &str) -> InboxResult<Account> {
        let account = Account::new(self.session.chain(), address)?;
        if self.session.bind_account(account.clone())? {
            tracing::info!(account = %account, "account bound");
        }
        Ok(account)
    }

    /// Wallet disconnected.
    pub fn unbind(&self) -> InboxResult<Option<Account>> {
        let previous = self.session.unbind()?;
        if let Some(ref account) = previous {
            tracing::info!(account = %account, "account unbound");
        }
        Ok(previous)
    }

    pub fn current(&self) -> Option<Account> { self.session.account() }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn account_id_format() {
        let account = Account::new(&ChainConfig::default(), ADDRESS).unwrap();
        assert_eq!(account.id(), format!("eip155:1:{ADDRESS}"));
        assert_eq!(account.chain_id(), 1);
        assert_eq!(account.address(), ADDRESS);
    }

    #[test]
    fn parse_roundtrips_display() {
        let id = format!("eip155:10:{ADDRESS}");
        let account = Account::parse(&id).unwrap();
        assert_eq!(account.chain_id(), 10);
        assert_eq!(account.to_string(), id);
    }

    #[test]
    fn rejects_bad_addresses() {
        let chain = ChainConfig::default();
        assert!(matches!(Account::new(&chain, "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"), Err(InboxError::InvalidAddress(_))));
        assert!(matches!(Account::new(&chain, "0x1234"), Err(InboxError::InvalidAddress(_))));
        assert!(matches!(Account::new(&chain, ""), Err(InboxError::InvalidAddress(_))));
        assert!(Account::parse("eip155:one:0xabc").is_err());
        assert!(Account::parse("eip155").is_err());
    }

    #[test]
    fn other_namespaces_skip_hex_check() {
        let chain = ChainConfig::new("solana", 101);
        let account = Account::new(&chain, "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T").unwrap();
        assert_eq!(account.namespace(), "solana");
    }

    #[test]
    fn bind_is_idempotent() {
        let binding = AccountBinding::new(Session::new(ChainConfig::default()));
        let a = binding.bind(ADDRESS).unwrap();
        let b = binding.bind(ADDRESS).unwrap();
        assert_eq!(a, b);
        assert_eq!(binding.current(), Some(a));
    }

    #[test]
    fn eip155_addresses_ignore_case() {
        let chain = ChainConfig::default();
        let mixed = Account::new(&chain, ADDRESS).unwrap();
        let lower = Account::new(&chain, &ADDRESS.to_lowercase()).unwrap();
        assert_eq!(mixed, lower);
        assert_eq!(lower.address(), ADDRESS.to_lowercase());

        let set: std::collections::HashSet<Account> = [mixed, lower].into_iter().collect();
        assert_eq!(set.len(), 1);

        let other_chain = Account::new(&chain.clone().with_chain_id(10), ADDRESS).unwrap();
        assert_ne!(Account::new(&chain, ADDRESS).unwrap(), other_chain);
    }

    #[test]
    fn other_namespaces_compare_exactly() {
        let chain = ChainConfig::new("solana", 101);
        let a = Account::new(&chain, "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T").unwrap();
        let b = Account::new(&chain, "4nd1mbqtrmjvyvfkf2pjy9nzuzdtasp7d4xwls4gdb4t").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rebinding_other_casing_keeps_state() {
        let session = Session::new(ChainConfig::default());
        let binding = AccountBinding::new(session.clone());
        let bound = binding.bind(ADDRESS).unwrap();
        let ticket = session.ticket(&bound).unwrap();

        binding.bind(&ADDRESS.to_uppercase().replacen("0X", "0x", 1)).unwrap();
        binding.bind(&ADDRESS.to_lowercase()).unwrap();
        assert_eq!(session.ticket(&bound).unwrap(), ticket);
        assert_eq!(binding.current().unwrap().address(), ADDRESS);
    }

    #[test]
    fn unbind_clears_current() {
        let binding = AccountBinding::new(Session::new(ChainConfig::default()));
        let a = binding.bind(ADDRESS).unwrap();
        assert_eq!(binding.unbind().unwrap(), Some(a));
        assert_eq!(binding.current(), None);
        assert_eq!(binding.unbind().unwrap(), None);
    }
}
