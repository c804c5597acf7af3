//! Beeinbox: wallet-bound notification inbox client.
//!
//! # Architecture
//!
//! ```text
//! InboxClient (entry point)
//!   │
//!   ├── Session (bound account + per-account state, generation-tagged)
//!   │     └── watch channel of SessionSnapshot for observers
//!   │
//!   ├── AccountBinding        bind / unbind a CAIP-10 wallet account
//!   ├── IdentityRegistrar     sign challenge once, register identity key
//!   ├── SubscriptionManager   absent ⇄ pending ⇄ active state machine
//!   ├── ScopePreferences      enabled notification categories
//!   ├── MessageInbox          received messages, newest first
//!   ├── NotificationDispatcher
//!   │
//!   └── BlockWatcher (optional task)
//!         └── polls chain height every 12s, dispatches "New block"
//! ```
//!
//! External systems sit behind three traits in [`service`]:
//! [`NotifyService`], [`ChainReader`] and [`WalletSigner`]. [`memory`] has
//! in-process implementations used by the CLI and tests.
//!
//! # Usage
//!
//! ```ignore
//! use beeinbox::{ClientConfig, Collaborators, InboxClient};
//!
//! let client = InboxClient::new(ClientConfig::from_env(), collaborators);
//! client.bind("0x52908400098527886E0F7030069857D2E4169EE7")?;
//! client.subscribe().await?;
//! client.update_scopes(["promotional"]).await?;
//! for message in client.messages()? {
//!     println!("{}: {}", message.title, message.body);
//! }
//! ```

pub mod account;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod logging;
pub mod memory;
pub mod runtime;
pub mod scopes;
pub mod service;
pub mod subscription;
pub mod watcher;

pub use account::{Account, AccountBinding, ChainConfig, Session, SessionSnapshot};
pub use client::{ClientConfig, Collaborators, InboxClient};
pub use dispatch::{NotificationDispatcher, NotificationPayload};
pub use error::{InboxError, InboxResult, ServiceError, SignerError};
pub use identity::{Identity, IdentityRegistrar, IdentitySigner};
pub use inbox::{Message, MessageInbox};
pub use runtime::{install_signal_handlers, Shutdown, ShutdownSignal};
pub use scopes::{Scope, ScopePreferences, ScopeSet};
pub use service::{ChainReader, NotifyService, WalletSigner};
pub use subscription::{SubscriptionConfig, SubscriptionManager, SubscriptionRecord, SubscriptionState};
pub use watcher::{BlockWatcher, TickOutcome, WatcherConfig, WatcherHandle};
