use std::{
    str::FromStr,
    sync::{PoisonError, RwLock},
};

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{future, stream::BoxStream, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use shared::domain::{Credentials, Quote, SavedQuote, Session};
use storage::{MigrationPolicy, Storage};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AuthError, StoreError};

pub type QuotePredicate<'a> = &'a (dyn Fn(&SavedQuote) -> bool + Send + Sync);

/// Reactive list of saved quotes for the signed-in identity.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Current snapshot first, then one snapshot per change.
    fn observe(&self) -> BoxStream<'static, Vec<SavedQuote>>;

    async fn add(&self, quote: SavedQuote) -> Result<(), StoreError>;

    async fn remove(&self, predicate: QuotePredicate<'_>) -> Result<usize, StoreError>;

    fn session(&self) -> Option<Session>;

    fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError>;

    async fn register(&self, credentials: &Credentials) -> Result<(), AuthError>;

    /// Builds the entry persisted when `quote` gets saved.
    fn saved_entry(&self, quote: &Quote) -> SavedQuote {
        SavedQuote::keyed_by_text(quote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Single list on this device, no sign-in.
    #[default]
    Local,
    /// One list per account; sign-in required.
    Account,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "account" | "sync" => Ok(Self::Account),
            other => Err(format!("unknown storage mode '{other}'")),
        }
    }
}

pub struct SqliteQuoteStore {
    storage: Storage,
    mode: StorageMode,
    session: RwLock<Option<Session>>,
    snapshots: watch::Sender<Option<Vec<SavedQuote>>>,
}

impl SqliteQuoteStore {
    pub async fn open(database_url: &str, mode: StorageMode) -> anyhow::Result<Self> {
        let policy = match mode {
            StorageMode::Local => MigrationPolicy::ResetOnMismatch,
            StorageMode::Account => MigrationPolicy::Additive,
        };
        let storage = Storage::open(database_url, policy)
            .await
            .with_context(|| format!("failed to open saved quotes at '{database_url}'"))?;
        Self::new(storage, mode).await
    }

    pub async fn new(storage: Storage, mode: StorageMode) -> anyhow::Result<Self> {
        let (snapshots, _) = watch::channel(None);
        let store = Self {
            storage,
            mode,
            session: RwLock::new(None),
            snapshots,
        };
        if mode == StorageMode::Local {
            let session = Session::local();
            store.storage.ensure_quote_list(&session.identity).await?;
            store.set_session(Some(session.clone()));
            store.publish(&session.identity).await?;
        }
        Ok(store)
    }

    fn set_session(&self, session: Option<Session>) {
        *self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn owner(&self) -> Result<String, StoreError> {
        self.session()
            .map(|session| session.identity)
            .ok_or(StoreError::NotAuthenticated)
    }

    async fn publish(&self, owner: &str) -> anyhow::Result<()> {
        let quotes = self.storage.list_saved_quotes(owner).await?;
        debug!(owner, count = quotes.len(), "publishing saved quotes snapshot");
        self.snapshots.send_replace(Some(quotes));
        Ok(())
    }
}

#[async_trait]
impl QuoteStore for SqliteQuoteStore {
    fn observe(&self) -> BoxStream<'static, Vec<SavedQuote>> {
        WatchStream::new(self.snapshots.subscribe())
            .filter_map(future::ready)
            .boxed()
    }

    async fn add(&self, quote: SavedQuote) -> Result<(), StoreError> {
        let owner = self.owner()?;
        let inserted = self.storage.insert_saved_quote(&owner, &quote).await?;
        if inserted {
            info!(owner = %owner, author = %quote.author, "saved quote");
        } else {
            debug!(owner = %owner, "quote already saved; nothing to add");
        }
        self.publish(&owner).await?;
        Ok(())
    }

    async fn remove(&self, predicate: QuotePredicate<'_>) -> Result<usize, StoreError> {
        let owner = self.owner()?;
        let ids: Vec<String> = self
            .storage
            .list_saved_quotes(&owner)
            .await?
            .into_iter()
            .filter(|quote| predicate(quote))
            .map(|quote| quote.id)
            .collect();
        let removed = if ids.is_empty() {
            0
        } else {
            self.storage.delete_saved_quotes(&owner, &ids).await?
        };
        info!(owner = %owner, removed, "removed saved quotes");
        self.publish(&owner).await?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }

    fn session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if self.mode == StorageMode::Local {
            return Ok(Session::local());
        }

        let email = credentials.email.trim();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let Some(account) = self.storage.find_account_by_email(email).await? else {
            warn!(%email, "sign-in rejected: unknown account");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(&credentials.password, &account.password_hash) {
            warn!(%email, "sign-in rejected: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let session = Session::for_account(account.account_id, account.email);
        self.storage.ensure_quote_list(&session.identity).await?;
        self.set_session(Some(session.clone()));
        self.publish(&session.identity).await?;
        info!(identity = %session.identity, "signed in");
        Ok(session)
    }

    async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if self.mode == StorageMode::Local {
            debug!("local storage mode has no accounts; registration skipped");
            return Ok(());
        }

        let email = credentials.email.trim();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let hash = hash_password(&credentials.password, &Uuid::new_v4().simple().to_string());
        match self.storage.create_account(email, &hash).await? {
            Some(_) => Ok(()),
            None => Err(AuthError::AccountExists(email.to_string())),
        }
    }

    fn saved_entry(&self, quote: &Quote) -> SavedQuote {
        match self.mode {
            StorageMode::Local => SavedQuote::with_generated_id(quote),
            StorageMode::Account => SavedQuote::keyed_by_text(quote),
        }
    }
}

fn hash_password(password: &str, salt: &str) -> String {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    format!("{salt}${}", STANDARD.encode(digest))
}

fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, _)) = stored.split_once('$') else {
        return false;
    };
    hash_password(password, salt) == stored
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
