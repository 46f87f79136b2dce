use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use shared::{
    domain::{group_by_author, Credentials, NetworkStatus, Quote, SavedQuote, Session},
    error::HasErrorCode,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    error::{AuthError, StoreError},
    rate_limit::{RateLimitConfig, RateLimitStatus, RateLimiter},
    source::QuoteSource,
    store::QuoteStore,
};

/// Everything a view needs to render the quote screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub network_status: NetworkStatus,
    pub current_quote: Option<Quote>,
    pub saved_quotes: Vec<SavedQuote>,
    pub requests_remaining: u32,
    pub next_quote_allowed_at: Option<DateTime<Utc>>,
    pub new_quote_available: bool,
    pub session: Option<Session>,
}

impl ControllerState {
    fn initial(config: RateLimitConfig, session: Option<Session>) -> Self {
        Self {
            network_status: NetworkStatus::Ready,
            current_quote: None,
            saved_quotes: Vec::new(),
            requests_remaining: config.max_requests,
            next_quote_allowed_at: None,
            new_quote_available: true,
            session,
        }
    }

    pub fn is_saved(&self, quote: &Quote) -> bool {
        let Some(text) = quote.text.as_deref() else {
            return false;
        };
        self.saved_quotes.iter().any(|saved| saved.text == text)
    }

    pub fn is_current_quote_saved(&self) -> bool {
        self.current_quote
            .as_ref()
            .is_some_and(|quote| self.is_saved(quote))
    }

    pub fn grouped_saved_quotes(&self) -> BTreeMap<String, Vec<SavedQuote>> {
        group_by_author(&self.saved_quotes)
    }

    fn apply_rate_limit(&mut self, status: &RateLimitStatus) {
        self.new_quote_available = status.available;
        self.requests_remaining = status.requests_remaining;
        self.next_quote_allowed_at = status.next_allowed_at;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    Failed,
    AlreadyInFlight,
    RateLimited,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QuoteController {
    source: Arc<dyn QuoteSource>,
    store: Arc<dyn QuoteStore>,
    limiter: RateLimiter,
    state: watch::Sender<ControllerState>,
    in_flight: AtomicBool,
    observer_task: Mutex<Option<JoinHandle<()>>>,
    rate_limit_task: Mutex<Option<JoinHandle<()>>>,
}

impl QuoteController {
    /// Must be called inside a tokio runtime; the rate limiter timers start right away.
    pub fn new(
        source: Arc<dyn QuoteSource>,
        store: Arc<dyn QuoteStore>,
        rate_limit: RateLimitConfig,
    ) -> Arc<Self> {
        let limiter = RateLimiter::new(rate_limit);
        let (state, _) = watch::channel(ControllerState::initial(rate_limit, store.session()));
        let controller = Arc::new(Self {
            source,
            store,
            limiter,
            state,
            in_flight: AtomicBool::new(false),
            observer_task: Mutex::new(None),
            rate_limit_task: Mutex::new(None),
        });
        controller.spawn_rate_limit_forwarder();
        controller
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.store.is_authenticated()
    }

    pub async fn request_new_quote(&self) -> RequestOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("quote request already in flight; ignoring");
            return RequestOutcome::AlreadyInFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        if !self.limiter.is_available() {
            debug!("new quote requested while rate limited; ignoring");
            return RequestOutcome::RateLimited;
        }

        let status = self.limiter.record_request();
        self.state.send_modify(|state| {
            state.network_status = NetworkStatus::Loading;
            state.apply_rate_limit(&status);
        });

        match self.source.fetch().await {
            Ok(quote) => {
                self.state.send_modify(|state| {
                    state.current_quote = Some(quote);
                    state.network_status = NetworkStatus::Ready;
                });
                RequestOutcome::Completed
            }
            Err(err) => {
                warn!(error = %err, code = ?err.code(), "failed to fetch quote");
                self.state
                    .send_modify(|state| state.network_status = NetworkStatus::Error);
                RequestOutcome::Failed
            }
        }
    }

    pub fn select_saved_quote(&self, quote: &SavedQuote) {
        let quote = quote.to_quote();
        self.state
            .send_modify(|state| state.current_quote = Some(quote));
    }

    /// Saves `quote` unless it is saved already, in which case it is removed.
    /// The outcome shows up through the store's snapshots.
    pub fn toggle_saved(&self, quote: &Quote) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        if self.state.borrow().is_saved(quote) {
            let text = quote.text.clone().unwrap_or_default();
            tokio::spawn(async move { remove_by_text(store, text).await })
        } else {
            let entry = store.saved_entry(quote);
            tokio::spawn(async move {
                let _ = with_one_retry("save quote", || store.add(entry.clone())).await;
            })
        }
    }

    pub fn remove_saved(&self, quote: &SavedQuote) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let text = quote.text.clone();
        tokio::spawn(async move { remove_by_text(store, text).await })
    }

    /// Replaces the saved list with a store snapshot. Returns the fetch started
    /// when nothing is on screen and the store is empty.
    pub fn on_store_update(
        self: &Arc<Self>,
        quotes: Vec<SavedQuote>,
    ) -> Option<JoinHandle<RequestOutcome>> {
        let mut needs_fetch = false;
        self.state.send_modify(|state| {
            state.saved_quotes.clear();
            state.saved_quotes.extend(quotes);
            if state.current_quote.is_none() {
                match state.saved_quotes.last() {
                    Some(latest) => state.current_quote = Some(latest.to_quote()),
                    None => needs_fetch = true,
                }
            }
        });

        if !needs_fetch {
            return None;
        }
        let controller = Arc::clone(self);
        Some(tokio::spawn(
            async move { controller.request_new_quote().await },
        ))
    }

    /// Signs in when needed, then follows the store's snapshots.
    pub async fn sign_in(
        self: &Arc<Self>,
        credentials: Option<Credentials>,
    ) -> Result<Session, AuthError> {
        let session = match self.store.session() {
            Some(session) => session,
            None => {
                let credentials = credentials.ok_or(AuthError::MissingCredentials)?;
                self.store
                    .authenticate(&credentials)
                    .await
                    .inspect_err(|err| warn!(error = %err, "sign-in failed"))?
            }
        };

        info!(identity = %session.identity, "observing saved quotes");
        let signed_in = session.clone();
        self.state
            .send_modify(|state| state.session = Some(signed_in));
        self.start_observing();
        Ok(session)
    }

    pub async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        match self.store.register(credentials).await {
            Ok(()) => {
                info!(email = %credentials.email, "registered account");
                Ok(())
            }
            Err(err) => {
                warn!(email = %credentials.email, error = %err, "registration failed");
                Err(err)
            }
        }
    }

    /// Cancels the store observer and every timer owned by this controller.
    pub fn shutdown(&self) {
        for slot in [&self.observer_task, &self.rate_limit_task] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
        self.limiter.shutdown();
    }

    fn start_observing(self: &Arc<Self>) {
        let mut updates = self.store.observe();
        let controller = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(quotes) = updates.next().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                debug!(count = quotes.len(), "saved quotes changed");
                controller.on_store_update(quotes);
            }
        });
        replace_task(&self.observer_task, task);
    }

    fn spawn_rate_limit_forwarder(self: &Arc<Self>) {
        let mut updates = self.limiter.subscribe();
        let controller: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let status = updates.borrow_and_update().clone();
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller
                    .state
                    .send_if_modified(|state| {
                        let before = (
                            state.new_quote_available,
                            state.requests_remaining,
                            state.next_quote_allowed_at,
                        );
                        state.apply_rate_limit(&status);
                        before
                            != (
                                state.new_quote_available,
                                state.requests_remaining,
                                state.next_quote_allowed_at,
                            )
                    });
            }
        });
        replace_task(&self.rate_limit_task, task);
    }
}

impl Drop for QuoteController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, task: JoinHandle<()>) {
    let previous = slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(task);
    if let Some(previous) = previous {
        previous.abort();
    }
}

async fn remove_by_text(store: Arc<dyn QuoteStore>, text: String) {
    let _ = with_one_retry("remove quote", || {
        let text = text.clone();
        let store = Arc::clone(&store);
        async move {
            store
                .remove(&move |saved: &SavedQuote| saved.text == text)
                .await
        }
    })
    .await;
}

async fn with_one_retry<T, F, Fut>(action: &'static str, op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(action, error = %first, "store write failed; retrying once");
            op().await.inspect_err(|err| {
                error!(action, error = %err, code = ?err.code(), "store write failed after retry");
            })
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
