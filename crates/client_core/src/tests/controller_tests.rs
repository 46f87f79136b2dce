use std::{
    collections::VecDeque,
    sync::atomic::AtomicUsize,
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::domain::AccountId;
use tokio::{sync::Notify, time::timeout};
use tokio_stream::wrappers::WatchStream;

use super::*;
use crate::{error::FetchError, store::QuotePredicate};

struct ScriptedSource {
    script: Mutex<VecDeque<Result<Quote, FetchError>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedSource {
    fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    fn then(self, result: Result<Quote, FetchError>) -> Self {
        self.script.lock().expect("script").push_back(result);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    async fn fetch(&self) -> Result<Quote, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let scripted = self.script.lock().expect("script").pop_front();
        scripted.unwrap_or_else(|| Ok(Quote::new(format!("quote {call}"), "Anonymous")))
    }
}

struct RecordingStore {
    snapshots: watch::Sender<Vec<SavedQuote>>,
    session: Mutex<Option<Session>>,
    add_attempts: AtomicUsize,
    failing_adds: AtomicUsize,
}

impl RecordingStore {
    fn signed_in() -> Self {
        Self::with_session(Some(Session::local()))
    }

    fn signed_out() -> Self {
        Self::with_session(None)
    }

    fn with_session(session: Option<Session>) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            snapshots,
            session: Mutex::new(session),
            add_attempts: AtomicUsize::new(0),
            failing_adds: AtomicUsize::new(0),
        }
    }

    fn fail_next_adds(&self, count: usize) {
        self.failing_adds.store(count, Ordering::SeqCst);
    }

    fn saved(&self) -> Vec<SavedQuote> {
        self.snapshots.borrow().clone()
    }
}

#[async_trait]
impl QuoteStore for RecordingStore {
    fn observe(&self) -> BoxStream<'static, Vec<SavedQuote>> {
        WatchStream::new(self.snapshots.subscribe()).boxed()
    }

    async fn add(&self, quote: SavedQuote) -> Result<(), StoreError> {
        self.add_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_adds.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_adds.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Backend(anyhow!("disk full")));
        }
        self.snapshots.send_modify(|saved| {
            if !saved.iter().any(|existing| existing.text == quote.text) {
                saved.push(quote);
            }
        });
        Ok(())
    }

    async fn remove(&self, predicate: QuotePredicate<'_>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.snapshots.send_modify(|saved| {
            let before = saved.len();
            saved.retain(|quote| !predicate(quote));
            removed = before - saved.len();
        });
        Ok(removed)
    }

    fn session(&self) -> Option<Session> {
        self.session.lock().expect("session").clone()
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if credentials.password != "open sesame" {
            return Err(AuthError::InvalidCredentials);
        }
        let session = Session::for_account(AccountId(7), credentials.email.clone());
        *self.session.lock().expect("session") = Some(session.clone());
        Ok(session)
    }

    async fn register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        if credentials.email == "taken@example.test" {
            return Err(AuthError::AccountExists(credentials.email.clone()));
        }
        Ok(())
    }
}

fn controller(
    source: ScriptedSource,
    store: RecordingStore,
) -> (Arc<QuoteController>, Arc<ScriptedSource>, Arc<RecordingStore>) {
    let source = Arc::new(source);
    let store = Arc::new(store);
    let controller = QuoteController::new(
        Arc::clone(&source) as Arc<dyn QuoteSource>,
        Arc::clone(&store) as Arc<dyn QuoteStore>,
        RateLimitConfig::default(),
    );
    (controller, source, store)
}

async fn wait_until(
    controller: &QuoteController,
    what: &str,
    condition: impl FnMut(&ControllerState) -> bool,
) {
    let mut updates = controller.subscribe();
    let reached = timeout(Duration::from_secs(2), updates.wait_for(condition))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .is_ok();
    assert!(reached, "controller closed while waiting for {what}");
}

fn saved(text: &str, author: &str) -> SavedQuote {
    SavedQuote::keyed_by_text(&Quote::new(text, author))
}

#[tokio::test]
async fn starts_ready_with_full_request_budget() {
    let (controller, source, _) = controller(ScriptedSource::new(), RecordingStore::signed_in());
    let state = controller.snapshot();

    assert_eq!(state.network_status, NetworkStatus::Ready);
    assert_eq!(state.current_quote, None);
    assert!(state.saved_quotes.is_empty());
    assert!(state.new_quote_available);
    assert_eq!(state.requests_remaining, 5);
    assert_eq!(state.session, Some(Session::local()));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn successful_fetch_replaces_current_quote() {
    let (controller, _, _) = controller(
        ScriptedSource::new().then(Ok(Quote::new("Be here now", "Ram Dass"))),
        RecordingStore::signed_in(),
    );

    assert_eq!(controller.request_new_quote().await, RequestOutcome::Completed);
    let state = controller.snapshot();
    assert_eq!(state.network_status, NetworkStatus::Ready);
    assert_eq!(
        state.current_quote.as_ref().and_then(|quote| quote.text.as_deref()),
        Some("Be here now")
    );
    assert_eq!(state.requests_remaining, 4);
}

#[tokio::test]
async fn failed_fetch_keeps_previous_quote_and_reports_error() {
    let (controller, _, _) = controller(
        ScriptedSource::new()
            .then(Ok(Quote::new("first", "someone")))
            .then(Err(FetchError::Status(503))),
        RecordingStore::signed_in(),
    );

    controller.request_new_quote().await;
    assert_eq!(controller.request_new_quote().await, RequestOutcome::Failed);

    let state = controller.snapshot();
    assert_eq!(state.network_status, NetworkStatus::Error);
    assert_eq!(
        state.current_quote.as_ref().and_then(|quote| quote.text.as_deref()),
        Some("first")
    );
}

#[tokio::test]
async fn concurrent_requests_collapse_into_one_fetch() {
    let gate = Arc::new(Notify::new());
    let (controller, source, _) = controller(
        ScriptedSource::gated(Arc::clone(&gate)),
        RecordingStore::signed_in(),
    );

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.request_new_quote().await }
    });
    wait_until(&controller, "loading", |state| {
        state.network_status == NetworkStatus::Loading
    })
    .await;

    assert_eq!(
        controller.request_new_quote().await,
        RequestOutcome::AlreadyInFlight
    );

    gate.notify_one();
    assert_eq!(first.await.expect("join"), RequestOutcome::Completed);
    assert_eq!(source.calls(), 1);
    assert_eq!(controller.snapshot().requests_remaining, 4);
}

#[tokio::test(start_paused = true)]
async fn sixth_request_in_a_burst_is_rate_limited_until_cooldown_ends() {
    let (controller, source, _) = controller(ScriptedSource::new(), RecordingStore::signed_in());

    for _ in 0..5 {
        assert_eq!(controller.request_new_quote().await, RequestOutcome::Completed);
    }
    let state = controller.snapshot();
    assert!(!state.new_quote_available);
    assert_eq!(state.requests_remaining, 0);
    assert!(state.next_quote_allowed_at.is_some());

    assert_eq!(
        controller.request_new_quote().await,
        RequestOutcome::RateLimited
    );
    assert_eq!(source.calls(), 5);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let state = controller.snapshot();
    assert!(state.new_quote_available);
    assert_eq!(state.requests_remaining, 5);
    assert_eq!(state.next_quote_allowed_at, None);
    assert_eq!(controller.request_new_quote().await, RequestOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn burst_after_an_early_release_is_rate_limited_again() {
    let (controller, source, _) = controller(ScriptedSource::new(), RecordingStore::signed_in());

    for _ in 0..4 {
        assert_eq!(controller.request_new_quote().await, RequestOutcome::Completed);
    }
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(controller.request_new_quote().await, RequestOutcome::Completed);
    assert!(!controller.snapshot().new_quote_available);

    // Quiet window from the fourth request lapses at t=30.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let state = controller.snapshot();
    assert!(state.new_quote_available);
    assert_eq!(state.requests_remaining, 5);

    for _ in 0..5 {
        assert_eq!(controller.request_new_quote().await, RequestOutcome::Completed);
    }
    assert_eq!(
        controller.request_new_quote().await,
        RequestOutcome::RateLimited
    );
    assert_eq!(source.calls(), 10);

    // Past the point where the first cooldown would have ended.
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(!controller.snapshot().new_quote_available);
    assert_eq!(
        controller.request_new_quote().await,
        RequestOutcome::RateLimited
    );
    assert_eq!(source.calls(), 10);
}

#[tokio::test]
async fn empty_store_update_fetches_when_nothing_is_shown() {
    let (controller, source, _) = controller(
        ScriptedSource::new().then(Ok(Quote::new("fresh", "api"))),
        RecordingStore::signed_in(),
    );

    let fetch = controller
        .on_store_update(Vec::new())
        .expect("fetch should start");
    assert_eq!(fetch.await.expect("join"), RequestOutcome::Completed);
    assert_eq!(source.calls(), 1);
    assert_eq!(
        controller
            .snapshot()
            .current_quote
            .and_then(|quote| quote.text)
            .as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn store_update_shows_latest_saved_quote_when_nothing_is_shown() {
    let (controller, source, _) = controller(ScriptedSource::new(), RecordingStore::signed_in());

    let fetch = controller.on_store_update(vec![saved("older", "a"), saved("newest", "b")]);
    assert!(fetch.is_none());
    assert_eq!(source.calls(), 0);

    let state = controller.snapshot();
    assert_eq!(state.saved_quotes.len(), 2);
    assert_eq!(
        state.current_quote.as_ref().and_then(|quote| quote.text.as_deref()),
        Some("newest")
    );
    assert!(controller.snapshot().is_current_quote_saved());
}

#[tokio::test]
async fn store_update_leaves_a_shown_quote_alone() {
    let (controller, source, _) = controller(
        ScriptedSource::new().then(Ok(Quote::new("on screen", "api"))),
        RecordingStore::signed_in(),
    );
    controller.request_new_quote().await;

    assert!(controller.on_store_update(Vec::new()).is_none());
    assert!(controller.on_store_update(vec![saved("other", "x")]).is_none());

    let state = controller.snapshot();
    assert_eq!(source.calls(), 1);
    assert_eq!(
        state.current_quote.as_ref().and_then(|quote| quote.text.as_deref()),
        Some("on screen")
    );
    assert_eq!(state.saved_quotes.len(), 1);
    assert!(!state.is_current_quote_saved());
}

#[tokio::test]
async fn select_saved_quote_puts_it_on_screen() {
    let (controller, _, _) = controller(ScriptedSource::new(), RecordingStore::signed_in());
    controller.select_saved_quote(&saved("picked", "me"));

    let current = controller.snapshot().current_quote.expect("current quote");
    assert_eq!(current.text.as_deref(), Some("picked"));
    assert_eq!(current.author.as_deref(), Some("me"));
}

#[tokio::test]
async fn sign_in_observes_store_and_toggle_round_trips() {
    let (controller, _, store) = controller(
        ScriptedSource::new().then(Ok(Quote::new("keep me", "Author"))),
        RecordingStore::signed_in(),
    );

    let session = controller.sign_in(None).await.expect("sign in");
    assert_eq!(session, Session::local());
    wait_until(&controller, "first quote", |state| {
        state.current_quote.is_some()
    })
    .await;

    let quote = controller.snapshot().current_quote.expect("quote");
    controller.toggle_saved(&quote).await.expect("join");
    wait_until(&controller, "quote saved", ControllerState::is_current_quote_saved).await;
    assert_eq!(store.saved().len(), 1);

    controller.toggle_saved(&quote).await.expect("join");
    wait_until(&controller, "quote removed", |state| {
        !state.is_current_quote_saved()
    })
    .await;
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn failed_save_is_retried_once() {
    let (controller, _, store) = controller(ScriptedSource::new(), RecordingStore::signed_in());
    let quote = Quote::new("persist", "me");

    store.fail_next_adds(1);
    controller.toggle_saved(&quote).await.expect("join");
    assert_eq!(store.add_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(store.saved().len(), 1);
}

#[tokio::test]
async fn save_gives_up_after_second_failure() {
    let (controller, _, store) = controller(ScriptedSource::new(), RecordingStore::signed_in());

    store.fail_next_adds(2);
    controller
        .toggle_saved(&Quote::new("lost", "me"))
        .await
        .expect("join");
    assert_eq!(store.add_attempts.load(Ordering::SeqCst), 2);
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn remove_saved_deletes_every_entry_with_that_text() {
    let (controller, _, store) = controller(ScriptedSource::new(), RecordingStore::signed_in());
    for entry in [saved("dup", "a"), saved("other", "b")] {
        store.add(entry).await.expect("seed");
    }

    controller
        .remove_saved(&saved("dup", "a"))
        .await
        .expect("join");
    let texts: Vec<_> = store.saved().into_iter().map(|quote| quote.text).collect();
    assert_eq!(texts, vec!["other"]);
}

#[tokio::test]
async fn sign_in_without_session_needs_credentials() {
    let (controller, _, _) = controller(ScriptedSource::new(), RecordingStore::signed_out());
    assert!(!controller.is_signed_in());

    let missing = controller.sign_in(None).await;
    assert!(matches!(missing, Err(AuthError::MissingCredentials)));

    let wrong = controller
        .sign_in(Some(Credentials::new("reader@example.test", "guess")))
        .await;
    assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    assert_eq!(controller.snapshot().session, None);
}

#[tokio::test]
async fn sign_in_with_credentials_records_the_session() {
    let (controller, _, _) = controller(ScriptedSource::new(), RecordingStore::signed_out());

    let session = controller
        .sign_in(Some(Credentials::new("reader@example.test", "open sesame")))
        .await
        .expect("sign in");
    assert_eq!(session.identity, "account:7");
    assert!(controller.is_signed_in());
    assert_eq!(controller.snapshot().session, Some(session));
}

#[tokio::test]
async fn register_passes_conflicts_through() {
    let (controller, _, _) = controller(ScriptedSource::new(), RecordingStore::signed_out());

    controller
        .register(&Credentials::new("new@example.test", "pw"))
        .await
        .expect("register");
    let taken = controller
        .register(&Credentials::new("taken@example.test", "pw"))
        .await;
    assert!(matches!(taken, Err(AuthError::AccountExists(_))));
}

#[tokio::test]
async fn shutdown_stops_following_the_store() {
    let (controller, _, store) = controller(
        ScriptedSource::new().then(Ok(Quote::new("shown", "x"))),
        RecordingStore::signed_in(),
    );
    controller.sign_in(None).await.expect("sign in");
    wait_until(&controller, "first quote", |state| {
        state.current_quote.is_some()
    })
    .await;

    controller.shutdown();
    store.add(saved("late", "x")).await.expect("add");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(controller.snapshot().saved_quotes.is_empty());
}

#[test]
fn saved_views_group_by_author_and_match_by_text() {
    let mut state = ControllerState::initial(RateLimitConfig::default(), None);
    state.saved_quotes = vec![saved("b", "Zeno"), saved("a", "Epictetus"), saved("c", "Zeno")];
    state.current_quote = Some(Quote::new("c", "someone else"));

    assert!(state.is_current_quote_saved());
    assert!(!state.is_saved(&Quote::default()));

    let grouped = state.grouped_saved_quotes();
    assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["Epictetus", "Zeno"]);
    assert_eq!(grouped["Zeno"].len(), 2);
}
