//! Gate for the "new quote" action.
//!
//! Two timers share one request counter:
//!
//! * the quiet timer restarts whenever the counter moves to a value below the
//!   limit; when it elapses the counter resets and requests are allowed again;
//! * the cooldown timer starts the moment the counter reaches the limit,
//!   blocks requests immediately and unblocks them once it elapses, however
//!   many requests were attempted in between.
//!
//! Whichever timer elapses first resets the counter and disarms the other one,
//! so every window starts clean. A burst that ends exactly on the limit is
//! therefore released by the quiet timer, which was armed by the last request
//! below the limit.

use std::{
    future::pending,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub count: u32,
    pub available: bool,
    pub requests_remaining: u32,
    /// Wall-clock end of the running cooldown, while requests are blocked.
    pub next_allowed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct LimiterState {
    count: u32,
    available: bool,
    quiet_deadline: Option<Instant>,
    cooldown_deadline: Option<Instant>,
    next_allowed_at: Option<DateTime<Utc>>,
}

struct Shared {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    status: watch::Sender<RateLimitStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_of(&self, state: &LimiterState) -> RateLimitStatus {
        RateLimitStatus {
            count: state.count,
            available: state.available,
            requests_remaining: self.config.max_requests.saturating_sub(state.count),
            next_allowed_at: if state.available {
                None
            } else {
                state.next_allowed_at
            },
        }
    }

    fn publish(&self, state: &LimiterState) -> RateLimitStatus {
        let status = self.status_of(state);
        self.status.send_replace(status.clone());
        status
    }

    fn reset(&self, state: &mut LimiterState) {
        state.quiet_deadline = None;
        state.cooldown_deadline = None;
        state.count = 0;
        state.available = true;
        state.next_allowed_at = None;
    }

    fn on_quiet_elapsed(&self, expected: Instant) {
        let mut state = self.lock();
        if state.quiet_deadline != Some(expected) {
            return;
        }
        self.reset(&mut state);
        debug!("quote request window reset after quiet period");
        self.publish(&state);
    }

    fn on_cooldown_elapsed(&self, expected: Instant) {
        let mut state = self.lock();
        if state.cooldown_deadline != Some(expected) {
            return;
        }
        self.reset(&mut state);
        info!("quote request cooldown finished");
        self.publish(&state);
    }
}

pub struct RateLimiter {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl RateLimiter {
    /// Spawns both timer tasks; must be called inside a tokio runtime.
    pub fn new(config: RateLimitConfig) -> Self {
        let state = LimiterState {
            count: 0,
            available: true,
            quiet_deadline: None,
            cooldown_deadline: None,
            next_allowed_at: None,
        };
        let (status, _) = watch::channel(RateLimitStatus {
            count: 0,
            available: true,
            requests_remaining: config.max_requests,
            next_allowed_at: None,
        });
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(state),
            status,
        });

        let tasks = vec![
            tokio::spawn(run_timer(Arc::clone(&shared), TimerKind::Quiet)),
            tokio::spawn(run_timer(Arc::clone(&shared), TimerKind::Cooldown)),
        ];
        Self { shared, tasks }
    }

    pub fn is_available(&self) -> bool {
        self.shared.lock().available
    }

    pub fn status(&self) -> RateLimitStatus {
        let state = self.shared.lock();
        self.shared.status_of(&state)
    }

    pub fn subscribe(&self) -> watch::Receiver<RateLimitStatus> {
        self.shared.status.subscribe()
    }

    /// Counts one issued request and returns the resulting status.
    pub fn record_request(&self) -> RateLimitStatus {
        let config = self.shared.config;
        let mut state = self.shared.lock();
        state.count = state.count.saturating_add(1);
        let now = Instant::now();

        if state.count < config.max_requests {
            state.quiet_deadline = Some(now + config.window);
        } else if state.available {
            state.available = false;
            state.cooldown_deadline = Some(now + config.cooldown);
            state.next_allowed_at = chrono::Duration::from_std(config.cooldown)
                .ok()
                .map(|cooldown| Utc::now() + cooldown);
            info!(
                count = state.count,
                cooldown_secs = config.cooldown.as_secs(),
                "new quote requests paused"
            );
        }

        self.shared.publish(&state)
    }

    /// Stops both timers. The current status stays frozen afterwards.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Quiet,
    Cooldown,
}

async fn run_timer(shared: Arc<Shared>, kind: TimerKind) {
    let mut changes = shared.status.subscribe();
    loop {
        let deadline = {
            let state = shared.lock();
            match kind {
                TimerKind::Quiet => state.quiet_deadline,
                TimerKind::Cooldown => state.cooldown_deadline,
            }
        };

        tokio::select! {
            _ = sleep_until_deadline(deadline) => {
                if let Some(deadline) = deadline {
                    match kind {
                        TimerKind::Quiet => shared.on_quiet_elapsed(deadline),
                        TimerKind::Cooldown => shared.on_cooldown_elapsed(deadline),
                    }
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "tests/rate_limit_tests.rs"]
mod tests;
