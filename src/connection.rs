//! A background task that owns the event subscription to flagd and drives the retry state
//! machine.
//!
//! The task is the single writer of [`ConnectionState`]; resolution callers only ever read a
//! snapshot. Inbound change notifications are applied to the [`ResolutionCache`] directly — this
//! is the only write path into the cache besides the evaluation client's own `set` calls.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::StreamExt;
use rand::{thread_rng, Rng};

use crate::cache::ResolutionCache;
use crate::service::{FlagService, ServiceEvent};

/// Base unit of the retry delay. The wait before retry `n` is
/// `(n + 1) * random(0..1) * RETRY_BASE_DELAY`.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(300);

/// The lifecycle state of the event subscription.
///
/// Transitions: `Initializing → Connecting → {Ready | Retrying} → (loop) → Failed`. `Failed` is
/// terminal; once the retry budget is exhausted the manager never reconnects for the life of the
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed; the first connection attempt has not started yet.
    Initializing,
    /// A connection attempt is in flight.
    Connecting,
    /// The server confirmed readiness; resolutions may proceed.
    Ready,
    /// Waiting out the jittered delay before the next attempt.
    Retrying,
    /// The retry budget is exhausted. Terminal.
    Failed,
}

/// Owns the event-stream subscription and exposes a read-only [`ConnectionState`] snapshot.
///
/// The retry delay grows linearly with the attempt count and carries full jitter, with no upper
/// bound. For large `max_retries` values the tail waits can get long; the budget is a count, not
/// a deadline.
pub struct ConnectionManager {
    state: Arc<RwLock<ConnectionState>>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionManager {
    /// Spawn the connection task. Must be called within a tokio runtime.
    ///
    /// `max_retries = 0` means the initial connection is attempted once and failure is terminal.
    /// The manager holds `cache` only to apply server-pushed invalidations; `None` when caching
    /// is disabled.
    pub fn start(
        service: Arc<dyn FlagService>,
        cache: Option<Arc<ResolutionCache>>,
        max_retries: u32,
    ) -> ConnectionManager {
        let state = Arc::new(RwLock::new(ConnectionState::Initializing));

        let task = tokio::spawn(run(service, cache, Arc::clone(&state), max_retries));

        ConnectionManager { state, task }
    }

    /// Get a snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        // Err() is possible only if the lock is poisoned, which should never happen: the
        // connection task does not panic while holding it.
        *self
            .state
            .read()
            .expect("thread holding connection state lock should not panic")
    }

    /// Stop the connection task, releasing the event subscription.
    ///
    /// The state is left at [`ConnectionState::Failed`]: the subscription is gone for the life
    /// of the instance, exactly as after retry exhaustion, so readers must not keep observing
    /// the last live state. This function does not wait for the task to actually stop.
    pub fn stop(&self) {
        self.task.abort();
        set_state(&self.state, ConnectionState::Failed);
    }
}

fn set_state(cell: &RwLock<ConnectionState>, next: ConnectionState) {
    *cell
        .write()
        .expect("thread holding connection state lock should not panic") = next;
}

async fn run(
    service: Arc<dyn FlagService>,
    cache: Option<Arc<ResolutionCache>>,
    state: Arc<RwLock<ConnectionState>>,
    max_retries: u32,
) {
    // Consumed monotonically across the task's lifetime; a successful connection does not
    // replenish the budget.
    let mut attempt: u32 = 0;

    loop {
        set_state(&state, ConnectionState::Connecting);

        match service.open_event_stream().await {
            Ok(mut stream) => {
                log::debug!(target: "flagd", "event stream connected");
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => handle_event(event, &state, cache.as_deref()),
                        Err(err) => {
                            log::warn!(target: "flagd", "event stream error: {:?}", err);
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!(target: "flagd", "failed to open event stream: {:?}", err);
            }
        }

        // Disconnected. Invalidation events may have been missed, so nothing cached can be
        // trusted.
        if let Some(cache) = &cache {
            cache.flush_all();
        }

        if attempt >= max_retries {
            log::warn!(target: "flagd", attempts = attempt + 1; "retry budget exhausted, giving up");
            set_state(&state, ConnectionState::Failed);
            return;
        }

        set_state(&state, ConnectionState::Retrying);
        let delay = retry_delay(attempt);
        log::debug!(target: "flagd", attempt, delay_ms = delay.as_millis() as u64; "reconnecting after delay");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn handle_event(
    event: ServiceEvent,
    state: &RwLock<ConnectionState>,
    cache: Option<&ResolutionCache>,
) {
    match event {
        ServiceEvent::ProviderReady => {
            log::debug!(target: "flagd", "provider ready");
            set_state(state, ConnectionState::Ready);
        }
        ServiceEvent::ConfigurationChange(Ok(changes)) => {
            if let Some(cache) = cache {
                for flag_key in changes.keys() {
                    let removed = cache.invalidate_by_flag(flag_key);
                    log::debug!(target: "flagd", flag_key = flag_key.as_str(), removed;
                                "flag configuration changed, invalidated cached entries");
                }
            }
        }
        ServiceEvent::ConfigurationChange(Err(err)) => {
            // The scope of the change is unknown; over-invalidate rather than risk serving
            // stale values.
            log::warn!(target: "flagd", "undecodable configuration change, flushing cache: {:?}", err);
            if let Some(cache) = cache {
                cache.flush_all();
            }
        }
        ServiceEvent::Other(event_type) => {
            log::trace!(target: "flagd", event_type = event_type.as_str(); "ignoring unknown event");
        }
    }
}

/// Delay before retry number `attempt + 1`: `(attempt + 1) * random(0..1) * 300ms`.
///
/// Full jitter keeps a fleet of adapters from reconnecting in lockstep after a shared outage;
/// the linear multiplier gives mild backoff.
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY.mul_f64((attempt + 1) as f64 * thread_rng().gen::<f64>())
}
