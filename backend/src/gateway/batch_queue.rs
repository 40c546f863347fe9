//! Batch coalescer for model method calls.
//!
//! Concurrent calls to the same (model, method) join a per-key accumulator
//! and are sent downstream as one batch call. Each joined caller holds a
//! single-use response slot; slot `i` answers request `i`.
//!
//! A window closes when one of these holds for an arriving call, evaluated
//! before the call is appended:
//! - the call brings the window to `max_batch_size`
//! - the window is empty and the key has been idle past `min_batch_time`
//! - the window is older than `max_batch_time`
//!
//! Otherwise the call waits, and a timer flushes the window `max_batch_time`
//! after it opened. Flushing swaps in a fresh accumulator under the table
//! lock and performs the downstream call outside it, so a slow instance
//! never holds up decisions for other keys or new windows for its own key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use super::registry::BatchSettings;
use super::router::{reply_outcome, ModelBackend};
use super::stats::GatewayStats;
use crate::error::DownstreamError;

/// Result delivered to a joined caller.
pub type BatchOutcome = Result<Value, DownstreamError>;

/// Accumulator table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub model: String,
    pub method: String,
}

impl BatchKey {
    pub fn new(model: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            method: method.into(),
        }
    }
}

impl std::fmt::Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.model, self.method)
    }
}

/// The in-progress batch window for one key.
struct Accumulator {
    /// Identifies this window; timers compare it to detect supersession.
    generation: u64,
    requests: Vec<Value>,
    /// Parallel to `requests`.
    slots: Vec<oneshot::Sender<BatchOutcome>>,
    /// When the window opened.
    first_request: Instant,
    /// Most recent join.
    last_request: Option<Instant>,
    /// Last join of the previous window. `None` if the key has no history.
    last_setup: Option<Instant>,
    timer_armed: bool,
}

impl Accumulator {
    fn new(generation: u64, now: Instant, last_setup: Option<Instant>) -> Self {
        Self {
            generation,
            requests: Vec::new(),
            slots: Vec::new(),
            first_request: now,
            last_request: None,
            last_setup,
            timer_armed: false,
        }
    }

    fn len(&self) -> usize {
        self.requests.len()
    }

    fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Decide whether an arriving call waits for more company.
    fn should_wait(&self, settings: &BatchSettings, now: Instant) -> bool {
        if self.len() + 1 >= settings.max_batch_size {
            return false;
        }
        if self.is_empty() {
            let idle = match self.last_setup {
                Some(t) => now.duration_since(t) > settings.min_batch_time,
                None => true,
            };
            if idle {
                return false;
            }
        }
        if now.duration_since(self.first_request) > settings.max_batch_time {
            return false;
        }
        true
    }

    fn push(&mut self, request: Value, slot: oneshot::Sender<BatchOutcome>, now: Instant) {
        if self.is_empty() {
            self.first_request = now;
        }
        self.requests.push(request);
        self.slots.push(slot);
        self.last_request = Some(now);
    }
}

/// A snapshot of a closed window, ready to go downstream.
struct PendingBatch {
    generation: u64,
    requests: Vec<Value>,
    slots: Vec<oneshot::Sender<BatchOutcome>>,
}

/// Per-(model, method) batch coalescer.
pub struct BatchQueue {
    backend: Arc<dyn ModelBackend>,
    accumulators: Mutex<HashMap<BatchKey, Accumulator>>,
    next_generation: AtomicU64,
    /// Added to `max_batch_time` to bound how long a caller waits.
    response_allowance: Duration,
    stats: Arc<GatewayStats>,
}

impl BatchQueue {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        response_allowance: Duration,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            backend,
            accumulators: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            response_allowance,
            stats,
        }
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Join the current window for `key` and wait for this call's result.
    ///
    /// The wait is bounded by `max_batch_time` plus the response allowance.
    pub async fn join(
        self: &Arc<Self>,
        key: BatchKey,
        settings: BatchSettings,
        payload: Value,
    ) -> BatchOutcome {
        let (tx, rx) = oneshot::channel();

        let ready = {
            let mut table = self.accumulators.lock().await;
            let now = Instant::now();

            let acc = table
                .entry(key.clone())
                .or_insert_with(|| Accumulator::new(self.generation(), now, None));

            let wait = acc.should_wait(&settings, now);
            acc.push(payload, tx, now);

            tracing::debug!(
                "Call joined {} (pending={}, wait={}, generation={})",
                key,
                acc.len(),
                wait,
                acc.generation
            );

            if wait {
                if !acc.timer_armed {
                    acc.timer_armed = true;
                    self.arm_timer(
                        key.clone(),
                        acc.generation,
                        acc.first_request + settings.max_batch_time,
                    );
                }
                None
            } else {
                let fresh = self.generation();
                Self::take_batch(&mut table, &key, fresh, now)
            }
        };

        if let Some(batch) = ready {
            self.spawn_flush(key, batch);
        }

        let deadline = settings.max_batch_time + self.response_allowance;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DownstreamError::BatchDispatch(
                "batch was dropped before responding".to_string(),
            )),
            Err(_) => Err(DownstreamError::Timeout(deadline)),
        }
    }

    /// Snapshot the accumulator for `key` and install a fresh one in its place.
    fn take_batch(
        table: &mut HashMap<BatchKey, Accumulator>,
        key: &BatchKey,
        generation: u64,
        now: Instant,
    ) -> Option<PendingBatch> {
        let current = table.get_mut(key)?;
        if current.is_empty() {
            return None;
        }
        let fresh = Accumulator::new(generation, now, current.last_request);
        let closed = std::mem::replace(current, fresh);
        Some(PendingBatch {
            generation: closed.generation,
            requests: closed.requests,
            slots: closed.slots,
        })
    }

    /// Flush the window `generation` of `key` at `deadline`, unless it has
    /// already been replaced.
    fn arm_timer(self: &Arc<Self>, key: BatchKey, generation: u64, deadline: Instant) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let ready = {
                let mut table = queue.accumulators.lock().await;
                let current = table.get(&key).map(|acc| acc.generation) == Some(generation);
                if current {
                    let fresh = queue.generation();
                    Self::take_batch(&mut table, &key, fresh, Instant::now())
                } else {
                    None
                }
            };

            match ready {
                Some(batch) => {
                    tracing::debug!("Batch timer fired for {} (generation={})", key, generation);
                    flush(queue.backend.clone(), queue.stats.clone(), key, batch).await;
                }
                None => {
                    tracing::debug!("Batch timer for {} superseded (generation={})", key, generation);
                }
            }
        });
    }

    /// Run a flush on its own task so it completes even if the caller that
    /// closed the window goes away.
    fn spawn_flush(&self, key: BatchKey, batch: PendingBatch) {
        let backend = self.backend.clone();
        let stats = self.stats.clone();
        tokio::spawn(flush(backend, stats, key, batch));
    }

    /// Number of calls waiting in the current window for `key`.
    pub async fn pending_count(&self, key: &BatchKey) -> usize {
        let table = self.accumulators.lock().await;
        table.get(key).map(|acc| acc.len()).unwrap_or(0)
    }
}

/// Send one batch downstream and fan the replies out to the slots.
///
/// Any batch-level failure reaches every slot.
async fn flush(
    backend: Arc<dyn ModelBackend>,
    stats: Arc<GatewayStats>,
    key: BatchKey,
    batch: PendingBatch,
) {
    let size = batch.requests.len();
    tracing::info!(
        "Dispatching batch of {} requests for {} (generation={})",
        size,
        key,
        batch.generation
    );
    stats.record_batch(size);

    let replies = backend
        .call_batch(&key.model, &key.method, &batch.requests)
        .await
        .and_then(|replies| {
            if replies.len() == size {
                Ok(replies)
            } else {
                Err(DownstreamError::BatchDispatch(format!(
                    "expected {} responses, model instance returned {}",
                    size,
                    replies.len()
                )))
            }
        });

    match replies {
        Ok(replies) => {
            for (slot, reply) in batch.slots.into_iter().zip(replies) {
                // Receiver may have timed out; nothing to do then.
                let _ = slot.send(reply_outcome(reply));
            }
        }
        Err(e) => {
            tracing::warn!("Batch for {} failed, failing {} callers: {}", key, size, e);
            stats.record_downstream_error();
            let e = match e {
                DownstreamError::BatchDispatch(_) => e,
                other => DownstreamError::BatchDispatch(other.to_string()),
            };
            for slot in batch.slots {
                let _ = slot.send(Err(e.clone()));
            }
        }
    }
}
