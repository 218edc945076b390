//! Signal bus: single FIFO queue with typed handler dispatch
//!
//! Many producers call [`SignalBus::send`]; one processing loop
//! ([`SignalBus::run`]) drains the queue in arrival order and dispatches each
//! signal to the handler registered for its type.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handlers::{AcknowledgeHandler, HandlerError, SignalHandler};
use super::history::{SignalHistory, DEFAULT_HISTORY_CAPACITY};
use super::types::{Signal, SignalId, SignalPriority, SignalRecord, SignalType};

/// Error type for signal bus operations
#[derive(Debug, thiserror::Error)]
pub enum SignalBusError {
    #[error("Failed to enqueue signal {0}: channel closed")]
    ChannelClosed(SignalId),
}

/// Shared reference to SignalBus
pub type SharedSignalBus = Arc<SignalBus>;

/// Bus timing and retention.
#[derive(Debug, Clone)]
pub struct SignalBusConfig {
    /// Records kept in history before the oldest is evicted
    pub history_capacity: usize,
    /// Bounded wait for the next signal; `stop()` is observed at this boundary
    pub poll_interval: Duration,
    /// Poll cadence of `wait_for_response`
    pub response_poll_interval: Duration,
}

impl Default for SignalBusConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            poll_interval: Duration::from_secs(1),
            response_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Point-in-time view of the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalBusStatus {
    pub processing: bool,
    pub queue_size: usize,
    pub active_signals: usize,
    pub total_processed: usize,
    pub handlers_registered: usize,
}

pub struct SignalBus {
    config: SignalBusConfig,
    sender: mpsc::UnboundedSender<Signal>,
    /// Held by the processing loop for its whole lifetime.
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Signal>>,
    handlers: RwLock<HashMap<SignalType, Arc<dyn SignalHandler>>>,
    /// Signals sent but not yet processed, keyed with their enqueue sequence.
    active: Mutex<HashMap<SignalId, (u64, Signal)>>,
    next_seq: AtomicU64,
    history: Mutex<SignalHistory>,
    processing: AtomicBool,
    stop_notify: Notify,
    queued: AtomicUsize,
    total_processed: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SignalBus {
    /// Create a bus with no handlers registered
    pub fn new() -> Self {
        Self::with_config(SignalBusConfig::default())
    }

    pub fn with_config(config: SignalBusConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            history: Mutex::new(SignalHistory::with_capacity(config.history_capacity)),
            config,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            handlers: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            processing: AtomicBool::new(false),
            stop_notify: Notify::new(),
            queued: AtomicUsize::new(0),
            total_processed: AtomicUsize::new(0),
        }
    }

    /// Create a bus that acknowledges every signal type.
    pub fn with_default_handlers(config: SignalBusConfig) -> Self {
        let bus = Self::with_config(config);
        for signal_type in SignalType::ALL {
            bus.register_handler(signal_type, AcknowledgeHandler);
        }
        bus
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedSignalBus {
        Arc::new(self)
    }

    /// Register (or replace) the handler for a signal type.
    pub fn register_handler<H>(&self, signal_type: SignalType, handler: H)
    where
        H: SignalHandler + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.insert(signal_type, Arc::new(handler)).is_some() {
            debug!(signal_type = %signal_type, "Replaced signal handler");
        } else {
            debug!(signal_type = %signal_type, "Registered signal handler");
        }
    }

    /// Enqueue a signal.
    ///
    /// The signal is visible in `active_signals()` before it reaches the
    /// queue, so the loop can never finish it before it is tracked.
    pub fn send(&self, signal: Signal) -> Result<SignalId, SignalBusError> {
        let id = signal.id.clone();
        let signal_type = signal.signal_type;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        lock(&self.active).insert(id.clone(), (seq, signal.clone()));
        self.queued.fetch_add(1, Ordering::SeqCst);

        if self.sender.send(signal).is_err() {
            lock(&self.active).remove(&id);
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(SignalBusError::ChannelClosed(id));
        }
        debug!(signal_id = %id, signal_type = %signal_type, "Signal enqueued");
        Ok(id)
    }

    pub fn broadcast(
        &self,
        signal_type: SignalType,
        sender: &str,
        payload: Value,
    ) -> Result<SignalId, SignalBusError> {
        self.send(Signal::new(signal_type, sender, payload))
    }

    pub fn broadcast_with_priority(
        &self,
        signal_type: SignalType,
        sender: &str,
        payload: Value,
        priority: SignalPriority,
    ) -> Result<SignalId, SignalBusError> {
        self.send(Signal::new(signal_type, sender, payload).with_priority(priority))
    }

    pub fn send_direct(
        &self,
        signal_type: SignalType,
        sender: &str,
        receiver: &str,
        payload: Value,
    ) -> Result<SignalId, SignalBusError> {
        self.send(Signal::direct(signal_type, sender, receiver, payload))
    }

    pub fn send_direct_with_priority(
        &self,
        signal_type: SignalType,
        sender: &str,
        receiver: &str,
        payload: Value,
        priority: SignalPriority,
    ) -> Result<SignalId, SignalBusError> {
        self.send(Signal::direct(signal_type, sender, receiver, payload).with_priority(priority))
    }

    /// Drain the queue until `stop()` is called.
    ///
    /// Returns immediately if another loop is already running.
    pub async fn run(&self) {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            debug!("Signal processing loop already running");
            return;
        };
        self.processing.store(true, Ordering::SeqCst);
        info!("Signal processing started");

        while self.processing.load(Ordering::SeqCst) {
            let next = tokio::select! {
                next = tokio::time::timeout(self.config.poll_interval, receiver.recv()) => next,
                _ = self.stop_notify.notified() => break,
            };
            match next {
                Ok(Some(signal)) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    self.process(signal).await;
                }
                // every sender is gone; cannot happen while the bus owns one
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        self.processing.store(false, Ordering::SeqCst);
        info!("Signal processing stopped");
    }

    /// Run the processing loop on a background task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move { bus.run().await })
    }

    /// Ask the loop to exit. Queued signals stay queued for the next `run()`.
    pub fn stop(&self) {
        self.processing.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    async fn process(&self, mut signal: Signal) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&signal.signal_type)
            .cloned();

        let outcome = match handler {
            Some(handler) => match AssertUnwindSafe(handler.handle(&signal))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::Panicked(panic_message(panic))),
            },
            None => Err(HandlerError::NoHandler(signal.signal_type)),
        };

        let response = match outcome {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    signal_id = %signal.id,
                    signal_type = %signal.signal_type,
                    error = %e,
                    "Signal handler failed"
                );
                e.to_payload()
            }
        };

        signal.response = Some(response);
        signal.processed = true;

        // history first: waiters treat leaving the active map as "done"
        lock(&self.history).push(SignalRecord::from(&signal));
        lock(&self.active).remove(&signal.id);
        self.total_processed.fetch_add(1, Ordering::SeqCst);
        debug!(signal_id = %signal.id, signal_type = %signal.signal_type, "Signal processed");
    }

    /// Wait until `signal_id` has been processed and return its response.
    ///
    /// `None` on timeout, or if the record was already evicted from history.
    pub async fn wait_for_response(&self, signal_id: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !lock(&self.active).contains_key(signal_id) {
                return lock(&self.history).find_response(signal_id);
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(signal_id, "Timed out waiting for signal response");
                return None;
            }
            tokio::time::sleep(self.config.response_poll_interval).await;
        }
    }

    pub fn status(&self) -> SignalBusStatus {
        SignalBusStatus {
            processing: self.processing.load(Ordering::SeqCst),
            queue_size: self.queued.load(Ordering::SeqCst),
            active_signals: lock(&self.active).len(),
            total_processed: self.total_processed.load(Ordering::SeqCst),
            handlers_registered: self
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn history(&self, limit: usize) -> Vec<SignalRecord> {
        lock(&self.history).recent(limit)
    }

    /// Signals sent but not yet processed, in enqueue order.
    pub fn active_signals(&self) -> Vec<Signal> {
        let mut signals: Vec<(u64, Signal)> = lock(&self.active).values().cloned().collect();
        signals.sort_by_key(|(seq, _)| *seq);
        signals.into_iter().map(|(_, signal)| signal).collect()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("processing", &self.processing.load(Ordering::SeqCst))
            .field("queued", &self.queued.load(Ordering::SeqCst))
            .field("total_processed", &self.total_processed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fast_config() -> SignalBusConfig {
        SignalBusConfig {
            history_capacity: 16,
            poll_interval: Duration::from_millis(50),
            response_poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_regardless_of_priority() {
        let bus = SignalBus::with_default_handlers(fast_config()).shared();
        let low = bus
            .broadcast_with_priority(
                SignalType::DataUpdate,
                "a",
                json!({"data_type": "prices"}),
                SignalPriority::Low,
            )
            .unwrap();
        let critical = bus
            .broadcast_with_priority(
                SignalType::RiskAlert,
                "b",
                json!({"risk_level": "high"}),
                SignalPriority::Critical,
            )
            .unwrap();

        let task = bus.spawn();
        let resp = bus.wait_for_response(&critical, Duration::from_secs(5)).await;
        assert_eq!(resp.unwrap()["status"], "risk_acknowledged");

        let ids: Vec<_> = bus.history(10).into_iter().map(|r| r.signal_id).collect();
        assert_eq!(ids, vec![low, critical]);

        bus.stop();
        task.await.unwrap();
        assert!(!bus.status().processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_handler_records_error() {
        let bus = SignalBus::with_config(fast_config()).shared();
        let id = bus
            .send_direct(SignalType::DecisionRequired, "orchestrator", "trader", json!({}))
            .unwrap();
        let task = bus.spawn();

        let resp = bus.wait_for_response(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(resp, json!({"error": "No handler found for decision_required"}));
        let record = &bus.history(1)[0];
        assert!(record.processed);
        assert_eq!(record.receiver.as_deref(), Some("trader"));

        bus.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_and_panic_are_contained() {
        let bus = SignalBus::with_config(fast_config()).shared();
        bus.register_handler(SignalType::DataUpdate, |_signal: Signal| async move {
            Err::<Value, _>(HandlerError::Failed("feed offline".into()))
        });
        bus.register_handler(SignalType::RiskAlert, |_signal: Signal| async move {
            if true {
                panic!("boom");
            }
            Ok::<Value, HandlerError>(Value::Null)
        });

        let failed = bus.broadcast(SignalType::DataUpdate, "x", json!({})).unwrap();
        let panicked = bus.broadcast(SignalType::RiskAlert, "x", json!({})).unwrap();
        let after = bus.broadcast(SignalType::DataUpdate, "x", json!({})).unwrap();
        let task = bus.spawn();

        let resp = bus.wait_for_response(&after, Duration::from_secs(5)).await;
        assert!(resp.is_some());
        assert_eq!(
            bus.wait_for_response(&failed, Duration::ZERO).await,
            Some(json!({"error": "Handler failed: feed offline"}))
        );
        assert_eq!(
            bus.wait_for_response(&panicked, Duration::ZERO).await,
            Some(json!({"error": "Handler panicked: boom"}))
        );
        assert_eq!(bus.status().total_processed, 3);

        bus.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_loop() {
        let bus = SignalBus::with_default_handlers(fast_config());
        let id = bus.broadcast(SignalType::DataUpdate, "x", json!({})).unwrap();

        let resp = bus.wait_for_response(&id, Duration::from_millis(300)).await;
        assert!(resp.is_none());

        let status = bus.status();
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.active_signals, 1);
        assert_eq!(status.handlers_registered, 6);
        assert_eq!(bus.active_signals()[0].id, id);
        assert!(bus.history(10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_keeps_queue() {
        let bus = SignalBus::with_default_handlers(fast_config()).shared();
        let task = bus.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.stop();
        task.await.unwrap();

        let id = bus.broadcast(SignalType::WorkflowControl, "ui", json!({"action": "pause"})).unwrap();
        assert!(bus.wait_for_response(&id, Duration::from_millis(200)).await.is_none());

        let task = bus.spawn();
        let resp = bus.wait_for_response(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(resp["action"], "pause");
        bus.stop();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_returns_immediately() {
        let bus = SignalBus::with_config(fast_config()).shared();
        let first = bus.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // returns without waiting for stop()
        bus.run().await;
        assert!(bus.status().processing);
        bus.stop();
        first.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let config = SignalBusConfig {
            history_capacity: 2,
            ..fast_config()
        };
        let bus = SignalBus::with_default_handlers(config).shared();
        let ids: Vec<_> = (0..4)
            .map(|_| bus.broadcast(SignalType::DataUpdate, "x", json!({})).unwrap())
            .collect();
        let task = bus.spawn();
        bus.wait_for_response(&ids[3], Duration::from_secs(5)).await.unwrap();

        assert_eq!(bus.history(10).len(), 2);
        // evicted record: processed but no longer answerable
        assert!(bus.wait_for_response(&ids[0], Duration::ZERO).await.is_none());
        bus.stop();
        task.await.unwrap();
    }
}
