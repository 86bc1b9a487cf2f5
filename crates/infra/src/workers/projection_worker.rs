use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use storefront_core::TenantId;
use storefront_events::{EventBus, Subscription, TenantScoped};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How often a failing message is handed back to the handler before the
/// worker logs it and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(50), Duration::from_secs(2))
    }
}

/// Handle to stop and join a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to stop and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Feeds bus messages to a handler on a dedicated thread.
///
/// The subscription is taken before the thread starts, so nothing published
/// after `spawn` returns is missed. A failing message is redelivered per the
/// [`RetryPolicy`], then logged and skipped; handlers must tolerate
/// redelivery.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// `tenant_id` pins the worker to one tenant; other tenants' messages are dropped.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Clone + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        Self::spawn_with_retry(name, bus, tenant_id, RetryPolicy::no_retry(), handler)
    }

    pub fn spawn_with_retry<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        retry: RetryPolicy,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Clone + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(name, sub, shutdown_rx, tenant_id, retry, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn run<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    retry: RetryPolicy,
    handler: &mut H,
) where
    M: TenantScoped + Clone,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    debug!(worker = name, "projection worker started");
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => {
                if tenant_id.is_some_and(|t| msg.tenant_id() != t) {
                    continue;
                }
                handle_with_retry(name, retry, msg, handler);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "projection worker stopped");
}

fn handle_with_retry<M, H, E>(name: &'static str, retry: RetryPolicy, msg: M, handler: &mut H)
where
    M: Clone,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let mut attempt = 0;
    loop {
        match handler(msg.clone()) {
            Ok(()) => return,
            Err(err) if attempt < retry.max_retries => {
                attempt += 1;
                debug!(worker = name, attempt, error = ?err, "projection worker handler failed, retrying");
                thread::sleep(retry.delay_for_attempt(attempt));
            }
            Err(err) => {
                warn!(worker = name, attempts = attempt + 1, error = ?err, "projection worker handler failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use storefront_core::AggregateId;
    use storefront_events::{EventEnvelope, InMemoryEventBus};
    use uuid::Uuid;

    fn envelope(tenant_id: TenantId) -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(Uuid::now_v7(), tenant_id, AggregateId::new(), "products.product", 1, json!({}))
    }

    #[test]
    fn worker_filters_by_tenant_and_stops_on_shutdown() {
        let bus: InMemoryEventBus<EventEnvelope<serde_json::Value>> = InMemoryEventBus::new();
        let mine = TenantId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handle = ProjectionWorker::spawn("test-worker", &bus, Some(mine), move |env: EventEnvelope<_>| {
            sink.lock().unwrap().push(env.tenant_id());
            Ok::<_, ()>(())
        })
        .unwrap();
        assert_eq!(handle.name(), "test-worker");

        bus.publish(envelope(TenantId::new())).unwrap();
        bus.publish(envelope(mine)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![mine]);
    }

    #[test]
    fn handler_errors_do_not_stop_the_worker() {
        let bus: InMemoryEventBus<EventEnvelope<serde_json::Value>> = InMemoryEventBus::new();
        let calls = Arc::new(Mutex::new(0u32));

        let counter = calls.clone();
        let handle = ProjectionWorker::spawn("failing-worker", &bus, None, move |_env: EventEnvelope<_>| {
            *counter.lock().unwrap() += 1;
            Err::<(), _>("boom")
        })
        .unwrap();

        bus.publish(envelope(TenantId::new())).unwrap();
        bus.publish(envelope(TenantId::new())).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while *calls.lock().unwrap() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn failing_message_is_redelivered_until_it_succeeds() {
        let bus: InMemoryEventBus<EventEnvelope<serde_json::Value>> = InMemoryEventBus::new();
        let calls = Arc::new(Mutex::new(0u32));

        let counter = calls.clone();
        let retry = RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(5));
        let handle = ProjectionWorker::spawn_with_retry("retrying-worker", &bus, None, retry, move |_env: EventEnvelope<_>| {
            let mut calls = counter.lock().unwrap();
            *calls += 1;
            if *calls < 3 { Err("store unavailable") } else { Ok(()) }
        })
        .unwrap();

        bus.publish(envelope(TenantId::new())).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while *calls.lock().unwrap() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(20));
        handle.shutdown();

        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn retry_delay_doubles_up_to_the_cap() {
        let retry = RetryPolicy::exponential(10, Duration::from_millis(50), Duration::from_millis(300));
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(300));
        assert_eq!(retry.delay_for_attempt(40), Duration::from_millis(300));
    }
}
