//! In-process event bus
//!
//! `publish` never blocks and never fails the caller: events go through an
//! unbounded channel to a single dispatcher task, which looks the event kind
//! up in the subscription table and spawns one task per subscribed handler.
//! Every subscription gets its own worker pool, so a slow listener only
//! queues behind itself.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

use super::event::{DomainEvent, EventEnvelope, EventKind};
use crate::error::AppError;
use crate::metrics::{
    EVENTS_PUBLISHED_TOTAL, LISTENER_DURATION_SECONDS, LISTENER_INVOCATIONS_TOTAL,
    LISTENERS_IN_FLIGHT,
};

/// Future returned by a subscribed handler
pub type HandlerFuture = BoxFuture<'static, Result<(), AppError>>;

/// A subscribed handler
pub type Handler = Arc<dyn Fn(Arc<EventEnvelope>) -> HandlerFuture + Send + Sync>;

struct Subscription {
    name: &'static str,
    handler: Handler,
    delay: Duration,
}

/// Subscription table: event kind to an ordered list of named handlers.
///
/// Built once at startup and handed to [`EventBus::start`].
#[derive(Default)]
pub struct Subscriptions {
    table: HashMap<EventKind, Vec<Subscription>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name` for events of `kind`.
    pub fn subscribe<F, Fut>(&mut self, kind: EventKind, name: &'static str, handler: F)
    where
        F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.subscribe_delayed(kind, name, Duration::ZERO, handler);
    }

    /// Register `handler` to run `delay` after each event of `kind`.
    ///
    /// The delay elapses before the handler takes a worker permit.
    pub fn subscribe_delayed<F, Fut>(
        &mut self,
        kind: EventKind,
        name: &'static str,
        delay: Duration,
        handler: F,
    ) where
        F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |envelope| handler(envelope).boxed());
        self.table.entry(kind).or_default().push(Subscription {
            name,
            handler,
            delay,
        });
    }

    /// Handler names registered for `kind`, in registration order
    pub fn names(&self, kind: EventKind) -> Vec<&'static str> {
        self.table
            .get(&kind)
            .map(|subscriptions| subscriptions.iter().map(|s| s.name).collect())
            .unwrap_or_default()
    }

    /// Attach a worker pool of `worker_concurrency` permits to every subscription.
    fn into_lanes(self, worker_concurrency: usize) -> HashMap<EventKind, Vec<Lane>> {
        self.table
            .into_iter()
            .map(|(kind, subscriptions)| {
                let lanes = subscriptions
                    .into_iter()
                    .map(|subscription| Lane {
                        subscription,
                        pool: Arc::new(Semaphore::new(worker_concurrency)),
                    })
                    .collect();
                (kind, lanes)
            })
            .collect()
    }
}

struct Lane {
    subscription: Subscription,
    pool: Arc<Semaphore>,
}

/// Decrements the in-flight counter when dropped, including on cancellation.
struct InFlightGuard(Arc<watch::Sender<usize>>);

impl InFlightGuard {
    fn acquire(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct Queued {
    envelope: Arc<EventEnvelope>,
    _guard: InFlightGuard,
}

/// Domain event bus
pub struct EventBus {
    sender: mpsc::UnboundedSender<Queued>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Queued>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    worker_concurrency: usize,
    pools: Mutex<Vec<Arc<Semaphore>>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl EventBus {
    /// Create a bus allowing each subscription `worker_concurrency` running
    /// handlers at once.
    ///
    /// Events published before [`EventBus::start`] are queued.
    pub fn new(worker_concurrency: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0usize);

        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            dispatcher: Mutex::new(None),
            worker_concurrency: worker_concurrency.max(1),
            pools: Mutex::new(Vec::new()),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Spawn the dispatcher task with the given subscription table.
    ///
    /// # Errors
    /// Returns error if the bus was already started
    pub fn start(&self, subscriptions: Subscriptions) -> Result<(), AppError> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("event bus lock poisoned")))?
            .take()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("event bus already started")))?;

        let lanes = subscriptions.into_lanes(self.worker_concurrency);
        self.pools
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("event bus lock poisoned")))?
            .extend(lanes.values().flatten().map(|lane| lane.pool.clone()));

        let handle = tokio::spawn(dispatch_loop(
            receiver,
            Arc::new(lanes),
            self.in_flight.clone(),
        ));

        *self
            .dispatcher
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("event bus lock poisoned")))? =
            Some(handle);

        tracing::info!("Event dispatcher started");
        Ok(())
    }

    /// Publish an event after its write has committed.
    ///
    /// Never blocks and never returns an error: a missing dispatcher is
    /// logged and the event is dropped.
    pub fn publish(&self, event: DomainEvent) {
        let envelope = Arc::new(EventEnvelope::new(event));
        let kind = envelope.kind();
        let event_id = envelope.id.clone();

        let queued = Queued {
            envelope,
            _guard: InFlightGuard::acquire(&self.in_flight),
        };

        match self.sender.send(queued) {
            Ok(()) => {
                EVENTS_PUBLISHED_TOTAL
                    .with_label_values(&[kind.as_str()])
                    .inc();
                tracing::debug!(event_id = %event_id, kind = kind.as_str(), "Event published");
            }
            Err(_) => {
                tracing::warn!(
                    event_id = %event_id,
                    kind = kind.as_str(),
                    "Event dispatcher is gone, dropping event"
                );
            }
        }
    }

    /// Number of queued events plus running handlers
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until every published event and every handler it spawned
    /// (including events those handlers published) has finished.
    pub async fn wait_idle(&self) {
        let mut receiver = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = receiver.wait_for(|n| *n == 0).await;
    }

    /// Drain outstanding work, then stop the dispatcher.
    pub async fn shutdown(&self) {
        self.wait_idle().await;

        let handle = match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        if let Ok(pools) = self.pools.lock() {
            for pool in pools.iter() {
                pool.close();
            }
        }

        tracing::info!("Event dispatcher stopped");
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::UnboundedReceiver<Queued>,
    lanes: Arc<HashMap<EventKind, Vec<Lane>>>,
    in_flight: Arc<watch::Sender<usize>>,
) {
    while let Some(queued) = receiver.recv().await {
        let Some(subscribed) = lanes.get(&queued.envelope.kind()) else {
            continue;
        };

        for lane in subscribed {
            let name = lane.subscription.name;
            let delay = lane.subscription.delay;
            let future = (lane.subscription.handler)(queued.envelope.clone());
            let envelope = queued.envelope.clone();
            let pool = lane.pool.clone();
            let guard = InFlightGuard::acquire(&in_flight);

            tokio::spawn(async move {
                let _guard = guard;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Ok(_permit) = pool.acquire_owned().await else {
                    tracing::warn!(listener = name, event_id = %envelope.id, "Worker pool closed, skipping listener");
                    return;
                };
                run_handler(name, &envelope, future).await;
            });
        }
        // `queued` drops here, releasing the publish-side guard after every
        // handler guard is already held.
    }
}

async fn run_handler(name: &'static str, envelope: &EventEnvelope, future: HandlerFuture) {
    LISTENERS_IN_FLIGHT.inc();
    let started = Instant::now();

    let outcome = match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => "ok",
        Ok(Err(error)) => {
            error.record(name);
            tracing::error!(
                listener = name,
                event_id = %envelope.id,
                kind = envelope.kind().as_str(),
                error = %error,
                "Listener failed"
            );
            "error"
        }
        Err(_) => {
            tracing::error!(
                listener = name,
                event_id = %envelope.id,
                kind = envelope.kind().as_str(),
                "Listener panicked"
            );
            "panic"
        }
    };

    LISTENERS_IN_FLIGHT.dec();
    LISTENER_DURATION_SECONDS
        .with_label_values(&[name])
        .observe(started.elapsed().as_secs_f64());
    LISTENER_INVOCATIONS_TOTAL
        .with_label_values(&[name, outcome])
        .inc();
}
