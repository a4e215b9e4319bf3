//! # Keyed Actor Runtime
//!
//! A lazily activated, single-writer task per key. Every actor owns a bounded
//! mailbox and processes one message to completion before taking the next, so
//! all state changes for a key are totally ordered without store-level locks.
//!
//! Activation is gated by a per-key [`OnceCell`]: the first caller runs it and
//! every concurrent caller awaits the same cell. A failed activation leaves the
//! cell empty so a later call tries again.
//!
//! An actor whose state is durable stops after `idle_timeout` without mail and
//! removes itself from the directory; the next `get` activates it afresh. A
//! handle held across that point reports `ActorUnavailable`.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::{OnceCell, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::config::ActorConfig;
use crate::error::DomainError;

/// Reply channel carried inside actor messages.
pub type Reply<T> = oneshot::Sender<Result<T, DomainError>>;

/// A single-writer unit of state addressed by key.
#[async_trait]
pub trait Actor: Sized + Send + 'static {
    /// Address of an actor instance.
    type Key: Clone + Eq + Hash + Display + Send + Sync + 'static;
    /// Mailbox message type.
    type Message: Send + 'static;
    /// Dependencies shared by every instance of this actor kind.
    type Context: Clone + Send + Sync + 'static;

    /// Short name used in logs and metrics.
    const KIND: &'static str;

    /// Opens the actor's store and prepares its schema.
    async fn activate(key: &Self::Key, context: &Self::Context) -> Result<Self, DomainError>;

    /// Processes one message; replies travel through channels inside the message.
    async fn handle(&mut self, message: Self::Message);

    /// Whether this instance may be stopped when idle. Actors whose state would
    /// not survive reactivation return `false`.
    fn passivates(&self) -> bool {
        true
    }
}

type Cell<A> = Arc<OnceCell<ActorHandle<A>>>;
type Entries<A> = Arc<Mutex<HashMap<<A as Actor>::Key, Cell<A>>>>;

/// Cloneable address of a running actor.
pub struct ActorHandle<A: Actor> {
    key: A::Key,
    sender: mpsc::Sender<A::Message>,
    call_timeout: Duration,
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            sender: self.sender.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

impl<A: Actor> ActorHandle<A> {
    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Sends a request and awaits the reply.
    ///
    /// Waiting is bounded by the configured call timeout; a timed out call
    /// reports [`DomainError::Timeout`] because the actor may still apply it.
    pub async fn ask<T, F>(&self, operation: &'static str, build: F) -> Result<T, DomainError>
    where
        T: Send,
        F: FnOnce(Reply<T>) -> A::Message,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let message = build(reply_tx);

        let exchange = async {
            self.sender
                .send(message)
                .await
                .map_err(|_| self.unavailable())?;
            reply_rx.await.map_err(|_| self.unavailable())?
        };

        match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    actor = A::KIND,
                    key = %self.key,
                    operation,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Actor call timed out"
                );
                counter!("actor_call_timeouts_total", "kind" => A::KIND).increment(1);
                Err(DomainError::Timeout { operation })
            }
        }
    }

    fn unavailable(&self) -> DomainError {
        DomainError::ActorUnavailable {
            key: format!("{}:{}", A::KIND, self.key),
        }
    }
}

/// Directory of actors of one kind, activating each key on first use.
pub struct ActorDirectory<A: Actor> {
    context: A::Context,
    settings: ActorConfig,
    entries: Entries<A>,
    shutdown: CancellationToken,
}

impl<A: Actor> ActorDirectory<A> {
    pub fn new(context: A::Context, settings: ActorConfig) -> Self {
        Self {
            context,
            settings,
            entries: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the handle for `key`, activating the actor if needed.
    pub async fn get(&self, key: &A::Key) -> Result<ActorHandle<A>, DomainError> {
        if self.shutdown.is_cancelled() {
            return Err(DomainError::ActorUnavailable {
                key: format!("{}:{}", A::KIND, key),
            });
        }

        // A task that died (panic or shutdown) leaves a closed handle behind; one
        // retry replaces it with a fresh activation.
        for _ in 0..2 {
            let cell = self.cell(key);
            let handle = cell
                .get_or_try_init(|| self.spawn(key, Arc::downgrade(&cell)))
                .await?;

            if !handle.is_closed() {
                return Ok(handle.clone());
            }

            evict::<A>(&self.entries, key, &cell);
        }

        Err(DomainError::ActorUnavailable {
            key: format!("{}:{}", A::KIND, key),
        })
    }

    /// Number of actors that currently have a live handle.
    pub fn active_count(&self) -> usize {
        self.lock_entries()
            .values()
            .filter(|cell| cell.get().is_some_and(|handle| !handle.is_closed()))
            .count()
    }

    /// Stops every actor; pending and future calls report `ActorUnavailable`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained = {
            let mut entries = self.lock_entries();
            let count = entries.len();
            entries.clear();
            count
        };
        info!(actor = A::KIND, actors = drained, "Actor directory shut down");
    }

    fn cell(&self, key: &A::Key) -> Cell<A> {
        let mut entries = self.lock_entries();
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<A::Key, Cell<A>>> {
        lock::<A>(&self.entries)
    }

    async fn spawn(
        &self,
        key: &A::Key,
        cell: Weak<OnceCell<ActorHandle<A>>>,
    ) -> Result<ActorHandle<A>, DomainError> {
        let started = Instant::now();

        let actor = A::activate(key, &self.context).await.map_err(|err| {
            warn!(actor = A::KIND, key = %key, error = %err, "Actor activation failed");
            counter!("actor_activation_failures_total", "kind" => A::KIND).increment(1);
            err
        })?;

        let idle_timeout = self
            .settings
            .idle_timeout()
            .filter(|_| actor.passivates());
        let (sender, receiver) = mpsc::channel(self.settings.mailbox_capacity);
        let mailbox = Mailbox {
            key: key.clone(),
            receiver,
            shutdown: self.shutdown.child_token(),
            idle_timeout,
            entries: Arc::clone(&self.entries),
            cell,
        };
        let span = tracing::info_span!("actor", kind = A::KIND, key = %key);
        tokio::spawn(mailbox.run(actor).instrument(span));

        let elapsed = started.elapsed();
        counter!("actor_activations_total", "kind" => A::KIND).increment(1);
        histogram!("actor_activation_duration_seconds", "kind" => A::KIND)
            .record(elapsed.as_secs_f64());
        info!(
            actor = A::KIND,
            key = %key,
            elapsed_ms = elapsed.as_millis() as u64,
            "Actor activated"
        );

        Ok(ActorHandle {
            key: key.clone(),
            sender,
            call_timeout: self.settings.call_timeout(),
        })
    }
}

fn lock<A: Actor>(entries: &Entries<A>) -> std::sync::MutexGuard<'_, HashMap<A::Key, Cell<A>>> {
    entries
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

/// Removes `stale` from the directory unless the key was already re-activated.
fn evict<A: Actor>(entries: &Entries<A>, key: &A::Key, stale: &Cell<A>) {
    let mut entries = lock::<A>(entries);
    if entries
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, stale))
    {
        entries.remove(key);
    }
}

struct Mailbox<A: Actor> {
    key: A::Key,
    receiver: mpsc::Receiver<A::Message>,
    shutdown: CancellationToken,
    idle_timeout: Option<Duration>,
    entries: Entries<A>,
    cell: Weak<OnceCell<ActorHandle<A>>>,
}

impl<A: Actor> Mailbox<A> {
    async fn run(mut self, mut actor: A) {
        let idle_timeout = self.idle_timeout;
        loop {
            let idle = async move {
                match idle_timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                message = self.receiver.recv() => match message {
                    Some(message) => actor.handle(message).await,
                    None => break,
                },
                _ = idle => {
                    self.passivate(&mut actor).await;
                    return;
                }
            }
        }
        self.receiver.close();
        debug!("Mailbox closed");
    }

    /// Stops taking mail, finishes what is already queued and leaves the directory.
    async fn passivate(&mut self, actor: &mut A) {
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            actor.handle(message).await;
        }
        if let Some(cell) = self.cell.upgrade() {
            evict::<A>(&self.entries, &self.key, &cell);
        }
        counter!("actor_passivations_total", "kind" => A::KIND).increment(1);
        debug!("Actor passivated after idle timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CounterContext {
        activations: Arc<AtomicUsize>,
        fail_first: Arc<AtomicUsize>,
    }

    #[derive(Clone, PartialEq, Eq, Hash)]
    struct Name(&'static str);

    impl fmt::Display for Name {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    enum CounterMessage {
        Add { amount: u64, reply: Reply<u64> },
        Sleep { millis: u64, reply: Reply<()> },
    }

    struct CounterActor {
        total: u64,
    }

    #[async_trait]
    impl Actor for CounterActor {
        type Key = Name;
        type Message = CounterMessage;
        type Context = CounterContext;

        const KIND: &'static str = "counter";

        async fn activate(_key: &Name, context: &CounterContext) -> Result<Self, DomainError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if context.fail_first.load(Ordering::SeqCst) > 0 {
                context.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(DomainError::TransientStore("disk full".to_string()));
            }
            context.activations.fetch_add(1, Ordering::SeqCst);
            Ok(Self { total: 0 })
        }

        async fn handle(&mut self, message: CounterMessage) {
            match message {
                CounterMessage::Add { amount, reply } => {
                    // Read-modify-write across an await point
                    let current = self.total;
                    tokio::task::yield_now().await;
                    self.total = current + amount;
                    let _ = reply.send(Ok(self.total));
                }
                CounterMessage::Sleep { millis, reply } => {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    fn settings(call_timeout_ms: u64) -> ActorConfig {
        ActorConfig {
            mailbox_capacity: 64,
            call_timeout_ms,
            idle_timeout_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_activate_once() {
        let context = CounterContext::default();
        let directory = Arc::new(ActorDirectory::<CounterActor>::new(
            context.clone(),
            settings(5_000),
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let directory = Arc::clone(&directory);
            tasks.push(tokio::spawn(async move {
                let handle = directory.get(&Name("acme")).await.unwrap();
                handle
                    .ask("add", |reply| CounterMessage::Add { amount: 1, reply })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        results.sort_unstable();

        assert_eq!(context.activations.load(Ordering::SeqCst), 1);
        // Every increment was applied in isolation
        assert_eq!(results, (1..=16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_actors() {
        let context = CounterContext::default();
        let directory = ActorDirectory::<CounterActor>::new(context.clone(), settings(5_000));

        let a = directory.get(&Name("a")).await.unwrap();
        let b = directory.get(&Name("b")).await.unwrap();
        a.ask("add", |reply| CounterMessage::Add { amount: 5, reply })
            .await
            .unwrap();
        let b_total = b
            .ask("add", |reply| CounterMessage::Add { amount: 1, reply })
            .await
            .unwrap();

        assert_eq!(b_total, 1);
        assert_eq!(directory.active_count(), 2);
        assert_eq!(context.activations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_activation_is_retried_on_next_call() {
        let context = CounterContext::default();
        context.fail_first.store(1, Ordering::SeqCst);
        let directory = ActorDirectory::<CounterActor>::new(context.clone(), settings(5_000));

        let first = directory.get(&Name("acme")).await;
        assert!(matches!(first, Err(DomainError::TransientStore(_))));

        let second = directory.get(&Name("acme")).await;
        assert!(second.is_ok());
        assert_eq!(context.activations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_reports_timeout() {
        let directory =
            ActorDirectory::<CounterActor>::new(CounterContext::default(), settings(100));
        let handle = directory.get(&Name("slow")).await.unwrap();

        let result = handle
            .ask("sleep", |reply| CounterMessage::Sleep { millis: 500, reply })
            .await;

        assert_eq!(result, Err(DomainError::Timeout { operation: "sleep" }));
    }

    #[tokio::test]
    async fn test_shutdown_makes_actors_unavailable() {
        let directory =
            ActorDirectory::<CounterActor>::new(CounterContext::default(), settings(1_000));
        let handle = directory.get(&Name("acme")).await.unwrap();

        directory.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = handle
            .ask("add", |reply| CounterMessage::Add { amount: 1, reply })
            .await;
        assert!(matches!(result, Err(DomainError::ActorUnavailable { .. })));
        assert!(matches!(
            directory.get(&Name("acme")).await,
            Err(DomainError::ActorUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_idle_actor_is_passivated_and_reactivated() {
        let context = CounterContext::default();
        let directory = ActorDirectory::<CounterActor>::new(
            context.clone(),
            ActorConfig {
                idle_timeout_ms: 100,
                ..settings(1_000)
            },
        );

        let handle = directory.get(&Name("acme")).await.unwrap();
        handle
            .ask("add", |reply| CounterMessage::Add { amount: 1, reply })
            .await
            .unwrap();
        assert_eq!(directory.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(directory.active_count(), 0);
        assert!(matches!(
            handle
                .ask("add", |reply| CounterMessage::Add { amount: 1, reply })
                .await,
            Err(DomainError::ActorUnavailable { .. })
        ));

        let fresh = directory.get(&Name("acme")).await.unwrap();
        let total = fresh
            .ask("add", |reply| CounterMessage::Add { amount: 1, reply })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(context.activations.load(Ordering::SeqCst), 2);
    }
}
