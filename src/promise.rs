//! The single-assignment promise.
//!
//! A [`Promise`] moves through `NotStarted → Pending → Done` exactly once.
//! The state lives in one atomic slot and every transition is a pointer
//! compare-and-swap against the slot's current value, so two threads can
//! never both believe they resolved the same promise.
//!
//! Listeners come in two flavours. Subscribers count towards the promise's
//! audience: when the last one leaves a pending promise, the promise aborts
//! itself with "No more listener.". Eavesdroppers are notified the same way
//! (and always before subscribers) but never keep a promise alive.
//!
//! # Examples
//!
//! ```
//! use promise_out::{Outcome, Promise, Wait};
//! use std::sync::mpsc::channel;
//!
//! let promise = Promise::<u32>::new();
//! promise.start();
//! let (tx, rx) = channel();
//! promise.subscribe(Wait::forever(), move |outcome| tx.send(outcome).unwrap());
//! assert!(promise.complete(7));
//! assert!(!promise.complete(8));
//! assert!(matches!(rx.recv().unwrap(), Outcome::Value(7)));
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::panic_message;
use crate::hooks::{ListenerKind, PromiseContext, PromiseHooks};
use crate::subscription::{Subscription, SubscriptionId, Unsubscribe};
use crate::wait::{Wait, WaitSession};
use crate::{Error, Outcome, PromiseStatus};

pub(crate) type Consumer<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

enum Slot<T> {
    NotStarted,
    Pending,
    Done(Outcome<T>),
}

/// One registered consumer. Whoever claims it first (resolution, expiry or
/// unsubscription) decides whether and with what it runs.
struct Notifier<T> {
    notified: AtomicBool,
    consumer: Mutex<Option<Consumer<T>>>,
    session: Mutex<Option<WaitSession>>,
}

impl<T> Notifier<T> {
    fn new(consumer: Consumer<T>) -> Self {
        Self {
            notified: AtomicBool::new(false),
            consumer: Mutex::new(Some(consumer)),
            session: Mutex::new(None),
        }
    }

    fn claim(&self) -> Option<Consumer<T>> {
        if self
            .notified
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        if let Some(session) = self.session.lock().take() {
            session.disarm();
        }
        self.consumer.lock().take()
    }

    fn attach(&self, session: WaitSession) {
        if self.notified.load(Ordering::Acquire) {
            session.disarm();
            return;
        }
        *self.session.lock() = Some(session.clone());
        // Claimed while attaching: the claimer may have missed the session.
        if self.notified.load(Ordering::Acquire) {
            session.disarm();
        }
    }
}

struct Registry<T> {
    open: bool,
    next_id: u64,
    subscribers: HashMap<SubscriptionId, Arc<Notifier<T>>>,
    eavesdroppers: HashMap<SubscriptionId, Arc<Notifier<T>>>,
}

impl<T> Registry<T> {
    fn listeners(&mut self, kind: ListenerKind) -> &mut HashMap<SubscriptionId, Arc<Notifier<T>>> {
        match kind {
            ListenerKind::Subscriber => &mut self.subscribers,
            ListenerKind::Eavesdropper => &mut self.eavesdroppers,
        }
    }
}

struct Inner<T> {
    slot: ArcSwap<Slot<T>>,
    registry: Mutex<Registry<T>>,
    context: Arc<PromiseContext>,
}

/// A single-assignment container for a value that becomes available later.
///
/// Cloning a `Promise` clones the handle; all clones share one state.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .field("subscribers", &self.subscriber_count())
            .field("eavesdroppers", &self.eavesdropper_count())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// An unstarted promise using the default context.
    pub fn new() -> Self {
        Self::with_shared_context(PromiseContext::shared_default())
    }

    pub fn with_context(context: PromiseContext) -> Self {
        Self::with_shared_context(Arc::new(context))
    }

    pub fn with_hooks(hooks: Arc<dyn PromiseHooks>) -> Self {
        Self::with_context(PromiseContext::with_hooks(hooks))
    }

    pub(crate) fn with_shared_context(context: Arc<PromiseContext>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: ArcSwap::from_pointee(Slot::NotStarted),
                registry: Mutex::new(Registry {
                    open: true,
                    next_id: 1,
                    subscribers: HashMap::new(),
                    eavesdroppers: HashMap::new(),
                }),
                context,
            }),
        }
    }

    /// A promise already resolved with `outcome`.
    pub fn resolved(outcome: Outcome<T>) -> Self {
        let promise = Self::new();
        promise.start();
        promise.resolve(outcome);
        promise
    }

    pub fn completed(value: T) -> Self {
        Self::resolved(Outcome::Value(value))
    }

    pub fn failed(error: Error) -> Self {
        Self::resolved(Outcome::Exception(error))
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::resolved(Outcome::cancelled(message))
    }

    /// A started promise sharing this promise's context.
    pub(crate) fn derive<R: Clone + Send + Sync + 'static>(&self) -> Promise<R> {
        let derived = Promise::with_shared_context(Arc::clone(&self.inner.context));
        derived.start();
        derived
    }

    pub(crate) fn context(&self) -> &Arc<PromiseContext> {
        &self.inner.context
    }

    /// `NotStarted → Pending`. Returns false if the promise was already
    /// started.
    pub fn start(&self) -> bool {
        self.inner.start()
    }

    /// Stores `outcome` if the promise is pending. Returns false if it was
    /// not started or is already resolved; the outcome is then discarded.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        self.inner.resolve(outcome)
    }

    pub fn complete(&self, value: T) -> bool {
        self.resolve(Outcome::Value(value))
    }

    pub fn fail(&self, error: Error) -> bool {
        self.resolve(Outcome::Exception(error))
    }

    pub fn abort(&self, message: impl Into<String>) -> bool {
        self.resolve(Outcome::cancelled(message))
    }

    pub fn abort_with(&self, message: impl Into<String>, cause: Error) -> bool {
        self.resolve(Outcome::cancelled_with(message, cause))
    }

    /// Registers `consumer` for the outcome.
    ///
    /// A resolved promise runs `consumer` right away on the calling thread
    /// and returns a no-op subscription. Otherwise `consumer` runs exactly
    /// once: on resolution, or on expiry of `wait` with the wait's default
    /// outcome (or a cancellation), whichever comes first.
    pub fn subscribe(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.inner
            .listen(wait, Box::new(consumer), ListenerKind::Subscriber)
    }

    /// Like [`subscribe`](Self::subscribe), but the listener does not count
    /// towards the audience that keeps a pending promise alive.
    pub fn eavesdrop(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.inner
            .listen(wait, Box::new(consumer), ListenerKind::Eavesdropper)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        subscription.unsubscribe()
    }

    /// Holds a placeholder subscriber for the duration of `wait`. If nobody
    /// else subscribed by the time it leaves, the promise aborts.
    pub fn abort_no_subscription_after(&self, wait: Wait<T>) -> Subscription {
        self.subscribe(wait, |_| {})
    }

    pub fn status(&self) -> PromiseStatus {
        match &**self.inner.slot.load() {
            Slot::NotStarted => PromiseStatus::NotStarted,
            Slot::Pending => PromiseStatus::Pending,
            Slot::Done(outcome) => outcome.status(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.status() != PromiseStatus::NotStarted
    }

    pub fn is_pending(&self) -> bool {
        self.status() == PromiseStatus::Pending
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self.status(),
            PromiseStatus::Completed | PromiseStatus::Aborted
        )
    }

    pub fn is_completed(&self) -> bool {
        self.status() == PromiseStatus::Completed
    }

    pub fn is_aborted(&self) -> bool {
        self.status() == PromiseStatus::Aborted
    }

    /// The stored outcome, or `NotReady` while unresolved.
    pub fn result(&self) -> Outcome<T> {
        match &*self.inner.slot.load_full() {
            Slot::Done(outcome) => outcome.clone(),
            _ => Outcome::NotReady,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.lock().subscribers.len()
    }

    pub fn eavesdropper_count(&self) -> usize {
        self.inner.registry.lock().eavesdroppers.len()
    }

    /// Derives a promise holding `f` applied to the value. A panic in `f`
    /// becomes an exception on the derived promise.
    pub fn map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    pub fn try_map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<R, Error> + Send + 'static,
    {
        let derived = self.derive::<R>();
        self.map_into(&derived, f);
        derived
    }

    /// Chains a promise produced from the value. Non-value outcomes are
    /// forwarded without calling `f`.
    pub fn flat_map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let derived = self.derive::<R>();
        self.flat_map_into(&derived, f);
        derived
    }

    /// Resolves the pending `derived` promise from this one through `f`.
    pub(crate) fn map_into<R, F>(&self, derived: &Promise<R>, f: F)
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<R, Error> + Send + 'static,
    {
        let links = Links::release_on_abort(derived);
        let target = derived.clone();
        let upstream = self.subscribe(Wait::forever(), move |outcome| {
            let mapped = match outcome {
                Outcome::Value(value) => match catch_unwind(AssertUnwindSafe(|| f(value))) {
                    Ok(result) => result.into(),
                    Err(payload) => Outcome::Exception(Error::from_panic(payload)),
                },
                other => other.cast(),
            };
            target.resolve(mapped);
        });
        links.add(upstream);
    }

    pub(crate) fn flat_map_into<R, F>(&self, derived: &Promise<R>, f: F)
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let links = Links::release_on_abort(derived);
        let target = derived.clone();
        let inner_links = Arc::clone(&links);
        let upstream = self.subscribe(Wait::forever(), move |outcome| match outcome {
            Outcome::Value(value) => match catch_unwind(AssertUnwindSafe(|| f(value))) {
                Ok(next) => {
                    let forward = target.clone();
                    let sub = next.subscribe(Wait::forever(), move |outcome| {
                        forward.resolve(outcome);
                    });
                    inner_links.add(sub);
                }
                Err(payload) => {
                    target.resolve(Outcome::Exception(Error::from_panic(payload)));
                }
            },
            other => {
                target.resolve(other.cast());
            }
        });
        links.add(upstream);
    }

    /// Derives a promise holding `Some(value)` when `predicate` holds and
    /// `None` otherwise.
    pub fn filter<P>(&self, predicate: P) -> Promise<Option<T>>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.map(move |value| predicate(&value).then_some(value))
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    fn start(&self) -> bool {
        let current = self.slot.load_full();
        if !matches!(*current, Slot::NotStarted) {
            return false;
        }
        let prev = self
            .slot
            .compare_and_swap(&current, Arc::new(Slot::Pending));
        let won = Arc::ptr_eq(&*prev, &current);
        if won {
            tracing::trace!("promise started");
        }
        won
    }

    fn resolve(&self, outcome: Outcome<T>) -> bool {
        self.settle(outcome, false)
    }

    /// Swaps in the outcome and closes the registry under one registry lock,
    /// so a concurrent `listen` either gets registered and notified or sees
    /// the closed registry. With `only_if_orphaned` it gives up as soon as a
    /// subscriber is registered.
    fn settle(&self, outcome: Outcome<T>, only_if_orphaned: bool) -> bool {
        let (outcome, illegal) = match outcome {
            Outcome::NotReady => {
                let error = Error::IllegalState("Promise is in an unknown state".into());
                (Outcome::Exception(error.clone()), Some(error))
            }
            ready => (ready, None),
        };
        let status = outcome.status();
        let done = Arc::new(Slot::Done(outcome));

        let (eavesdroppers, subscribers) = {
            let mut registry = self.registry.lock();
            if only_if_orphaned && !registry.subscribers.is_empty() {
                return false;
            }
            let current = self.slot.load_full();
            if !matches!(*current, Slot::Pending) {
                return false;
            }
            let won = {
                let prev = self.slot.compare_and_swap(&current, Arc::clone(&done));
                Arc::ptr_eq(&*prev, &current)
            };
            if !won {
                return false;
            }
            registry.open = false;
            (
                std::mem::take(&mut registry.eavesdroppers),
                std::mem::take(&mut registry.subscribers),
            )
        };
        if let Some(error) = illegal {
            self.context.hooks.on_illegal_state(&error);
        }
        tracing::debug!(
            ?status,
            subscribers = subscribers.len(),
            eavesdroppers = eavesdroppers.len(),
            "promise resolved"
        );

        let Slot::Done(outcome) = &*done else {
            return true;
        };
        for notifier in eavesdroppers.into_values() {
            if let Some(consumer) = notifier.claim() {
                self.deliver(consumer, outcome.clone(), ListenerKind::Eavesdropper);
            }
        }
        for notifier in subscribers.into_values() {
            if let Some(consumer) = notifier.claim() {
                self.deliver(consumer, outcome.clone(), ListenerKind::Subscriber);
            }
        }
        true
    }

    fn deliver(&self, consumer: Consumer<T>, outcome: Outcome<T>, kind: ListenerKind) {
        deliver(&*self.context.hooks, consumer, outcome, kind);
    }

    /// The outcome of a promise whose registry is closed.
    fn settled(&self) -> Outcome<T> {
        match &*self.slot.load_full() {
            Slot::Done(outcome) => outcome.clone(),
            _ => {
                let error = Error::IllegalState("Promise is in an unknown state".into());
                self.context.hooks.on_illegal_state(&error);
                Outcome::Exception(error)
            }
        }
    }

    fn listen(self: &Arc<Self>, wait: Wait<T>, consumer: Consumer<T>, kind: ListenerKind) -> Subscription {
        if let Slot::Done(outcome) = &*self.slot.load_full() {
            self.deliver(consumer, outcome.clone(), kind);
            return Subscription::noop();
        }

        let notifier = Arc::new(Notifier::new(consumer));
        let id = {
            let mut registry = self.registry.lock();
            if registry.open {
                let id = SubscriptionId(registry.next_id);
                registry.next_id += 1;
                registry.listeners(kind).insert(id, Arc::clone(&notifier));
                Some(id)
            } else {
                None
            }
        };
        let Some(id) = id else {
            if let Some(consumer) = notifier.claim() {
                self.deliver(consumer, self.settled(), kind);
            }
            return Subscription::noop();
        };

        let weak: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        let subscription = Subscription::new(weak, id, kind);
        if wait.is_bounded() {
            let session = wait.start_on(&self.context.timer);
            notifier.attach(session.clone());
            let expiring = Arc::clone(&notifier);
            let handle = subscription.clone();
            let context = Arc::clone(&self.context);
            session.on_expire(move || {
                let Some(consumer) = expiring.claim() else {
                    return;
                };
                tracing::debug!(id = handle.id().0, ?kind, "subscription wait expired");
                handle.unsubscribe();
                let outcome = wait.expired_outcome(&context.expiry_message);
                deliver(&*context.hooks, consumer, outcome, kind);
            });
        }
        subscription
    }
}

impl<T: Clone + Send + Sync + 'static> Unsubscribe for Inner<T> {
    fn remove(&self, id: SubscriptionId, kind: ListenerKind) -> bool {
        let (removed, orphaned) = {
            let mut registry = self.registry.lock();
            if !registry.open {
                return false;
            }
            let removed = registry.listeners(kind).remove(&id);
            let orphaned = removed.is_some()
                && kind == ListenerKind::Subscriber
                && registry.subscribers.is_empty();
            (removed, orphaned)
        };
        let Some(notifier) = removed else {
            return false;
        };
        // An unsubscribed consumer is never called.
        drop(notifier.claim());
        if orphaned
            && matches!(**self.slot.load(), Slot::Pending)
            && self.settle(Outcome::cancelled(&*self.context.no_listener_message), true)
        {
            tracing::debug!("last subscriber left a pending promise, aborted");
        }
        true
    }
}

fn deliver<T>(
    hooks: &dyn PromiseHooks,
    consumer: Consumer<T>,
    outcome: Outcome<T>,
    kind: ListenerKind,
) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || consumer(outcome))) {
        hooks.on_consumer_panic(kind, &panic_message(payload.as_ref()));
    }
}

enum LinkState {
    Open(Vec<Subscription>),
    Released,
    Settled,
}

/// Upstream subscriptions of a derived promise, released when the derived
/// promise is aborted.
pub(crate) struct Links {
    state: Mutex<LinkState>,
}

impl Links {
    pub(crate) fn release_on_abort<R: Clone + Send + Sync + 'static>(
        derived: &Promise<R>,
    ) -> Arc<Links> {
        let links = Arc::new(Links {
            state: Mutex::new(LinkState::Open(Vec::new())),
        });
        let watcher = Arc::clone(&links);
        derived.eavesdrop(Wait::forever(), move |outcome| {
            if outcome.is_cancelled() {
                watcher.release();
            } else {
                *watcher.state.lock() = LinkState::Settled;
            }
        });
        links
    }

    pub(crate) fn add(&self, subscription: Subscription) {
        let mut state = self.state.lock();
        match &mut *state {
            LinkState::Open(subs) => subs.push(subscription),
            LinkState::Released => {
                drop(state);
                subscription.unsubscribe();
            }
            LinkState::Settled => {}
        }
    }

    pub(crate) fn release(&self) {
        let subs = match std::mem::replace(&mut *self.state.lock(), LinkState::Released) {
            LinkState::Open(subs) => subs,
            _ => return,
        };
        for sub in subs {
            sub.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::WaitTrigger;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    fn pending<T: Clone + Send + Sync + 'static>() -> Promise<T> {
        let promise = Promise::new();
        assert!(promise.start());
        promise
    }

    #[test]
    fn start_is_one_shot() {
        let promise = Promise::<()>::new();
        assert_eq!(promise.status(), PromiseStatus::NotStarted);
        assert!(promise.start());
        assert!(!promise.start());
        assert_eq!(promise.status(), PromiseStatus::Pending);
    }

    #[test]
    fn resolve_requires_start() {
        let promise = Promise::<i32>::new();
        assert!(!promise.complete(1));
        assert!(matches!(promise.result(), Outcome::NotReady));
        promise.start();
        assert!(promise.complete(1));
        assert!(!promise.fail(Error::msg("late")));
        assert!(matches!(promise.result(), Outcome::Value(1)));
        assert!(promise.is_completed());
    }

    #[test]
    fn concurrent_resolution_has_one_winner() {
        for _ in 0..50 {
            let promise = pending::<usize>();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            promise.subscribe(Wait::forever(), move |outcome| sink.lock().push(outcome));
            let threads: Vec<_> = (0..8)
                .map(|i| {
                    let promise = promise.clone();
                    thread::spawn(move || match i % 3 {
                        0 => promise.complete(i),
                        1 => promise.fail(Error::msg(i)),
                        _ => promise.abort(format!("{i}")),
                    })
                })
                .collect();
            let wins = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(seen.lock().len(), 1);
            assert!(promise.is_done());
        }
    }

    #[test]
    fn late_subscriber_runs_synchronously() {
        let promise = Promise::completed("done".to_string());
        let (tx, rx) = channel();
        let sub = promise.subscribe(Wait::forever(), move |outcome| tx.send(outcome).unwrap());
        assert!(sub.is_noop());
        assert_eq!(rx.try_recv().unwrap().value().map(String::as_str), Some("done"));
        assert_eq!(promise.subscriber_count(), 0);
    }

    #[test]
    fn eavesdroppers_hear_first() {
        let promise = pending::<u8>();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["sub-a", "sub-b"] {
            let order = Arc::clone(&order);
            promise.subscribe(Wait::forever(), move |_| order.lock().push(name));
        }
        for name in ["eve-a", "eve-b"] {
            let order = Arc::clone(&order);
            promise.eavesdrop(Wait::forever(), move |_| order.lock().push(name));
        }
        promise.complete(1);
        let order = order.lock();
        assert_eq!(order.len(), 4);
        assert!(order[..2].iter().all(|name| name.starts_with("eve")));
        assert!(order[2..].iter().all(|name| name.starts_with("sub")));
    }

    #[test]
    fn last_subscriber_leaving_aborts() {
        let promise = pending::<u8>();
        let (tx, rx) = channel();
        promise.eavesdrop(Wait::forever(), move |outcome| tx.send(outcome).unwrap());
        let sub = promise.subscribe(Wait::forever(), |_| panic!("unsubscribed consumers never run"));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert_eq!(promise.status(), PromiseStatus::Aborted);
        assert_eq!(rx.try_recv().unwrap().message(), Some("No more listener."));
    }

    #[test]
    fn subscriber_racing_the_last_unsubscribe_is_never_orphaned() {
        for _ in 0..200 {
            let promise = pending::<u8>();
            let first = promise.subscribe(Wait::forever(), |_| {});
            let leaving = thread::spawn(move || first.unsubscribe());
            let (tx, rx) = channel();
            let second = promise.subscribe(Wait::forever(), move |outcome| tx.send(outcome).unwrap());
            assert!(leaving.join().unwrap());
            if second.is_noop() {
                // Subscribed after the abort and heard it right away.
                assert!(promise.is_aborted());
                assert_eq!(rx.try_recv().unwrap().message(), Some("No more listener."));
            } else {
                assert!(promise.is_pending());
                assert!(rx.try_recv().is_err());
            }
        }
    }

    #[test]
    fn unrepresentable_wait_never_expires() {
        let promise = pending::<u8>();
        let (tx, rx) = channel();
        promise.subscribe(
            Wait::for_duration(Duration::MAX).or_value(1),
            move |outcome| tx.send(outcome).unwrap(),
        );
        assert!(promise.is_pending());
        promise.complete(2);
        assert!(matches!(rx.try_recv().unwrap(), Outcome::Value(2)));
    }

    #[test]
    fn eavesdropper_leaving_does_not_abort() {
        let promise = pending::<u8>();
        let sub = promise.eavesdrop(Wait::forever(), |_| {});
        assert!(sub.unsubscribe());
        assert!(promise.is_pending());
    }

    #[test]
    fn unstarted_promise_is_not_aborted_by_unsubscribe() {
        let promise = Promise::<u8>::new();
        let sub = promise.subscribe(Wait::forever(), |_| {});
        assert!(promise.unsubscribe(&sub));
        assert_eq!(promise.status(), PromiseStatus::NotStarted);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let promise = pending::<u8>();
        let hits = Arc::new(AtomicUsize::new(0));
        promise.subscribe(Wait::forever(), |_| panic!("first"));
        let counter = Arc::clone(&hits);
        promise.subscribe(Wait::forever(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(promise.complete(3));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn not_ready_is_coerced_to_exception() {
        let promise = pending::<u8>();
        assert!(promise.resolve(Outcome::NotReady));
        assert!(matches!(
            promise.result(),
            Outcome::Exception(Error::IllegalState(_))
        ));
    }

    #[test]
    fn expiry_delivers_default_once() {
        let trigger = WaitTrigger::new();
        let promise = pending::<i32>();
        let (tx, rx) = channel();
        promise.subscribe(Wait::manual(&trigger).or_value(42), move |outcome| {
            tx.send(outcome).unwrap()
        });
        trigger.fire();
        promise.complete(1);
        assert!(matches!(rx.try_recv().unwrap(), Outcome::Value(42)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn expiry_without_default_is_a_cancellation() {
        let trigger = WaitTrigger::new();
        let promise = pending::<i32>();
        let (tx, rx) = channel();
        promise.subscribe(Wait::manual(&trigger), move |outcome| tx.send(outcome).unwrap());
        trigger.fire();
        assert_eq!(rx.try_recv().unwrap().message(), Some("Wait expired."));
        // The expired subscriber was the only one.
        assert!(promise.is_aborted());
    }

    #[test]
    fn resolution_disarms_the_wait() {
        let trigger = WaitTrigger::new();
        let promise = pending::<i32>();
        let (tx, rx) = channel();
        promise.subscribe(Wait::manual(&trigger).or_value(0), move |outcome| {
            tx.send(outcome).unwrap()
        });
        promise.complete(5);
        assert_eq!(trigger.fire(), 0);
        assert!(matches!(rx.try_recv().unwrap(), Outcome::Value(5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn abort_no_subscription_after_grace_period() {
        let trigger = WaitTrigger::new();
        let orphan = pending::<u8>();
        orphan.abort_no_subscription_after(Wait::manual(&trigger));
        let watched = pending::<u8>();
        watched.abort_no_subscription_after(Wait::manual(&trigger));
        watched.subscribe(Wait::forever(), |_| {});
        trigger.fire();
        assert!(orphan.is_aborted());
        assert!(watched.is_pending());
    }

    #[test]
    fn map_and_filter_derive_values() {
        let source = pending::<i32>();
        let doubled = source.map(|v| v * 2);
        let big = source.filter(|v| *v > 10);
        let small = source.filter(|v| *v < 10);
        source.complete(4);
        assert!(matches!(doubled.result(), Outcome::Value(8)));
        assert!(matches!(big.result(), Outcome::Value(None)));
        assert!(matches!(small.result(), Outcome::Value(Some(4))));
    }

    #[test]
    fn mapper_panic_becomes_exception() {
        let source = pending::<i32>();
        let mapped = source.map(|_| -> i32 { panic!("mapper") });
        source.complete(1);
        assert!(matches!(mapped.result(), Outcome::Exception(Error::Panicked(m)) if m == "mapper"));
    }

    #[test]
    fn try_map_error_becomes_exception() {
        let source = pending::<i32>();
        let mapped = source.try_map(|v| -> Result<i32, Error> { Err(Error::msg(v)) });
        source.complete(9);
        assert_eq!(mapped.result().error().map(ToString::to_string), Some("9".into()));
    }

    #[test]
    fn aborting_a_derived_promise_releases_the_source() {
        let source = pending::<i32>();
        let derived = source.map(|v| v + 1);
        let sub = derived.subscribe(Wait::forever(), |_| {});
        sub.unsubscribe();
        assert!(derived.is_aborted());
        assert!(source.is_aborted());
    }

    #[test]
    fn flat_map_forwards_inner_outcome() {
        let outer = pending::<i32>();
        let inner = pending::<String>();
        let handle = inner.clone();
        let chained = outer.flat_map(move |v| {
            assert_eq!(v, 3);
            handle
        });
        outer.complete(3);
        assert!(chained.is_pending());
        inner.complete("three".into());
        assert_eq!(chained.result().value().map(String::as_str), Some("three"));
    }

    #[test]
    fn flat_map_skips_mapper_on_failure() {
        let outer = pending::<i32>();
        let chained = outer.flat_map(|_| -> Promise<i32> { panic!("never called") });
        outer.abort("outer gone");
        assert_eq!(chained.result().message(), Some("outer gone"));
    }
}
