//! Fan-in: one promise out of many.
//!
//! The combined promise completes when every child produced a value, and
//! fails fast on the first exception or cancellation, releasing the other
//! children. Only one terminal transition ever reaches the combined promise.
//!
//! ```
//! use promise_out::{combine3, Outcome, Promise};
//!
//! let sum = combine3(
//!     || Promise::completed(1),
//!     || Promise::completed(2u8),
//!     || Promise::completed(3u64),
//!     |a: i32, b: u8, c: u64| Outcome::Value(a as u64 + b as u64 + c),
//! );
//! assert!(matches!(sum.result(), Outcome::Value(6)));
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Error, Outcome, Promise, Subscription, Wait};

type Slot = Box<dyn Any + Send>;

/// The values collected from every child, in child order.
#[derive(Debug)]
pub struct Values {
    slots: Vec<Option<Slot>>,
}

impl Values {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Takes the value of child `index`.
    pub fn take<T: 'static>(&mut self, index: usize) -> Result<T, Error> {
        let slot = self
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| Error::IllegalState(format!("no value for Promise#{index}")))?;
        slot.downcast::<T>()
            .map(|value| *value)
            .map_err(|_| Error::IllegalState(format!("unexpected value type for Promise#{index}")))
    }
}

/// What a child reported, with its value type erased.
enum Report {
    Value(Slot),
    Exception(Error),
    Cancelled {
        message: Option<String>,
        cause: Option<Error>,
    },
    NotReady,
}

type Merge<D> = Box<dyn FnOnce(Values) -> Outcome<D> + Send + 'static>;
type Child = Box<dyn FnOnce(Sink) -> Subscription + Send + 'static>;

/// Collects the children of one fan-in.
///
/// ```
/// use promise_out::{Combiner, Outcome, Promise};
///
/// let combined = Combiner::new()
///     .child(|| Promise::completed("a".to_string()))
///     .child(|| Promise::completed(2usize))
///     .merge(|mut values| {
///         let name: String = values.take(0)?;
///         let times: usize = values.take(1)?;
///         Ok(name.repeat(times))
///     });
/// assert_eq!(combined.result().value().map(String::as_str), Some("aa"));
/// ```
#[derive(Default)]
pub struct Combiner {
    children: Vec<Child>,
}

impl std::fmt::Debug for Combiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Combiner")
            .field("children", &self.children.len())
            .finish()
    }
}

impl Combiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child. `thunk` is not called until the fan-in starts.
    pub fn child<T, F>(mut self, thunk: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.children.push(Box::new(move |sink: Sink| {
            thunk().subscribe(Wait::forever(), move |outcome| {
                let report = match outcome {
                    Outcome::Value(value) => Report::Value(Box::new(value)),
                    Outcome::Exception(error) => Report::Exception(error),
                    Outcome::Cancelled { message, cause } => Report::Cancelled { message, cause },
                    Outcome::NotReady => Report::NotReady,
                };
                sink.report(report);
            })
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Starts every child and merges their values.
    pub fn merge<D, F>(self, merge: F) -> Promise<D>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce(Values) -> Result<D, Error> + Send + 'static,
    {
        self.merge_outcome(move |values| merge(values).into())
    }

    pub fn merge_outcome<D, F>(self, merge: F) -> Promise<D>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce(Values) -> Outcome<D> + Send + 'static,
    {
        let merge: Merge<D> = Box::new(merge);
        let parent = Promise::new();
        parent.start();
        let total = self.children.len();
        let state = Arc::new(State {
            parent: parent.clone(),
            total,
            slots: Mutex::new((0..total).map(|_| None).collect()),
            remaining: AtomicUsize::new(total),
            done: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::with_capacity(total)),
            merge: Mutex::new(Some(merge)),
        });

        // Children left behind when the parent is aborted from outside.
        let watcher = Arc::clone(&state);
        parent.eavesdrop(Wait::forever(), move |outcome| {
            if outcome.is_cancelled() && watcher.claim() {
                tracing::debug!("combined promise aborted, releasing children");
                watcher.release();
            }
        });

        if total == 0 {
            state.finish();
            return parent;
        }

        for (index, child) in self.children.into_iter().enumerate() {
            if state.done.load(Ordering::Acquire) {
                break;
            }
            let collect: Arc<dyn Collect> = Arc::clone(&state) as Arc<dyn Collect>;
            let sink = Sink {
                state: collect,
                index,
            };
            let subscription = child(sink);
            state.track(subscription);
        }
        parent
    }
}

struct State<D> {
    parent: Promise<D>,
    total: usize,
    slots: Mutex<Vec<Option<Slot>>>,
    remaining: AtomicUsize,
    done: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    merge: Mutex<Option<Merge<D>>>,
}

impl<D: Clone + Send + Sync + 'static> State<D> {
    fn claim(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn track(&self, subscription: Subscription) {
        if subscription.is_noop() {
            return;
        }
        let mut subscriptions = self.subscriptions.lock();
        if self.done.load(Ordering::Acquire) {
            drop(subscriptions);
            subscription.unsubscribe();
        } else {
            subscriptions.push(subscription);
        }
    }

    fn release(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    fn finish(&self) {
        if !self.claim() {
            return;
        }
        let slots = std::mem::take(&mut *self.slots.lock());
        let Some(merge) = self.merge.lock().take() else {
            return;
        };
        let outcome = match catch_unwind(AssertUnwindSafe(|| merge(Values { slots }))) {
            Ok(outcome) => outcome,
            Err(payload) => Outcome::Exception(Error::from_panic(payload)),
        };
        self.parent.resolve(outcome);
        self.subscriptions.lock().clear();
    }

    fn fail_fast(&self, index: usize, outcome: Outcome<D>) {
        if !self.claim() {
            return;
        }
        tracing::debug!(index, total = self.total, "combined child failed, releasing the rest");
        self.release();
        self.parent.resolve(outcome);
    }
}

/// Where a child delivers its report.
struct Sink {
    state: Arc<dyn Collect>,
    index: usize,
}

trait Collect: Send + Sync {
    fn collect(&self, index: usize, report: Report);
}

impl<D: Clone + Send + Sync + 'static> Collect for State<D> {
    fn collect(&self, index: usize, report: Report) {
        match report {
            Report::Value(value) => {
                if self.done.load(Ordering::Acquire) {
                    return;
                }
                {
                    let mut slots = self.slots.lock();
                    match slots.get_mut(index) {
                        Some(slot) if slot.is_none() => *slot = Some(value),
                        _ => return,
                    }
                }
                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.finish();
                }
            }
            Report::Exception(error) => self.fail_fast(
                index,
                Outcome::Exception(Error::Combine {
                    index,
                    total: self.total,
                    source: Box::new(error),
                }),
            ),
            Report::Cancelled { message, cause } => {
                tracing::debug!(index, ?message, "combined child was cancelled");
                self.fail_fast(
                    index,
                    Outcome::Cancelled {
                        message: Some(format!("Promise#{index}")),
                        cause,
                    },
                )
            }
            Report::NotReady => self.fail_fast(
                index,
                Outcome::cancelled_with(
                    format!("Promise#{index}"),
                    Error::IllegalState(format!(
                        "Promise#{index} notified its listener before it was ready"
                    )),
                ),
            ),
        }
    }
}

impl Sink {
    fn report(self, report: Report) {
        self.state.collect(self.index, report);
    }
}

/// Combines any number of children of the same type.
pub fn combine_all<T, D, F, M>(children: Vec<F>, merge: M) -> Promise<D>
where
    T: Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    F: FnOnce() -> Promise<T> + Send + 'static,
    M: FnOnce(Vec<T>) -> Outcome<D> + Send + 'static,
{
    let total = children.len();
    children
        .into_iter()
        .fold(Combiner::new(), |combiner, child| combiner.child(child))
        .merge_outcome(move |mut values| {
            let taken: Result<Vec<T>, Error> = (0..total).map(|i| values.take::<T>(i)).collect();
            match taken {
                Ok(all) => merge(all),
                Err(error) => Outcome::Exception(error),
            }
        })
}

pub fn combine2<A, B, D, FA, FB, M>(a: FA, b: FB, merge: M) -> Promise<D>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    FA: FnOnce() -> Promise<A> + Send + 'static,
    FB: FnOnce() -> Promise<B> + Send + 'static,
    M: FnOnce(A, B) -> Outcome<D> + Send + 'static,
{
    Combiner::new()
        .child(a)
        .child(b)
        .merge_outcome(move |mut values| match take2::<A, B>(&mut values) {
            Ok((a, b)) => merge(a, b),
            Err(error) => Outcome::Exception(error),
        })
}

pub fn combine3<A, B, C, D, FA, FB, FC, M>(a: FA, b: FB, c: FC, merge: M) -> Promise<D>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    FA: FnOnce() -> Promise<A> + Send + 'static,
    FB: FnOnce() -> Promise<B> + Send + 'static,
    FC: FnOnce() -> Promise<C> + Send + 'static,
    M: FnOnce(A, B, C) -> Outcome<D> + Send + 'static,
{
    Combiner::new()
        .child(a)
        .child(b)
        .child(c)
        .merge_outcome(move |mut values| match take3::<A, B, C>(&mut values) {
            Ok((a, b, c)) => merge(a, b, c),
            Err(error) => Outcome::Exception(error),
        })
}

#[allow(clippy::too_many_arguments)]
pub fn combine4<A, B, C, E, D, FA, FB, FC, FE, M>(
    a: FA,
    b: FB,
    c: FC,
    e: FE,
    merge: M,
) -> Promise<D>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    D: Clone + Send + Sync + 'static,
    FA: FnOnce() -> Promise<A> + Send + 'static,
    FB: FnOnce() -> Promise<B> + Send + 'static,
    FC: FnOnce() -> Promise<C> + Send + 'static,
    FE: FnOnce() -> Promise<E> + Send + 'static,
    M: FnOnce(A, B, C, E) -> Outcome<D> + Send + 'static,
{
    Combiner::new()
        .child(a)
        .child(b)
        .child(c)
        .child(e)
        .merge_outcome(move |mut values| match take4::<A, B, C, E>(&mut values) {
            Ok((a, b, c, e)) => merge(a, b, c, e),
            Err(error) => Outcome::Exception(error),
        })
}

fn take2<A: 'static, B: 'static>(values: &mut Values) -> Result<(A, B), Error> {
    Ok((values.take(0)?, values.take(1)?))
}

fn take3<A: 'static, B: 'static, C: 'static>(values: &mut Values) -> Result<(A, B, C), Error> {
    Ok((values.take(0)?, values.take(1)?, values.take(2)?))
}

fn take4<A: 'static, B: 'static, C: 'static, E: 'static>(
    values: &mut Values,
) -> Result<(A, B, C, E), Error> {
    Ok((
        values.take(0)?,
        values.take(1)?,
        values.take(2)?,
        values.take(3)?,
    ))
}
