//! The producer side of a promise, split into three phases.
//!
//! [`DeferAction`] describes work that has not started, [`PendingAction`] is
//! the running work that may be resolved, and [`CompletedAction`] is the
//! resolved, read-only end. Each phase only exposes what is legal in it: you
//! cannot resolve a `DeferAction`, and resolving a `PendingAction` consumes
//! it.
//!
//! # Examples
//!
//! ```
//! use promise_out::{DeferAction, Inline, Outcome};
//!
//! let action = DeferAction::from(|| Ok(21), Inline).map(|v| v * 2);
//! let pending = action.start();
//! assert!(matches!(pending.promise().result(), Outcome::Value(42)));
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hooks::PromiseContext;
use crate::runner::Runner;
use crate::{Error, Outcome, Promise, PromiseStatus, Subscription, Wait};

type Launch<T> = Box<dyn FnOnce(Promise<T>) + Send + 'static>;
type OnStart = Box<dyn FnOnce() + Send + 'static>;

/// Work that has not started yet.
///
/// Cloning shares the underlying promise; whichever clone starts first runs
/// the work.
pub struct DeferAction<T> {
    promise: Promise<T>,
    launch: Arc<Mutex<Option<Launch<T>>>>,
    on_start: Arc<Mutex<Option<OnStart>>>,
}

impl<T> Clone for DeferAction<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            launch: Arc::clone(&self.launch),
            on_start: Arc::clone(&self.on_start),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for DeferAction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferAction")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> DeferAction<T> {
    /// Defers `supplier` until [`start`](Self::start), then hands it to
    /// `runner`. Errors and panics of `supplier` become exceptions.
    pub fn from<F, R>(supplier: F, runner: R) -> Self
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        R: Runner,
    {
        Self::from_outcome(move || supplier().into(), runner)
    }

    /// Like [`from`](Self::from), for suppliers that may cancel.
    pub fn from_outcome<F, R>(supplier: F, runner: R) -> Self
    where
        F: FnOnce() -> Outcome<T> + Send + 'static,
        R: Runner,
    {
        Self::from_shared_runner(supplier, Arc::new(runner))
    }

    pub fn from_shared_runner<F>(supplier: F, runner: Arc<dyn Runner>) -> Self
    where
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        Self::launching(
            PromiseContext::shared_default(),
            move |promise: Promise<T>| {
                runner.run(Box::new(move || {
                    if promise.is_done() {
                        tracing::debug!("promise resolved before its task ran, skipping");
                        return;
                    }
                    let outcome = match catch_unwind(AssertUnwindSafe(supplier)) {
                        Ok(outcome) => outcome,
                        Err(payload) => Outcome::Exception(Error::from_panic(payload)),
                    };
                    promise.resolve(outcome);
                }));
            },
        )
    }

    /// An action resolved by hand through its [`PendingAction`].
    pub fn manual() -> Self {
        Self::from_promise(Promise::new())
    }

    /// A manual action whose promise uses `context`.
    pub fn with_context(context: PromiseContext) -> Self {
        Self::from_promise(Promise::with_context(context))
    }

    fn from_promise(promise: Promise<T>) -> Self {
        Self {
            promise,
            launch: Arc::new(Mutex::new(None)),
            on_start: Arc::new(Mutex::new(None)),
        }
    }

    fn launching(
        context: Arc<PromiseContext>,
        launch: impl FnOnce(Promise<T>) + Send + 'static,
    ) -> Self {
        let launch: Launch<T> = Box::new(launch);
        Self {
            promise: Promise::with_shared_context(context),
            launch: Arc::new(Mutex::new(Some(launch))),
            on_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Gives the action's promise `context` for its hooks, messages and
    /// timer. Call it while building, before the action is cloned, derived
    /// from or started; a started action keeps its context.
    pub fn in_context(mut self, context: PromiseContext) -> Self {
        if self.promise.is_started() {
            tracing::warn!("deferred action already started, keeping its context");
            return self;
        }
        self.promise = Promise::with_context(context);
        self
    }

    /// Runs `f` on the first start, before the work is submitted.
    pub fn on_start(self, f: impl FnOnce() + Send + 'static) -> Self {
        *self.on_start.lock() = Some(Box::new(f));
        self
    }

    /// Starts the work on the first call; later calls only hand out another
    /// handle.
    pub fn start(&self) -> PendingAction<T> {
        if self.promise.start() {
            tracing::debug!("deferred action started");
            self.launch_once();
        }
        PendingAction {
            promise: self.promise.clone(),
        }
    }

    fn launch_once(&self) {
        let on_start = self.on_start.lock().take();
        if let Some(on_start) = on_start {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(on_start)) {
                self.promise.fail(Error::from_panic(payload));
                return;
            }
        }
        let launch = self.launch.lock().take();
        if let Some(launch) = launch {
            launch(self.promise.clone());
        }
    }

    pub fn promise(&self) -> &Promise<T> {
        &self.promise
    }

    pub fn status(&self) -> PromiseStatus {
        self.promise.status()
    }

    pub fn subscribe(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.promise.subscribe(wait, consumer)
    }

    pub fn eavesdrop(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.promise.eavesdrop(wait, consumer)
    }

    /// A deferred action that starts this one and maps its value.
    pub fn map<R, F>(&self, f: F) -> DeferAction<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    pub fn try_map<R, F>(&self, f: F) -> DeferAction<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<R, Error> + Send + 'static,
    {
        let source = self.clone();
        DeferAction::launching(Arc::clone(self.promise.context()), move |derived| {
            source.start().promise().map_into(&derived, f);
        })
    }

    pub fn flat_map<R, F>(&self, f: F) -> DeferAction<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let source = self.clone();
        DeferAction::launching(Arc::clone(self.promise.context()), move |derived| {
            source.start().promise().flat_map_into(&derived, f);
        })
    }

    pub fn filter<P>(&self, predicate: P) -> DeferAction<Option<T>>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.map(move |value| predicate(&value).then_some(value))
    }
}

/// Running work. Resolving consumes the handle.
pub struct PendingAction<T> {
    promise: Promise<T>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for PendingAction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAction")
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> PendingAction<T> {
    pub fn promise(&self) -> &Promise<T> {
        &self.promise
    }

    pub fn status(&self) -> PromiseStatus {
        self.promise.status()
    }

    pub fn resolve(self, outcome: Outcome<T>) -> CompletedAction<T> {
        let resolved_here = self.promise.resolve(outcome);
        CompletedAction {
            promise: self.promise,
            resolved_here,
        }
    }

    pub fn complete(self, value: T) -> CompletedAction<T> {
        self.resolve(Outcome::Value(value))
    }

    pub fn fail(self, error: Error) -> CompletedAction<T> {
        self.resolve(Outcome::Exception(error))
    }

    pub fn abort(self, message: impl Into<String>) -> CompletedAction<T> {
        self.resolve(Outcome::cancelled(message))
    }

    pub fn abort_with(self, message: impl Into<String>, cause: Error) -> CompletedAction<T> {
        self.resolve(Outcome::cancelled_with(message, cause))
    }

    pub fn subscribe(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.promise.subscribe(wait, consumer)
    }

    pub fn eavesdrop(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.promise.eavesdrop(wait, consumer)
    }

    pub fn map<R, F>(&self, f: F) -> DeferAction<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    pub fn try_map<R, F>(&self, f: F) -> DeferAction<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<R, Error> + Send + 'static,
    {
        let source = self.promise.clone();
        DeferAction::launching(Arc::clone(self.promise.context()), move |derived| {
            source.map_into(&derived, f);
        })
    }

    pub fn flat_map<R, F>(&self, f: F) -> DeferAction<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let source = self.promise.clone();
        DeferAction::launching(Arc::clone(self.promise.context()), move |derived| {
            source.flat_map_into(&derived, f);
        })
    }

    pub fn filter<P>(&self, predicate: P) -> DeferAction<Option<T>>
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.map(move |value| predicate(&value).then_some(value))
    }
}

/// Resolved work; read-only.
pub struct CompletedAction<T> {
    promise: Promise<T>,
    resolved_here: bool,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for CompletedAction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletedAction")
            .field("promise", &self.promise)
            .field("resolved_here", &self.resolved_here)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> CompletedAction<T> {
    pub fn promise(&self) -> &Promise<T> {
        &self.promise
    }

    /// False if another party resolved the promise first and this
    /// resolution was discarded.
    pub fn resolved_here(&self) -> bool {
        self.resolved_here
    }

    pub fn result(&self) -> Outcome<T> {
        self.promise.result()
    }

    pub fn status(&self) -> PromiseStatus {
        self.promise.status()
    }

    pub fn subscribe(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.promise.subscribe(wait, consumer)
    }

    pub fn eavesdrop(
        &self,
        wait: Wait<T>,
        consumer: impl FnOnce(Outcome<T>) + Send + 'static,
    ) -> Subscription {
        self.promise.eavesdrop(wait, consumer)
    }
}
