//! promiseOut for rust: single-assignment promises.
//!
//! A [`Promise`] holds a value that becomes available later. Consumers
//! [`subscribe`](Promise::subscribe) with a callback and a [`Wait`] policy;
//! producers go through the [`DeferAction`] → [`PendingAction`] →
//! [`CompletedAction`] chain, which makes resolving twice impossible to
//! write. Independent promises are merged with a [`Combiner`].
//!
//! Resolution is one compare-and-swap, so racing producers never fail:
//! all but one simply get `false` back. Notification happens on the
//! resolving thread, eavesdroppers first. A pending promise whose last
//! subscriber leaves is aborted.
//!
//! # Examples
//!
//! ```
//! use promise_out::{combine_all, DeferAction, NewThread, Outcome, Wait};
//! use std::sync::mpsc::channel;
//!
//! let parts: Vec<_> = (1..=3)
//!     .map(|n| DeferAction::from(move || Ok(n), NewThread))
//!     .collect();
//! let thunks = parts
//!     .iter()
//!     .cloned()
//!     .map(|action| move || action.start().promise().clone())
//!     .collect();
//! let sum = combine_all(thunks, |values: Vec<i32>| Outcome::Value(values.iter().sum::<i32>()));
//!
//! let (tx, rx) = channel();
//! sum.subscribe(Wait::forever(), move |outcome| tx.send(outcome).unwrap());
//! assert!(matches!(rx.recv().unwrap(), Outcome::Value(6)));
//! ```

pub mod action;
pub mod combine;
pub mod config;
pub mod error;
pub mod future;
pub mod hooks;
pub mod outcome;
pub mod promise;
pub mod runner;
pub mod subscription;
pub mod timer;
pub mod wait;

pub use action::{CompletedAction, DeferAction, PendingAction};
pub use combine::{combine2, combine3, combine4, combine_all, Combiner, Values};
pub use config::EngineConfig;
pub use error::{ConfigError, Error};
pub use future::PromiseFuture;
pub use hooks::{ListenerKind, LoggingHooks, PromiseContext, PromiseHooks};
pub use outcome::{Outcome, PromiseStatus};
pub use promise::Promise;
pub use runner::{ExecutorService, Inline, NewThread, Runner, Task, ThreadFactory};
#[cfg(feature = "tokio")]
pub use runner::TokioRunner;
pub use subscription::{Subscription, SubscriptionId};
pub use timer::{Timer, TimerHandle};
pub use wait::{Wait, WaitSession, WaitTrigger};
