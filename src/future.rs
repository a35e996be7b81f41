//! A `Future` view of a promise.
//!
//! The engine is callback based; this adapter subscribes once and parks the
//! outcome in a oneshot channel that an async task can await.
//!
//! # Examples
//!
//! ```
//! use promise_out::{Outcome, Promise};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let promise = Promise::<String>::new();
//! promise.start();
//! let producer = promise.clone();
//! let task = thread::spawn(move || producer.complete("🍓".into()));
//! let outcome = block_on(promise.to_future());
//! task.join().expect("The producer thread has panicked");
//! assert_eq!(outcome.value().map(String::as_str), Some("🍓"));
//! ```

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::{Error, Outcome, Promise, Subscription, Wait};

/// Resolves with the promise's outcome.
///
/// Dropping it before completion unsubscribes, which aborts the promise if
/// this was its last subscriber.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<T> {
    receiver: oneshot::Receiver<Outcome<T>>,
    subscription: Subscription,
    finished: bool,
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    pub fn to_future(&self) -> PromiseFuture<T> {
        self.to_future_with(Wait::forever())
    }

    /// Like [`to_future`](Self::to_future), bounded by `wait`.
    pub fn to_future_with(&self, wait: Wait<T>) -> PromiseFuture<T> {
        let (sender, receiver) = oneshot::channel();
        let subscription = self.subscribe(wait, move |outcome| {
            // The receiver may already be gone; nobody is waiting then.
            let _ = sender.send(outcome);
        });
        PromiseFuture {
            receiver,
            subscription,
            finished: false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Promise<T> {
    type Output = Outcome<T>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.to_future()
    }
}

impl<T> Future for PromiseFuture<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => {
                self.finished = true;
                Poll::Ready(outcome)
            }
            Poll::Ready(Err(oneshot::Canceled)) => {
                self.finished = true;
                Poll::Ready(Outcome::Exception(Error::ProducerDropped))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for PromiseFuture<T> {
    /// An abandoned future stops listening.
    fn drop(&mut self) {
        if !self.finished {
            self.subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn awaits_a_value_from_another_thread() {
        let promise = Promise::<String>::new();
        promise.start();
        let producer = promise.clone();
        let task1 = thread::spawn(move || block_on(async move { promise.await }));
        let task2 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.complete(String::from("🍓"))
        });
        assert!(task2.join().expect("The task2 thread has panicked"));
        let outcome = task1.join().expect("The task1 thread has panicked");
        assert_eq!(outcome.value().map(String::as_str), Some("🍓"));
    }

    #[test]
    fn many_futures_share_one_promise() {
        let promise = Promise::<u32>::new();
        promise.start();
        let first = promise.to_future();
        let second = promise.to_future();
        promise.complete(9);
        assert!(matches!(block_on(first), Outcome::Value(9)));
        assert!(matches!(block_on(second), Outcome::Value(9)));
    }

    #[test]
    fn dropping_the_only_future_aborts() {
        let promise = Promise::<u32>::new();
        promise.start();
        drop(promise.to_future());
        assert!(promise.is_aborted());
    }

    #[test]
    fn bounded_future_yields_the_default() {
        let promise = Promise::<u32>::new();
        promise.start();
        let outcome = block_on(promise.to_future_with(
            Wait::for_duration(Duration::from_millis(10)).or_value(77),
        ));
        assert!(matches!(outcome, Outcome::Value(77)));
    }

    #[test]
    fn resolved_promise_is_ready_immediately() {
        let outcome = block_on(Promise::<u8>::failed(Error::msg("bad")).into_future());
        assert!(outcome.is_exception());
    }
}
