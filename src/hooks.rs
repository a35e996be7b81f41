use std::sync::{Arc, OnceLock};

use crate::config::EngineConfig;
use crate::timer::Timer;
use crate::Error;

/// Which registry a listener lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Subscriber,
    Eavesdropper,
}

/// Overridable handlers for failures that must not escape a promise.
///
/// The default methods log through `tracing` and otherwise discard the
/// failure.
pub trait PromiseHooks: Send + Sync + 'static {
    /// A listener panicked while being notified. Other listeners are still
    /// notified.
    fn on_consumer_panic(&self, kind: ListenerKind, message: &str) {
        match kind {
            ListenerKind::Eavesdropper => {
                tracing::warn!(panic = %message, "eavesdropper panicked while consuming a result")
            }
            ListenerKind::Subscriber => {
                tracing::warn!(panic = %message, "subscriber panicked while consuming a result")
            }
        }
    }

    /// The promise was about to store something that is not a final outcome.
    fn on_illegal_state(&self, error: &Error) {
        tracing::error!(error = %error, "promise reached an illegal state");
    }
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl PromiseHooks for LoggingHooks {}

/// Everything a promise needs from its surroundings, passed explicitly and
/// inherited by derived promises.
#[derive(Clone)]
pub struct PromiseContext {
    pub(crate) hooks: Arc<dyn PromiseHooks>,
    pub(crate) no_listener_message: Arc<str>,
    pub(crate) expiry_message: Arc<str>,
    pub(crate) timer: Arc<Timer>,
}

impl std::fmt::Debug for PromiseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseContext")
            .field("no_listener_message", &self.no_listener_message)
            .field("expiry_message", &self.expiry_message)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl Default for PromiseContext {
    fn default() -> Self {
        Self::new(&EngineConfig::default(), Arc::new(LoggingHooks))
    }
}

impl PromiseContext {
    /// A context on the process-wide timer.
    pub fn new(config: &EngineConfig, hooks: Arc<dyn PromiseHooks>) -> Self {
        Self {
            hooks,
            no_listener_message: config.no_listener_message.as_str().into(),
            expiry_message: config.expiry_message.as_str().into(),
            timer: Timer::global(),
        }
    }

    /// A context with its own timer thread, named after
    /// `config.timer_thread_name`.
    pub fn with_own_timer(
        config: &EngineConfig,
        hooks: Arc<dyn PromiseHooks>,
    ) -> std::io::Result<Self> {
        let timer = Arc::new(Timer::spawn(config)?);
        Ok(Self::new(config, hooks).with_timer(timer))
    }

    /// Replaces the timer that counts down bounded waits.
    pub fn with_timer(mut self, timer: Arc<Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_hooks(hooks: Arc<dyn PromiseHooks>) -> Self {
        Self::new(&EngineConfig::default(), hooks)
    }

    pub(crate) fn shared_default() -> Arc<PromiseContext> {
        static DEFAULT: OnceLock<Arc<PromiseContext>> = OnceLock::new();
        Arc::clone(DEFAULT.get_or_init(|| Arc::new(PromiseContext::default())))
    }

    pub fn hooks(&self) -> &dyn PromiseHooks {
        self.hooks.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Outcome, Promise, Wait};
    use parking_lot::Mutex;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        panics: Mutex<Vec<(ListenerKind, String)>>,
        illegal: Mutex<Vec<String>>,
    }

    impl PromiseHooks for Recorder {
        fn on_consumer_panic(&self, kind: ListenerKind, message: &str) {
            self.panics.lock().push((kind, message.to_owned()));
        }

        fn on_illegal_state(&self, error: &Error) {
            self.illegal.lock().push(error.to_string());
        }
    }

    #[test]
    fn promise_reports_to_its_own_hooks() {
        let recorder = Arc::new(Recorder::default());
        let promise = Promise::<u8>::with_hooks(recorder.clone());
        promise.start();
        promise.subscribe(Wait::forever(), |_| panic!("consumer blew up"));
        promise.eavesdrop(Wait::forever(), |outcome| assert!(outcome.is_exception()));

        assert!(promise.resolve(Outcome::NotReady));
        assert!(!promise.resolve(Outcome::NotReady));

        let illegal = recorder.illegal.lock();
        assert_eq!(illegal.len(), 1);
        assert!(illegal[0].contains("unknown state"));
        let panics = recorder.panics.lock();
        assert_eq!(panics.len(), 1);
        assert_eq!(panics[0].0, ListenerKind::Subscriber);
        assert_eq!(panics[0].1, "consumer blew up");
    }

    #[test]
    fn bounded_waits_run_on_the_context_timer() {
        let config = EngineConfig {
            timer_thread_name: "context-timer".into(),
            ..EngineConfig::default()
        };
        let context = PromiseContext::with_own_timer(&config, Arc::new(LoggingHooks)).unwrap();
        let promise = Promise::<u8>::with_context(context);
        promise.start();
        let (tx, rx) = channel();
        promise.subscribe(
            Wait::for_duration(Duration::from_millis(10)).or_value(1),
            move |outcome| {
                tx.send((outcome, thread::current().name().map(str::to_owned)))
                    .unwrap()
            },
        );
        let (outcome, thread_name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, Outcome::Value(1)));
        assert_eq!(thread_name.as_deref(), Some("context-timer"));
    }

    #[traced_test]
    #[test]
    fn logging_hooks_log_panics() {
        LoggingHooks.on_consumer_panic(ListenerKind::Subscriber, "bad consumer");
        assert!(logs_contain("subscriber panicked"));
        assert!(logs_contain("bad consumer"));
    }

    #[traced_test]
    #[test]
    fn logging_hooks_log_illegal_state() {
        LoggingHooks.on_illegal_state(&Error::IllegalState("unknown".into()));
        assert!(logs_contain("illegal state"));
    }

    #[test]
    fn context_takes_messages_from_config() {
        let config = EngineConfig {
            no_listener_message: "nobody home".into(),
            ..EngineConfig::default()
        };
        let context = PromiseContext::new(&config, Arc::new(LoggingHooks));
        assert_eq!(&*context.no_listener_message, "nobody home");
        assert_eq!(&*context.expiry_message, "Wait expired.");
    }
}
