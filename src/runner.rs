//! Execution strategies for deferred work.
//!
//! A [`Runner`] receives the task a [`DeferAction`](crate::DeferAction)
//! builds when it starts. The promise engine never decides where work runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::config::EngineConfig;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Runner: Send + Sync + 'static {
    fn run(&self, task: Task);
}

impl<F> Runner for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn run(&self, task: Task) {
        self(task)
    }
}

/// Runs the task on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Runner for Inline {
    fn run(&self, task: Task) {
        task()
    }
}

/// Spawns a dedicated, unnamed thread per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewThread;

impl Runner for NewThread {
    fn run(&self, task: Task) {
        spawn_or_inline(thread::Builder::new(), task);
    }
}

/// Spawns named threads, `<prefix>-<n>`.
#[derive(Debug)]
pub struct ThreadFactory {
    prefix: String,
    stack_size: Option<usize>,
    counter: AtomicUsize,
}

impl Default for ThreadFactory {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ThreadFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size: None,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            prefix: config.worker_thread_prefix.clone(),
            stack_size: config.worker_stack_size,
            counter: AtomicUsize::new(0),
        }
    }

    fn builder(&self) -> thread::Builder {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let builder = thread::Builder::new().name(format!("{}-{n}", self.prefix));
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

impl Runner for ThreadFactory {
    fn run(&self, task: Task) {
        spawn_or_inline(self.builder(), task);
    }
}

/// Submits tasks to a `futures` thread pool.
#[derive(Debug, Clone)]
pub struct ExecutorService {
    pool: futures::executor::ThreadPool,
}

impl ExecutorService {
    pub fn new(pool: futures::executor::ThreadPool) -> Self {
        Self { pool }
    }

    /// A pool with the default size whose threads are named after
    /// `config.worker_thread_prefix`.
    pub fn from_config(config: &EngineConfig) -> std::io::Result<Self> {
        let mut builder = futures::executor::ThreadPool::builder();
        builder.name_prefix(format!("{}-", config.worker_thread_prefix));
        if let Some(size) = config.worker_stack_size {
            builder.stack_size(size);
        }
        Ok(Self::new(builder.create()?))
    }
}

impl Runner for ExecutorService {
    fn run(&self, task: Task) {
        self.pool.spawn_ok(async move { task() });
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioRunner {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioRunner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl Runner for TokioRunner {
    fn run(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

fn spawn_or_inline(builder: thread::Builder, task: Task) {
    let slot = Arc::new(Mutex::new(Some(task)));
    let spawned = Arc::clone(&slot);
    let result = builder.spawn(move || {
        if let Some(task) = spawned.lock().take() {
            task();
        }
    });
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to spawn a thread, running task inline");
        let task = slot.lock().take();
        if let Some(task) = task {
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn thread_name_of(runner: &dyn Runner) -> Option<String> {
        let (tx, rx) = channel();
        runner.run(Box::new(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        }));
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn inline_runs_on_caller() {
        let caller = thread::current().id();
        let (tx, rx) = channel();
        Inline.run(Box::new(move || tx.send(thread::current().id()).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn new_thread_runs_elsewhere() {
        let caller = thread::current().id();
        let (tx, rx) = channel();
        NewThread.run(Box::new(move || tx.send(thread::current().id()).unwrap()));
        assert_ne!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), caller);
    }

    #[test]
    fn thread_factory_names_threads() {
        let factory = ThreadFactory::new("fetch");
        assert_eq!(thread_name_of(&factory).as_deref(), Some("fetch-0"));
        assert_eq!(thread_name_of(&factory).as_deref(), Some("fetch-1"));
    }

    #[test]
    fn executor_service_uses_the_pool() {
        let config = EngineConfig {
            worker_thread_prefix: "pool".into(),
            ..EngineConfig::default()
        };
        let service = ExecutorService::from_config(&config).unwrap();
        let name = thread_name_of(&service).unwrap_or_default();
        assert!(name.starts_with("pool-"), "unexpected thread name {name}");
    }

    #[test]
    fn closures_are_runners() {
        let runner = |task: Task| task();
        let (tx, rx) = channel();
        runner.run(Box::new(move || tx.send(1).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn tokio_runner_uses_blocking_pool() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        assert!(TokioRunner::current().is_none());
        let runner = TokioRunner::new(runtime.handle().clone());
        let (tx, rx) = channel();
        runner.run(Box::new(move || tx.send(2).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }
}
