//! Fixed-size worker-thread pool with a priority queue and a process-wide registry (component C).
//!
//! The worker loop mirrors `session_mt`'s multi-threaded session: each worker blocks on a shared
//! condition variable until a task is queued or the pool is asked to stop, then runs the task
//! with no lock held. The queue itself, and the submit-callable/future pairing, follow
//! `ThreadPool`/`TaskHandle` from the transfer manager this crate generalizes.

use std::collections::VecDeque;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    active_workers: AtomicUsize,
}

/// A fixed pool of worker threads draining a shared task queue.
///
/// Tasks submitted with [`WorkerPool::submit`] join the back of the queue (FIFO); tasks submitted
/// with [`WorkerPool::submit_prioritized`] jump to the front. Calling [`WorkerPool::stop_and_join`]
/// drops any tasks still queued and waits for in-flight tasks to finish.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stop_requested: AtomicBool,
}

impl WorkerPool {
    /// Spawn `worker_count` worker threads, each draining the same shared queue.
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            active_workers: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = shared.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("objectfs-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread"),
            );
        }

        Self {
            shared,
            workers: Mutex::new(workers),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Number of worker threads currently running a task.
    pub fn active_count(&self) -> usize {
        self.shared.active_workers.load(Ordering::Acquire)
    }

    /// Enqueue a task at the back of the queue.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(task), false);
    }

    /// Enqueue a task at the front of the queue, to run before anything already waiting.
    pub fn submit_prioritized<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(task), true);
    }

    /// Submit a task and return a handle whose [`TaskHandle::join`] blocks for its result.
    pub fn submit_callable<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let handle = TaskHandle::new();
        let handle_inner = handle.clone();
        self.submit(move || {
            let result = task();
            handle_inner.set(result);
        });
        handle
    }

    /// Like [`WorkerPool::submit_callable`], but jumps the queue the way
    /// [`WorkerPool::submit_prioritized`] does.
    pub fn submit_callable_prioritized<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let handle = TaskHandle::new();
        let handle_inner = handle.clone();
        self.submit_prioritized(move || {
            let result = task();
            handle_inner.set(result);
        });
        handle
    }

    /// Submit `task`, then invoke `continuation` with its result on the same worker slot, with no
    /// intervening suspension point.
    pub fn submit_async<F, C, R>(&self, task: F, continuation: C)
    where
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
        R: Send + 'static,
    {
        self.submit(move || {
            let result = task();
            continuation(result);
        });
    }

    fn enqueue(&self, task: Task, prioritized: bool) {
        let mut queue = self.shared.queue.lock();
        if queue.stopped {
            warn!("task submitted after worker pool stop requested, dropping");
            return;
        }
        if prioritized {
            queue.tasks.push_front(task);
        } else {
            queue.tasks.push_back(task);
        }
        self.shared.not_empty.notify_one();
    }

    /// Stop accepting new tasks, drop anything still queued, and join every worker thread. Tasks
    /// already running are allowed to finish.
    pub fn stop_and_join(&self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            let dropped = queue.tasks.len();
            queue.tasks.clear();
            queue.stopped = true;
            if dropped > 0 {
                debug!("worker pool stop dropped {dropped} unexecuted tasks");
            }
        }
        self.shared.not_empty.notify_all();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if queue.stopped {
                    break None;
                }
                shared.not_empty.wait(&mut queue);
            }
        };
        let Some(task) = task else {
            return;
        };
        shared.active_workers.fetch_add(1, Ordering::AcqRel);
        task();
        shared.active_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

struct TaskHandleInner<R> {
    result: Mutex<Option<R>>,
    ready: Condvar,
}

/// A handle to the eventual result of a task submitted with [`WorkerPool::submit_callable`].
pub struct TaskHandle<R> {
    inner: Arc<TaskHandleInner<R>>,
}

impl<R> Clone for TaskHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> TaskHandle<R> {
    fn new() -> Self {
        Self {
            inner: Arc::new(TaskHandleInner {
                result: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    fn set(&self, value: R) {
        *self.inner.result.lock() = Some(value);
        self.inner.ready.notify_all();
    }

    /// Block until the task completes and return its result.
    pub fn join(&self) -> R {
        let mut result = self.inner.result.lock();
        loop {
            if let Some(value) = result.take() {
                return value;
            }
            self.inner.ready.wait(&mut result);
        }
    }

    /// Return the result without blocking, if the task has already completed.
    pub fn try_join(&self) -> Option<R> {
        self.inner.result.lock().take()
    }
}

/// Process-wide registry of named, lazily-initialized worker pools.
///
/// Mirrors the deferred-initialization role `ThreadPoolInitializer` plays for the transfer
/// manager's shared pool: the first caller for a given name pays for the thread spawn, every
/// later caller gets the same pool back.
pub struct WorkerPoolRegistry;

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<WorkerPool>>>> = OnceLock::new();

impl WorkerPoolRegistry {
    /// Get or lazily create the named pool with `worker_count` threads.
    ///
    /// If the pool already exists, `worker_count` is ignored and the existing pool is returned.
    pub fn shared(name: &str, worker_count: usize) -> Arc<WorkerPool> {
        let map = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = map.lock();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(WorkerPool::new(worker_count)))
            .clone()
    }

    /// Remove a named pool from the registry, stopping and joining it if present.
    pub fn remove(name: &str) {
        let map = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        if let Some(pool) = map.lock().remove(name) {
            pool.stop_and_join();
        }
    }
}
