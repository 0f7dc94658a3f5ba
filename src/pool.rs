//! Implementation of the worker pool itself.

use std::{
    fmt,
    io,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crate::{
    service::{Service, Work},
    thread::{default_threads, set_priority, Priority},
};

/// A builder for constructing a customized [`ThreadPool`].
///
/// # Examples
///
/// ```
/// let custom_pool = runpool::ThreadPool::builder()
///     .name("my-pool")
///     .threads(2)
///     .build()
///     .unwrap();
/// # custom_pool.stop();
/// # custom_pool.join();
/// ```
#[derive(Debug)]
pub struct Builder {
    threads: Option<usize>,
    priority: Priority,
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            threads: None,
            priority: Priority::default(),
            name: None,
            stack_size: None,
        }
    }
}

impl Builder {
    /// Set the number of worker threads to spawn at construction.
    ///
    /// Zero is allowed: the pool starts with no servicers and the run loop is
    /// not serviced until [`ThreadPool::spawn`] is called. If not set, one
    /// thread per available CPU core is spawned.
    pub fn threads(mut self, count: usize) -> Self {
        self.threads = Some(count);
        self
    }

    /// Set the OS scheduling priority for the threads spawned at
    /// construction.
    ///
    /// Threads added later via [`ThreadPool::spawn`] carry their own priority
    /// argument.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set a custom thread name for threads spawned by this pool.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("thread pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set the size of the stack (in bytes) for threads in this pool.
    ///
    /// The actual stack size may be greater if the platform enforces a larger
    /// minimum.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Create a pool according to the configuration set with this builder.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create one of the worker
    /// threads. Threads spawned before the failure are dropped along with the
    /// pool; no retry is attempted.
    pub fn build(self) -> io::Result<ThreadPool> {
        let pool = ThreadPool {
            service: Arc::new(Service::new()),
            work: Mutex::new(KeepAlive::Unclaimed),
            threads: Mutex::new(Vec::new()),
            thread_name: self.name,
            stack_size: self.stack_size,
        };

        pool.spawn(self.threads.unwrap_or_else(default_threads), self.priority)?;

        Ok(pool)
    }
}

/// The pool's single keep-alive token.
///
/// Claimed from the service at most once, by the first spawn; once released
/// by [`ThreadPool::shutdown`] it is never re-created.
enum KeepAlive {
    Unclaimed,
    Held(Work),
    Released,
}

/// A fixed group of worker threads driving a shared [`Service`] run loop.
///
/// Every worker's entire body is "run the shared loop until it returns". The
/// pool holds a keep-alive token that keeps idle workers parked inside
/// [`Service::run`] instead of returning when the queue is empty; the token
/// is claimed when the first worker is spawned and released by
/// [`shutdown`](ThreadPool::shutdown).
///
/// Work enters the system solely through the [`service`](ThreadPool::service)
/// accessor; the pool never constructs or inspects work items, and imposes no
/// ordering across them.
///
/// # Shutdown
///
/// Two independent levers end a pool's life:
///
/// - [`stop`](ThreadPool::stop) halts dispatch immediately, abandoning queued
///   work.
/// - [`shutdown`](ThreadPool::shutdown) releases the keep-alive token, so
///   workers exit on their own once the queue has drained.
///
/// Either way, call [`join`](ThreadPool::join) afterwards to block until all
/// workers have terminated. Dropping the pool performs `shutdown` only: the
/// workers detach and drain the remaining queue, which is safe (they share
/// ownership of the service) but unobserved. Join explicitly if completion
/// must be guaranteed.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     atomic::{AtomicUsize, Ordering},
///     Arc,
/// };
///
/// use runpool::{Priority, ThreadPool};
///
/// let pool = ThreadPool::new(2, Priority::Normal).unwrap();
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..8 {
///     let counter = counter.clone();
///     pool.service().post(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     });
/// }
///
/// // Let the loop close once the queue drains, then wait for the workers.
/// pool.shutdown();
/// pool.join();
///
/// assert_eq!(counter.load(Ordering::SeqCst), 8);
/// ```
pub struct ThreadPool {
    service: Arc<Service>,
    work: Mutex<KeepAlive>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    thread_name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadPool {
    /// Create a pool with `threads` workers, each at the given priority.
    ///
    /// `threads == 0` is allowed; the loop has no servicers until
    /// [`spawn`](ThreadPool::spawn) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create a worker thread.
    pub fn new(threads: usize, priority: Priority) -> io::Result<Self> {
        Self::builder().threads(threads).priority(priority).build()
    }

    /// Get a builder for creating a customized pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Add `count` worker threads to the pool, each at the given priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create a thread. Threads spawned
    /// before the failure remain in the pool; no retry is attempted.
    pub fn spawn(&self, count: usize, priority: Priority) -> io::Result<()> {
        for _ in 0..count {
            self.spawn_once(priority)?;
        }

        Ok(())
    }

    /// Add exactly one worker thread to the pool.
    ///
    /// The keep-alive token is claimed before the thread starts, so a new
    /// worker cannot observe an empty queue and return immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn_once(&self, priority: Priority) -> io::Result<()> {
        {
            let mut work = self.work.lock().unwrap();

            // Claimed at most once per pool lifetime. After shutdown the
            // token stays released and new workers drain-and-exit.
            if let KeepAlive::Unclaimed = *work {
                *work = KeepAlive::Held(self.service.work());
            }
        }

        let mut builder = thread::Builder::new();

        if let Some(name) = self.thread_name.as_ref() {
            builder = builder.name(name.clone());
        }

        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let service = self.service.clone();

        let handle = builder.spawn(move || {
            set_priority(priority);
            service.run();
        })?;

        self.threads.lock().unwrap().push(handle);

        Ok(())
    }

    /// Request the run loop to cease dispatching, abandoning queued work and
    /// making every worker's `run` call return as soon as possible.
    ///
    /// Idempotent. Safe to call from any thread, including a worker thread.
    /// Does not release the keep-alive token; with the loop stopped the token
    /// is moot, but [`shutdown`](ThreadPool::shutdown) remains the explicit
    /// release.
    pub fn stop(&self) {
        self.service.stop();
    }

    /// Release the keep-alive token, allowing workers to exit on their own
    /// once the queue has drained.
    ///
    /// Idempotent; releasing an already absent token is a no-op. Does not
    /// stop the loop: queued work is still dispatched before the workers
    /// return. Invoked automatically when the pool is dropped.
    pub fn shutdown(&self) {
        *self.work.lock().unwrap() = KeepAlive::Released;
    }

    /// Block the calling thread until every worker thread has terminated.
    ///
    /// Returns immediately if there are no unjoined workers. Workers spawned
    /// after this call returns need a new `join`.
    ///
    /// Calling this from one of the pool's own worker threads deadlocks; it
    /// is the caller's responsibility not to.
    pub fn join(&self) {
        // Handles are consumed as they are drained, so no thread can ever be
        // joined twice.
        for handle in self.threads.lock().unwrap().drain(..) {
            // A panicking task unwinds its worker; that is the task's
            // failure, not the joiner's.
            let _ = handle.join();
        }
    }

    /// Get the shared run loop, for posting work into the pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use runpool::{Priority, ThreadPool};
    ///
    /// let pool = ThreadPool::new(1, Priority::Normal).unwrap();
    /// pool.service().post(|| {
    ///     // runs on a worker thread
    /// });
    /// # pool.shutdown();
    /// # pool.join();
    /// ```
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Get the number of worker threads currently registered in the pool,
    /// joined ones excluded.
    pub fn threads(&self) -> usize {
        self.threads.lock().unwrap().len()
    }
}

impl Drop for ThreadPool {
    /// Releases the keep-alive token, nothing more. Unjoined threads detach
    /// and keep draining the queue they share with the service.
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads())
            .field("pending", &self.service.pending())
            .finish()
    }
}
