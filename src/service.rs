//! The shared run loop that worker threads drive.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Message type for the signal channels. No value is ever sent on them; they
/// signal by disconnecting, which crossbeam broadcasts to every blocked
/// receiver at once.
enum Never {}

/// A task dispatcher shared by any number of runner threads.
///
/// Closures submitted with [`post`](Service::post) are queued and executed,
/// one at a time per runner, by whichever threads are currently inside
/// [`run`](Service::run). The service imposes no ordering guarantees across
/// runners beyond the queue being consumed roughly front-to-back.
///
/// A `run` call returns when [`stop`](Service::stop) is invoked, or when the
/// queue is empty and no [`Work`] guard is live. Holding a `Work` guard is
/// what keeps idle runners parked instead of returning.
pub struct Service {
    tasks: (Sender<Task>, Receiver<Task>),
    /// Dropping this sender is the halt broadcast that unparks every runner.
    halt: Mutex<Option<Sender<Never>>>,
    halt_rx: Receiver<Never>,
    /// Receiver half of the current keep-alive channel. Runners snapshot it
    /// on entry to `run`; [`work`](Service::work) replaces it.
    work_rx: Mutex<Receiver<Never>>,
    stopped: AtomicBool,
}

impl Service {
    /// Create a new service with an empty queue and no keep-alive guard.
    pub fn new() -> Self {
        let (halt_tx, halt_rx) = bounded(0);

        Self {
            tasks: unbounded(),
            halt: Mutex::new(Some(halt_tx)),
            halt_rx,
            work_rx: Mutex::new(disconnected()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Queue a closure for execution by a runner thread.
    ///
    /// Never blocks. Posting after [`stop`](Service::stop) is allowed but the
    /// closure will not be dispatched.
    ///
    /// # Examples
    ///
    /// ```
    /// use runpool::Service;
    ///
    /// let service = Service::new();
    /// service.post(|| println!("hello from the queue"));
    /// assert_eq!(service.pending(), 1);
    ///
    /// // No keep-alive guard is held, so `run` drains the queue and returns.
    /// service.run();
    /// assert_eq!(service.pending(), 0);
    /// ```
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Cannot fail; the service owns both ends of the channel.
        self.tasks.0.send(Box::new(f)).unwrap();
    }

    /// Execute queued closures on the calling thread until told to return.
    ///
    /// Any number of threads may call this concurrently; they all service the
    /// same queue. The call returns once [`stop`](Service::stop) has been
    /// invoked, or once the queue is empty and no [`Work`] guard created
    /// before this call was still live when it started.
    ///
    /// A panicking closure unwinds out of `run` and takes the calling thread
    /// with it; the service itself and other runners are unaffected.
    pub fn run(&self) {
        let work = self.work_rx.lock().unwrap().clone();

        // Pinned phase: park for new tasks while the keep-alive guard is
        // live. Both signal arms fire on disconnect only.
        loop {
            if self.is_stopped() {
                return;
            }

            select! {
                recv(self.tasks.1) -> task => match task {
                    Ok(task) => task(),
                    Err(_) => return,
                },
                recv(self.halt_rx) -> _ => return,
                recv(work) -> _ => break,
            }
        }

        // Keep-alive released: drain whatever is queued, then return.
        while !self.is_stopped() {
            match self.tasks.1.try_recv() {
                Ok(task) => task(),
                Err(_) => return,
            }
        }
    }

    /// Request every in-flight and future [`run`](Service::run) call to
    /// return as soon as possible, abandoning any still-queued closures.
    ///
    /// Permanent and idempotent. Safe to call from any thread, including from
    /// inside a closure being dispatched.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);

        // Disconnect the halt channel to unpark parked runners. Subsequent
        // calls find the slot already empty.
        self.halt.lock().unwrap().take();
    }

    /// Whether [`stop`](Service::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Create a keep-alive guard pinning the run loop open.
    ///
    /// While the returned [`Work`] guard is live, `run` calls entered after
    /// this point park on an empty queue instead of returning. Runners
    /// already inside `run` keep observing the guard (if any) that was
    /// current when they entered.
    pub fn work(&self) -> Work {
        let (tx, rx) = bounded(0);
        *self.work_rx.lock().unwrap() = rx;

        Work { _pin: tx }
    }

    /// Get the number of queued closures not yet picked up by a runner.
    ///
    /// The number may be immediately outdated while runners are active.
    pub fn pending(&self) -> usize {
        self.tasks.0.len()
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A keep-alive guard for a [`Service`].
///
/// While a `Work` guard is live, [`Service::run`] does not return on an empty
/// queue. Dropping the guard releases the keep-alive, letting idle runners
/// drain the queue and exit. The release reaches every parked runner at once.
pub struct Work {
    _pin: Sender<Never>,
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Work(..)")
    }
}

/// A receiver whose sender is already gone, representing "no keep-alive".
fn disconnected() -> Receiver<Never> {
    let (_, rx) = bounded(0);
    rx
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn unpinned_run_drains_and_returns() {
        let service = Service::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            service.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // No guard held, so this must come back on its own.
        service.run();

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(service.pending(), 0);
    }

    #[test]
    fn work_guard_pins_a_runner() {
        let service = Arc::new(Service::new());
        let work = service.work();

        let runner = {
            let service = service.clone();
            thread::spawn(move || service.run())
        };

        // The runner should be parked on the empty queue, not finished.
        thread::sleep(Duration::from_millis(50));
        assert!(!runner.is_finished());

        // Releasing the guard lets it return.
        drop(work);
        runner.join().unwrap();
    }

    #[test]
    fn stop_overrides_keep_alive() {
        let service = Arc::new(Service::new());
        let _work = service.work();

        let runner = {
            let service = service.clone();
            thread::spawn(move || service.run())
        };

        thread::sleep(Duration::from_millis(20));
        service.stop();
        runner.join().unwrap();
    }

    #[test]
    fn stop_is_idempotent() {
        let service = Service::new();
        service.stop();
        service.stop();
        assert!(service.is_stopped());
    }

    #[test]
    fn run_after_stop_returns_immediately_with_queued_tasks() {
        let service = Service::new();

        service.post(|| panic!("must not be dispatched"));
        service.stop();
        service.run();

        assert_eq!(service.pending(), 1);
    }
}
