//! Session lifecycle and the bounded worker pool.
//!
//! A [`Session`] moves from not started to started to closed. While
//! started it owns a fixed set of named worker threads fed through a bounded
//! channel: once `backlog` units are queued, [`Session::submit`] blocks the
//! caller until a worker picks one up. Each worker lazily builds its own
//! context on first use and keeps it until the session closes.
//!
//! The first failing unit of work clears the session-wide run flag. Work
//! already queued then completes with [`SessionError::Aborted`] instead of
//! running, and later submissions are refused the same way. Work that was
//! already running finishes normally.

mod handle;
mod latch;

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::error::{SessionError, TransferError};
use crate::options::PoolSettings;

pub use handle::TransferHandle;
use latch::InFlight;

/// State owned by one worker thread for the lifetime of a session.
pub trait WorkerContext: Send + 'static {
    /// Release everything the context holds.
    ///
    /// # Errors
    /// Returns the failure to release a resource; the session aggregates
    /// these into [`SessionError::Close`].
    fn close(self) -> Result<(), TransferError>;
}

/// Builds a worker context on first use.
pub type ContextFactory<C> = dyn Fn() -> Result<C, TransferError> + Send + Sync;

type Job<C> = Box<dyn FnOnce(&mut Worker<C>) + Send>;

/// Lifecycle position of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet accepting work.
    NotStarted,
    /// Accepting work.
    Started,
    /// Closed for good.
    Closed,
}

enum State<C> {
    NotStarted,
    Started(Running<C>),
    Closed,
}

struct Running<C> {
    sender: SyncSender<Job<C>>,
    workers: Vec<JoinHandle<Option<C>>>,
}

struct Worker<C> {
    context: Option<C>,
    factory: Arc<ContextFactory<C>>,
}

impl<C> Worker<C> {
    fn context(&mut self) -> Result<&mut C, TransferError> {
        if self.context.is_none() {
            let created = (self.factory)()?;
            self.context = Some(created);
        }
        self.context
            .as_mut()
            .ok_or_else(|| SessionError::WorkerLost.into())
    }
}

/// Fixed-size worker pool with fail-fast admission.
///
/// # Examples
/// ```
/// use citydb_transfer::{PoolSettings, Session, TransferError, WorkerContext};
///
/// #[derive(Default)]
/// struct Counter(u32);
///
/// impl WorkerContext for Counter {
///     fn close(self) -> Result<(), TransferError> {
///         Ok(())
///     }
/// }
///
/// let session = Session::new();
/// session
///     .start(PoolSettings::for_threads(Some(2)), "counter", || Ok(Counter::default()))
///     .expect("session starts");
/// let handle = session.submit(|counter: &mut Counter| {
///     counter.0 += 1;
///     Ok(counter.0)
/// });
/// assert_eq!(handle.wait().expect("work succeeds"), 1);
/// session.close().expect("session closes");
/// assert!(session.was_successful());
/// ```
pub struct Session<C: WorkerContext> {
    state: Mutex<State<C>>,
    should_run: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

impl<C: WorkerContext> Default for Session<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: WorkerContext> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("should_run", &self.should_run.load(Ordering::Acquire))
            .field("in_flight", &self.in_flight.current())
            .finish()
    }
}

impl<C: WorkerContext> Session<C> {
    /// Session that has not been started.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::NotStarted),
            should_run: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Current lifecycle position.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match &*self.state.lock() {
            State::NotStarted => SessionState::NotStarted,
            State::Started(_) => SessionState::Started,
            State::Closed => SessionState::Closed,
        }
    }

    /// Spawn the worker pool and start accepting work.
    ///
    /// Worker threads are named `<name>-<index>`.
    ///
    /// # Errors
    /// Fails when the session is not in its initial state or a worker thread
    /// cannot be spawned.
    pub fn start<F>(
        &self,
        settings: PoolSettings,
        name: &str,
        factory: F,
    ) -> Result<(), SessionError>
    where
        F: Fn() -> Result<C, TransferError> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        match &*state {
            State::NotStarted => {}
            State::Started(_) => return Err(SessionError::AlreadyStarted),
            State::Closed => return Err(SessionError::Closed),
        }

        let threads = settings.threads.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job<C>>(settings.backlog);
        let receiver = Arc::new(Mutex::new(receiver));
        let factory: Arc<ContextFactory<C>> = Arc::new(factory);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let spawned = spawn_worker(
                format!("{name}-{index}"),
                Arc::clone(&receiver),
                Arc::clone(&factory),
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(source) => {
                    drop(sender);
                    join_all(workers);
                    return Err(SessionError::Spawn { source });
                }
            }
        }

        info!(
            "{name} session started with {threads} worker(s) and a backlog of {}",
            settings.backlog
        );
        *state = State::Started(Running { sender, workers });
        Ok(())
    }

    /// Queue `work` for the next free worker.
    ///
    /// Blocks while the backlog is full. Outside the started state, or once
    /// an earlier unit of work failed, the returned handle is already
    /// complete with the corresponding [`SessionError`].
    pub fn submit<T, F>(&self, work: F) -> TransferHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, TransferError> + Send + 'static,
    {
        let (sender, guard) = {
            let state = self.state.lock();
            let running = match &*state {
                State::Started(running) => running,
                State::NotStarted => return TransferHandle::failed(SessionError::NotStarted),
                State::Closed => return TransferHandle::failed(SessionError::Closed),
            };
            if !self.should_run.load(Ordering::Acquire) {
                return TransferHandle::failed(SessionError::Aborted);
            }
            (running.sender.clone(), self.in_flight.enter())
        };

        let (completion, handle) = TransferHandle::channel();
        let should_run = Arc::clone(&self.should_run);
        let job: Job<C> = Box::new(move |worker| {
            let outcome = run(worker, &should_run, work);
            if completion.send(outcome).is_err() {
                debug!("transfer handle dropped before the result arrived");
            }
            drop(guard);
        });
        if sender.send(job).is_err() {
            // The job, its completion sender and its guard were dropped, so
            // the handle reports a lost worker.
            debug!("worker pool shut down while submitting");
        }
        handle
    }

    /// Whether no unit of work has failed so far.
    #[must_use]
    pub fn was_successful(&self) -> bool {
        self.should_run.load(Ordering::Acquire)
    }

    /// Wait for in-flight work, close every worker context and join the
    /// pool.
    ///
    /// Closing a session that never started or is already closed does
    /// nothing.
    ///
    /// # Errors
    /// Returns [`SessionError::Close`] listing every context that failed to
    /// close or every worker that died; the pool is shut down regardless.
    pub fn close(&self) -> Result<(), SessionError> {
        let running = {
            let mut state = self.state.lock();
            if !matches!(&*state, State::Started(_)) {
                return Ok(());
            }
            match mem::replace(&mut *state, State::Closed) {
                State::Started(running) => running,
                State::NotStarted | State::Closed => return Ok(()),
            }
        };

        self.in_flight.wait_idle();
        let Running { sender, workers } = running;
        drop(sender);

        let mut failures = Vec::new();
        for outcome in join_all(workers) {
            match outcome {
                Ok(Some(context)) => {
                    if let Err(err) = context.close() {
                        failures.push(err);
                    }
                }
                Ok(None) => {}
                Err(err) => failures.push(err),
            }
        }
        info!(
            "session closed ({})",
            if self.was_successful() { "successful" } else { "failed" }
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Close(failures))
        }
    }
}

impl<C: WorkerContext> Drop for Session<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("closing session on drop failed: {err}");
        }
    }
}

fn spawn_worker<C: WorkerContext>(
    name: String,
    receiver: Arc<Mutex<Receiver<Job<C>>>>,
    factory: Arc<ContextFactory<C>>,
) -> std::io::Result<JoinHandle<Option<C>>> {
    thread::Builder::new().name(name).spawn(move || {
        let mut worker = Worker {
            context: None,
            factory,
        };
        loop {
            let job = {
                let queue = receiver.lock();
                queue.recv()
            };
            match job {
                Ok(job) => job(&mut worker),
                Err(_) => break,
            }
        }
        worker.context
    })
}

fn join_all<C>(workers: Vec<JoinHandle<Option<C>>>) -> Vec<Result<Option<C>, TransferError>> {
    workers
        .into_iter()
        .map(|worker| {
            worker
                .join()
                .map_err(|_| TransferError::Session(SessionError::WorkerLost))
        })
        .collect()
}

fn run<C, T, F>(worker: &mut Worker<C>, should_run: &AtomicBool, work: F) -> Result<T, TransferError>
where
    F: FnOnce(&mut C) -> Result<T, TransferError>,
{
    if !should_run.load(Ordering::Acquire) {
        return Err(SessionError::Aborted.into());
    }
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| worker.context().and_then(work))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            // A context that unwound mid-call is not reused.
            worker.context = None;
            Err(TransferError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        }
    };
    if let Err(err) = &outcome
        && should_run.swap(false, Ordering::AcqRel)
    {
        error!("unit of work failed, no further work will be scheduled: {err}");
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
