//! Bridge between a single-threaded caller and the worker pool.
//!
//! Work runs on the runtime's workers; completions travel back over a channel
//! and the matching continuation runs on the caller's thread when it pumps.
//! Each submission gets exactly one of `on_success` / `on_error`.
//!
//! Cancellation is cooperative: the work receives a token and decides when to
//! look at it. Work that never checks runs to completion.

use directory_core::error::{AppError, ErrorKind};
use futures::FutureExt;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// What `on_error` receives.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Failed(#[from] AppError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TaskError::Failed(e) => Some(e.kind()),
            TaskError::Panicked(_) => None,
        }
    }
}

type Payload = Box<dyn Any + Send>;
type Continuation = Box<dyn FnOnce(Payload)>;
type Notify = Arc<dyn Fn() + Send + Sync>;

struct Completion {
    id: u64,
    payload: Payload,
}

/// Returned by every submission.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Raise the cancellation signal inside the worker.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Owned by the caller's thread; not `Send`.
pub struct AsyncInvoker {
    runtime: Option<Runtime>,
    handle: Handle,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    pending: RefCell<HashMap<u64, Continuation>>,
    next_id: Cell<u64>,
    notify: Option<Notify>,
}

impl AsyncInvoker {
    /// Invoker with its own multi-threaded runtime.
    pub fn new(worker_threads: usize) -> Result<Self, AppError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("ioe-worker")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::build(Some(runtime), handle))
    }

    /// Invoker scheduling onto an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self::build(None, handle)
    }

    fn build(runtime: Option<Runtime>, handle: Handle) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            runtime,
            handle,
            sender,
            receiver,
            pending: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            notify: None,
        }
    }

    /// Called from the worker each time a completion is queued, so an event
    /// loop knows to pump.
    pub fn with_notify(mut self, notify: impl Fn() + Send + Sync + 'static) -> Self {
        self.notify = Some(Arc::new(notify));
        self
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Submissions whose continuation has not run yet.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    fn register<T: 'static>(
        &self,
        on_success: impl FnOnce(T) + 'static,
        on_error: impl FnOnce(TaskError) + 'static,
    ) -> (u64, CancellationToken) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let continuation: Continuation = Box::new(move |payload: Payload| {
            match payload.downcast::<Result<T, TaskError>>() {
                Ok(result) => match *result {
                    Ok(value) => on_success(value),
                    Err(e) => on_error(e),
                },
                Err(_) => on_error(TaskError::Panicked("result of unexpected type".to_string())),
            }
        });
        self.pending.borrow_mut().insert(id, continuation);
        (id, CancellationToken::new())
    }

    fn completer<T: Send + 'static>(&self, id: u64) -> impl FnOnce(Result<T, TaskError>) + Send {
        let sender = self.sender.clone();
        let notify = self.notify.clone();
        move |result| {
            if sender.send(Completion { id, payload: Box::new(result) }).is_err() {
                debug!(task = id, "Invoker dropped before completion");
                return;
            }
            if let Some(notify) = notify {
                notify();
            }
        }
    }

    /// Run blocking work on the pool.
    pub fn submit<T, W>(
        &self,
        work: W,
        on_success: impl FnOnce(T) + 'static,
        on_error: impl FnOnce(TaskError) + 'static,
    ) -> TaskHandle
    where
        T: Send + 'static,
        W: FnOnce(&CancellationToken) -> Result<T, AppError> + Send + 'static,
    {
        let (id, cancel) = self.register(on_success, on_error);
        let complete = self.completer::<T>(id);
        let token = cancel.clone();
        self.handle.spawn_blocking(move || {
            let result = match catch_unwind(AssertUnwindSafe(|| work(&token))) {
                Ok(result) => result.map_err(TaskError::from),
                Err(panic) => Err(panicked(id, panic)),
            };
            complete(result);
        });
        TaskHandle { id, cancel }
    }

    /// Run an async operation to completion on the runtime.
    pub fn submit_async<T, F, Fut>(
        &self,
        make: F,
        on_success: impl FnOnce(T) + 'static,
        on_error: impl FnOnce(TaskError) + 'static,
    ) -> TaskHandle
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let (id, cancel) = self.register(on_success, on_error);
        let complete = self.completer::<T>(id);
        let token = cancel.clone();
        self.handle.spawn(async move {
            let result = match AssertUnwindSafe(async move { make(token).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(TaskError::from),
                Err(panic) => Err(panicked(id, panic)),
            };
            complete(result);
        });
        TaskHandle { id, cancel }
    }

    /// Run every continuation that is ready now. Returns how many ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            ran += usize::from(self.dispatch(completion));
        }
        ran
    }

    /// Block up to `timeout` for one completion and run its continuation.
    pub fn wait_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => self.dispatch(completion),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Pump until nothing is pending or `timeout` passes without progress.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        while self.pending() > 0 {
            if !self.wait_next(timeout) {
                return false;
            }
        }
        true
    }

    fn dispatch(&self, completion: Completion) -> bool {
        // Released before the call so the continuation may submit again.
        let continuation = self.pending.borrow_mut().remove(&completion.id);
        match continuation {
            Some(continuation) => {
                continuation(completion.payload);
                true
            }
            None => {
                debug!(task = completion.id, "Completion without a pending continuation");
                false
            }
        }
    }
}

impl Drop for AsyncInvoker {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn panicked(id: u64, panic: Box<dyn Any + Send>) -> TaskError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    error!(task = id, panic = %message, "Worker panicked");
    TaskError::Panicked(message)
}
