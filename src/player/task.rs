use crate::core::Result;
use crossbeam::sync::WaitGroup;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Session-wide cancellation signal
///
/// `signal()` never yields a message; cancelling drops the only sender, so the receiver
/// turns ready (disconnected) and every `select!` waiting on it wakes up.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
    signal: Receiver<()>,
}

struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
            }),
            signal: rx,
        }
    }

    /// Idempotent
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Every task of one session: spawned as named threads sharing one cancel token,
/// joined together through a wait group.
///
/// Clones share the same group; a task that holds a clone may spawn further tasks
/// into it (the scheduler does this for the audio output pump).
#[derive(Clone)]
pub struct TaskGroup {
    wg: WaitGroup,
    cancel: CancelToken,
}

impl TaskGroup {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            wg: WaitGroup::new(),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn spawn<T, F>(&self, name: &str, f: F) -> Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let wg = self.wg.clone();
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _wg = wg;
                f(cancel)
            })?;
        Ok(handle)
    }

    /// Block until every task spawned into the group (and every other clone of it) is gone
    pub fn wait(self) {
        self.wg.wait();
    }
}

/// Asks the session controller for an asynchronous full stop
#[derive(Clone)]
pub struct StopTrigger {
    request: Arc<dyn Fn(&str) + Send + Sync>,
}

impl StopTrigger {
    pub fn new(request: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            request: Arc::new(request),
        }
    }

    pub fn fire(&self, reason: &str) {
        (self.request)(reason)
    }
}
