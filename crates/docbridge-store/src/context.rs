use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why a [`Context`] stopped allowing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    Timedout,
}

/// Request-scoped cancellation and deadline, passed to every backend call
/// that may block.
///
/// Cloning is cheap and clones observe the same cancellation flag. Derived
/// contexts ([`with_cancel`](Context::with_cancel),
/// [`with_deadline`](Context::with_deadline)) are done when either they or
/// any ancestor is done.
#[derive(Debug, Clone, Default)]
pub struct Context {
    parent: Option<Arc<Context>>,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context that is never done.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context together with the handle that cancels it.
    pub fn with_cancel(&self) -> (Self, Canceller) {
        let child = self.child(self.deadline);
        let canceller = Canceller {
            cancelled: Arc::clone(&child.cancelled),
        };
        (child, canceller)
    }

    /// Derive a context that expires at `deadline`. A parent deadline that is
    /// sooner keeps precedence.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        self.child(Some(deadline))
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context is done, or `None` if work may proceed.
    pub fn done(&self) -> Option<Reason> {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(Reason::Timedout),
            _ if self.cancelled.load(Ordering::Acquire) => Some(Reason::Canceled),
            _ => self.parent.as_ref().and_then(|p| p.done()),
        }
    }

    pub fn err(&self) -> Result<(), Reason> {
        match self.done() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn child(&self, deadline: Option<Instant>) -> Self {
        Self {
            parent: Some(Arc::new(self.clone())),
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Cancels the context it was created with, and every context derived from it.
#[derive(Debug, Clone)]
pub struct Canceller {
    cancelled: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
