use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tracks every live [`QueryIterator`](super::QueryIterator).
///
/// Executors register each iterator they create. Closing an iterator
/// releases its entry; dropping one that is still open moves the entry to
/// the leaked list. Tests call [`check`](IteratorRegistry::check) or
/// [`assert_all_released`](IteratorRegistry::assert_all_released) on
/// teardown.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct IteratorRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    open: BTreeMap<u64, Option<Backtrace>>,
    leaked: Vec<LeakReport>,
}

/// An iterator that was dropped without being closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
    pub id: u64,
    /// Where the iterator was created, if backtraces were captured.
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} iterator(s) still open, {} dropped without close", .open.len(), .leaked.len())]
pub struct LeakError {
    pub open: Vec<u64>,
    pub leaked: Vec<LeakReport>,
}

impl IteratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered iterators that are neither closed nor leaked.
    pub fn open_count(&self) -> usize {
        self.lock().open.len()
    }

    pub fn leaked(&self) -> Vec<LeakReport> {
        self.lock().leaked.clone()
    }

    /// Fails if any iterator is still open or was leaked.
    pub fn check(&self) -> Result<(), LeakError> {
        let state = self.lock();
        if state.open.is_empty() && state.leaked.is_empty() {
            return Ok(());
        }
        Err(LeakError {
            open: state.open.keys().copied().collect(),
            leaked: state.leaked.clone(),
        })
    }

    /// # Panics
    ///
    /// Panics with the creation backtraces of the offending iterators if
    /// [`check`](IteratorRegistry::check) fails.
    pub fn assert_all_released(&self) {
        if let Err(err) = self.check() {
            let mut msg = err.to_string();
            for report in &err.leaked {
                msg.push_str(&format!("\niterator {} leaked", report.id));
                if let Some(created_at) = &report.created_at {
                    msg.push_str(&format!(", created by\n{created_at}"));
                }
            }
            panic!("{msg}");
        }
    }

    pub(crate) fn register(&self, capture_backtrace: bool) -> Registration {
        let backtrace = capture_backtrace.then(Backtrace::force_capture);
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.open.insert(id, backtrace);
        Registration {
            id,
            registry: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for IteratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("IteratorRegistry")
            .field("open", &state.open.len())
            .field("leaked", &state.leaked.len())
            .finish()
    }
}

/// One iterator's entry in an [`IteratorRegistry`]. Consumed exactly once,
/// by either [`release`](Registration::release) or
/// [`leak`](Registration::leak).
#[derive(Debug)]
pub(crate) struct Registration {
    id: u64,
    registry: IteratorRegistry,
}

impl Registration {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn release(self) {
        self.registry.lock().open.remove(&self.id);
    }

    pub(crate) fn leak(self) -> LeakReport {
        let mut state = self.registry.lock();
        let created_at = state
            .open
            .remove(&self.id)
            .flatten()
            .map(|bt| bt.to_string());
        match &created_at {
            Some(bt) => tracing::error!(id = self.id, "query iterator dropped without close, created by\n{bt}"),
            None => tracing::error!(id = self.id, "query iterator dropped without close"),
        }
        let report = LeakReport {
            id: self.id,
            created_at,
        };
        state.leaked.push(report.clone());
        report
    }
}
