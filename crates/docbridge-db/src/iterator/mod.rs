mod registry;

use std::sync::{Mutex, MutexGuard, PoisonError};

use bson::Document;
use crossbeam::channel::Sender;
use docbridge_store::{Context, Cursor, StoreError};

use crate::config::{QueryConfig, TypeMismatch};
use crate::error::{DecodeError, QueryError};

pub use registry::{IteratorRegistry, LeakError, LeakReport};
pub(crate) use registry::Registration;

/// Turns raw backend records into documents.
pub trait RecordDecoder: Send {
    fn decode(&mut self, raw: &[u8]) -> Result<Document, DecodeError>;

    /// Called once after a failed decode. Returns `true` if a newer schema
    /// was loaded and decoding is worth retrying.
    fn refresh(&mut self, ctx: &Context) -> Result<bool, QueryError>;
}

/// A batch of documents, or the error that ended the batch.
pub type FetchedDocs = Result<Vec<Document>, QueryError>;

struct Open<'t> {
    cursor: Box<dyn Cursor + 't>,
    decoder: Box<dyn RecordDecoder + 't>,
    next_index: usize,
    registration: Option<Registration>,
}

impl Open<'_> {
    fn release(mut self) {
        self.cursor.close();
        if let Some(registration) = self.registration.take() {
            registration.release();
        }
    }

    fn id(&self) -> Option<u64> {
        self.registration.as_ref().map(Registration::id)
    }
}

/// Streams decoded documents from a backend cursor.
///
/// `next` and `close` may be called from different threads. The iterator
/// borrows the transaction or session its cursor came from and never ends
/// it. It must be closed; dropping an open iterator is reported to its
/// [`IteratorRegistry`] as a leak.
pub struct QueryIterator<'t> {
    ctx: Context,
    state: Mutex<Option<Open<'t>>>,
    on_type_mismatch: TypeMismatch,
    panic_on_leak: bool,
}

impl<'t> QueryIterator<'t> {
    pub fn new(
        ctx: &Context,
        cursor: Box<dyn Cursor + 't>,
        decoder: Box<dyn RecordDecoder + 't>,
        registry: &IteratorRegistry,
        config: &QueryConfig,
    ) -> Self {
        let registration = registry.register(config.capture_backtraces);
        Self {
            ctx: ctx.clone(),
            state: Mutex::new(Some(Open {
                cursor,
                decoder,
                next_index: 0,
                registration: Some(registration),
            })),
            on_type_mismatch: config.on_type_mismatch,
            panic_on_leak: config.panic_on_leak,
        }
    }

    /// An iterator that is already exhausted.
    pub fn empty() -> Self {
        Self {
            ctx: Context::background(),
            state: Mutex::new(None),
            on_type_mismatch: TypeMismatch::default(),
            panic_on_leak: false,
        }
    }

    /// Fetch the next document with its zero-based index.
    ///
    /// `Ok(None)` means iteration is done, and stays done: a closed iterator
    /// returns it even when the context has since been cancelled.
    pub fn next(&self) -> Result<Option<(usize, Document)>, QueryError> {
        let mut state = self.lock();
        let Some(open) = state.as_mut() else {
            return Ok(None);
        };
        self.ctx.err()?;

        let result = self.advance(open);
        if let Ok(None) = result {
            if let Some(open) = state.take() {
                tracing::debug!(id = open.id(), "query iterator exhausted");
                open.release();
            }
        }
        result
    }

    /// Release the cursor and the registry entry. Later calls do nothing.
    pub fn close(&self) {
        if let Some(open) = self.lock().take() {
            open.release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn advance(&self, open: &mut Open<'t>) -> Result<Option<(usize, Document)>, QueryError> {
        loop {
            let raw = match open.cursor.next(&self.ctx) {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(StoreError::InvalidArgument(msg)) => match self.on_type_mismatch {
                    TypeMismatch::Skip => {
                        tracing::warn!(id = open.id(), %msg, "skipping record with mismatched type");
                        continue;
                    }
                    TypeMismatch::Stop => {
                        tracing::warn!(id = open.id(), %msg, "stopping at record with mismatched type");
                        return Ok(None);
                    }
                },
                Err(err) => return Err(QueryError::store("advancing cursor", err)),
            };

            let doc = match open.decoder.decode(&raw) {
                Ok(doc) => doc,
                Err(err) => {
                    if !open.decoder.refresh(&self.ctx)? {
                        return Err(QueryError::decode("decoding record", err));
                    }
                    open.decoder
                        .decode(&raw)
                        .map_err(|e| QueryError::decode("decoding record after schema refresh", e))?
                }
            };

            let index = open.next_index;
            open.next_index += 1;
            return Ok(Some((index, doc)));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Open<'t>>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for QueryIterator<'_> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(mut open) = state.take() else {
            return;
        };
        open.cursor.close();
        let Some(registration) = open.registration.take() else {
            return;
        };
        let report = registration.leak();
        if self.panic_on_leak && !std::thread::panicking() {
            match report.created_at {
                Some(bt) => panic!("query iterator {} dropped without close, created by\n{bt}", report.id),
                None => panic!("query iterator {} dropped without close", report.id),
            }
        }
    }
}

/// Drain `iter` into a vector. The iterator is closed whether or not
/// draining succeeds.
pub fn consume_values(iter: QueryIterator<'_>) -> Result<Vec<Document>, QueryError> {
    let mut docs = Vec::new();
    let result = loop {
        match iter.next() {
            Ok(Some((_, doc))) => docs.push(doc),
            Ok(None) => break Ok(docs),
            Err(err) => break Err(err),
        }
    };
    iter.close();
    result
}

/// Send the iterator's documents over `sender` in batches of at most
/// `batch_size`, then close it.
///
/// An error is sent as the final message. Stops early if the receiver goes
/// away. A `batch_size` of zero is treated as one.
pub fn fetch_batches(iter: QueryIterator<'_>, batch_size: usize, sender: &Sender<FetchedDocs>) {
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    loop {
        match iter.next() {
            Ok(Some((_, doc))) => {
                batch.push(doc);
                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if sender.send(Ok(full)).is_err() {
                        break;
                    }
                }
            }
            Ok(None) => {
                if !batch.is_empty() {
                    let _ = sender.send(Ok(batch));
                }
                break;
            }
            Err(err) => {
                if !batch.is_empty() && sender.send(Ok(batch)).is_err() {
                    break;
                }
                let _ = sender.send(Err(err));
                break;
            }
        }
    }
    iter.close();
}
