use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::Context;
use crate::error::StoreError;
use crate::store::Cursor;

/// Counts a cursor as open until it is explicitly closed.
///
/// Dropping without closing keeps the count, so tests can spot cursors that
/// were never released.
pub(crate) struct OpenCursor {
    counter: Arc<AtomicUsize>,
}

impl OpenCursor {
    pub(crate) fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Arc::clone(counter),
        }
    }

    pub(crate) fn release(self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cursor over rows that were fully evaluated when the query ran.
pub(crate) struct RowCursor {
    state: Option<(VecDeque<Vec<u8>>, OpenCursor)>,
}

impl RowCursor {
    pub(crate) fn new(rows: Vec<Vec<u8>>, open: OpenCursor) -> Self {
        Self {
            state: Some((rows.into(), open)),
        }
    }
}

impl Cursor for RowCursor {
    fn next(&mut self, ctx: &Context) -> Result<Option<Vec<u8>>, StoreError> {
        let (rows, _) = self.state.as_mut().ok_or(StoreError::CursorClosed)?;
        ctx.err()?;
        Ok(rows.pop_front())
    }

    fn close(&mut self) {
        if let Some((_, open)) = self.state.take() {
            open.release();
        }
    }
}
