/// Rowset Module
///
/// This module defines the cursor abstraction over a provider rowset and the
/// iteration state machine that drives it: fetch a batch of row handles, copy
/// each row's data into the bound buffer with a single retrieval call, hand
/// the buffer to the consumer, and release every handle before asking for the
/// next batch. Row handles are provider-owned resources; holding them across
/// fetches exhausts the provider, so the release discipline lives here and
/// nowhere else.
use crate::core::db::binding::{ColumnDescriptor, RowLayout};
use crate::core::{DaxqlError, Result};
use tracing::debug;

/// Opaque reference to one fetched row.
///
/// Valid only until released back to its row source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle(pub u64);

/// A provider-managed cursor over query results.
///
/// Implemented by the Windows OLE DB rowset and by the in-memory sources used
/// in tests.
pub trait RowSource {
    /// Column metadata for the result, available immediately after execution.
    fn column_info(&mut self) -> Result<Vec<ColumnDescriptor>>;

    /// Requests up to `max` row handles from the cursor.
    ///
    /// An empty result means the rowset is exhausted; that is completion, not
    /// an error.
    fn next_rows(&mut self, max: usize) -> Result<Vec<RowHandle>>;

    /// Copies one row's bound column data into `buffer` in a single
    /// data-retrieval call, per the planned `layout`.
    fn row_data(&mut self, row: RowHandle, layout: &RowLayout, buffer: &mut [u8]) -> Result<()>;

    /// Releases consumed row handles back to the provider.
    fn release_rows(&mut self, rows: &[RowHandle]) -> Result<()>;
}

/// Iteration state of a [`RowCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Executed, no fetch has hit the end yet
    Ready,
    /// The rowset reported end-of-rows; further fetches are no-ops
    EndOfRows,
    /// Closed; fetching is an error
    Closed,
}

/// Drives row iteration over a [`RowSource`] with a fixed [`RowLayout`].
///
/// The cursor owns the row buffer; each fetched row is materialized into it
/// and passed to the consumer before the next row overwrites it.
pub struct RowCursor {
    source: Box<dyn RowSource>,
    layout: RowLayout,
    buffer: Vec<u8>,
    state: CursorState,
    rows_fetched: u64,
}

impl RowCursor {
    /// Creates a cursor over an executed rowset.
    pub fn new(source: Box<dyn RowSource>, layout: RowLayout) -> RowCursor {
        let buffer = layout.alloc_row_buffer();
        RowCursor {
            source,
            layout,
            buffer,
            state: CursorState::Ready,
            rows_fetched: 0,
        }
    }

    /// The layout rows are materialized through.
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// True once the rowset has reported end-of-rows.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::EndOfRows)
    }

    /// Total rows fetched so far.
    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// Fetches up to `max` rows, invoking `consume` once per obtained row.
    ///
    /// The consumer receives the row's index within this batch and the filled
    /// row buffer, or the data-retrieval error for that row; either way the
    /// row handle is released before the method returns. The buffer is handed
    /// out mutably because tagged-union slots are cleared in place once their
    /// contents are taken. Returns the number of rows obtained; zero signals
    /// clean end-of-data. Fetching from an exhausted cursor stays a no-op;
    /// fetching from a closed cursor is an error.
    ///
    /// # Errors
    ///
    /// Returns `DaxqlError::Fetch` for cursor-level failures (handle
    /// acquisition or release). Per-row retrieval failures are reported to
    /// the consumer instead so one bad row cannot corrupt rows already
    /// yielded.
    pub fn fetch_batch<F>(&mut self, max: usize, mut consume: F) -> Result<usize>
    where
        F: FnMut(usize, Result<&mut [u8]>),
    {
        match self.state {
            CursorState::Closed => {
                return Err(DaxqlError::Fetch(
                    "cannot fetch from a closed cursor".to_string(),
                ))
            }
            CursorState::EndOfRows => return Ok(0),
            CursorState::Ready => {}
        }

        let handles = self.source.next_rows(max)?;
        if handles.is_empty() {
            debug!(rows_fetched = self.rows_fetched, "end of rowset");
            self.state = CursorState::EndOfRows;
            return Ok(0);
        }

        for (index, handle) in handles.iter().enumerate() {
            self.buffer.fill(0);
            match self.source.row_data(*handle, &self.layout, &mut self.buffer) {
                Ok(()) => consume(index, Ok(self.buffer.as_mut_slice())),
                Err(e) => consume(index, Err(e)),
            }
        }

        // Handles must go back before the next batch is requested, even when
        // individual rows failed to materialize.
        self.source.release_rows(&handles)?;
        self.rows_fetched += handles.len() as u64;
        Ok(handles.len())
    }

    /// Closes the cursor. Safe to call in any state; the second call is a
    /// no-op.
    pub fn close(&mut self) {
        if self.state != CursorState::Closed {
            debug!(rows_fetched = self.rows_fetched, "closing cursor");
            self.state = CursorState::Closed;
        }
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        self.close();
    }
}
