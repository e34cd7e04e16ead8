/// # Test Utilities Module
///
/// Testing infrastructure for the scan pipeline. The centerpiece is an
/// in-memory [`RowSource`] that behaves like a provider rowset: it hands out
/// row handles in batches, materializes bound slots through the planned
/// layout, and keeps fetch/release accounting so tests can assert that no
/// handle ever leaks.
use crate::core::db::binding::{ColumnDescriptor, RowLayout, SlotWriter};
use crate::core::db::rowset::{RowHandle, RowSource};
use crate::core::value::DbType;
use crate::core::variant::Variant;
use crate::core::{DaxqlError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Counters {
    fetched: u64,
    released: u64,
}

/// Shared fetch/release accounting for a [`MockRowSource`].
///
/// Clones observe the same counters, so a test can keep a handle to the stats
/// after moving the source into a cursor.
#[derive(Debug, Clone, Default)]
pub struct MockStats(Arc<Mutex<Counters>>);

impl MockStats {
    /// Total row handles handed out.
    pub fn fetched(&self) -> u64 {
        self.0.lock().unwrap().fetched
    }

    /// Total row handles released back.
    pub fn released(&self) -> u64 {
        self.0.lock().unwrap().released
    }
}

/// In-memory rowset with provider-like handle semantics.
#[derive(Debug)]
pub struct MockRowSource {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Variant>>,
    failing_rows: HashSet<usize>,
    next_row: usize,
    outstanding: HashSet<u64>,
    stats: MockStats,
}

impl MockRowSource {
    /// Creates a source with the given `(name, native type)` columns and no
    /// rows.
    pub fn new(columns: &[(&str, DbType)]) -> MockRowSource {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (name, db_type))| ColumnDescriptor {
                ordinal: i as u64 + 1,
                name: name.to_string(),
                db_type: *db_type,
            })
            .collect();
        MockRowSource {
            columns,
            rows: Vec::new(),
            failing_rows: HashSet::new(),
            next_row: 0,
            outstanding: HashSet::new(),
            stats: MockStats::default(),
        }
    }

    /// Appends a row of decoded values, one per column.
    pub fn with_row(mut self, row: Vec<Variant>) -> MockRowSource {
        assert_eq!(
            row.len(),
            self.columns.len(),
            "row width must match column count"
        );
        self.rows.push(row);
        self
    }

    /// Marks a row index whose data retrieval fails (the handle itself is
    /// still handed out and must still be released).
    pub fn with_failing_row(mut self, index: usize) -> MockRowSource {
        self.failing_rows.insert(index);
        self
    }

    /// Accounting handle; clone it out before moving the source into a
    /// cursor.
    pub fn stats(&self) -> MockStats {
        self.stats.clone()
    }
}

impl RowSource for MockRowSource {
    fn column_info(&mut self) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.columns.clone())
    }

    fn next_rows(&mut self, max: usize) -> Result<Vec<RowHandle>> {
        let remaining = self.rows.len().saturating_sub(self.next_row);
        let count = remaining.min(max);
        let handles: Vec<RowHandle> = (self.next_row..self.next_row + count)
            .map(|i| RowHandle(i as u64))
            .collect();
        self.next_row += count;
        let mut counters = self.stats.0.lock().unwrap();
        counters.fetched += count as u64;
        for handle in &handles {
            self.outstanding.insert(handle.0);
        }
        Ok(handles)
    }

    fn row_data(&mut self, row: RowHandle, layout: &RowLayout, buffer: &mut [u8]) -> Result<()> {
        let index = row.0 as usize;
        if !self.outstanding.contains(&row.0) {
            return Err(DaxqlError::Fetch(format!(
                "row handle {} is not outstanding",
                row.0
            )));
        }
        if self.failing_rows.contains(&index) {
            return Err(DaxqlError::Fetch(format!(
                "simulated data retrieval failure for row {}",
                index
            )));
        }
        let values = self
            .rows
            .get(index)
            .ok_or_else(|| DaxqlError::Fetch(format!("row {} out of range", index)))?;

        for (column, value) in values.iter().enumerate() {
            // Unbound columns have no slot; the reader emits placeholders
            if let Some(mut writer) = SlotWriter::new(layout, buffer, column) {
                writer.write_variant(value);
            }
        }
        Ok(())
    }

    fn release_rows(&mut self, rows: &[RowHandle]) -> Result<()> {
        for handle in rows {
            if !self.outstanding.remove(&handle.0) {
                return Err(DaxqlError::Fetch(format!(
                    "double release of row handle {}",
                    handle.0
                )));
            }
        }
        let mut counters = self.stats.0.lock().unwrap();
        counters.released += rows.len() as u64;
        Ok(())
    }
}

impl Drop for MockRowSource {
    fn drop(&mut self) {
        // A leaked handle here is a pipeline bug; tests assert the counters,
        // this is the backstop for ones that forget.
        debug_assert!(
            self.outstanding.is_empty(),
            "row handles leaked: {:?}",
            self.outstanding
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::binding::BindingStrategy;

    #[test]
    fn test_mock_accounting() {
        let mut source = MockRowSource::new(&[("v", DbType::I8)])
            .with_row(vec![Variant::I8(7)])
            .with_row(vec![Variant::I8(8)]);
        let stats = source.stats();

        let columns = source.column_info().unwrap();
        let layout = RowLayout::plan(&columns, BindingStrategy::Native);
        let mut buffer = layout.alloc_row_buffer();

        let handles = source.next_rows(10).unwrap();
        assert_eq!(handles.len(), 2);
        source.row_data(handles[0], &layout, &mut buffer).unwrap();
        assert_eq!(
            layout.slot_view(&buffer, 0).unwrap().decode().unwrap(),
            Variant::I8(7)
        );
        source.release_rows(&handles).unwrap();

        assert_eq!(stats.fetched(), 2);
        assert_eq!(stats.released(), 2);
        assert!(source.next_rows(10).unwrap().is_empty());
    }

    #[test]
    fn test_double_release_is_detected() {
        let mut source = MockRowSource::new(&[("v", DbType::I8)]).with_row(vec![Variant::I8(1)]);
        let handles = source.next_rows(1).unwrap();
        source.release_rows(&handles).unwrap();
        assert!(source.release_rows(&handles).is_err());
    }
}
