/// Scanner Module
///
/// The host engine's table-function surface: a bind callback that discovers
/// the output schema by executing the query once, a per-scan initialization
/// callback that opens a fresh provider session on the worker thread, and a
/// scan callback that pulls one batch of rows per invocation into the host's
/// columnar output buffers, signalling end-of-data with zero rows.
///
/// Degrade policy (uniform across the scan path): setup failures are hard
/// errors; a failed row becomes a row of NULLs; a failed cell becomes a NULL
/// cell with a logged warning. One bad cell never invalidates a result set.
///
/// On non-Windows platforms the registered function still binds and scans,
/// producing a single informational row instead of cube data.
use crate::core::convert::variant_to_value;
use crate::core::db::binding::{
    BindingStrategy, ColumnDescriptor, RowLayout, SlotKind, SlotStatus,
};
use crate::core::db::connection::ConnectionTarget;
use crate::core::db::rowset::{RowCursor, RowSource};
#[cfg(not(windows))]
use crate::core::value::DbType;
use crate::core::value::{LogicalType, Value};
use crate::core::{DaxqlError, Result};
use tracing::{debug, warn};

#[cfg(windows)]
use crate::core::db::connection::Connection;
#[cfg(windows)]
use crate::core::db::statement::Statement;

/// Command timeout applied when the caller does not override it.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Rows pulled from the cursor per scan invocation.
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Name the function is registered under in the host catalog.
pub const FUNCTION_NAME: &str = "msolap";

/// Message emitted by the non-Windows fallback scan.
#[cfg(not(windows))]
const UNSUPPORTED_MESSAGE: &str =
    "the msolap data source requires Windows (COM/OLE DB); no cube data is available on this platform";

/// Tunables for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub timeout_seconds: u64,
    pub batch_size: usize,
    pub strategy: BindingStrategy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: BindingStrategy::Variant,
        }
    }
}

/// Raw invocation arguments as the host hands them over: two mandatory
/// strings and the optional named timeout parameter.
#[derive(Debug, Clone)]
pub struct BindInput {
    pub target: String,
    pub query: String,
    pub timeout_seconds: Option<u64>,
}

/// Everything the host needs after bind: the output schema plus what a later
/// scan needs to re-execute the query.
#[derive(Debug, Clone)]
pub struct BindData {
    pub target: ConnectionTarget,
    pub query: String,
    pub options: ScanOptions,
    pub columns: Vec<ColumnDescriptor>,
}

impl BindData {
    /// Output column names, in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Output logical types, in order.
    pub fn column_types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.logical_type()).collect()
    }

    /// Key/value pairs for the host's plan display.
    pub fn explain(&self) -> Vec<(String, String)> {
        vec![
            ("Connection".to_string(), self.target.to_connection_string()),
            ("Query".to_string(), self.query.clone()),
        ]
    }
}

/// Registration descriptor consumed by the host's function catalog.
#[derive(Debug, Clone)]
pub struct TableFunctionSpec {
    pub name: &'static str,
    /// Mandatory positional parameters: connection target and query text
    pub positional: [(&'static str, LogicalType); 2],
    /// Optional named parameters
    pub named: [(&'static str, LogicalType); 1],
    /// This adapter cannot serve parallel cursor scans
    pub max_threads: usize,
}

/// Describes the registered `msolap` table function.
pub fn table_function() -> TableFunctionSpec {
    TableFunctionSpec {
        name: FUNCTION_NAME,
        positional: [
            ("connection", LogicalType::Varchar),
            ("query", LogicalType::Varchar),
        ],
        named: [("timeout", LogicalType::BigInt)],
        max_threads: 1,
    }
}

fn scan_options(input: &BindInput) -> ScanOptions {
    ScanOptions {
        timeout_seconds: input.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        ..ScanOptions::default()
    }
}

/// Bind callback: discovers the output schema for this invocation.
///
/// Executes the query once against a short-lived connection purely for its
/// column metadata, then tears everything down; the scan re-executes later on
/// the worker thread (which gets its own COM initialization).
///
/// # Errors
///
/// `DaxqlError::Config` for an unparseable target, connection/query errors
/// from the provider, and `DaxqlError::Query` when the result has no columns.
#[cfg(windows)]
pub fn bind(input: &BindInput) -> Result<BindData> {
    let target = ConnectionTarget::parse(&input.target)?;
    let options = scan_options(input);

    let mut connection = Connection::open(&target)?;
    let mut statement = Statement::prepare(&connection, &input.query, options.timeout_seconds)?;
    let result = statement.execute(options.strategy);
    statement.close();
    connection.close();

    let mut result_set = result?;
    result_set.cursor.close();
    let columns = result_set.columns;
    if columns.is_empty() {
        return Err(DaxqlError::Query(
            "no columns found in query result".to_string(),
        ));
    }

    debug!(columns = columns.len(), "bind complete");
    Ok(BindData {
        target,
        query: input.query.clone(),
        options,
        columns,
    })
}

#[cfg(not(windows))]
pub fn bind(input: &BindInput) -> Result<BindData> {
    // The fallback declares a single message column in place of the schema
    // only the Windows provider could produce.
    let target = ConnectionTarget::parse(&input.target)?;
    debug!("bind complete (platform fallback)");
    Ok(BindData {
        target,
        query: input.query.clone(),
        options: scan_options(input),
        columns: vec![ColumnDescriptor {
            ordinal: 1,
            name: "message".to_string(),
            db_type: DbType::WStr,
        }],
    })
}

/// Per-scan state: the live cursor plus everything that must outlive it.
pub struct ScanState {
    columns: Vec<ColumnDescriptor>,
    layout: RowLayout,
    cursor: Option<RowCursor>,
    batch_size: usize,
    fallback_message: Option<String>,
    closed: bool,
    // Provider resources the cursor depends on; dropped after it.
    #[cfg(windows)]
    _statement: Option<Statement>,
    #[cfg(windows)]
    _connection: Option<Connection>,
}

impl ScanState {
    /// Builds scan state over an in-memory row source.
    ///
    /// This is the provider-independent entry used by diagnostics and tests;
    /// the column metadata, layout planning, cursor and conversion path are
    /// exactly the ones the provider-backed scan uses.
    pub fn from_source(mut source: Box<dyn RowSource>, options: &ScanOptions) -> Result<ScanState> {
        let columns = source.column_info()?;
        let layout = RowLayout::plan(&columns, options.strategy);
        let cursor = RowCursor::new(source, layout.clone());
        Ok(ScanState {
            columns,
            layout,
            cursor: Some(cursor),
            batch_size: options.batch_size,
            fallback_message: None,
            closed: false,
            #[cfg(windows)]
            _statement: None,
            #[cfg(windows)]
            _connection: None,
        })
    }

    /// Output columns of this scan.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Closes the scan, tearing down cursor, statement and connection in
    /// that order. Safe to call repeatedly; the second call is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.close();
        }
        self.cursor = None;
        #[cfg(windows)]
        {
            if let Some(statement) = self._statement.as_mut() {
                statement.close();
            }
            self._statement = None;
            if let Some(connection) = self._connection.as_mut() {
                connection.close();
            }
            self._connection = None;
        }
    }
}

impl Drop for ScanState {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-scan initialization callback: opens a fresh connection on the calling
/// (worker) thread, re-executes the query and prepares the row pipeline.
#[cfg(windows)]
pub fn init_scan(bind_data: &BindData) -> Result<ScanState> {
    let connection = Connection::open(&bind_data.target)?;
    let mut statement = Statement::prepare(
        &connection,
        &bind_data.query,
        bind_data.options.timeout_seconds,
    )?;
    let result_set = statement.execute(bind_data.options.strategy)?;

    let layout = result_set.cursor.layout().clone();
    Ok(ScanState {
        columns: result_set.columns,
        layout,
        cursor: Some(result_set.cursor),
        batch_size: bind_data.options.batch_size,
        fallback_message: None,
        closed: false,
        _statement: Some(statement),
        _connection: Some(connection),
    })
}

#[cfg(not(windows))]
pub fn init_scan(bind_data: &BindData) -> Result<ScanState> {
    let columns = bind_data.columns.clone();
    let layout = RowLayout::plan(&columns, bind_data.options.strategy);
    Ok(ScanState {
        columns,
        layout,
        cursor: None,
        batch_size: bind_data.options.batch_size,
        fallback_message: Some(UNSUPPORTED_MESSAGE.to_string()),
        closed: false,
    })
}

/// Columnar output buffer handed to the scan callback by the host.
#[derive(Debug, Clone)]
pub struct DataChunk {
    columns: Vec<Vec<Value>>,
}

impl DataChunk {
    /// Creates an empty chunk with one vector per output column.
    pub fn new(column_count: usize) -> DataChunk {
        DataChunk {
            columns: vec![Vec::new(); column_count],
        }
    }

    /// Clears all columns for the next scan invocation.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Appends one row across all columns.
    pub fn push_row(&mut self, row: Vec<Value>) {
        assert_eq!(row.len(), self.columns.len(), "row width mismatch");
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
    }

    /// Number of rows currently in the chunk; zero signals end-of-data.
    pub fn cardinality(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    /// The values of one output column.
    pub fn column(&self, index: usize) -> &[Value] {
        &self.columns[index]
    }

    /// Number of output columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Converts one bound cell of a fetched row into a host value.
///
/// Unbound columns produce their explicit NULL placeholder; truncated text
/// keeps its partial data and logs the untruncated length; conversion
/// failures degrade to NULL.
fn cell_value(
    layout: &RowLayout,
    buffer: &mut [u8],
    column: usize,
    target: LogicalType,
) -> Value {
    let Some(spec) = layout.slot(column).cloned() else {
        // Deliberately unbound at layout time; emit the placeholder rather
        // than misaligning anything.
        return Value::Null(target);
    };

    let (status, length) = {
        let view = layout.slot_view(buffer, column).expect("bound slot");
        (view.status(), view.length())
    };
    match status {
        SlotStatus::IsNull => return Value::Null(target),
        SlotStatus::Error(raw) => {
            warn!(column, raw_status = raw, "cell retrieval error, degrading to NULL");
            return Value::Null(target);
        }
        SlotStatus::Truncated => {
            warn!(
                column,
                untruncated_bytes = length,
                capacity = spec.value_size,
                "text value truncated, keeping partial data"
            );
        }
        SlotStatus::Ok => {}
    }

    let decoded = match spec.kind {
        SlotKind::Variant => {
            #[cfg(windows)]
            {
                crate::provider::decode_variant_slot(&spec, buffer)
            }
            #[cfg(not(windows))]
            {
                Err(DaxqlError::Convert(
                    "tagged-union slots are provider-backed and unavailable here".to_string(),
                ))
            }
        }
        _ => layout
            .slot_view(buffer, column)
            .expect("bound slot")
            .decode(),
    };

    match decoded.and_then(|variant| variant_to_value(&variant, target)) {
        Ok(value) => value,
        Err(e) => {
            warn!(column, error = %e, "cell conversion failed, degrading to NULL");
            Value::Null(target)
        }
    }
}

/// Scan callback: pulls up to one batch of rows into `output`.
///
/// Writes zero rows to signal end-of-data. A closed scan also reports
/// end-of-data rather than erroring, so the host can tear down in any order.
///
/// # Errors
///
/// `DaxqlError::Fetch` when the cursor itself fails; per-row and per-cell
/// failures degrade as documented on this module.
pub fn scan(state: &mut ScanState, output: &mut DataChunk) -> Result<()> {
    output.reset();
    if state.closed {
        return Ok(());
    }

    if let Some(message) = state.fallback_message.take() {
        output.push_row(vec![Value::Varchar(message)]);
        return Ok(());
    }

    let Some(cursor) = state.cursor.as_mut() else {
        return Ok(());
    };

    let layout = &state.layout;
    let types: Vec<LogicalType> = state.columns.iter().map(|c| c.logical_type()).collect();

    cursor.fetch_batch(state.batch_size, |_, row| match row {
        Ok(buffer) => {
            let values = types
                .iter()
                .enumerate()
                .map(|(column, target)| cell_value(layout, buffer, column, *target))
                .collect();
            output.push_row(values);
        }
        Err(e) => {
            // One bad row must not abort the scan or corrupt earlier rows.
            warn!(error = %e, "row retrieval failed, emitting NULL row");
            output.push_row(types.iter().map(|t| Value::Null(*t)).collect());
        }
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::DbType;
    use crate::core::variant::Variant;
    use crate::test_utils::MockRowSource;

    fn native_options() -> ScanOptions {
        ScanOptions {
            strategy: BindingStrategy::Native,
            batch_size: 2,
            ..ScanOptions::default()
        }
    }

    #[test]
    fn test_table_function_shape() {
        let spec = table_function();
        assert_eq!(spec.name, "msolap");
        assert_eq!(spec.max_threads, 1);
        assert_eq!(spec.positional.len(), 2);
        assert_eq!(spec.named[0].0, "timeout");
    }

    #[test]
    fn test_bind_timeout_default_and_override() {
        let input = BindInput {
            target: "Server=localhost;Database=Sales".to_string(),
            query: "EVALUATE T".to_string(),
            timeout_seconds: None,
        };
        assert_eq!(scan_options(&input).timeout_seconds, 60);

        let input = BindInput {
            timeout_seconds: Some(5),
            ..input
        };
        assert_eq!(scan_options(&input).timeout_seconds, 5);
    }

    #[test]
    fn test_scan_converts_and_finishes() {
        let source = MockRowSource::new(&[("id", DbType::I8), ("price", DbType::Currency)])
            .with_row(vec![Variant::I8(1), Variant::Currency(1_234_500)])
            .with_row(vec![Variant::I8(2), Variant::Null])
            .with_row(vec![Variant::I8(3), Variant::Currency(-50_000)]);
        let stats = source.stats();

        let mut state = ScanState::from_source(Box::new(source), &native_options()).unwrap();
        let mut chunk = DataChunk::new(state.columns().len());

        let mut rows = Vec::new();
        loop {
            scan(&mut state, &mut chunk).unwrap();
            if chunk.cardinality() == 0 {
                break;
            }
            for i in 0..chunk.cardinality() {
                rows.push((chunk.column(0)[i].clone(), chunk.column(1)[i].clone()));
            }
        }

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], (Value::BigInt(1), Value::Double(123.45)));
        assert_eq!(
            rows[1],
            (Value::BigInt(2), Value::Null(LogicalType::Double))
        );
        assert_eq!(rows[2], (Value::BigInt(3), Value::Double(-5.0)));

        // No leaked handles
        assert_eq!(stats.fetched(), 3);
        assert_eq!(stats.released(), 3);

        // A further scan after end-of-data stays a clean zero-row answer
        scan(&mut state, &mut chunk).unwrap();
        assert_eq!(chunk.cardinality(), 0);
    }

    #[test]
    fn test_scan_after_close_reports_end_of_data() {
        let source = MockRowSource::new(&[("id", DbType::I8)]).with_row(vec![Variant::I8(1)]);
        let mut state = ScanState::from_source(Box::new(source), &native_options()).unwrap();
        let mut chunk = DataChunk::new(1);

        state.close();
        state.close();
        scan(&mut state, &mut chunk).unwrap();
        assert_eq!(chunk.cardinality(), 0);
    }

    #[test]
    fn test_unbound_column_yields_placeholder() {
        // BYTES columns are not natively bindable; the scan must emit NULL
        // placeholders without disturbing neighbors.
        let source = MockRowSource::new(&[
            ("id", DbType::I8),
            ("blob", DbType::Bytes),
            ("name", DbType::WStr),
        ])
        .with_row(vec![
            Variant::I8(9),
            Variant::Text("ignored".to_string()),
            Variant::Text("kept".to_string()),
        ]);

        let mut state = ScanState::from_source(Box::new(source), &native_options()).unwrap();
        let mut chunk = DataChunk::new(3);
        scan(&mut state, &mut chunk).unwrap();

        assert_eq!(chunk.cardinality(), 1);
        assert_eq!(chunk.column(0)[0], Value::BigInt(9));
        assert_eq!(chunk.column(1)[0], Value::Null(LogicalType::Varchar));
        assert_eq!(chunk.column(2)[0], Value::Varchar("kept".to_string()));
    }

    #[test]
    fn test_failing_row_degrades_to_nulls() {
        let source = MockRowSource::new(&[("id", DbType::I8)])
            .with_row(vec![Variant::I8(1)])
            .with_row(vec![Variant::I8(2)])
            .with_failing_row(1);
        let stats = source.stats();

        let mut state = ScanState::from_source(Box::new(source), &native_options()).unwrap();
        let mut chunk = DataChunk::new(1);
        scan(&mut state, &mut chunk).unwrap();

        assert_eq!(chunk.cardinality(), 2);
        assert_eq!(chunk.column(0)[0], Value::BigInt(1));
        assert_eq!(chunk.column(0)[1], Value::Null(LogicalType::BigInt));
        assert_eq!(stats.fetched(), stats.released());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_fallback_bind_and_scan() {
        let input = BindInput {
            target: "localhost/Sales".to_string(),
            query: "EVALUATE T".to_string(),
            timeout_seconds: None,
        };
        let bind_data = bind(&input).unwrap();
        assert_eq!(bind_data.column_names(), vec!["message".to_string()]);
        assert_eq!(bind_data.column_types(), vec![LogicalType::Varchar]);

        let mut state = init_scan(&bind_data).unwrap();
        let mut chunk = DataChunk::new(1);

        scan(&mut state, &mut chunk).unwrap();
        assert_eq!(chunk.cardinality(), 1);
        let Value::Varchar(message) = &chunk.column(0)[0] else {
            panic!("expected message text");
        };
        assert!(message.contains("Windows"));

        scan(&mut state, &mut chunk).unwrap();
        assert_eq!(chunk.cardinality(), 0);
    }

    #[test]
    fn test_explain_pairs() {
        let input = BindInput {
            target: "Server=box;Database=Cube".to_string(),
            query: "EVALUATE 'T'".to_string(),
            timeout_seconds: None,
        };
        let bind_data = bind(&input);
        // On any platform bind yields explain output for the plan display
        if let Ok(bind_data) = bind_data {
            let pairs = bind_data.explain();
            assert_eq!(pairs[0].0, "Connection");
            assert!(pairs[0].1.contains("box"));
            assert_eq!(pairs[1].0, "Query");
        }
    }
}
