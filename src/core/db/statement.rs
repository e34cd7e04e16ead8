/// Statement Execution Module
///
/// This module compiles a DAX query into a provider command, executes it and
/// hands back a cursor plus column metadata. Column metadata is retrieved
/// immediately after execution, before any binding work, because the binding
/// layout depends on the column count and native types. A statement carries
/// exactly one active cursor; executing twice or reading after close is an
/// error.
use crate::core::convert::{default_column_name, sanitize_column_names};
#[cfg(windows)]
use crate::core::db::binding::RowLayout;
use crate::core::db::binding::{BindingStrategy, ColumnDescriptor};
use crate::core::db::connection::Connection;
use crate::core::db::rowset::RowCursor;
use crate::core::value::DbType;
use crate::core::{DaxqlError, Result};
use tracing::debug;

/// Raw column metadata as reported by the provider, before name cleanup.
#[derive(Debug, Clone)]
pub struct RawColumn {
    /// 1-based provider ordinal
    pub ordinal: u64,
    /// Provider-reported name; `None` for unnamed result columns
    pub name: Option<String>,
    /// Raw native type tag
    pub type_tag: u16,
}

/// Builds the output column descriptors from raw provider metadata:
/// unnamed columns get positional defaults, names are sanitized into
/// identifier-safe form and collisions are de-duplicated.
pub fn describe_columns(raw: &[RawColumn]) -> Vec<ColumnDescriptor> {
    let names: Vec<String> = raw
        .iter()
        .enumerate()
        .map(|(i, c)| c.name.clone().unwrap_or_else(|| default_column_name(i)))
        .collect();
    let names = sanitize_column_names(&names);

    raw.iter()
        .zip(names)
        .map(|(c, name)| ColumnDescriptor {
            ordinal: c.ordinal,
            name,
            db_type: DbType::from_raw(c.type_tag),
        })
        .collect()
}

/// An executed statement's result: the output schema and the live cursor.
pub struct ResultSet {
    pub columns: Vec<ColumnDescriptor>,
    pub cursor: RowCursor,
}

/// A compiled provider command for one DAX query.
pub struct Statement {
    query: String,
    timeout_seconds: u64,
    executed: bool,
    closed: bool,
    #[cfg(windows)]
    inner: Option<crate::provider::OleDbStatement>,
}

impl Statement {
    /// Compiles `query` against an open connection.
    ///
    /// The command-timeout property is set best-effort before execution; a
    /// provider that does not support it is tolerated silently.
    ///
    /// # Errors
    ///
    /// `DaxqlError::Query` when command creation or text compilation fails;
    /// the provider's error text is preserved verbatim.
    #[cfg(windows)]
    pub fn prepare(connection: &Connection, query: &str, timeout_seconds: u64) -> Result<Statement> {
        let inner =
            crate::provider::OleDbStatement::prepare(connection.provider()?, query, timeout_seconds)?;
        Ok(Statement {
            query: query.to_string(),
            timeout_seconds,
            executed: false,
            closed: false,
            inner: Some(inner),
        })
    }

    #[cfg(not(windows))]
    pub fn prepare(
        _connection: &Connection,
        _query: &str,
        _timeout_seconds: u64,
    ) -> Result<Statement> {
        Err(DaxqlError::Unsupported(
            "the MSOLAP provider requires Windows COM/OLE DB".to_string(),
        ))
    }

    /// The query text this statement was compiled from.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The command timeout in effect, in seconds.
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Executes the command and prepares the row pipeline.
    ///
    /// Runs the provider command, retrieves column metadata, plans the
    /// binding layout with the requested strategy, creates the accessor
    /// (inspecting every per-binding status) and wraps the provider rowset in
    /// a [`RowCursor`].
    ///
    /// # Errors
    ///
    /// `DaxqlError::Query` if execution fails, `DaxqlError::Binding` naming
    /// the failing column if accessor creation rejects a binding, and
    /// `DaxqlError::Query` when called twice or after close.
    pub fn execute(&mut self, strategy: BindingStrategy) -> Result<ResultSet> {
        if self.closed {
            return Err(DaxqlError::Query(
                "statement is closed".to_string(),
            ));
        }
        if self.executed {
            return Err(DaxqlError::Query(
                "statement already executed; a statement carries one cursor".to_string(),
            ));
        }
        self.executed = true;

        #[cfg(windows)]
        {
            let inner = self.inner.as_mut().ok_or_else(|| {
                DaxqlError::Query("statement is closed".to_string())
            })?;
            let raw = inner.execute()?;
            let columns = describe_columns(&raw);
            debug!(columns = columns.len(), query = %self.query, "statement executed");

            let layout = RowLayout::plan(&columns, strategy);
            let source = inner.open_rowset(&layout)?;
            Ok(ResultSet {
                columns,
                cursor: RowCursor::new(source, layout),
            })
        }
        #[cfg(not(windows))]
        {
            let _ = strategy;
            Err(DaxqlError::Unsupported(
                "the MSOLAP provider requires Windows COM/OLE DB".to_string(),
            ))
        }
    }

    /// Closes the statement and releases the command. Idempotent; the row
    /// cursor (if one was produced) is closed by its own owner.
    pub fn close(&mut self) {
        if !self.closed {
            debug!(query = %self.query, "closing statement");
            self.closed = true;
            #[cfg(windows)]
            {
                self.inner = None;
            }
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.close();
    }
}
