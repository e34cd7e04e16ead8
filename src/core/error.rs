/// DAXQL Error Module
///
/// This module defines the error types for the daxql adapter. It provides
/// structured error handling with proper error propagation and preserves the
/// provider's own diagnostics (HRESULT codes, verbatim error text) wherever
/// they exist.
use thiserror::Error;

/// Comprehensive error type for the daxql adapter.
///
/// The variants follow the phases of the scan pipeline:
/// - Connection establishment (COM startup, provider instantiation, properties)
/// - Statement compilation and execution
/// - Column binding / accessor creation
/// - Row fetching
/// - Value conversion
/// - Configuration and I/O
#[derive(Error, Debug)]
pub enum DaxqlError {
    /// Raw COM/OLE DB failure carrying the provider status code and the
    /// phase that raised it
    #[error("COM error in {context}: HRESULT 0x{code:08X}")]
    Com { code: i32, context: String },

    /// Connection establishment errors; fatal to opening a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query compilation or execution errors; fatal to the statement but
    /// not to the connection
    #[error("Query error: {0}")]
    Query(String),

    /// Per-column accessor creation failure, identifying the column by its
    /// provider ordinal and the reported binding status
    #[error("Binding error: column ordinal {ordinal} rejected with status {status}")]
    Binding { ordinal: u64, status: u32 },

    /// Row fetch or data retrieval errors; aborts the current scan
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Value conversion errors; scan paths degrade these to NULL
    #[error("Conversion error: {0}")]
    Convert(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires the Windows MSOLAP provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl DaxqlError {
    /// Builds a [`DaxqlError::Com`] from an HRESULT and a phase context.
    pub fn com(code: i32, context: impl Into<String>) -> Self {
        DaxqlError::Com {
            code,
            context: context.into(),
        }
    }
}

/// Type alias for Result to use DaxqlError as the error type.
///
/// This provides a consistent error type across the entire adapter
/// instead of using `Result<T, String>` or mixed error types.
pub type Result<T> = std::result::Result<T, DaxqlError>;
