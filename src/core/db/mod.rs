/// Database Pipeline Module
///
/// This module provides the provider-facing scan pipeline for daxql,
/// organized into focused submodules for better maintainability and
/// separation of concerns.
///
/// ## Architecture
///
/// The pipeline is split into four main concerns:
/// - **Connection Management** (`connection.rs`): Target parsing and the
///   provider session lifecycle
/// - **Statement Execution** (`statement.rs`): Command compilation, execution
///   and column metadata retrieval
/// - **Column Binding** (`binding.rs`): Row-buffer layout computation and
///   slot access
/// - **Row Iteration** (`rowset.rs`): The cursor state machine and handle
///   release discipline
///
/// ## Error Handling
///
/// All pipeline operations use the standardized `DaxqlError` type for
/// consistent error propagation.
pub mod binding;
pub mod connection;
pub mod rowset;
pub mod statement;

pub use binding::*;
pub use connection::*;
pub use rowset::*;
pub use statement::*;
