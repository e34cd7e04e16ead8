/// Connection Management Module
///
/// This module provides connection target parsing and the provider session
/// lifecycle. A connection owns the provider's data-source session and the
/// command factory derived from it; it is either fully open (both live) or
/// fully closed (both gone); no partial state is observable to callers.
use crate::core::{DaxqlError, Result};
use std::fmt;

/// Server used when the target omits one.
pub const DEFAULT_SERVER: &str = "localhost";

/// Parsed connection target: the Analysis Services instance and the catalog
/// (database) to open.
///
/// Two input forms are accepted:
/// - key/value pairs: `Server=localhost:2383;Database=AdventureWorks`
///   (`Data Source` and `Catalog`/`Initial Catalog` are accepted aliases;
///   unknown keys are ignored, the last occurrence of a key wins)
/// - bare form: `localhost:2383/AdventureWorks`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// `server[:port]` of the instance
    pub server: String,
    /// Catalog / database identifier; may be empty for the default catalog
    pub database: String,
}

impl ConnectionTarget {
    /// Creates a target from discrete parts.
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> ConnectionTarget {
        ConnectionTarget {
            server: server.into(),
            database: database.into(),
        }
    }

    /// Parses a connection target string.
    ///
    /// # Errors
    ///
    /// Returns `DaxqlError::Config` when the input is empty.
    pub fn parse(input: &str) -> Result<ConnectionTarget> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DaxqlError::Config(
                "connection target must not be empty".to_string(),
            ));
        }

        if input.contains('=') {
            let mut server = None;
            let mut database = None;
            for part in input.split(';') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let Some((key, value)) = part.split_once('=') else {
                    continue;
                };
                match key.trim().to_ascii_lowercase().as_str() {
                    "server" | "data source" => server = Some(value.trim().to_string()),
                    "database" | "catalog" | "initial catalog" => {
                        database = Some(value.trim().to_string())
                    }
                    // Unknown properties are not an error; the provider owns
                    // the full property namespace
                    _ => {}
                }
            }
            Ok(ConnectionTarget {
                server: server.unwrap_or_else(|| DEFAULT_SERVER.to_string()),
                database: database.unwrap_or_default(),
            })
        } else {
            match input.split_once('/') {
                Some((server, database)) => Ok(ConnectionTarget::new(
                    server.trim(),
                    database.trim(),
                )),
                None => Ok(ConnectionTarget::new(input, "")),
            }
        }
    }

    /// Renders the canonical key/value connection string.
    pub fn to_connection_string(&self) -> String {
        format!("Server={};Database={}", self.server, self.database)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_connection_string())
    }
}

/// An open provider session.
///
/// Owns the data-source handle and the command factory; dropping or closing
/// releases them in reverse-acquisition order. Close is idempotent.
pub struct Connection {
    target: ConnectionTarget,
    #[cfg(windows)]
    inner: Option<crate::provider::OleDbConnection>,
}

impl Connection {
    /// Opens a session against the MSOLAP provider.
    ///
    /// Initializes COM for the calling thread, instantiates the provider,
    /// sets the data source / catalog / read-only mode properties and derives
    /// the command factory. Any intermediate failure releases everything
    /// acquired so far before surfacing.
    ///
    /// # Errors
    ///
    /// `DaxqlError::Connection` or `DaxqlError::Com` on provider failures;
    /// `DaxqlError::Unsupported` on non-Windows platforms.
    #[cfg(windows)]
    pub fn open(target: &ConnectionTarget) -> Result<Connection> {
        let inner = crate::provider::OleDbConnection::open(target)?;
        Ok(Connection {
            target: target.clone(),
            inner: Some(inner),
        })
    }

    #[cfg(not(windows))]
    pub fn open(_target: &ConnectionTarget) -> Result<Connection> {
        Err(DaxqlError::Unsupported(
            "the MSOLAP provider requires Windows COM/OLE DB".to_string(),
        ))
    }

    /// The target this connection was opened against.
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// True while the session and command factory are both live.
    pub fn is_open(&self) -> bool {
        #[cfg(windows)]
        {
            self.inner.is_some()
        }
        #[cfg(not(windows))]
        {
            false
        }
    }

    /// Closes the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        #[cfg(windows)]
        {
            // Drop order inside OleDbConnection handles Uninitialize and the
            // reverse-order releases.
            self.inner = None;
        }
    }

    #[cfg(windows)]
    pub(crate) fn provider(&self) -> Result<&crate::provider::OleDbConnection> {
        self.inner.as_ref().ok_or_else(|| {
            DaxqlError::Connection("connection is closed".to_string())
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value_form() {
        let target = ConnectionTarget::parse("Server=olap.example:2383;Database=Sales").unwrap();
        assert_eq!(target.server, "olap.example:2383");
        assert_eq!(target.database, "Sales");
    }

    #[test]
    fn test_parse_aliases_and_unknown_keys() {
        let target = ConnectionTarget::parse(
            "Provider=MSOLAP;Data Source=box1;Initial Catalog=Cube;Format=Tabular",
        )
        .unwrap();
        assert_eq!(target.server, "box1");
        assert_eq!(target.database, "Cube");
    }

    #[test]
    fn test_parse_defaults() {
        let target = ConnectionTarget::parse("Database=OnlyCatalog").unwrap();
        assert_eq!(target.server, DEFAULT_SERVER);
        assert_eq!(target.database, "OnlyCatalog");

        let target = ConnectionTarget::parse("Server=justhost").unwrap();
        assert_eq!(target.database, "");
    }

    #[test]
    fn test_parse_bare_form() {
        let target = ConnectionTarget::parse("localhost:2383/AdventureWorks").unwrap();
        assert_eq!(target.server, "localhost:2383");
        assert_eq!(target.database, "AdventureWorks");

        let target = ConnectionTarget::parse("localhost").unwrap();
        assert_eq!(target.server, "localhost");
        assert_eq!(target.database, "");
    }

    #[test]
    fn test_parse_last_occurrence_wins() {
        let target = ConnectionTarget::parse("Server=a;Server=b;Database=x").unwrap();
        assert_eq!(target.server, "b");
    }

    #[test]
    fn test_parse_empty_is_an_error() {
        assert!(ConnectionTarget::parse("   ").is_err());
    }

    #[test]
    fn test_connection_string_round_trip() {
        let target = ConnectionTarget::new("srv:1234", "Cube");
        let parsed = ConnectionTarget::parse(&target.to_connection_string()).unwrap();
        assert_eq!(parsed, target);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_open_is_unsupported_off_windows() {
        let target = ConnectionTarget::new("localhost", "Sales");
        match Connection::open(&target) {
            Err(DaxqlError::Unsupported(_)) => {}
            other => panic!("expected Unsupported, got {:?}", other.map(|_| ())),
        }
    }
}
