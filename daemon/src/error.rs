use thiserror::Error;

/// Failures talking to the broadcaster directory.
///
/// A query that resolves to "no such entity" is not an error; it is the
/// `Ok(None)` outcome of [`crate::directory::DirectoryClient::query`].
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Startup connection or initial roster fetch failed.
    #[error("failed to connect to directory: {0}")]
    Connection(String),

    #[error("directory client is not connected")]
    NotConnected,

    /// A single entity query failed; the entity is skipped this cycle.
    #[error("query for '{id}' failed: {reason}")]
    Query { id: String, reason: String },
}

impl DirectoryError {
    pub fn query(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Query {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures preparing or starting a capture for one entity.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("cannot prepare capture for {name}: {reason}")]
    Prepare { name: String, reason: String },

    #[error("failed to start capture for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to start a capture while shutting down")]
    ShuttingDown,
}

impl CaptureError {
    pub fn prepare(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Prepare {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_names_the_entity() {
        let err = DirectoryError::query("alice", "timed out");
        assert_eq!(err.to_string(), "query for 'alice' failed: timed out");
    }

    #[test]
    fn prepare_error_names_the_entity() {
        let err = CaptureError::prepare("alice", "no camera server");
        assert_eq!(err.to_string(), "cannot prepare capture for alice: no camera server");
    }
}
