//! Error types for mesh-deps
//!
//! Errors follow a first-error-wins policy: nothing in the graph, tree or
//! policy pipeline retries, so any variant here aborts the current command.
//! Samples missing workload labels are not errors at all; they are dropped
//! while building the adjacency.

use thiserror::Error;

/// Main error type for mesh-deps operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No data source (or an otherwise unusable configuration) was supplied
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The query collaborator failed (I/O, HTTP, parse or evaluation)
    #[error("query error: {0}")]
    Query(String),

    /// The query collaborator returned a result shape we cannot interpret
    #[error("unsupported query result type: {0}")]
    UnsupportedResult(String),

    /// Rendering a synthesized policy failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Writing output failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a query error with the given message
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create an unsupported-result error for the given result type name
    pub fn unsupported_result(result_type: impl Into<String>) -> Self {
        Self::UnsupportedResult(result_type.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Propagation Through a Dependencies Run
    // ==========================================================================

    /// Story: running without a data source fails before any query is made
    #[test]
    fn story_missing_data_source_is_a_configuration_error() {
        let err = Error::configuration("please specify --file or --prom-url");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("--prom-url"));

        match Error::configuration("any") {
            Error::Configuration(msg) => assert_eq!(msg, "any"),
            _ => panic!("Expected Configuration variant"),
        }
    }

    /// Story: collaborator failures are surfaced verbatim
    #[test]
    fn story_query_failures_keep_the_underlying_message() {
        let err = Error::query("failed to parse query: unexpected token '}'");
        assert_eq!(
            err.to_string(),
            "query error: failed to parse query: unexpected token '}'"
        );
    }

    /// Story: a string-typed result cannot become a sample set
    #[test]
    fn story_unsupported_result_names_the_shape() {
        let err = Error::unsupported_result("string");
        assert_eq!(err.to_string(), "unsupported query result type: string");
    }

    /// Story: a broken stdout pipe surfaces as an io error
    #[test]
    fn story_write_failures_convert_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn serialization_error_message() {
        let err = Error::serialization("invalid map key");
        assert_eq!(err.to_string(), "serialization error: invalid map key");
    }
}
