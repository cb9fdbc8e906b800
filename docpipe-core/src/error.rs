//! Error types for docpipe-core.
//!
//! Every failure the compiler can report is a syntax error: the caller built a
//! query or schema change that has no native rendering. None of them are
//! retryable.

use thiserror::Error;

/// Compilation error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Unsupported field: {0}")]
    UnsupportedField(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("Unsupported join: {0}")]
    UnsupportedJoin(String),

    #[error("Unsupported join method: {0}")]
    UnsupportedJoinMethod(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Unsupported filter relation: {0}")]
    UnsupportedRelation(String),

    #[error("Unsupported sort: {0}")]
    UnsupportedSort(String),

    #[error("Unsupported sort direction: {0}")]
    UnsupportedSortDirection(String),

    #[error("Unsupported limit: {0}")]
    UnsupportedLimit(String),

    #[error("Unsupported offset: {0}")]
    UnsupportedOffset(String),

    #[error("Unsupported aggregate: {0}")]
    UnsupportedAggregate(String),

    #[error("Unsupported aggregate method: {0}")]
    UnsupportedAggregateMethod(String),

    #[error("Unsupported query action: {0}")]
    UnsupportedAction(String),
}

impl CompileError {
    /// Short name of the construct that could not be compiled.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::UnsupportedField(_) => "field",
            CompileError::UnsupportedOperator(_) => "operator",
            CompileError::UnsupportedValue(_) => "value",
            CompileError::UnsupportedJoin(_) => "join",
            CompileError::UnsupportedJoinMethod(_) => "join-method",
            CompileError::UnsupportedFilter(_) => "filter",
            CompileError::UnsupportedRelation(_) => "filter-relation",
            CompileError::UnsupportedSort(_) => "sort",
            CompileError::UnsupportedSortDirection(_) => "sort-direction",
            CompileError::UnsupportedLimit(_) => "limit",
            CompileError::UnsupportedOffset(_) => "offset",
            CompileError::UnsupportedAggregate(_) => "aggregate",
            CompileError::UnsupportedAggregateMethod(_) => "aggregate-method",
            CompileError::UnsupportedAction(_) => "query-action",
        }
    }

    /// Compilation failures are always caller-fixable and never retried.
    pub fn is_syntax(&self) -> bool {
        true
    }
}

/// Result type for compiler operations
pub type CompileResult<T> = Result<T, CompileError>;

impl serde::Serialize for CompileError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CompileError::UnsupportedOperator("contains".to_string());
        assert_eq!(err.to_string(), "Unsupported operator: contains");

        let err = CompileError::UnsupportedJoinMethod("cross".to_string());
        assert_eq!(err.to_string(), "Unsupported join method: cross");

        let err = CompileError::UnsupportedAction("insert".to_string());
        assert_eq!(err.to_string(), "Unsupported query action: insert");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CompileError::UnsupportedRelation("xor".into()).kind(), "filter-relation");
        assert_eq!(CompileError::UnsupportedSortDirection("up".into()).kind(), "sort-direction");
        assert!(CompileError::UnsupportedLimit("-1".into()).is_syntax());
    }

    #[test]
    fn test_serializes_as_message() {
        let err = CompileError::UnsupportedField("empty field path".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!("Unsupported field: empty field path"));
    }
}
