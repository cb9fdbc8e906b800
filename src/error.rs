use docpipe_core::CompileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocpipeError {
    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid result: {0}")]
    InvalidResult(String),

    #[error("Inserted {actual} of {expected} documents")]
    InsertCountMismatch { expected: usize, actual: usize },

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DocpipeResult<T> = Result<T, DocpipeError>;

impl DocpipeError {
    /// Constraint failures are reported by the store after a write; callers
    /// may implement their own upsert or retry policy on them.
    pub fn is_constraint_failure(&self) -> bool {
        matches!(self, DocpipeError::DuplicateKey(_))
    }

    /// The query could not be compiled.
    pub fn is_syntax(&self) -> bool {
        matches!(self, DocpipeError::Compile(e) if e.is_syntax())
    }

    /// The store's results or state did not match what the operation expected.
    pub fn is_result_shape(&self) -> bool {
        matches!(
            self,
            DocpipeError::InvalidResult(_)
                | DocpipeError::InsertCountMismatch { .. }
                | DocpipeError::CollectionNotFound(_)
        )
    }
}

impl serde::Serialize for DocpipeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<toml::de::Error> for DocpipeError {
    fn from(err: toml::de::Error) -> Self {
        DocpipeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DocpipeError {
    fn from(err: toml::ser::Error) -> Self {
        DocpipeError::Config(err.to_string())
    }
}
