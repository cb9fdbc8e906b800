//! The document store seam.
//!
//! The executor only talks to a store through [`Store`]. Transport, pooling
//! and credentials live behind implementations of this trait.

use bson::{Bson, Document};
use docpipe_core::{AggregateOptions, IndexSpec};
use futures::stream::BoxStream;

use crate::error::{DocpipeError, DocpipeResult};

/// Write-error code a store reports for a unique index violation.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Write-error code a store reports for a validator rejection.
pub const VALIDATION_FAILED_CODE: i32 = 121;

/// Documents produced by an aggregate, in store order
pub type DocumentStream = BoxStream<'static, DocpipeResult<Document>>;

/// One failed document of a write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    pub code: i32,
    pub message: String,
}

impl WriteError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        self.code == DUPLICATE_KEY_CODE
    }
}

impl From<WriteError> for DocpipeError {
    fn from(err: WriteError) -> Self {
        if err.is_duplicate_key() {
            DocpipeError::DuplicateKey(err.message)
        } else {
            DocpipeError::Store(format!("write error {}: {}", err.code, err.message))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    /// Identities of the documents written, in input order
    pub inserted_ids: Vec<Bson>,
    pub write_errors: Vec<WriteError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub write_errors: Vec<WriteError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// Fail with the first write error of an outcome, if any.
pub fn check_write_errors(errors: &[WriteError]) -> DocpipeResult<()> {
    match errors.first() {
        Some(err) => Err(err.clone().into()),
        None => Ok(()),
    }
}

/// A document store able to run aggregation pipelines.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> DocpipeResult<DocumentStream>;

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocpipeResult<InsertOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocpipeResult<UpdateOutcome>;

    async fn delete_many(&self, collection: &str, filter: Document) -> DocpipeResult<DeleteOutcome>;

    async fn create_collection(&self, collection: &str, validator: Document) -> DocpipeResult<()>;

    /// Validator currently attached to a collection. Fails with
    /// `CollectionNotFound` when the collection does not exist.
    async fn collection_validator(&self, collection: &str) -> DocpipeResult<Option<Document>>;

    async fn modify_validator(&self, collection: &str, validator: Document) -> DocpipeResult<()>;

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocpipeResult<()>;

    async fn drop_collection(&self, collection: &str) -> DocpipeResult<()>;
}
