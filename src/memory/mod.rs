//! In-process document store.
//!
//! `MemoryStore` interprets the pipeline stages, update operators, validators
//! and unique indexes the compiler emits. It backs the test suite and the
//! CLI's dry runs; it is not meant to hold much data.

mod document;
mod matcher;
mod pipeline;
mod update;
mod validation;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use docpipe_core::{AggregateOptions, IndexSpec, ID_FIELD};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DocpipeError, DocpipeResult};
use crate::store::{
    DeleteOutcome, DocumentStream, InsertOutcome, Store, UpdateOutcome, WriteError,
    DUPLICATE_KEY_CODE, VALIDATION_FAILED_CODE,
};

/// Write-error code for an update that changes `_id`.
const IMMUTABLE_FIELD_CODE: i32 = 66;

#[derive(Debug, Clone, Default)]
struct CollectionState {
    documents: Vec<Document>,
    validator: Option<Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    /// Key tuple of `doc` under `index`; missing fields count as null.
    fn index_key(doc: &Document, index: &IndexSpec) -> Vec<Bson> {
        index
            .keys
            .keys()
            .map(|path| document::get_path(doc, path).cloned().unwrap_or(Bson::Null))
            .collect()
    }

    fn same_key(a: &[Bson], b: &[Bson]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| document::values_equal(x, y))
    }

    /// Check `candidate` against validator and unique indexes. `skip` is the
    /// position of the document being replaced, if any.
    fn check(&self, candidate: &Document, skip: Option<usize>) -> Result<(), WriteError> {
        if let Some(validator) = &self.validator {
            validation::validate(candidate, validator).map_err(|reason| {
                WriteError::new(
                    VALIDATION_FAILED_CODE,
                    format!("Document failed validation: {}", reason),
                )
            })?;
        }

        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != skip)
                .map(|(_, doc)| doc)
        };

        if let Some(id) = candidate.get(ID_FIELD) {
            if others().any(|doc| doc.get(ID_FIELD).is_some_and(|other| document::values_equal(other, id))) {
                return Err(WriteError::new(
                    DUPLICATE_KEY_CODE,
                    format!("E11000 duplicate key error index: _id_ dup key: {}", id),
                ));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = Self::index_key(candidate, index);
            if others().any(|doc| Self::same_key(&Self::index_key(doc, index), &key)) {
                return Err(WriteError::new(
                    DUPLICATE_KEY_CODE,
                    format!(
                        "E11000 duplicate key error index: {} dup key: {:?}",
                        index.resolved_name(),
                        key
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Thread-safe in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, CollectionState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append documents without validation, creating the collection if needed.
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(documents);
    }

    /// Snapshot of a collection's documents, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }

    pub fn validator(&self, collection: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|state| state.validator.clone())
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .read()
            .get(collection)
            .map(|state| state.indexes.clone())
            .unwrap_or_default()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    fn not_found(collection: &str) -> DocpipeError {
        DocpipeError::CollectionNotFound(collection.to_string())
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn aggregate(
        &self,
        collection: &str,
        stages: Vec<Document>,
        options: &AggregateOptions,
    ) -> DocpipeResult<DocumentStream> {
        tracing::trace!(collection, stages = stages.len(), ?options, "Memory aggregate");
        let collections = self.collections.read();
        let input = collections
            .get(collection)
            .map(|state| state.documents.clone())
            .unwrap_or_default();
        let lookup = |name: &str| {
            collections
                .get(name)
                .map(|state| state.documents.clone())
                .unwrap_or_default()
        };
        let rows = pipeline::run(input, &stages, &lookup)?;
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocpipeResult<InsertOutcome> {
        let mut collections = self.collections.write();
        let state = collections.entry(collection.to_string()).or_default();
        let mut outcome = InsertOutcome::default();

        for mut doc in documents {
            if !doc.contains_key(ID_FIELD) {
                let mut with_id = Document::new();
                with_id.insert(ID_FIELD, ObjectId::new());
                for (key, value) in doc {
                    with_id.insert(key, value);
                }
                doc = with_id;
            }
            if let Err(err) = state.check(&doc, None) {
                outcome.write_errors.push(err);
                break;
            }
            if let Some(id) = doc.get(ID_FIELD) {
                outcome.inserted_ids.push(id.clone());
            }
            state.documents.push(doc);
        }
        Ok(outcome)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocpipeResult<UpdateOutcome> {
        let mut collections = self.collections.write();
        let mut outcome = UpdateOutcome::default();
        let state = match collections.get_mut(collection) {
            Some(state) => state,
            None => return Ok(outcome),
        };

        for index in 0..state.documents.len() {
            if !matcher::matches(&state.documents[index], &filter)? {
                continue;
            }
            outcome.matched += 1;

            let mut next = state.documents[index].clone();
            if !update::apply(&mut next, &update)? {
                continue;
            }
            let original_id = state.documents[index].get(ID_FIELD);
            if next.get(ID_FIELD) != original_id {
                outcome.write_errors.push(WriteError::new(
                    IMMUTABLE_FIELD_CODE,
                    "Performing an update would modify the immutable field '_id'",
                ));
                break;
            }
            if let Err(err) = state.check(&next, Some(index)) {
                outcome.write_errors.push(err);
                break;
            }
            state.documents[index] = next;
            outcome.modified += 1;
        }
        Ok(outcome)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocpipeResult<DeleteOutcome> {
        let mut collections = self.collections.write();
        let state = match collections.get_mut(collection) {
            Some(state) => state,
            None => return Ok(DeleteOutcome::default()),
        };

        let mut kept = Vec::with_capacity(state.documents.len());
        let mut deleted = 0;
        for doc in state.documents.drain(..) {
            if matcher::matches(&doc, &filter)? {
                deleted += 1;
            } else {
                kept.push(doc);
            }
        }
        state.documents = kept;
        Ok(DeleteOutcome { deleted })
    }

    async fn create_collection(&self, collection: &str, validator: Document) -> DocpipeResult<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(collection) {
            return Err(DocpipeError::Store(format!(
                "Collection '{}' already exists",
                collection
            )));
        }
        collections.insert(
            collection.to_string(),
            CollectionState {
                validator: Some(validator),
                ..CollectionState::default()
            },
        );
        Ok(())
    }

    async fn collection_validator(&self, collection: &str) -> DocpipeResult<Option<Document>> {
        self.collections
            .read()
            .get(collection)
            .map(|state| state.validator.clone())
            .ok_or_else(|| Self::not_found(collection))
    }

    async fn modify_validator(&self, collection: &str, validator: Document) -> DocpipeResult<()> {
        let mut collections = self.collections.write();
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection))?;
        state.validator = Some(validator);
        Ok(())
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocpipeResult<()> {
        let mut collections = self.collections.write();
        let state = collections.entry(collection.to_string()).or_default();

        for index in indexes {
            if index.unique {
                let keys: Vec<Vec<Bson>> = state
                    .documents
                    .iter()
                    .map(|doc| CollectionState::index_key(doc, &index))
                    .collect();
                for (i, key) in keys.iter().enumerate() {
                    if keys[..i].iter().any(|other| CollectionState::same_key(other, key)) {
                        return Err(DocpipeError::DuplicateKey(format!(
                            "E11000 duplicate key error index: {} dup key: {:?}",
                            index.resolved_name(),
                            key
                        )));
                    }
                }
            }
            let name = index.resolved_name();
            state.indexes.retain(|existing| existing.resolved_name() != name);
            state.indexes.push(index);
        }
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> DocpipeResult<()> {
        self.collections
            .write()
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(collection))
    }
}
