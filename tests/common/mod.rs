//! Common test utilities for executor tests
//!
//! Provides shared helpers for:
//! - Seeding an in-memory store with users, teams and orders
//! - Recording the store calls an executor makes

#![allow(dead_code)]

use async_trait::async_trait;
use bson::{doc, Document};
use docpipe::{
    AggregateOptions, DeleteOutcome, DocpipeResult, DocumentStream, Executor, IndexSpec,
    InsertOutcome, MemoryStore, Store, UpdateOutcome,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed(
        "users",
        vec![
            doc! { "_id": 1, "name": "Ada", "age": 36, "team_id": 10, "tags": ["x"], "spent": 120, "budget": 100 },
            doc! { "_id": 2, "name": "Bob", "age": 17, "team_id": 20, "tags": [], "spent": 10, "budget": 50 },
            doc! { "_id": 3, "name": "Bob", "age": 42, "team_id": 10, "tags": ["a"], "spent": 80, "budget": 80 },
            doc! { "_id": 4, "name": "Cy", "age": 25, "spent": 0, "budget": 0 },
        ],
    );
    store.seed(
        "teams",
        vec![
            doc! { "_id": 10, "name": "core" },
            doc! { "_id": 20, "name": "web" },
        ],
    );
    store.seed(
        "orders",
        vec![
            doc! { "_id": 100, "user_id": 1, "status": "paid", "total": 30 },
            doc! { "_id": 101, "user_id": 1, "status": "open", "total": 12 },
            doc! { "_id": 102, "user_id": 3, "status": "paid", "total": 8 },
        ],
    );
    store
}

pub fn seeded_executor() -> (MemoryStore, Executor) {
    let store = seeded_store();
    let executor = Executor::new(Arc::new(store.clone()));
    (store, executor)
}

/// A store call as seen by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Aggregate {
        collection: String,
        pipeline: Vec<Document>,
    },
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    UpdateMany {
        collection: String,
        filter: Document,
        update: Document,
    },
    DeleteMany {
        collection: String,
        filter: Document,
    },
    CreateCollection {
        collection: String,
        validator: Document,
    },
    CollectionValidator {
        collection: String,
    },
    ModifyValidator {
        collection: String,
        validator: Document,
    },
    CreateIndexes {
        collection: String,
        indexes: Vec<IndexSpec>,
    },
    DropCollection {
        collection: String,
    },
}

/// Wraps a [`MemoryStore`] and records every call made through it.
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

pub fn recording_executor() -> (RecordingStore, Executor) {
    let store = RecordingStore::new(seeded_store());
    let executor = Executor::new(Arc::new(store.clone()));
    (store, executor)
}

#[async_trait]
impl Store for RecordingStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> DocpipeResult<DocumentStream> {
        self.record(Call::Aggregate {
            collection: collection.to_string(),
            pipeline: pipeline.clone(),
        });
        self.inner.aggregate(collection, pipeline, options).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocpipeResult<InsertOutcome> {
        self.record(Call::InsertMany {
            collection: collection.to_string(),
            documents: documents.clone(),
        });
        self.inner.insert_many(collection, documents).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DocpipeResult<UpdateOutcome> {
        self.record(Call::UpdateMany {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
        });
        self.inner.update_many(collection, filter, update).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocpipeResult<DeleteOutcome> {
        self.record(Call::DeleteMany {
            collection: collection.to_string(),
            filter: filter.clone(),
        });
        self.inner.delete_many(collection, filter).await
    }

    async fn create_collection(&self, collection: &str, validator: Document) -> DocpipeResult<()> {
        self.record(Call::CreateCollection {
            collection: collection.to_string(),
            validator: validator.clone(),
        });
        self.inner.create_collection(collection, validator).await
    }

    async fn collection_validator(&self, collection: &str) -> DocpipeResult<Option<Document>> {
        self.record(Call::CollectionValidator {
            collection: collection.to_string(),
        });
        self.inner.collection_validator(collection).await
    }

    async fn modify_validator(&self, collection: &str, validator: Document) -> DocpipeResult<()> {
        self.record(Call::ModifyValidator {
            collection: collection.to_string(),
            validator: validator.clone(),
        });
        self.inner.modify_validator(collection, validator).await
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexSpec>) -> DocpipeResult<()> {
        self.record(Call::CreateIndexes {
            collection: collection.to_string(),
            indexes: indexes.clone(),
        });
        self.inner.create_indexes(collection, indexes).await
    }

    async fn drop_collection(&self, collection: &str) -> DocpipeResult<()> {
        self.record(Call::DropCollection {
            collection: collection.to_string(),
        });
        self.inner.drop_collection(collection).await
    }
}
