//! Runs compiled queries and schema changes against a [`Store`].
//!
//! Every store round-trip holds a permit from a bounded pool, so at most
//! `max_in_flight` operations are outstanding at once. Writes that need a
//! pipeline to find their targets hold one permit across both phases.

use bson::{Bson, Document};
use docpipe_core::aggregate::empty_result;
use docpipe_core::{
    compile_insert_with, compile_read_with, compile_schema, compile_write_with,
    AggregateOptions, BsonEncoder, CompileError, Query, QueryAction, ReadCommand, SchemaAction,
    SchemaChange, SchemaCommand, WriteCommand,
};
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::{DocpipeError, DocpipeResult};
use crate::resolution::target_filter;
use crate::store::{check_write_errors, Store, UpdateOutcome};

/// Result of [`Executor::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Document>),
    Inserted(Vec<Bson>),
    Updated { matched: u64, modified: u64 },
    Deleted(u64),
}

pub struct Executor {
    store: Arc<dyn Store>,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    encoder: BsonEncoder,
}

impl Executor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, ExecutorConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: ExecutorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let encoder = BsonEncoder::new().human_readable(config.human_readable_binds);
        Self {
            store,
            config,
            permits,
            encoder,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    async fn permit(&self) -> DocpipeResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| DocpipeError::Store("executor permit pool closed".to_string()))
    }

    /// Query options with unset values taken from the config.
    fn aggregate_options(&self, options: &AggregateOptions) -> AggregateOptions {
        AggregateOptions {
            allow_disk_use: options.allow_disk_use.or(Some(self.config.allow_disk_use)),
            batch_size: options.batch_size.or(self.config.batch_size),
            max_time_ms: options.max_time_ms.or(self.config.max_time_ms),
            comment: options.comment.clone(),
        }
    }

    fn compile_read(&self, query: &Query) -> DocpipeResult<ReadCommand> {
        Ok(compile_read_with(query, &self.encoder)?)
    }

    /// Run a find query and collect its rows.
    pub async fn find(&self, query: &Query) -> DocpipeResult<Vec<Document>> {
        let command = self.compile_read(query)?;
        let op_id = Uuid::new_v4();
        tracing::debug!(
            %op_id,
            collection = %command.collection,
            stages = command.pipeline.len(),
            "Running read"
        );

        let options = self.aggregate_options(&command.options);
        let _permit = self.permit().await?;
        let rows: Vec<Document> = self
            .store
            .aggregate(&command.collection, command.pipeline.clone(), &options)
            .await?
            .try_collect()
            .await?;

        tracing::debug!(%op_id, rows = rows.len(), "Read finished");
        Ok(command.normalize(rows))
    }

    /// Run a find query, handing each row to `handler` on its own task.
    ///
    /// Resolves after every handler task has finished. Rows are enumerated in
    /// store order; handlers may complete in any order. Returns the number of
    /// rows delivered.
    pub async fn find_each<F, Fut>(&self, query: &Query, handler: F) -> DocpipeResult<usize>
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let command = self.compile_read(query)?;
        let op_id = Uuid::new_v4();
        tracing::debug!(
            %op_id,
            collection = %command.collection,
            stages = command.pipeline.len(),
            "Streaming read"
        );

        let handler = Arc::new(handler);
        let spawn = |row: Document| {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler(row).await })
        };

        let options = self.aggregate_options(&command.options);
        let mut tasks = Vec::new();
        let mut failure = None;
        {
            // Released before the handlers are awaited
            let _permit = self.permit().await?;
            let mut stream = self
                .store
                .aggregate(&command.collection, command.pipeline.clone(), &options)
                .await?;
            while let Some(row) = stream.next().await {
                match row {
                    Ok(row) => tasks.push(spawn(row)),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }
        if failure.is_none() && tasks.is_empty() {
            if let Some(aggregate) = &command.aggregate {
                tasks.push(spawn(empty_result(aggregate)));
            }
        }

        let delivered = tasks.len();
        for result in futures::future::join_all(tasks).await {
            if let Err(err) = result {
                tracing::warn!(%op_id, error = %err, "Row handler failed");
            }
        }

        match failure {
            Some(err) => Err(err),
            None => {
                tracing::debug!(%op_id, rows = delivered, "Streaming read finished");
                Ok(delivered)
            }
        }
    }

    /// Insert the query's input rows. Returns the identities of the inserted
    /// documents in input order.
    pub async fn insert(&self, query: &Query) -> DocpipeResult<Vec<Bson>> {
        let command = compile_insert_with(query, &self.encoder)?;
        let expected = command.documents.len();
        tracing::debug!(collection = %command.collection, documents = expected, "Running insert");

        let _permit = self.permit().await?;
        let outcome = self
            .store
            .insert_many(&command.collection, command.documents)
            .await?;
        check_write_errors(&outcome.write_errors)?;

        if outcome.inserted_ids.len() != expected {
            return Err(DocpipeError::InsertCountMismatch {
                expected,
                actual: outcome.inserted_ids.len(),
            });
        }
        Ok(outcome.inserted_ids)
    }

    /// Run an update query. A query whose update would change nothing is not
    /// sent to the store.
    pub async fn update(&self, query: &Query) -> DocpipeResult<UpdateOutcome> {
        if query.action != QueryAction::Update {
            return Err(CompileError::UnsupportedAction(query.action.as_str().to_string()).into());
        }
        let (collection, plan, update) = match compile_write_with(query, &self.encoder)? {
            WriteCommand::Update {
                collection,
                plan,
                update,
            } => (collection, plan, update),
            WriteCommand::Delete { .. } => {
                return Err(CompileError::UnsupportedAction(QueryAction::Delete.as_str().to_string()).into())
            }
        };

        let update = match update {
            Some(update) => update,
            None => {
                tracing::debug!(collection = %collection, "Update changes nothing, skipping");
                return Ok(UpdateOutcome::default());
            }
        };

        tracing::debug!(
            collection = %collection,
            resolve_ids = plan.requires_resolution(),
            "Running update"
        );
        let options = self.aggregate_options(&query.options);
        let _permit = self.permit().await?;
        let filter = target_filter(self.store.as_ref(), &collection, &plan, &options).await?;
        let outcome = self.store.update_many(&collection, filter, update).await?;
        check_write_errors(&outcome.write_errors)?;
        Ok(outcome)
    }

    /// Run a delete query. Returns the number of deleted documents.
    pub async fn delete(&self, query: &Query) -> DocpipeResult<u64> {
        if query.action != QueryAction::Delete {
            return Err(CompileError::UnsupportedAction(query.action.as_str().to_string()).into());
        }
        let command = compile_write_with(query, &self.encoder)?;
        tracing::debug!(
            collection = %command.collection(),
            resolve_ids = command.plan().requires_resolution(),
            "Running delete"
        );

        let options = self.aggregate_options(&query.options);
        let _permit = self.permit().await?;
        let filter =
            target_filter(self.store.as_ref(), command.collection(), command.plan(), &options).await?;
        let outcome = self.store.delete_many(command.collection(), filter).await?;
        Ok(outcome.deleted)
    }

    /// Run a query according to its action.
    pub async fn execute(&self, query: &Query) -> DocpipeResult<QueryOutcome> {
        match query.action {
            QueryAction::Find => self.find(query).await.map(QueryOutcome::Rows),
            QueryAction::Insert => self.insert(query).await.map(QueryOutcome::Inserted),
            QueryAction::Update => {
                let outcome = self.update(query).await?;
                Ok(QueryOutcome::Updated {
                    matched: outcome.matched,
                    modified: outcome.modified,
                })
            }
            QueryAction::Delete => self.delete(query).await.map(QueryOutcome::Deleted),
        }
    }

    /// Compile and apply a schema change. Alters read the collection's
    /// current validator first so new properties merge into it.
    pub async fn apply_schema(&self, change: &SchemaChange) -> DocpipeResult<SchemaCommand> {
        let _permit = self.permit().await?;
        let existing = match change.action {
            SchemaAction::Update => self.store.collection_validator(&change.schema).await?,
            SchemaAction::Create | SchemaAction::Delete => None,
        };
        let command = compile_schema(change, existing.as_ref())?;
        tracing::info!(
            collection = %command.collection(),
            action = ?change.action,
            "Applying schema change"
        );

        match &command {
            SchemaCommand::Create {
                collection,
                validator,
                indexes,
            } => {
                self.store
                    .create_collection(collection, validator.clone())
                    .await?;
                if !indexes.is_empty() {
                    self.store.create_indexes(collection, indexes.clone()).await?;
                }
            }
            SchemaCommand::Alter {
                collection,
                validator,
                indexes,
            } => {
                self.store
                    .modify_validator(collection, validator.clone())
                    .await?;
                if !indexes.is_empty() {
                    self.store.create_indexes(collection, indexes.clone()).await?;
                }
            }
            SchemaCommand::Drop { collection } => self.store.drop_collection(collection).await?,
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use bson::doc;
    use docpipe_core::{Aggregate, DataType, Field, FieldDefinition, Filter, UpdateData};
    use std::sync::Mutex;

    fn executor() -> (MemoryStore, Executor) {
        let store = MemoryStore::new();
        store.seed(
            "users",
            vec![
                doc! { "_id": 1, "name": "Ada", "age": 36 },
                doc! { "_id": 2, "name": "Bob", "age": 17 },
            ],
        );
        let executor = Executor::new(Arc::new(store.clone()));
        (store, executor)
    }

    #[tokio::test]
    async fn test_find() {
        let (_, executor) = executor();
        let rows = executor
            .find(&Query::find("users").filter(Filter::gt(Field::new("age"), 18)))
            .await
            .unwrap();
        assert_eq!(rows, vec![doc! { "_id": 1, "name": "Ada", "age": 36 }]);
    }

    #[tokio::test]
    async fn test_find_rejects_other_actions() {
        let (_, executor) = executor();
        let err = executor.find(&Query::delete("users")).await.unwrap_err();
        assert!(err.is_syntax());
    }

    #[tokio::test]
    async fn test_find_each_waits_for_every_handler() {
        let (_, executor) = executor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let delivered = executor
            .find_each(&Query::find("users"), move |row| {
                let sink = Arc::clone(&sink);
                async move {
                    tokio::task::yield_now().await;
                    if let Ok(name) = row.get_str("name") {
                        sink.lock().unwrap().push(name.to_string());
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(delivered, 2);
        let mut names = seen.lock().unwrap().clone();
        names.sort();
        assert_eq!(names, vec!["Ada".to_string(), "Bob".to_string()]);
    }

    #[tokio::test]
    async fn test_find_each_handler_can_read_with_single_permit() {
        let store = MemoryStore::new();
        store.seed("users", vec![doc! { "_id": 1, "name": "Ada", "team_id": 10 }]);
        store.seed("teams", vec![doc! { "_id": 10, "name": "core" }]);
        let config = ExecutorConfig {
            max_in_flight: 1,
            ..ExecutorConfig::default()
        };
        let executor = Arc::new(Executor::with_config(Arc::new(store), config));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner = Arc::clone(&executor);
        let delivered = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            executor.find_each(&Query::find("users").limit(1), move |row| {
                let sink = Arc::clone(&sink);
                let inner = Arc::clone(&inner);
                async move {
                    let team_id = row.get_i32("team_id").unwrap();
                    let teams = inner
                        .find(&Query::find("teams").filter(Filter::eq(Field::id(), team_id)))
                        .await
                        .unwrap();
                    sink.lock().unwrap().extend(teams);
                }
            }),
        )
        .await
        .expect("streaming read should not wait on its own permit")
        .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![doc! { "_id": 10, "name": "core" }]
        );
    }

    #[tokio::test]
    async fn test_find_each_delivers_empty_aggregate_row() {
        let (_, executor) = executor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let query = Query::find("users")
            .filter(Filter::gt(Field::new("age"), 99))
            .aggregate(Aggregate::count(Field::id()));
        executor
            .find_each(&query, move |row| {
                let sink = Arc::clone(&sink);
                async move { sink.lock().unwrap().push(row) }
            })
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![doc! { "aggregateResult": 0 }]);
    }

    #[tokio::test]
    async fn test_update_without_changes_is_skipped() {
        let (store, executor) = executor();
        let outcome = executor.update(&Query::update("users")).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::default());
        assert_eq!(store.documents("users").len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (store, executor) = executor();
        let outcome = executor
            .update(
                &Query::update("users")
                    .filter(Filter::eq(Field::new("name"), "Bob"))
                    .set_data(UpdateData::new().set("age", 18)),
            )
            .await
            .unwrap();
        assert_eq!((outcome.matched, outcome.modified), (1, 1));
        assert_eq!(store.documents("users")[1].get_i32("age").unwrap(), 18);

        let deleted = executor
            .delete(&Query::delete("users").filter(Filter::eq(Field::new("name"), "Ada")))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.documents("users").len(), 1);
    }

    #[tokio::test]
    async fn test_schema_alter_merges_existing_validator() {
        let store = MemoryStore::new();
        let executor = Executor::new(Arc::new(store.clone()));
        executor
            .apply_schema(
                &SchemaChange::create("users")
                    .field(FieldDefinition::new("name", DataType::String).required()),
            )
            .await
            .unwrap();
        executor
            .apply_schema(
                &SchemaChange::update("users")
                    .update_field(docpipe_core::FieldUpdate::new("age", DataType::Int32)),
            )
            .await
            .unwrap();

        assert_eq!(
            store.validator("users"),
            Some(doc! { "$jsonSchema": {
                "bsonType": "object",
                "required": ["name"],
                "properties": {
                    "name": { "bsonType": "string" },
                    "age": { "bsonType": "int" },
                },
            } })
        );
    }

    #[tokio::test]
    async fn test_alter_of_missing_collection() {
        let executor = Executor::new(Arc::new(MemoryStore::new()));
        let err = executor
            .apply_schema(&SchemaChange::update("ghosts"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocpipeError::CollectionNotFound(_)));
        assert!(err.is_result_shape());
    }

    #[test]
    fn test_options_fall_back_to_config() {
        let config = ExecutorConfig {
            allow_disk_use: true,
            max_time_ms: Some(500),
            ..ExecutorConfig::default()
        };
        let executor = Executor::with_config(Arc::new(MemoryStore::new()), config);
        let options = executor.aggregate_options(&AggregateOptions {
            max_time_ms: Some(100),
            ..AggregateOptions::default()
        });
        assert_eq!(options.allow_disk_use, Some(true));
        assert_eq!(options.max_time_ms, Some(100));
        assert_eq!(options.batch_size, None);
    }
}
