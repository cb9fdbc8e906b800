//! Two-phase execution of writes whose targets need a pipeline.
//!
//! Phase one runs the planned pipeline as a read and materializes the `_id` of
//! every matching document. Phase two hands `{ "_id": { "$in": ids } }` to the
//! store's native write. Nothing holds the matched set stable between the two
//! phases.

use bson::{Bson, Document};
use docpipe_core::{resolved_filter, AggregateOptions, WritePlan, ID_FIELD};
use futures::StreamExt;

use crate::error::{DocpipeError, DocpipeResult};
use crate::store::Store;

/// Run a phase-one pipeline and collect the identities it yields.
pub async fn resolve_ids(
    store: &dyn Store,
    collection: &str,
    pipeline: Vec<Document>,
    options: &AggregateOptions,
) -> DocpipeResult<Vec<Bson>> {
    let mut stream = store.aggregate(collection, pipeline, options).await?;
    let mut ids = Vec::new();
    while let Some(row) = stream.next().await {
        let row = row?;
        match row.get(ID_FIELD) {
            Some(id) => ids.push(id.clone()),
            None => {
                return Err(DocpipeError::InvalidResult(format!(
                    "resolved row without {}: {}",
                    ID_FIELD, row
                )))
            }
        }
    }
    tracing::debug!(collection, ids = ids.len(), "Resolved write targets");
    Ok(ids)
}

/// Predicate the native write should use for a plan.
pub async fn target_filter(
    store: &dyn Store,
    collection: &str,
    plan: &WritePlan,
    options: &AggregateOptions,
) -> DocpipeResult<Document> {
    match plan {
        WritePlan::Direct { filter } => Ok(filter.clone()),
        WritePlan::ResolveIds { pipeline } => {
            let ids = resolve_ids(store, collection, pipeline.clone(), options).await?;
            Ok(resolved_filter(ids))
        }
    }
}
