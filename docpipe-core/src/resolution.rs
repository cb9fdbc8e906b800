//! Write planning: how an update or delete finds the documents it targets.
//!
//! Native `updateMany`/`deleteMany` only take a flat predicate. When the
//! filter needs pipeline stages (joins, field-to-field comparisons) or row
//! windows, the targets are resolved in two phases: the read pipeline runs
//! first and yields the matching `_id`s, then the write targets
//! `{ "_id": { "$in": ids } }`.
//!
//! The two phases are not atomic. Documents inserted or changed between them
//! may be missed or written to although they no longer match.

use bson::{doc, Bson, Document};
use serde::Serialize;

use crate::error::CompileResult;
use crate::field::ID_FIELD;
use crate::pipeline::{assemble_stages, compile_match};
use crate::query::Query;
use crate::value::ValueEncoder;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePlan {
    /// Predicate usable directly by the store's write
    Direct { filter: Document },
    /// Pipeline yielding the `_id` of every targeted document
    ResolveIds { pipeline: Vec<Document> },
}

impl WritePlan {
    pub fn plan(query: &Query, encoder: &dyn ValueEncoder) -> CompileResult<Self> {
        if requires_pipeline(query) {
            let mut pipeline = assemble_stages(query, encoder, false)?;
            pipeline.push(id_projection());
            Ok(WritePlan::ResolveIds { pipeline })
        } else {
            let filter = compile_match(query, encoder)?.unwrap_or_default();
            Ok(WritePlan::Direct { filter })
        }
    }

    pub fn requires_resolution(&self) -> bool {
        matches!(self, WritePlan::ResolveIds { .. })
    }
}

/// Whether the query's targets can only be found through a pipeline.
pub fn requires_pipeline(query: &Query) -> bool {
    !query.joins.is_empty()
        || query.uses_expression()
        || !query.limits.is_empty()
        || !query.offsets.is_empty()
}

/// Stage keeping only the identity of each row.
pub fn id_projection() -> Document {
    doc! { "$project": { ID_FIELD: 1_i32 } }
}

/// Predicate for phase two.
pub fn resolved_filter(ids: Vec<Bson>) -> Document {
    doc! { ID_FIELD: { "$in": ids } }
}
