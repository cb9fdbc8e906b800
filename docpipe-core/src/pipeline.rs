//! Pipeline assembly and the compile entry points for each query action.
//!
//! Read pipelines are assembled in a fixed order:
//!
//! 1. `$lookup`/`$unwind` for every join, in join order
//! 2. `$match` with the folded filters
//! 3. `$project` of the requested raw keys (plus `_id`)
//! 4. distinct: `$group` on a composite key, then `$replaceRoot`
//! 5. `$sort`
//! 6. `$skip`
//! 7. `$limit`
//! 8. aggregate stage
//! 9. `$project` removing joined aliases from the output

use bson::{doc, Bson, Document};
use serde::Serialize;

use crate::aggregate::{compile_aggregate, normalize_aggregate_rows, Aggregate};
use crate::error::{CompileError, CompileResult};
use crate::field::{Field, ID_FIELD};
use crate::filter::{compile_filter, fold_relation};
use crate::join::compile_join;
use crate::query::{AggregateOptions, Query, QueryAction};
use crate::resolution::WritePlan;
use crate::sort::{compile_limit, compile_offset, compile_sorts};
use crate::update::{compile_update, merge_custom_update};
use crate::value::{encode_row, BsonEncoder, ValueEncoder};

/// Field holding the first document of each distinct group.
pub const DISTINCT_ROOT_FIELD: &str = "document";

/// A compiled read
#[derive(Debug, Clone, Serialize)]
pub struct ReadCommand {
    pub collection: String,
    pub pipeline: Vec<Document>,
    /// Kept to normalize empty aggregate results
    #[serde(skip)]
    pub aggregate: Option<Aggregate>,
    pub options: AggregateOptions,
}

impl ReadCommand {
    /// Apply the empty-result convention of the aggregate, if any.
    pub fn normalize(&self, rows: Vec<Document>) -> Vec<Document> {
        match &self.aggregate {
            Some(aggregate) => normalize_aggregate_rows(aggregate, rows),
            None => rows,
        }
    }
}

/// A compiled insert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertCommand {
    pub collection: String,
    pub documents: Vec<Document>,
}

/// A compiled update or delete
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteCommand {
    Update {
        collection: String,
        plan: WritePlan,
        /// `None` when the update would change nothing
        update: Option<Document>,
    },
    Delete {
        collection: String,
        plan: WritePlan,
    },
}

impl WriteCommand {
    pub fn collection(&self) -> &str {
        match self {
            WriteCommand::Update { collection, .. } | WriteCommand::Delete { collection, .. } => {
                collection
            }
        }
    }

    pub fn plan(&self) -> &WritePlan {
        match self {
            WriteCommand::Update { plan, .. } | WriteCommand::Delete { plan, .. } => plan,
        }
    }
}

/// Compile the top-level filters into one predicate.
pub fn compile_match(query: &Query, encoder: &dyn ValueEncoder) -> CompileResult<Option<Document>> {
    let mut children = Vec::with_capacity(query.filters.len());
    for filter in &query.filters {
        if let Some(compiled) = compile_filter(filter, &query.schema, encoder)? {
            children.push(compiled);
        }
    }
    fold_relation(children, &query.default_relation)
}

/// Assemble the read pipeline of a query regardless of its action.
pub fn assemble(query: &Query, encoder: &dyn ValueEncoder) -> CompileResult<Vec<Document>> {
    assemble_stages(query, encoder, true)
}

pub(crate) fn assemble_stages(
    query: &Query,
    encoder: &dyn ValueEncoder,
    with_aggregate: bool,
) -> CompileResult<Vec<Document>> {
    let main = query.schema.as_str();
    let mut stages = Vec::new();

    for join in &query.joins {
        stages.extend(compile_join(join, main)?);
    }

    if let Some(predicate) = compile_match(query, encoder)? {
        stages.push(doc! { "$match": predicate });
    }

    let raw: Vec<&Field> = query.raw_fields().collect();
    let aggregate = single_aggregate(query)?;

    if !raw.is_empty() {
        stages.push(compile_projection(query, &raw, aggregate)?);
    }

    if query.distinct {
        stages.extend(compile_distinct(main, &raw)?);
    }

    if let Some(sort) = compile_sorts(&query.sorts, main)? {
        stages.push(sort);
    }
    for offset in &query.offsets {
        stages.push(compile_offset(offset)?);
    }
    for limit in &query.limits {
        stages.push(compile_limit(limit)?);
    }

    if with_aggregate {
        if let Some(aggregate) = aggregate {
            stages.extend(compile_aggregate(aggregate, main)?);
        }
    }

    if let Some(exclusion) = compile_alias_exclusion(query, &raw)? {
        stages.push(exclusion);
    }

    Ok(stages)
}

fn single_aggregate(query: &Query) -> CompileResult<Option<&Aggregate>> {
    let mut aggregates = query.aggregates();
    let first = aggregates.next();
    if aggregates.next().is_some() {
        return Err(CompileError::UnsupportedAggregate(
            "only one aggregate per query is supported".to_string(),
        ));
    }
    Ok(first)
}

fn compile_projection(
    query: &Query,
    raw: &[&Field],
    aggregate: Option<&Aggregate>,
) -> CompileResult<Document> {
    let main = query.schema.as_str();
    let mut projection = doc! { ID_FIELD: 1_i32 };
    for field in raw {
        let path = field.storage_path(main)?;
        match field {
            Field::Path { alias: Some(alias), .. } => {
                projection.insert(alias.clone(), format!("${}", path));
            }
            _ => {
                projection.insert(path, 1_i32);
            }
        }
    }
    // The aggregate still has to see its input field.
    if let Some(Aggregate::Field { field, .. }) = aggregate {
        let path = field.storage_path(main)?;
        if !projection.contains_key(&path) {
            projection.insert(path, 1_i32);
        }
    }
    Ok(doc! { "$project": projection })
}

/// Name of the `index`th selected key inside the synthetic distinct id.
/// Positional so that distinct outputs never share a name.
fn distinct_key(index: usize) -> String {
    format!("k{}", index)
}

fn compile_distinct(main: &str, raw: &[&Field]) -> CompileResult<Vec<Document>> {
    let id = if raw.is_empty() {
        Bson::String(format!("${}", ID_FIELD))
    } else {
        let mut id = Document::new();
        for (index, field) in raw.iter().enumerate() {
            let output = field.output_name(main)?;
            id.insert(distinct_key(index), format!("${}", output));
        }
        Bson::Document(id)
    };

    Ok(vec![
        doc! {
            "$group": {
                "_id": id,
                DISTINCT_ROOT_FIELD: { "$first": "$$ROOT" },
            }
        },
        doc! { "$replaceRoot": { "newRoot": format!("${}", DISTINCT_ROOT_FIELD) } },
    ])
}

/// Exclude every joined alias that no requested key reads from.
fn compile_alias_exclusion(query: &Query, raw: &[&Field]) -> CompileResult<Option<Document>> {
    if query.joins.is_empty() {
        return Ok(None);
    }

    let mut requested = Vec::with_capacity(raw.len());
    for field in raw {
        if let Field::Path { alias: None, .. } = field {
            requested.push(field.storage_path(&query.schema)?);
        }
    }

    let mut exclusion = Document::new();
    for alias in query.joins.iter().filter_map(|join| join.output_alias()) {
        let kept = requested
            .iter()
            .any(|path| path == alias || path.starts_with(&format!("{}.", alias)));
        if !kept {
            exclusion.insert(alias, 0_i32);
        }
    }

    if exclusion.is_empty() {
        Ok(None)
    } else {
        Ok(Some(doc! { "$project": exclusion }))
    }
}

/// Compile a find query with the default encoder.
pub fn compile_read(query: &Query) -> CompileResult<ReadCommand> {
    compile_read_with(query, &BsonEncoder::new())
}

pub fn compile_read_with(query: &Query, encoder: &dyn ValueEncoder) -> CompileResult<ReadCommand> {
    expect_action(query, &[QueryAction::Find])?;
    let pipeline = assemble(query, encoder)?;
    tracing::debug!(
        collection = %query.schema,
        stages = pipeline.len(),
        "Compiled read pipeline"
    );
    Ok(ReadCommand {
        collection: query.schema.clone(),
        pipeline,
        aggregate: single_aggregate(query)?.cloned(),
        options: query.options.clone(),
    })
}

/// Compile an insert query with the default encoder.
pub fn compile_insert(query: &Query) -> CompileResult<InsertCommand> {
    compile_insert_with(query, &BsonEncoder::new())
}

pub fn compile_insert_with(
    query: &Query,
    encoder: &dyn ValueEncoder,
) -> CompileResult<InsertCommand> {
    expect_action(query, &[QueryAction::Insert])?;
    if query.input.is_empty() {
        return Err(CompileError::UnsupportedValue(
            "insert without input rows".to_string(),
        ));
    }
    let documents = query
        .input
        .iter()
        .map(|row| encode_row(row, encoder))
        .collect::<CompileResult<Vec<_>>>()?;
    Ok(InsertCommand {
        collection: query.schema.clone(),
        documents,
    })
}

/// Compile an update or delete query with the default encoder.
pub fn compile_write(query: &Query) -> CompileResult<WriteCommand> {
    compile_write_with(query, &BsonEncoder::new())
}

pub fn compile_write_with(query: &Query, encoder: &dyn ValueEncoder) -> CompileResult<WriteCommand> {
    expect_action(query, &[QueryAction::Update, QueryAction::Delete])?;
    let plan = WritePlan::plan(query, encoder)?;
    let collection = query.schema.clone();

    let command = if query.action == QueryAction::Update {
        let update = merge_custom_update(
            compile_update(&query.data, encoder)?,
            query.custom_update.as_ref(),
        );
        WriteCommand::Update {
            collection,
            plan,
            update,
        }
    } else {
        WriteCommand::Delete { collection, plan }
    };

    tracing::debug!(
        collection = %query.schema,
        action = query.action.as_str(),
        resolve_ids = command.plan().requires_resolution(),
        "Compiled write"
    );
    Ok(command)
}

fn expect_action(query: &Query, allowed: &[QueryAction]) -> CompileResult<()> {
    if allowed.contains(&query.action) {
        Ok(())
    } else {
        Err(CompileError::UnsupportedAction(query.action.as_str().to_string()))
    }
}
