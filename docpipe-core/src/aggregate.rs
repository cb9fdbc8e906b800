//! Aggregate compilation into `$count`/`$group` stages.

use bson::{doc, Bson, Document};
use serde::Deserialize;

use crate::custom::Custom;
use crate::error::{CompileError, CompileResult};
use crate::field::Field;

/// Field under which a single computed aggregate value is returned.
pub const AGGREGATE_RESULT_FIELD: &str = "aggregateResult";

/// Accumulators accepted for `AggregateMethod::Custom`.
const EXTENDED_ACCUMULATORS: &[&str] = &[
    "addToSet",
    "avg",
    "first",
    "last",
    "max",
    "mergeObjects",
    "min",
    "push",
    "stdDevPop",
    "stdDevSamp",
    "sum",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMethod {
    Count,
    Sum,
    Average,
    Minimum,
    Maximum,
    /// Name of a group accumulator, e.g. `stdDevPop`
    Custom(String),
}

impl AggregateMethod {
    /// Group accumulator operator for this method. `Count` has none.
    pub fn accumulator(&self) -> CompileResult<String> {
        match self {
            AggregateMethod::Count => Err(CompileError::UnsupportedAggregateMethod(
                "count has no accumulator".to_string(),
            )),
            AggregateMethod::Sum => Ok("$sum".to_string()),
            AggregateMethod::Average => Ok("$avg".to_string()),
            AggregateMethod::Minimum => Ok("$min".to_string()),
            AggregateMethod::Maximum => Ok("$max".to_string()),
            AggregateMethod::Custom(name) => {
                let bare = name.trim_start_matches('$');
                if EXTENDED_ACCUMULATORS.contains(&bare) {
                    Ok(format!("${}", bare))
                } else {
                    Err(CompileError::UnsupportedAggregateMethod(name.clone()))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Field {
        field: Field,
        method: AggregateMethod,
    },
    #[serde(skip)]
    Custom(Custom),
}

impl Aggregate {
    pub fn new(field: Field, method: AggregateMethod) -> Self {
        Aggregate::Field { field, method }
    }

    pub fn count(field: Field) -> Self {
        Aggregate::new(field, AggregateMethod::Count)
    }

    pub fn sum(field: Field) -> Self {
        Aggregate::new(field, AggregateMethod::Sum)
    }
}

/// Compile an aggregate into the stages that produce its single result row.
pub fn compile_aggregate(aggregate: &Aggregate, main_schema: &str) -> CompileResult<Vec<Document>> {
    match aggregate {
        Aggregate::Field {
            method: AggregateMethod::Count,
            ..
        } => Ok(vec![doc! { "$count": AGGREGATE_RESULT_FIELD }]),
        Aggregate::Field { field, method } => {
            let op = method.accumulator()?;
            let reference = field.field_reference(main_schema)?;
            Ok(vec![doc! {
                "$group": {
                    "_id": Bson::Null,
                    AGGREGATE_RESULT_FIELD: { op: reference },
                }
            }])
        }
        Aggregate::Custom(node) => match node.render()? {
            Bson::Document(stage) => Ok(vec![stage]),
            Bson::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Bson::Document(stage) => Ok(stage),
                    other => Err(CompileError::UnsupportedAggregate(format!(
                        "custom aggregate stage rendered to {}",
                        other
                    ))),
                })
                .collect(),
            other => Err(CompileError::UnsupportedAggregate(format!(
                "custom aggregate rendered to {}",
                other
            ))),
        },
    }
}

/// Row reported when the aggregate pipeline yields nothing (a group or count
/// over an empty input produces no document at all).
pub fn empty_result(aggregate: &Aggregate) -> Document {
    match aggregate {
        Aggregate::Field {
            method: AggregateMethod::Count,
            ..
        } => doc! { AGGREGATE_RESULT_FIELD: 0_i32 },
        _ => doc! { AGGREGATE_RESULT_FIELD: Bson::Null },
    }
}

/// Replace an empty aggregate result set with the canonical empty row.
pub fn normalize_aggregate_rows(aggregate: &Aggregate, rows: Vec<Document>) -> Vec<Document> {
    if rows.is_empty() {
        vec![empty_result(aggregate)]
    } else {
        rows
    }
}
