//! Join compilation into `$lookup`/`$unwind` stage pairs.

use bson::{doc, Bson, Document};
use serde::Deserialize;

use crate::custom::Custom;
use crate::error::{CompileError, CompileResult};
use crate::field::Field;

/// How unmatched rows of a join are treated
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMethod {
    /// Keep the joined documents as an array on the row
    Left,
    /// One row per match; rows without a match are dropped
    Inner,
    /// One row per match; rows without a match are kept
    Outer,
    Custom(String),
}

/// A join against another collection
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Join {
    Collection {
        /// Target collection
        schema: String,
        /// Name of the joined output; defaults to the target collection
        #[serde(default)]
        alias: Option<String>,
        method: JoinMethod,
        /// Field of the target collection
        foreign: Field,
        /// Field of the main (or an earlier joined) collection
        local: Field,
    },
    #[serde(skip)]
    Custom(Custom),
}

impl Join {
    pub fn new(schema: impl Into<String>, method: JoinMethod, foreign: Field, local: Field) -> Self {
        Join::Collection {
            schema: schema.into(),
            alias: None,
            method,
            foreign,
            local,
        }
    }

    pub fn inner(schema: impl Into<String>, foreign: Field, local: Field) -> Self {
        Join::new(schema, JoinMethod::Inner, foreign, local)
    }

    pub fn left(schema: impl Into<String>, foreign: Field, local: Field) -> Self {
        Join::new(schema, JoinMethod::Left, foreign, local)
    }

    pub fn outer(schema: impl Into<String>, foreign: Field, local: Field) -> Self {
        Join::new(schema, JoinMethod::Outer, foreign, local)
    }

    pub fn aliased(mut self, name: impl Into<String>) -> Self {
        if let Join::Collection { alias, .. } = &mut self {
            *alias = Some(name.into());
        }
        self
    }

    /// Name the joined documents appear under. Unknown for custom joins.
    pub fn output_alias(&self) -> Option<&str> {
        match self {
            Join::Collection { schema, alias, .. } => Some(alias.as_deref().unwrap_or(schema)),
            Join::Custom(_) => None,
        }
    }
}

/// Compile a join into its `$lookup` stage followed, for inner and outer
/// joins, by an `$unwind` of the joined alias.
pub fn compile_join(join: &Join, main_schema: &str) -> CompileResult<Vec<Document>> {
    match join {
        Join::Collection {
            schema,
            alias,
            method,
            foreign,
            local,
        } => {
            let alias = alias.as_deref().unwrap_or(schema);
            let preserve = match method {
                JoinMethod::Left => None,
                JoinMethod::Inner => Some(false),
                JoinMethod::Outer => Some(true),
                JoinMethod::Custom(token) => {
                    return Err(CompileError::UnsupportedJoinMethod(token.clone()))
                }
            };

            let local_field = local.storage_path(main_schema)?;
            // The foreign field is resolved inside the target collection.
            let foreign_field = match foreign.schema() {
                Some(owner) if owner == alias => foreign.storage_path(alias)?,
                _ => foreign.storage_path(schema)?,
            };

            let mut stages = vec![doc! {
                "$lookup": {
                    "from": schema.as_str(),
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": alias,
                }
            }];

            if let Some(preserve) = preserve {
                stages.push(doc! {
                    "$unwind": {
                        "path": format!("${}", alias),
                        "preserveNullAndEmptyArrays": preserve,
                    }
                });
            }

            Ok(stages)
        }
        Join::Custom(node) => match node.render()? {
            Bson::Document(stage) => Ok(vec![stage]),
            Bson::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Bson::Document(stage) => Ok(stage),
                    other => Err(CompileError::UnsupportedJoin(format!(
                        "custom join stage rendered to {}",
                        other
                    ))),
                })
                .collect(),
            other => Err(CompileError::UnsupportedJoin(format!(
                "custom join rendered to {}",
                other
            ))),
        },
    }
}
