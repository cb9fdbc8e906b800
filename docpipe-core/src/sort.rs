//! Sort, limit and offset compilation.

use bson::{Bson, Document};
use serde::Deserialize;

use crate::custom::{render_count, render_document, Custom};
use crate::error::{CompileError, CompileResult};
use crate::field::Field;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
    #[serde(skip)]
    Custom(Custom),
}

impl SortDirection {
    /// Native sort value: `1`, `-1`, or what a custom direction renders to
    /// (an integer or a document such as `{ "$meta": "textScore" }`).
    pub fn native(&self) -> CompileResult<Bson> {
        match self {
            SortDirection::Ascending => Ok(Bson::Int32(1)),
            SortDirection::Descending => Ok(Bson::Int32(-1)),
            SortDirection::Custom(node) => match node.render()? {
                value @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Document(_)) => Ok(value),
                other => Err(CompileError::UnsupportedSortDirection(other.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    Field {
        field: Field,
        direction: SortDirection,
    },
    #[serde(skip)]
    Custom(Custom),
}

impl Sort {
    pub fn ascending(field: Field) -> Self {
        Sort::Field {
            field,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: Field) -> Self {
        Sort::Field {
            field,
            direction: SortDirection::Descending,
        }
    }
}

/// Merge all sorts into one `$sort` stage, in declaration order.
pub fn compile_sorts(sorts: &[Sort], main_schema: &str) -> CompileResult<Option<Document>> {
    if sorts.is_empty() {
        return Ok(None);
    }

    let mut spec = Document::new();
    for sort in sorts {
        match sort {
            Sort::Field { field, direction } => {
                spec.insert(field.storage_path(main_schema)?, direction.native()?);
            }
            Sort::Custom(node) => {
                let rendered = render_document(node).unwrap_or_else(|| {
                    Err(CompileError::UnsupportedSort(
                        "custom sort must render to a document".to_string(),
                    ))
                })?;
                for (key, value) in rendered {
                    spec.insert(key, value);
                }
            }
        }
    }

    let mut stage = Document::new();
    stage.insert("$sort", spec);
    Ok(Some(stage))
}

/// Maximum number of rows to return
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "u64")]
pub enum Limit {
    Count(u64),
    Custom(Custom),
}

impl From<u64> for Limit {
    fn from(count: u64) -> Self {
        Limit::Count(count)
    }
}

/// Number of rows to skip
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "u64")]
pub enum Offset {
    Count(u64),
    Custom(Custom),
}

impl From<u64> for Offset {
    fn from(count: u64) -> Self {
        Offset::Count(count)
    }
}

pub fn compile_limit(limit: &Limit) -> CompileResult<Document> {
    let count = match limit {
        Limit::Count(count) => {
            i64::try_from(*count).map_err(|_| CompileError::UnsupportedLimit(count.to_string()))?
        }
        Limit::Custom(node) => render_count(node).unwrap_or_else(|| {
            Err(CompileError::UnsupportedLimit(
                "custom limit must render to a non-negative integer".to_string(),
            ))
        })?,
    };
    let mut stage = Document::new();
    stage.insert("$limit", count);
    Ok(stage)
}

pub fn compile_offset(offset: &Offset) -> CompileResult<Document> {
    let count = match offset {
        Offset::Count(count) => {
            i64::try_from(*count).map_err(|_| CompileError::UnsupportedOffset(count.to_string()))?
        }
        Offset::Custom(node) => render_count(node).unwrap_or_else(|| {
            Err(CompileError::UnsupportedOffset(
                "custom offset must render to a non-negative integer".to_string(),
            ))
        })?,
    };
    let mut stage = Document::new();
    stage.insert("$skip", count);
    Ok(stage)
}
