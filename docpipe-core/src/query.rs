//! The query model handed to the compiler.

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::field::Field;
use crate::filter::{Filter, Relation};
use crate::join::Join;
use crate::sort::{Limit, Offset, Sort};
use crate::update::UpdateData;
use crate::value::QueryValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryAction {
    Insert,
    #[default]
    Find,
    Update,
    Delete,
}

impl QueryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryAction::Insert => "insert",
            QueryAction::Find => "find",
            QueryAction::Update => "update",
            QueryAction::Delete => "delete",
        }
    }
}

/// A requested output key
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    Raw(Field),
    Aggregate(Aggregate),
}

/// Options passed through to the store's aggregate command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
    pub max_time_ms: Option<u64>,
    pub comment: Option<String>,
}

/// A database-agnostic query against one collection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Main collection
    pub schema: String,
    pub action: QueryAction,
    pub fields: Vec<QueryField>,
    pub distinct: bool,
    pub joins: Vec<Join>,
    /// Top-level filters, combined with `default_relation`
    pub filters: Vec<Filter>,
    pub default_relation: Relation,
    /// Rows to insert
    pub input: Vec<QueryValue>,
    pub data: UpdateData,
    /// Raw update operators merged into the compiled update
    pub custom_update: Option<Document>,
    pub offsets: Vec<Offset>,
    pub limits: Vec<Limit>,
    pub sorts: Vec<Sort>,
    pub options: AggregateOptions,
}

impl Query {
    pub fn new(schema: impl Into<String>, action: QueryAction) -> Self {
        Self {
            schema: schema.into(),
            action,
            ..Self::default()
        }
    }

    pub fn find(schema: impl Into<String>) -> Self {
        Self::new(schema, QueryAction::Find)
    }

    pub fn insert(schema: impl Into<String>) -> Self {
        Self::new(schema, QueryAction::Insert)
    }

    pub fn update(schema: impl Into<String>) -> Self {
        Self::new(schema, QueryAction::Update)
    }

    pub fn delete(schema: impl Into<String>) -> Self {
        Self::new(schema, QueryAction::Delete)
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(QueryField::Raw(field));
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.fields.push(QueryField::Aggregate(aggregate));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.default_relation = relation;
        self
    }

    pub fn row(mut self, row: QueryValue) -> Self {
        self.input.push(row);
        self
    }

    pub fn set_data(mut self, data: UpdateData) -> Self {
        self.data = data;
        self
    }

    pub fn custom_update(mut self, update: Document) -> Self {
        self.custom_update = Some(update);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limits.push(Limit::Count(count));
        self
    }

    pub fn offset(mut self, count: u64) -> Self {
        self.offsets.push(Offset::Count(count));
        self
    }

    pub fn options(mut self, options: AggregateOptions) -> Self {
        self.options = options;
        self
    }

    /// Requested raw (non-aggregate) fields.
    pub fn raw_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter_map(|field| match field {
            QueryField::Raw(field) => Some(field),
            QueryField::Aggregate(_) => None,
        })
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &Aggregate> {
        self.fields.iter().filter_map(|field| match field {
            QueryField::Aggregate(aggregate) => Some(aggregate),
            QueryField::Raw(_) => None,
        })
    }

    /// Whether any filter compares two fields.
    pub fn uses_expression(&self) -> bool {
        self.filters.iter().any(Filter::uses_expression)
    }
}
