//! docpipe Core - Storage-independent compiler from relational query models to
//! document-store aggregation pipelines.
//!
//! This crate turns a [`Query`] or [`SchemaChange`] into native BSON: ordered
//! pipeline stages for reads, update/delete documents for writes, and
//! `$jsonSchema` validators plus index specifications for schema changes.
//! Compilation is pure and synchronous; executing the result is up to the
//! caller.
//!
//! # Main Components
//!
//! - **Value encoder**: Encodes query values into BSON through a `ValueEncoder`
//! - **Filter / join / sort / aggregate compilers**: One module per query part
//! - **Pipeline**: Assembles read pipelines and the per-action entry points
//! - **Update**: Compiles partial updates into `$set`/`$unset` or array operators
//! - **Schema**: Compiles validators and unique indexes
//! - **Resolution**: Plans writes whose filter needs a pipeline
//!
//! # Example
//!
//! ```rust
//! use bson::doc;
//! use docpipe_core::{compile_read, Field, Filter, Query};
//!
//! let query = Query::find("users")
//!     .filter(Filter::gt(Field::new("age"), 18))
//!     .filter(Filter::eq(Field::new("name"), "Bob"));
//!
//! let read = compile_read(&query).unwrap();
//! assert_eq!(
//!     read.pipeline,
//!     vec![doc! { "$match": { "$and": [
//!         { "age": { "$gt": 18 } },
//!         { "name": { "$eq": "Bob" } },
//!     ] } }]
//! );
//! ```

pub mod aggregate;
pub mod custom;
pub mod error;
pub mod field;
pub mod filter;
pub mod join;
pub mod pipeline;
pub mod query;
pub mod resolution;
pub mod schema;
pub mod sort;
pub mod update;
pub mod value;

// Re-export main types for convenience
pub use aggregate::{Aggregate, AggregateMethod, AGGREGATE_RESULT_FIELD};
pub use custom::{custom, Custom, CustomNode};
pub use error::{CompileError, CompileResult};
pub use field::{Field, FieldKey, ID_FIELD};
pub use filter::{ContainsLocation, Filter, Method, Relation};
pub use join::{Join, JoinMethod};
pub use pipeline::{
    assemble, compile_insert, compile_insert_with, compile_read, compile_read_with,
    compile_write, compile_write_with, InsertCommand, ReadCommand, WriteCommand,
};
pub use query::{AggregateOptions, Query, QueryAction, QueryField};
pub use resolution::{id_projection, requires_pipeline, resolved_filter, WritePlan};
pub use schema::{
    compile_schema, DataType, FieldConstraint, FieldDefinition, FieldUpdate, IndexSpec,
    SchemaAction, SchemaChange, SchemaCommand, SchemaConstraint,
};
pub use sort::{Limit, Offset, Sort, SortDirection};
pub use update::{NilPolicy, UpdateData, UpdateEntry, UpdateOperation};
pub use value::{Bind, BsonEncoder, QueryValue, ValueEncoder};
