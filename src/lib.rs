pub mod config;
pub mod error;
pub mod executor;
pub mod memory;
pub mod resolution;
pub mod store;

pub use config::ExecutorConfig;
pub use error::{DocpipeError, DocpipeResult};
pub use executor::{Executor, QueryOutcome};
pub use memory::MemoryStore;
pub use resolution::{resolve_ids, target_filter};
pub use store::{
    check_write_errors, DeleteOutcome, DocumentStream, InsertOutcome, Store, UpdateOutcome,
    WriteError, DUPLICATE_KEY_CODE, VALIDATION_FAILED_CODE,
};

pub use docpipe_core::{
    compile_insert, compile_read, compile_schema, compile_write, Aggregate, AggregateMethod,
    AggregateOptions, CompileError, DataType, Field, FieldDefinition, FieldKey, FieldUpdate,
    Filter, IndexSpec, Join, JoinMethod, Method, Query, QueryAction, QueryValue, ReadCommand,
    Relation, SchemaAction, SchemaChange, SchemaCommand, SchemaConstraint, Sort, SortDirection,
    UpdateData, WriteCommand, WritePlan,
};
