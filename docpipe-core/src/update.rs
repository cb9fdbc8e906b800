//! Update compilation into `$set`/`$unset` and array-mutation documents.

use bson::{doc, Bson, Document};
use serde::Deserialize;

use crate::error::CompileResult;
use crate::field::FieldKey;
use crate::value::{encode_value, QueryValue, ValueEncoder};

/// Which update operator the entries are applied with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOperation {
    /// Plain field assignment (`$set`/`$unset`)
    #[default]
    Set,
    /// Add array elements that are not already present
    AddToSet,
    /// Append array elements
    Push,
    /// Remove every occurrence of the given array elements
    PullAll,
}

impl UpdateOperation {
    fn operator(self) -> &'static str {
        match self {
            UpdateOperation::Set => "$set",
            UpdateOperation::AddToSet => "$addToSet",
            UpdateOperation::Push => "$push",
            UpdateOperation::PullAll => "$pullAll",
        }
    }
}

/// What a nil value (null, or a bind serializing to null) means for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NilPolicy {
    /// Store an explicit null
    #[default]
    SetNull,
    /// Remove the field from the document
    Unset,
    /// Leave the field untouched
    Ignore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEntry {
    pub key: FieldKey,
    pub value: QueryValue,
    #[serde(default)]
    pub on_nil: NilPolicy,
}

/// Partial update of a document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateData {
    pub operation: UpdateOperation,
    pub entries: Vec<UpdateEntry>,
}

impl UpdateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(operation: UpdateOperation) -> Self {
        Self {
            operation,
            entries: Vec::new(),
        }
    }

    pub fn add_to_set() -> Self {
        Self::with_operation(UpdateOperation::AddToSet)
    }

    pub fn push() -> Self {
        Self::with_operation(UpdateOperation::Push)
    }

    pub fn pull_all() -> Self {
        Self::with_operation(UpdateOperation::PullAll)
    }

    fn entry(mut self, key: impl Into<FieldKey>, value: QueryValue, on_nil: NilPolicy) -> Self {
        self.entries.push(UpdateEntry {
            key: key.into(),
            value,
            on_nil,
        });
        self
    }

    /// Assign a value; nil stores null.
    pub fn set(self, key: impl Into<FieldKey>, value: impl Into<QueryValue>) -> Self {
        self.entry(key, value.into(), NilPolicy::SetNull)
    }

    /// Assign a value; nil removes the field.
    pub fn set_or_unset(self, key: impl Into<FieldKey>, value: impl Into<QueryValue>) -> Self {
        self.entry(key, value.into(), NilPolicy::Unset)
    }

    /// Assign a value; nil leaves the field untouched.
    pub fn set_if_present(self, key: impl Into<FieldKey>, value: impl Into<QueryValue>) -> Self {
        self.entry(key, value.into(), NilPolicy::Ignore)
    }

    /// Remove a field.
    pub fn unset(self, key: impl Into<FieldKey>) -> Self {
        self.entry(key, QueryValue::Null, NilPolicy::Unset)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compile update data. Returns `None` when nothing would change.
pub fn compile_update(
    data: &UpdateData,
    encoder: &dyn ValueEncoder,
) -> CompileResult<Option<Document>> {
    if data.operation != UpdateOperation::Set {
        return compile_array_update(data, encoder);
    }

    let mut set = Document::new();
    let mut unset = Document::new();
    for entry in &data.entries {
        let path = entry.key.storage_name();
        collect_set(&path, &entry.value, entry.on_nil, encoder, &mut set)?;
        collect_unset(&path, &entry.value, entry.on_nil, &mut unset);
    }

    let mut update = Document::new();
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }

    if update.is_empty() {
        Ok(None)
    } else {
        Ok(Some(update))
    }
}

fn compile_array_update(
    data: &UpdateData,
    encoder: &dyn ValueEncoder,
) -> CompileResult<Option<Document>> {
    let mut fields = Document::new();
    for entry in &data.entries {
        let value = encode_value(&entry.value, encoder)?;
        let value = match (data.operation, value) {
            (UpdateOperation::AddToSet | UpdateOperation::Push, Bson::Array(items)) => {
                Bson::Document(doc! { "$each": items })
            }
            (UpdateOperation::PullAll, Bson::Array(items)) => Bson::Array(items),
            (UpdateOperation::PullAll, single) => Bson::Array(vec![single]),
            (_, single) => single,
        };
        fields.insert(entry.key.storage_name(), value);
    }

    if fields.is_empty() {
        return Ok(None);
    }

    let mut update = Document::new();
    update.insert(data.operation.operator(), fields);
    Ok(Some(update))
}

fn join_path(prefix: &str, key: &FieldKey) -> String {
    format!("{}.{}", prefix, key.storage_name())
}

fn collect_set(
    path: &str,
    value: &QueryValue,
    on_nil: NilPolicy,
    encoder: &dyn ValueEncoder,
    out: &mut Document,
) -> CompileResult<()> {
    match value {
        QueryValue::Dictionary(entries) if !entries.is_empty() => {
            for (key, child) in entries {
                collect_set(&join_path(path, key), child, on_nil, encoder, out)?;
            }
        }
        nil if nil.is_nil() => {
            if on_nil == NilPolicy::SetNull {
                out.insert(path, Bson::Null);
            }
        }
        other => {
            out.insert(path, encode_value(other, encoder)?);
        }
    }
    Ok(())
}

fn collect_unset(path: &str, value: &QueryValue, on_nil: NilPolicy, out: &mut Document) {
    match value {
        QueryValue::Dictionary(entries) => {
            for (key, child) in entries {
                collect_unset(&join_path(path, key), child, on_nil, out);
            }
        }
        // `$unset` ignores the value; null is a placeholder.
        nil if nil.is_nil() && on_nil == NilPolicy::Unset => {
            out.insert(path, Bson::Null);
        }
        _ => {}
    }
}

/// Merge a caller-supplied update document into a compiled one, operator by
/// operator.
pub fn merge_custom_update(compiled: Option<Document>, custom: Option<&Document>) -> Option<Document> {
    let custom = match custom {
        Some(custom) if !custom.is_empty() => custom,
        _ => return compiled,
    };

    let mut merged = compiled.unwrap_or_default();
    for (op, fields) in custom {
        match (merged.get_mut(op), fields) {
            (Some(Bson::Document(existing)), Bson::Document(extra)) => {
                for (key, value) in extra {
                    existing.insert(key.clone(), value.clone());
                }
            }
            _ => {
                merged.insert(op.clone(), fields.clone());
            }
        }
    }
    Some(merged)
}
