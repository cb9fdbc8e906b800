//! Query values and their encoding into native BSON.

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document, SerializerOptions};
use serde::{Deserialize, Deserializer, Serialize};

use crate::custom::Custom;
use crate::error::{CompileError, CompileResult};
use crate::field::FieldKey;

/// Typed payload captured by a [`Bind`].
pub trait BindPayload: fmt::Debug + Send + Sync {
    fn to_bson(&self, options: SerializerOptions) -> bson::ser::Result<Bson>;
}

impl<T> BindPayload for T
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn to_bson(&self, options: SerializerOptions) -> bson::ser::Result<Bson> {
        bson::to_bson_with_options(self, options)
    }
}

/// A bound scalar (or structured) value waiting to be encoded.
#[derive(Clone)]
pub struct Bind(Arc<dyn BindPayload>);

impl Bind {
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Bind(Arc::new(value))
    }

    pub fn payload(&self) -> &dyn BindPayload {
        self.0.as_ref()
    }

    /// Whether the bound value serializes to null (e.g. `None`).
    pub fn is_nil(&self) -> bool {
        matches!(
            self.0.to_bson(SerializerOptions::builder().build()),
            Ok(Bson::Null)
        )
    }
}

impl fmt::Debug for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bind").field(&self.0).finish()
    }
}

impl<'de> Deserialize<'de> for Bind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Bind::new)
    }
}

/// Value tree carried by filters, inserts and updates.
#[derive(Debug, Clone)]
pub enum QueryValue {
    Bind(Bind),
    Null,
    Array(Vec<QueryValue>),
    Dictionary(Vec<(FieldKey, QueryValue)>),
    /// Enum case, stored as its string name
    Enum(String),
    /// Store-assigned value; only legal for the identity of an inserted row
    Default,
    Custom(Custom),
}

impl QueryValue {
    pub fn bind<T>(value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        QueryValue::Bind(Bind::new(value))
    }

    pub fn dictionary<K, I>(entries: I) -> Self
    where
        K: Into<FieldKey>,
        I: IntoIterator<Item = (K, QueryValue)>,
    {
        QueryValue::Dictionary(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Null or a bind that serializes to null.
    pub fn is_nil(&self) -> bool {
        match self {
            QueryValue::Null => true,
            QueryValue::Bind(bind) => bind.is_nil(),
            _ => false,
        }
    }
}

macro_rules! bind_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for QueryValue {
                fn from(value: $ty) -> Self {
                    QueryValue::bind(value)
                }
            }
        )*
    };
}

bind_from!(bool, i32, i64, f64, String);

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::bind(value.to_string())
    }
}

impl<T: Into<QueryValue>> From<Vec<T>> for QueryValue {
    fn from(values: Vec<T>) -> Self {
        QueryValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for QueryValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => QueryValue::Null,
            Value::Array(items) => {
                QueryValue::Array(items.into_iter().map(QueryValue::from).collect())
            }
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::Bool(true)) = map.get("$default") {
                        return QueryValue::Default;
                    }
                    if let Some(Value::String(case)) = map.get("$enum") {
                        return QueryValue::Enum(case.clone());
                    }
                }
                QueryValue::Dictionary(
                    map.into_iter()
                        .map(|(k, v)| (FieldKey::from(k), QueryValue::from(v)))
                        .collect(),
                )
            }
            scalar => QueryValue::bind(scalar),
        }
    }
}

impl<'de> Deserialize<'de> for QueryValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(QueryValue::from)
    }
}

/// Serializer for bound values (the store's encodable-value encoder).
pub trait ValueEncoder: Send + Sync {
    fn encode_bind(&self, bind: &Bind) -> CompileResult<Bson>;
}

/// Default encoder built on the `bson` serde serializer.
#[derive(Debug, Clone, Default)]
pub struct BsonEncoder {
    human_readable: bool,
}

impl BsonEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize binds in human-readable form (e.g. UUIDs as strings).
    pub fn human_readable(mut self, enabled: bool) -> Self {
        self.human_readable = enabled;
        self
    }
}

impl ValueEncoder for BsonEncoder {
    fn encode_bind(&self, bind: &Bind) -> CompileResult<Bson> {
        let options = SerializerOptions::builder()
            .human_readable(self.human_readable)
            .build();
        bind.payload()
            .to_bson(options)
            .map_err(|e| CompileError::UnsupportedValue(e.to_string()))
    }
}

/// Encode a value tree. `Default` is rejected.
pub fn encode_value(value: &QueryValue, encoder: &dyn ValueEncoder) -> CompileResult<Bson> {
    match value {
        QueryValue::Bind(bind) => encoder.encode_bind(bind),
        QueryValue::Null => Ok(Bson::Null),
        QueryValue::Array(items) => items
            .iter()
            .map(|item| encode_value(item, encoder))
            .collect::<CompileResult<Vec<_>>>()
            .map(Bson::Array),
        QueryValue::Dictionary(entries) => encode_dictionary(entries, encoder, false).map(Bson::Document),
        QueryValue::Enum(case) => Ok(Bson::String(case.clone())),
        QueryValue::Default => Err(CompileError::UnsupportedValue(
            "default value is only allowed for the identity of an inserted document".to_string(),
        )),
        QueryValue::Custom(node) => node.render(),
    }
}

/// Encode an input row into a document. A `Default` identity is omitted so the
/// store assigns one.
pub fn encode_row(value: &QueryValue, encoder: &dyn ValueEncoder) -> CompileResult<Document> {
    match value {
        QueryValue::Dictionary(entries) => encode_dictionary(entries, encoder, true),
        other => Err(CompileError::UnsupportedValue(format!(
            "input row must be a dictionary, got {:?}",
            other
        ))),
    }
}

fn encode_dictionary(
    entries: &[(FieldKey, QueryValue)],
    encoder: &dyn ValueEncoder,
    allow_default_id: bool,
) -> CompileResult<Document> {
    let mut doc = Document::new();
    for (key, value) in entries {
        if let QueryValue::Default = value {
            if allow_default_id && *key == FieldKey::Id {
                continue;
            }
        }
        doc.insert(key.storage_name(), encode_value(value, encoder)?);
    }
    Ok(doc)
}
