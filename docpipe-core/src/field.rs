//! Field identifiers and their storage paths.

use serde::{Deserialize, Deserializer};

use crate::custom::Custom;
use crate::error::{CompileError, CompileResult};

/// Storage name of the identity field.
pub const ID_FIELD: &str = "_id";

/// Storage name of the reserved aggregate key.
pub const AGGREGATE_KEY: &str = "aggregate";

/// A single logical key inside a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum FieldKey {
    /// Identity (primary key) of a document
    Id,
    /// Reserved key of a computed aggregate
    Aggregate,
    /// Plain user-defined name
    Name(String),
    /// Two keys concatenated into one storage name (e.g. `address_` + `city`)
    Prefix(Box<FieldKey>, Box<FieldKey>),
}

impl FieldKey {
    pub fn name(name: impl Into<String>) -> Self {
        FieldKey::Name(name.into())
    }

    pub fn prefixed(prefix: FieldKey, key: FieldKey) -> Self {
        FieldKey::Prefix(Box::new(prefix), Box::new(key))
    }

    /// Storage name of this key. `Id` and `Aggregate` map to reserved names.
    pub fn storage_name(&self) -> String {
        match self {
            FieldKey::Id => ID_FIELD.to_string(),
            FieldKey::Aggregate => AGGREGATE_KEY.to_string(),
            FieldKey::Name(name) => name.clone(),
            FieldKey::Prefix(prefix, key) => {
                format!("{}{}", prefix.storage_name(), key.storage_name())
            }
        }
    }
}

impl From<String> for FieldKey {
    fn from(name: String) -> Self {
        if name == ID_FIELD {
            FieldKey::Id
        } else {
            FieldKey::Name(name)
        }
    }
}

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        FieldKey::from(name.to_string())
    }
}

/// A reference to a stored field, possibly owned by a joined collection.
#[derive(Debug, Clone)]
pub enum Field {
    Path {
        path: Vec<FieldKey>,
        /// Owning collection (or join alias). Only qualifies the storage path
        /// when it differs from the query's main collection.
        schema: Option<String>,
        /// Output name used when the field is projected
        alias: Option<String>,
    },
    Custom(Custom),
}

impl Field {
    /// Field made of a single key in the main collection.
    pub fn new(key: impl Into<FieldKey>) -> Self {
        Field::Path {
            path: vec![key.into()],
            schema: None,
            alias: None,
        }
    }

    /// Field addressed by a dotted path such as `address.city`.
    pub fn dotted(path: &str) -> Self {
        Field::Path {
            path: path.split('.').map(FieldKey::from).collect(),
            schema: None,
            alias: None,
        }
    }

    pub fn id() -> Self {
        Field::new(FieldKey::Id)
    }

    /// Attach the owning collection (or join alias) to this field.
    pub fn in_schema(mut self, owner: impl Into<String>) -> Self {
        if let Field::Path { schema, .. } = &mut self {
            *schema = Some(owner.into());
        }
        self
    }

    /// Set the output name used when this field is projected.
    pub fn aliased(mut self, name: impl Into<String>) -> Self {
        if let Field::Path { alias, .. } = &mut self {
            *alias = Some(name.into());
        }
        self
    }

    /// Owning collection, if any.
    pub fn schema(&self) -> Option<&str> {
        match self {
            Field::Path { schema, .. } => schema.as_deref(),
            Field::Custom(_) => None,
        }
    }

    /// Dotted storage path of this field as seen from `main_schema`.
    pub fn storage_path(&self, main_schema: &str) -> CompileResult<String> {
        match self {
            Field::Path { path, schema, .. } => {
                if path.is_empty() {
                    return Err(CompileError::UnsupportedField(
                        "empty field path".to_string(),
                    ));
                }
                let segments: Vec<String> = path.iter().map(FieldKey::storage_name).collect();
                if segments.iter().any(String::is_empty) {
                    return Err(CompileError::UnsupportedField(format!(
                        "empty segment in field path {:?}",
                        segments.join(".")
                    )));
                }
                let dotted = segments.join(".");
                match schema {
                    Some(owner) if owner != main_schema => Ok(format!("{}.{}", owner, dotted)),
                    _ => Ok(dotted),
                }
            }
            Field::Custom(node) => match node.render()? {
                bson::Bson::String(path) if !path.is_empty() => Ok(path),
                other => Err(CompileError::UnsupportedField(format!(
                    "custom field rendered to {}",
                    other
                ))),
            },
        }
    }

    /// Storage path prefixed with `$`, marking it as a field reference inside
    /// an expression.
    pub fn field_reference(&self, main_schema: &str) -> CompileResult<String> {
        Ok(format!("${}", self.storage_path(main_schema)?))
    }

    /// Name under which this field appears in projected output.
    pub fn output_name(&self, main_schema: &str) -> CompileResult<String> {
        match self {
            Field::Path {
                alias: Some(alias), ..
            } => Ok(alias.clone()),
            _ => self.storage_path(main_schema),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRepr {
    Dotted(String),
    Path {
        path: String,
        #[serde(default)]
        schema: Option<String>,
        #[serde(default)]
        alias: Option<String>,
    },
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let field = match FieldRepr::deserialize(deserializer)? {
            FieldRepr::Dotted(path) => Field::dotted(&path),
            FieldRepr::Path {
                path,
                schema,
                alias,
            } => {
                let mut field = Field::dotted(&path);
                if let Some(schema) = schema {
                    field = field.in_schema(schema);
                }
                if let Some(alias) = alias {
                    field = field.aliased(alias);
                }
                field
            }
        };
        Ok(field)
    }
}
