//! Schema compilation into `$jsonSchema` validators and index specifications.
//!
//! A validator attached to a collection has the shape
//!
//! ```text
//! { "$jsonSchema": { "bsonType": "object", "required": [..]?, "properties": { name: { "bsonType": tag } | { "enum": [..] } } } }
//! ```
//!
//! Creating a collection always builds a fresh validator. Altering one merges
//! the new property definitions into the validator already stored.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::custom::Custom;
use crate::error::{CompileError, CompileResult};
use crate::field::FieldKey;

const JSON_SCHEMA: &str = "$jsonSchema";

/// Logical data type of a field
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Date,
    Datetime,
    Time,
    Uuid,
    /// Raw byte blob
    Data,
    Json,
    Array(#[serde(default)] Option<Box<DataType>>),
    Dictionary(#[serde(default)] Option<Box<DataType>>),
    Enum {
        name: String,
        cases: Vec<String>,
    },
    #[serde(skip)]
    Custom(Custom),
}

impl DataType {
    /// Validator property for this type, or `None` when the type has no
    /// native tag (such fields are left out of the validator).
    pub fn property(&self) -> Option<Document> {
        let tag = match self {
            DataType::Bool => "bool",
            DataType::Json | DataType::Dictionary(_) => "object",
            DataType::Array(_) => "array",
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Uint8
            | DataType::Uint16 => "int",
            DataType::Int64 | DataType::Uint32 | DataType::Uint64 => "long",
            DataType::String => "string",
            DataType::Date | DataType::Datetime | DataType::Time => "date",
            DataType::Float | DataType::Double => "double",
            DataType::Data | DataType::Uuid => "binData",
            DataType::Enum { cases, .. } => return Some(doc! { "enum": cases.clone() }),
            DataType::Custom(_) => return None,
        };
        Some(doc! { "bsonType": tag })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldConstraint {
    Required,
    /// Identity field; `auto` means the store assigns it
    Identifier {
        #[serde(default)]
        auto: bool,
    },
    #[serde(skip)]
    Custom(Custom),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDefinition {
    pub name: FieldKey,
    pub data_type: DataType,
    #[serde(default)]
    pub constraints: Vec<FieldConstraint>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<FieldKey>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.constraints.push(FieldConstraint::Required);
        self
    }

    pub fn is_required(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, FieldConstraint::Required))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldUpdate {
    pub name: FieldKey,
    pub data_type: DataType,
}

impl FieldUpdate {
    pub fn new(name: impl Into<FieldKey>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Collection-level constraint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaConstraint {
    Unique {
        fields: Vec<FieldKey>,
        #[serde(default)]
        name: Option<String>,
    },
    /// Renders to a raw index document `{ "key": {..}, "name"?, "unique"? }`
    #[serde(skip)]
    Custom(Custom),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaAction {
    #[default]
    Create,
    Update,
    Delete,
}

/// A requested change to one collection's schema
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaChange {
    pub schema: String,
    pub action: SchemaAction,
    pub create_fields: Vec<FieldDefinition>,
    pub update_fields: Vec<FieldUpdate>,
    pub delete_fields: Vec<FieldKey>,
    pub constraints: Vec<SchemaConstraint>,
}

impl SchemaChange {
    pub fn new(schema: impl Into<String>, action: SchemaAction) -> Self {
        Self {
            schema: schema.into(),
            action,
            ..Self::default()
        }
    }

    pub fn create(schema: impl Into<String>) -> Self {
        Self::new(schema, SchemaAction::Create)
    }

    pub fn update(schema: impl Into<String>) -> Self {
        Self::new(schema, SchemaAction::Update)
    }

    pub fn delete(schema: impl Into<String>) -> Self {
        Self::new(schema, SchemaAction::Delete)
    }

    pub fn field(mut self, definition: FieldDefinition) -> Self {
        self.create_fields.push(definition);
        self
    }

    pub fn update_field(mut self, update: FieldUpdate) -> Self {
        self.update_fields.push(update);
        self
    }

    pub fn delete_field(mut self, name: impl Into<FieldKey>) -> Self {
        self.delete_fields.push(name.into());
        self
    }

    pub fn unique(mut self, fields: Vec<FieldKey>) -> Self {
        self.constraints.push(SchemaConstraint::Unique { fields, name: None });
        self
    }

    pub fn constraint(mut self, constraint: SchemaConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Index to create on a collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSpec {
    pub keys: Document,
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexSpec {
    /// Name used when none was given: `field_1_other_1`.
    pub fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.keys
                .iter()
                .map(|(key, dir)| format!("{}_{}", key, dir))
                .collect::<Vec<_>>()
                .join("_")
        })
    }

    /// Index document in `createIndexes` form.
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "key": self.keys.clone(), "name": self.resolved_name() };
        if self.unique {
            doc.insert("unique", true);
        }
        doc
    }

    fn from_document(doc: Document) -> CompileResult<Self> {
        let keys = match doc.get("key") {
            Some(Bson::Document(keys)) if !keys.is_empty() => keys.clone(),
            _ => {
                return Err(CompileError::UnsupportedValue(
                    "custom constraint must render to an index document with a key".to_string(),
                ))
            }
        };
        Ok(Self {
            keys,
            name: doc.get_str("name").ok().map(str::to_string),
            unique: doc.get_bool("unique").unwrap_or(false),
        })
    }
}

/// What the store must do to apply a schema change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaCommand {
    Create {
        collection: String,
        validator: Document,
        indexes: Vec<IndexSpec>,
    },
    Alter {
        collection: String,
        validator: Document,
        indexes: Vec<IndexSpec>,
    },
    Drop {
        collection: String,
    },
}

impl SchemaCommand {
    pub fn collection(&self) -> &str {
        match self {
            SchemaCommand::Create { collection, .. }
            | SchemaCommand::Alter { collection, .. }
            | SchemaCommand::Drop { collection } => collection,
        }
    }
}

/// Build a fresh validator from field definitions.
pub fn compile_create(fields: &[FieldDefinition]) -> Document {
    let mut properties = Document::new();
    let mut required = Vec::new();
    for field in fields {
        let name = field.name.storage_name();
        if let Some(property) = field.data_type.property() {
            properties.insert(name.clone(), property);
        }
        if field.is_required() {
            required.push(Bson::String(name));
        }
    }

    let mut schema = doc! { "bsonType": "object" };
    if !required.is_empty() {
        schema.insert("required", required);
    }
    schema.insert("properties", properties);

    doc! { JSON_SCHEMA: schema }
}

/// Build the validator for an alter. With an existing validator the new
/// properties are merged into it; without one only the new properties are
/// described.
pub fn compile_alter(
    updates: &[FieldUpdate],
    deletes: &[FieldKey],
    existing: Option<&Document>,
) -> Document {
    let mut schema = existing
        .and_then(|validator| validator.get_document(JSON_SCHEMA).ok())
        .cloned()
        .unwrap_or_else(|| doc! { "bsonType": "object" });

    let mut properties = schema
        .get_document("properties")
        .ok()
        .cloned()
        .unwrap_or_default();

    for update in updates {
        if let Some(property) = update.data_type.property() {
            properties.insert(update.name.storage_name(), property);
        }
    }

    for name in deletes {
        let name = name.storage_name();
        properties.remove(&name);
        if let Ok(required) = schema.get_array_mut("required") {
            required.retain(|entry| entry.as_str() != Some(name.as_str()));
        }
    }

    if matches!(schema.get_array("required"), Ok(required) if required.is_empty()) {
        schema.remove("required");
    }
    schema.insert("properties", properties);

    doc! { JSON_SCHEMA: schema }
}

/// One index specification per constraint.
pub fn compile_indexes(constraints: &[SchemaConstraint]) -> CompileResult<Vec<IndexSpec>> {
    constraints
        .iter()
        .map(|constraint| match constraint {
            SchemaConstraint::Unique { fields, name } => {
                let mut keys = Document::new();
                for field in fields {
                    keys.insert(field.storage_name(), 1_i32);
                }
                if keys.is_empty() {
                    return Err(CompileError::UnsupportedValue(
                        "unique constraint without fields".to_string(),
                    ));
                }
                Ok(IndexSpec {
                    keys,
                    name: name.clone(),
                    unique: true,
                })
            }
            SchemaConstraint::Custom(node) => match node.render()? {
                Bson::Document(doc) => IndexSpec::from_document(doc),
                other => Err(CompileError::UnsupportedValue(format!(
                    "custom constraint rendered to {}",
                    other
                ))),
            },
        })
        .collect()
}

/// Compile a schema change. `existing` is the validator currently attached to
/// the collection; it is only consulted for alters.
pub fn compile_schema(
    change: &SchemaChange,
    existing: Option<&Document>,
) -> CompileResult<SchemaCommand> {
    let collection = change.schema.clone();
    match change.action {
        SchemaAction::Create => Ok(SchemaCommand::Create {
            validator: compile_create(&change.create_fields),
            indexes: compile_indexes(&change.constraints)?,
            collection,
        }),
        SchemaAction::Update => Ok(SchemaCommand::Alter {
            validator: compile_alter(&change.update_fields, &change.delete_fields, existing),
            indexes: compile_indexes(&change.constraints)?,
            collection,
        }),
        SchemaAction::Delete => Ok(SchemaCommand::Drop { collection }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::custom;

    fn users_validator() -> Document {
        compile_create(&[
            FieldDefinition::new("name", DataType::String).required(),
            FieldDefinition::new("age", DataType::Int32),
        ])
    }

    #[test]
    fn test_create_validator() {
        assert_eq!(
            users_validator(),
            doc! {
                "$jsonSchema": {
                    "bsonType": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "bsonType": "string" },
                        "age": { "bsonType": "int" },
                    },
                }
            }
        );
    }

    #[test]
    fn test_required_omitted_when_empty() {
        let validator = compile_create(&[FieldDefinition::new("age", DataType::Int64)]);
        let schema = validator.get_document("$jsonSchema").unwrap();
        assert!(!schema.contains_key("required"));
        assert_eq!(
            schema.get_document("properties").unwrap(),
            &doc! { "age": { "bsonType": "long" } }
        );
    }

    #[test]
    fn test_type_tags() {
        let tag = |data_type: DataType| data_type.property().unwrap();
        assert_eq!(tag(DataType::Bool), doc! { "bsonType": "bool" });
        assert_eq!(tag(DataType::Json), doc! { "bsonType": "object" });
        assert_eq!(tag(DataType::Array(None)), doc! { "bsonType": "array" });
        assert_eq!(tag(DataType::Uint64), doc! { "bsonType": "long" });
        assert_eq!(tag(DataType::Datetime), doc! { "bsonType": "date" });
        assert_eq!(tag(DataType::Float), doc! { "bsonType": "double" });
        assert_eq!(tag(DataType::Uuid), doc! { "bsonType": "binData" });
        assert_eq!(tag(DataType::Data), doc! { "bsonType": "binData" });
        assert_eq!(
            tag(DataType::Enum {
                name: "role".into(),
                cases: vec!["admin".into(), "member".into()],
            }),
            doc! { "enum": ["admin", "member"] }
        );
        assert!(DataType::Custom(custom("geo")).property().is_none());
    }

    #[test]
    fn test_custom_type_omitted() {
        let validator = compile_create(&[
            FieldDefinition::new("name", DataType::String),
            FieldDefinition::new("location", DataType::Custom(custom("point"))),
        ]);
        let properties = validator
            .get_document("$jsonSchema")
            .unwrap()
            .get_document("properties")
            .unwrap();
        assert!(properties.contains_key("name"));
        assert!(!properties.contains_key("location"));
    }

    #[test]
    fn test_alter_merges_into_existing() {
        let existing = users_validator();
        let altered = compile_alter(&[FieldUpdate::new("city", DataType::String)], &[], Some(&existing));
        assert_eq!(
            altered,
            doc! {
                "$jsonSchema": {
                    "bsonType": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "bsonType": "string" },
                        "age": { "bsonType": "int" },
                        "city": { "bsonType": "string" },
                    },
                }
            }
        );
    }

    #[test]
    fn test_alter_without_existing() {
        let altered = compile_alter(&[FieldUpdate::new("city", DataType::String)], &[], None);
        assert_eq!(
            altered,
            doc! {
                "$jsonSchema": {
                    "bsonType": "object",
                    "properties": { "city": { "bsonType": "string" } },
                }
            }
        );
    }

    #[test]
    fn test_alter_deletes_fields() {
        let existing = users_validator();
        let altered = compile_alter(&[], &[FieldKey::name("name")], Some(&existing));
        let schema = altered.get_document("$jsonSchema").unwrap();
        assert!(!schema.contains_key("required"));
        assert_eq!(
            schema.get_document("properties").unwrap(),
            &doc! { "age": { "bsonType": "int" } }
        );
    }

    #[test]
    fn test_unique_indexes() {
        let indexes = compile_indexes(&[
            SchemaConstraint::Unique {
                fields: vec![FieldKey::name("email")],
                name: None,
            },
            SchemaConstraint::Unique {
                fields: vec![FieldKey::name("org"), FieldKey::name("slug")],
                name: Some("org_slug".into()),
            },
        ])
        .unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].keys, doc! { "email": 1 });
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].resolved_name(), "email_1");
        assert_eq!(indexes[1].keys, doc! { "org": 1, "slug": 1 });
        assert_eq!(
            indexes[1].to_document(),
            doc! { "key": { "org": 1, "slug": 1 }, "name": "org_slug", "unique": true }
        );
    }

    #[test]
    fn test_custom_index_constraint() {
        let indexes = compile_indexes(&[SchemaConstraint::Custom(custom(
            doc! { "key": { "created": -1 }, "name": "recent" },
        ))])
        .unwrap();
        assert_eq!(indexes[0].keys, doc! { "created": -1 });
        assert!(!indexes[0].unique);

        assert!(compile_indexes(&[SchemaConstraint::Custom(custom("idx"))]).is_err());
    }

    #[test]
    fn test_compile_schema_actions() {
        let create = SchemaChange::create("users")
            .field(FieldDefinition::new("email", DataType::String).required())
            .unique(vec![FieldKey::name("email")]);
        match compile_schema(&create, None).unwrap() {
            SchemaCommand::Create { collection, indexes, .. } => {
                assert_eq!(collection, "users");
                assert_eq!(indexes.len(), 1);
            }
            other => panic!("Expected create, got {:?}", other),
        }

        let drop = SchemaChange::delete("users");
        assert_eq!(
            compile_schema(&drop, None).unwrap(),
            SchemaCommand::Drop {
                collection: "users".into()
            }
        );
    }

    #[test]
    fn test_create_never_merges() {
        let existing = users_validator();
        let create = SchemaChange::create("users")
            .field(FieldDefinition::new("city", DataType::String));
        match compile_schema(&create, Some(&existing)).unwrap() {
            SchemaCommand::Create { validator, .. } => {
                let properties = validator
                    .get_document("$jsonSchema")
                    .unwrap()
                    .get_document("properties")
                    .unwrap();
                assert_eq!(properties.len(), 1);
            }
            other => panic!("Expected create, got {:?}", other),
        }
    }
}
