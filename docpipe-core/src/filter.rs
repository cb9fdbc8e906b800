//! Filter compilation into `$match` predicates.

use bson::{doc, Bson, Document};
use serde::Deserialize;

use crate::custom::Custom;
use crate::error::{CompileError, CompileResult};
use crate::field::Field;
use crate::value::{encode_value, QueryValue, ValueEncoder};

/// Comparison method of a filter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Equality {
        #[serde(default)]
        inverse: bool,
    },
    Order {
        #[serde(default)]
        inverse: bool,
        #[serde(default)]
        equality: bool,
    },
    Subset {
        #[serde(default)]
        inverse: bool,
    },
    Contains {
        #[serde(default)]
        inverse: bool,
        #[serde(default)]
        location: ContainsLocation,
    },
    /// Native operator token, passed through as-is
    Custom(String),
}

/// Where a `Contains` filter looks for its needle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainsLocation {
    Prefix,
    Suffix,
    #[default]
    Anywhere,
}

impl Method {
    pub const EQUAL: Method = Method::Equality { inverse: false };
    pub const NOT_EQUAL: Method = Method::Equality { inverse: true };
    pub const GREATER_THAN: Method = Method::Order {
        inverse: false,
        equality: false,
    };
    pub const GREATER_THAN_OR_EQUAL: Method = Method::Order {
        inverse: false,
        equality: true,
    };
    pub const LESS_THAN: Method = Method::Order {
        inverse: true,
        equality: false,
    };
    pub const LESS_THAN_OR_EQUAL: Method = Method::Order {
        inverse: true,
        equality: true,
    };
    pub const IN: Method = Method::Subset { inverse: false };
    pub const NOT_IN: Method = Method::Subset { inverse: true };

    /// Native comparison operator for this method.
    pub fn operator(&self) -> CompileResult<String> {
        let op = match self {
            Method::Equality { inverse: false } => "$eq",
            Method::Equality { inverse: true } => "$ne",
            Method::Order {
                inverse: true,
                equality: true,
            } => "$lte",
            Method::Order {
                inverse: true,
                equality: false,
            } => "$lt",
            Method::Order {
                inverse: false,
                equality: true,
            } => "$gte",
            Method::Order {
                inverse: false,
                equality: false,
            } => "$gt",
            Method::Subset { inverse: false } => "$in",
            Method::Subset { inverse: true } => "$nin",
            Method::Contains { inverse, location } => {
                return Err(CompileError::UnsupportedOperator(format!(
                    "contains (inverse: {}, location: {:?})",
                    inverse, location
                )))
            }
            Method::Custom(token) => return Ok(token.clone()),
        };
        Ok(op.to_string())
    }
}

/// How the children of a filter group combine
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    #[default]
    And,
    Or,
    /// Native logical operator token (e.g. `$nor`)
    Custom(String),
}

impl Relation {
    pub fn operator(&self) -> CompileResult<String> {
        match self {
            Relation::And => Ok("$and".to_string()),
            Relation::Or => Ok("$or".to_string()),
            Relation::Custom(token) if token.starts_with('$') => Ok(token.clone()),
            Relation::Custom(token) => Err(CompileError::UnsupportedRelation(token.clone())),
        }
    }
}

/// A filter node
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Compare a field with a value
    Value {
        field: Field,
        method: Method,
        value: QueryValue,
    },
    /// Compare two fields of the same (joined) document
    Field {
        lhs: Field,
        method: Method,
        rhs: Field,
    },
    Group {
        filters: Vec<Filter>,
        #[serde(default)]
        relation: Relation,
    },
    #[serde(skip)]
    Custom(Custom),
}

impl Filter {
    pub fn value(field: Field, method: Method, value: impl Into<QueryValue>) -> Self {
        Filter::Value {
            field,
            method,
            value: value.into(),
        }
    }

    pub fn eq(field: Field, value: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::EQUAL, value)
    }

    pub fn ne(field: Field, value: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::NOT_EQUAL, value)
    }

    pub fn gt(field: Field, value: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::GREATER_THAN, value)
    }

    pub fn gte(field: Field, value: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::GREATER_THAN_OR_EQUAL, value)
    }

    pub fn lt(field: Field, value: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::LESS_THAN, value)
    }

    pub fn lte(field: Field, value: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::LESS_THAN_OR_EQUAL, value)
    }

    pub fn is_in(field: Field, values: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::IN, values)
    }

    pub fn not_in(field: Field, values: impl Into<QueryValue>) -> Self {
        Filter::value(field, Method::NOT_IN, values)
    }

    /// Field-to-field comparison
    pub fn fields(lhs: Field, method: Method, rhs: Field) -> Self {
        Filter::Field { lhs, method, rhs }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::Group {
            filters,
            relation: Relation::And,
        }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Group {
            filters,
            relation: Relation::Or,
        }
    }

    /// Whether this filter needs expression operators (`$expr`), which native
    /// update/delete predicates cannot carry.
    pub fn uses_expression(&self) -> bool {
        match self {
            Filter::Field { .. } => true,
            Filter::Group { filters, .. } => filters.iter().any(Filter::uses_expression),
            Filter::Value { .. } | Filter::Custom(_) => false,
        }
    }
}

/// Compile a filter into a predicate document. `None` means "no constraint".
pub fn compile_filter(
    filter: &Filter,
    main_schema: &str,
    encoder: &dyn ValueEncoder,
) -> CompileResult<Option<Document>> {
    match filter {
        Filter::Value {
            field,
            method,
            value,
        } => {
            let path = field.storage_path(main_schema)?;
            let op = method.operator()?;
            let value = encode_value(value, encoder)?;
            Ok(Some(doc! { path: { op: value } }))
        }
        Filter::Field { lhs, method, rhs } => {
            let op = method.operator()?;
            let lhs = lhs.field_reference(main_schema)?;
            let rhs = rhs.field_reference(main_schema)?;
            Ok(Some(doc! { "$expr": { op: [lhs, rhs] } }))
        }
        Filter::Group { filters, relation } => {
            let mut children = Vec::with_capacity(filters.len());
            for child in filters {
                if let Some(compiled) = compile_filter(child, main_schema, encoder)? {
                    children.push(compiled);
                }
            }
            fold_relation(children, relation)
        }
        Filter::Custom(node) => match node.render()? {
            Bson::Null => Ok(None),
            Bson::Document(doc) => Ok(Some(doc)),
            other => Err(CompileError::UnsupportedFilter(format!(
                "custom filter rendered to {}",
                other
            ))),
        },
    }
}

/// Fold compiled children under a relation: none yields no constraint, one
/// child is returned unwrapped, more are wrapped under the relation operator.
pub fn fold_relation(
    mut children: Vec<Document>,
    relation: &Relation,
) -> CompileResult<Option<Document>> {
    match children.len() {
        0 => Ok(None),
        1 => Ok(children.pop()),
        _ => {
            let op = relation.operator()?;
            Ok(Some(doc! { op: children }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::custom;
    use crate::value::BsonEncoder;

    fn compile(filter: &Filter) -> CompileResult<Option<Document>> {
        compile_filter(filter, "users", &BsonEncoder::new())
    }

    #[test]
    fn test_value_comparison() {
        let filter = Filter::gt(Field::new("age"), 18);
        assert_eq!(compile(&filter).unwrap(), Some(doc! { "age": { "$gt": 18 } }));
    }

    #[test]
    fn test_order_table() {
        let cases = [
            (true, true, "$lte"),
            (true, false, "$lt"),
            (false, true, "$gte"),
            (false, false, "$gt"),
        ];
        for (inverse, equality, expected) in cases {
            let method = Method::Order { inverse, equality };
            assert_eq!(method.operator().unwrap(), expected);
        }
    }

    #[test]
    fn test_equality_and_subset_operators() {
        assert_eq!(Method::EQUAL.operator().unwrap(), "$eq");
        assert_eq!(Method::NOT_EQUAL.operator().unwrap(), "$ne");
        assert_eq!(Method::IN.operator().unwrap(), "$in");
        assert_eq!(Method::NOT_IN.operator().unwrap(), "$nin");
        assert_eq!(Method::Custom("$regex".to_string()).operator().unwrap(), "$regex");
    }

    #[test]
    fn test_contains_unsupported() {
        let filter = Filter::value(
            Field::new("name"),
            Method::Contains {
                inverse: false,
                location: ContainsLocation::Prefix,
            },
            "Bo",
        );
        let err = compile(&filter).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedOperator(_)));
        assert!(err.is_syntax());
    }

    #[test]
    fn test_joined_field_is_namespaced() {
        let filter = Filter::eq(Field::new("title").in_schema("posts"), "Hello");
        assert_eq!(
            compile(&filter).unwrap(),
            Some(doc! { "posts.title": { "$eq": "Hello" } })
        );

        let filter = Filter::eq(Field::new("name").in_schema("users"), "Bob");
        assert_eq!(compile(&filter).unwrap(), Some(doc! { "name": { "$eq": "Bob" } }));
    }

    #[test]
    fn test_field_comparison_uses_expr() {
        let filter = Filter::fields(
            Field::new("author_id").in_schema("posts"),
            Method::EQUAL,
            Field::id(),
        );
        assert_eq!(
            compile(&filter).unwrap(),
            Some(doc! { "$expr": { "$eq": ["$posts.author_id", "$_id"] } })
        );
        assert!(filter.uses_expression());
    }

    #[test]
    fn test_subset_encodes_array() {
        let filter = Filter::is_in(Field::new("role"), vec!["admin", "owner"]);
        assert_eq!(
            compile(&filter).unwrap(),
            Some(doc! { "role": { "$in": ["admin", "owner"] } })
        );
    }

    #[test]
    fn test_group_folding() {
        let empty = Filter::and(vec![]);
        assert_eq!(compile(&empty).unwrap(), None);

        let single = Filter::or(vec![Filter::eq(Field::new("name"), "Bob")]);
        assert_eq!(compile(&single).unwrap(), Some(doc! { "name": { "$eq": "Bob" } }));

        let many = Filter::and(vec![
            Filter::gt(Field::new("age"), 18),
            Filter::eq(Field::new("name"), "Bob"),
        ]);
        assert_eq!(
            compile(&many).unwrap(),
            Some(doc! { "$and": [{ "age": { "$gt": 18 } }, { "name": { "$eq": "Bob" } }] })
        );
    }

    #[test]
    fn test_group_drops_empty_children() {
        let filter = Filter::and(vec![
            Filter::and(vec![]),
            Filter::eq(Field::new("name"), "Bob"),
        ]);
        assert_eq!(compile(&filter).unwrap(), Some(doc! { "name": { "$eq": "Bob" } }));
    }

    #[test]
    fn test_custom_relation() {
        let filter = Filter::Group {
            filters: vec![
                Filter::eq(Field::new("a"), 1),
                Filter::eq(Field::new("b"), 2),
            ],
            relation: Relation::Custom("$nor".to_string()),
        };
        assert_eq!(
            compile(&filter).unwrap(),
            Some(doc! { "$nor": [{ "a": { "$eq": 1 } }, { "b": { "$eq": 2 } }] })
        );

        let bad = Filter::Group {
            filters: vec![
                Filter::eq(Field::new("a"), 1),
                Filter::eq(Field::new("b"), 2),
            ],
            relation: Relation::Custom("xor".to_string()),
        };
        assert!(matches!(compile(&bad), Err(CompileError::UnsupportedRelation(_))));
    }

    #[test]
    fn test_custom_filter() {
        let filter = Filter::Custom(custom(doc! { "$text": { "$search": "rust" } }));
        assert_eq!(
            compile(&filter).unwrap(),
            Some(doc! { "$text": { "$search": "rust" } })
        );

        let filter = Filter::Custom(custom("nope"));
        assert!(matches!(compile(&filter), Err(CompileError::UnsupportedFilter(_))));
    }

    #[test]
    fn test_deserialize_filter() {
        let filter: Filter = serde_json::from_str(
            r#"{"value": {"field": "age", "method": {"order": {"equality": true}}, "value": 21}}"#,
        )
        .unwrap();
        assert_eq!(compile(&filter).unwrap(), Some(doc! { "age": { "$gte": 21_i64 } }));
    }
}
