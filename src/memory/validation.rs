//! `$jsonSchema` checks for collection validators.

use bson::{Bson, Document};

use super::document::{type_name, values_equal};

fn type_matches(value: &Bson, expected: &str) -> bool {
    match expected {
        "number" => matches!(
            value,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
        ),
        other => type_name(value) == other,
    }
}

fn check_property(name: &str, value: &Bson, property: &Document) -> Result<(), String> {
    match property.get("bsonType") {
        Some(Bson::String(expected)) if !type_matches(value, expected) => {
            return Err(format!(
                "{} must be {}, found {}",
                name,
                expected,
                type_name(value)
            ))
        }
        Some(Bson::Array(allowed))
            if !allowed
                .iter()
                .filter_map(Bson::as_str)
                .any(|expected| type_matches(value, expected)) =>
        {
            return Err(format!("{} has disallowed type {}", name, type_name(value)))
        }
        _ => {}
    }
    if let Ok(cases) = property.get_array("enum") {
        if !cases.iter().any(|case| values_equal(case, value)) {
            return Err(format!("{} must be one of {:?}", name, cases));
        }
    }
    Ok(())
}

/// Check a document against a validator. The error names the first failure.
pub(crate) fn validate(doc: &Document, validator: &Document) -> Result<(), String> {
    let schema = match validator.get_document("$jsonSchema") {
        Ok(schema) => schema,
        Err(_) => return Ok(()),
    };

    if let Ok(required) = schema.get_array("required") {
        for name in required.iter().filter_map(Bson::as_str) {
            if !doc.contains_key(name) {
                return Err(format!("missing required field {}", name));
            }
        }
    }

    if let Ok(properties) = schema.get_document("properties") {
        for (name, property) in properties {
            if let (Some(value), Bson::Document(property)) = (doc.get(name), property) {
                check_property(name, value, property)?;
            }
        }
    }
    Ok(())
}
