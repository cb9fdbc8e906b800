//! Predicate matching and expression evaluation.

use bson::{Bson, Document};
use std::cmp::Ordering;

use super::document::{compare, get_path, is_truthy, same_bracket, values_equal};
use crate::error::{DocpipeError, DocpipeResult};

fn unsupported(what: &str, op: &str) -> DocpipeError {
    DocpipeError::Store(format!("unsupported {} operator: {}", what, op))
}

fn operand_list<'a>(op: &str, operand: &'a Bson) -> DocpipeResult<&'a [Bson]> {
    match operand {
        Bson::Array(items) => Ok(items),
        other => Err(DocpipeError::Store(format!(
            "{} needs an array, got {}",
            op, other
        ))),
    }
}

/// Whether a document satisfies a query predicate.
pub(crate) fn matches(doc: &Document, predicate: &Document) -> DocpipeResult<bool> {
    for (key, condition) in predicate {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in operand_list(key, condition)? {
                    if !matches(doc, as_document(clause)?)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for clause in operand_list(key, condition)? {
                    if matches(doc, as_document(clause)?)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" {
                    any
                } else {
                    !any
                }
            }
            "$expr" => is_truthy(&eval(doc, condition)?),
            op if op.starts_with('$') => return Err(unsupported("query", op)),
            path => field_matches(get_path(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn as_document(value: &Bson) -> DocpipeResult<&Document> {
    match value {
        Bson::Document(doc) => Ok(doc),
        other => Err(DocpipeError::Store(format!(
            "expected a predicate document, got {}",
            other
        ))),
    }
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> DocpipeResult<bool> {
    let operators = match condition {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => ops,
        literal => return Ok(equals(value, literal)),
    };

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" => operand_list(op, operand)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$nin" => !operand_list(op, operand)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$exists" => value.is_some() == is_truthy(operand),
            other => return Err(unsupported("query", other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with array fields matching on any element and missing fields
/// matching null.
pub(crate) fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(actual) => {
            if values_equal(actual, expected) {
                return true;
            }
            match actual {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        }
    }
}

fn ordered(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |candidate: &Bson| same_bracket(candidate, operand) && accept(compare(candidate, operand));
    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(actual) => check(actual),
    }
}

/// Evaluate an aggregation expression against a document.
pub(crate) fn eval(doc: &Document, expr: &Bson) -> DocpipeResult<Bson> {
    match expr {
        Bson::String(s) if s == "$$ROOT" => Ok(Bson::Document(doc.clone())),
        Bson::String(s) if s.starts_with("$$") => Err(unsupported("variable", s)),
        Bson::String(s) if s.starts_with('$') => {
            Ok(get_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null))
        }
        Bson::Document(spec) => {
            let mut entries = spec.iter();
            match (entries.next(), entries.next()) {
                (Some((op, args)), None) if op.starts_with('$') => eval_operator(doc, op, args),
                _ => {
                    let mut out = Document::new();
                    for (key, value) in spec {
                        out.insert(key.clone(), eval(doc, value)?);
                    }
                    Ok(Bson::Document(out))
                }
            }
        }
        Bson::Array(items) => items
            .iter()
            .map(|item| eval(doc, item))
            .collect::<DocpipeResult<Vec<_>>>()
            .map(Bson::Array),
        literal => Ok(literal.clone()),
    }
}

fn eval_operator(doc: &Document, op: &str, args: &Bson) -> DocpipeResult<Bson> {
    let args = operand_list(op, args)?
        .iter()
        .map(|arg| eval(doc, arg))
        .collect::<DocpipeResult<Vec<_>>>()?;

    let pair = || match args.as_slice() {
        [lhs, rhs] => Ok((lhs, rhs)),
        _ => Err(DocpipeError::Store(format!("{} takes two arguments", op))),
    };

    let result = match op {
        "$eq" => {
            let (lhs, rhs) = pair()?;
            compare(lhs, rhs) == Ordering::Equal
        }
        "$ne" => {
            let (lhs, rhs) = pair()?;
            compare(lhs, rhs) != Ordering::Equal
        }
        "$gt" => {
            let (lhs, rhs) = pair()?;
            compare(lhs, rhs) == Ordering::Greater
        }
        "$gte" => {
            let (lhs, rhs) = pair()?;
            compare(lhs, rhs) != Ordering::Less
        }
        "$lt" => {
            let (lhs, rhs) = pair()?;
            compare(lhs, rhs) == Ordering::Less
        }
        "$lte" => {
            let (lhs, rhs) = pair()?;
            compare(lhs, rhs) != Ordering::Greater
        }
        "$in" => {
            let (needle, haystack) = pair()?;
            match haystack {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, needle)),
                other => {
                    return Err(DocpipeError::Store(format!(
                        "$in needs an array, got {}",
                        other
                    )))
                }
            }
        }
        "$and" => args.iter().all(is_truthy),
        "$or" => args.iter().any(is_truthy),
        other => return Err(unsupported("expression", other)),
    };
    Ok(Bson::Boolean(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn user() -> Document {
        doc! { "name": "Bob", "age": 30, "tags": ["a", "b"], "spent": 120, "budget": 100 }
    }

    #[test]
    fn test_comparisons() {
        let doc = user();
        assert!(matches(&doc, &doc! { "age": { "$gt": 18 } }).unwrap());
        assert!(matches(&doc, &doc! { "age": { "$gte": 30_i64 } }).unwrap());
        assert!(!matches(&doc, &doc! { "age": { "$lt": 30 } }).unwrap());
        assert!(!matches(&doc, &doc! { "age": { "$gt": "10" } }).unwrap());
        assert!(matches(&doc, &doc! { "name": "Bob" }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$in": ["Ada", "Bob"] } }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$nin": ["Ada"] } }).unwrap());
    }

    #[test]
    fn test_array_and_missing_fields() {
        let doc = user();
        assert!(matches(&doc, &doc! { "tags": "a" }).unwrap());
        assert!(matches(&doc, &doc! { "email": null }).unwrap());
        assert!(matches(&doc, &doc! { "email": { "$exists": false } }).unwrap());
        assert!(!matches(&doc, &doc! { "email": { "$gt": 1 } }).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = user();
        assert!(matches(
            &doc,
            &doc! { "$or": [{ "name": "Ada" }, { "age": { "$gt": 18 } }] }
        )
        .unwrap());
        assert!(!matches(
            &doc,
            &doc! { "$and": [{ "name": "Bob" }, { "age": { "$gt": 40 } }] }
        )
        .unwrap());
        assert!(matches(&doc, &doc! { "$nor": [{ "name": "Ada" }] }).unwrap());
    }

    #[test]
    fn test_expr_field_comparison() {
        let doc = user();
        assert!(matches(&doc, &doc! { "$expr": { "$gt": ["$spent", "$budget"] } }).unwrap());
        assert!(!matches(&doc, &doc! { "$expr": { "$lt": ["$spent", "$budget"] } }).unwrap());
    }

    #[test]
    fn test_unsupported_operator() {
        assert!(matches(&user(), &doc! { "name": { "$regex": "^B" } }).is_err());
    }

    #[test]
    fn test_eval() {
        let doc = user();
        assert_eq!(eval(&doc, &Bson::String("$name".into())).unwrap(), Bson::String("Bob".into()));
        assert_eq!(eval(&doc, &Bson::String("$missing".into())).unwrap(), Bson::Null);
        assert_eq!(
            eval(&doc, &Bson::Document(doc! { "n": "$name" })).unwrap(),
            Bson::Document(doc! { "n": "Bob" })
        );
        assert_eq!(
            eval(&doc, &Bson::String("$$ROOT".into())).unwrap(),
            Bson::Document(doc.clone())
        );
    }
}
