//! Applies update documents to stored documents.

use bson::{Bson, Document};

use super::document::{as_f64, get_path, remove_path, set_path, values_equal};
use crate::error::{DocpipeError, DocpipeResult};

fn update_error(message: impl Into<String>) -> DocpipeError {
    DocpipeError::Store(message.into())
}

/// Apply `update` to `doc` in place. Returns whether anything changed.
pub(crate) fn apply(doc: &mut Document, update: &Document) -> DocpipeResult<bool> {
    let before = doc.clone();
    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            other => return Err(update_error(format!("{} needs a document, got {}", op, other))),
        };
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => increment(doc, path, value)?,
                "$addToSet" => append(doc, path, value, true)?,
                "$push" => append(doc, path, value, false)?,
                "$pullAll" => pull_all(doc, path, value)?,
                other if other.starts_with('$') => {
                    return Err(update_error(format!("unsupported update operator: {}", other)))
                }
                other => {
                    return Err(update_error(format!(
                        "update document must only contain operators, found {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(*doc != before)
}

fn increment(doc: &mut Document, path: &str, by: &Bson) -> DocpipeResult<()> {
    let current = get_path(doc, path).cloned().unwrap_or(Bson::Int32(0));
    let next = match (&current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(n) => Bson::Int32(n),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let a = as_f64(&current).unwrap_or_default() as i64;
            let b = as_f64(by).unwrap_or_default() as i64;
            Bson::Int64(a.saturating_add(b))
        }
        _ => match (as_f64(&current), as_f64(by)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => {
                return Err(update_error(format!(
                    "cannot apply $inc to {} with {}",
                    path, by
                )))
            }
        },
    };
    set_path(doc, path, next);
    Ok(())
}

fn array_at<'a>(doc: &'a mut Document, path: &str) -> DocpipeResult<&'a mut Vec<Bson>> {
    match get_path(doc, path) {
        None | Some(Bson::Null) => set_path(doc, path, Bson::Array(Vec::new())),
        Some(Bson::Array(_)) => {}
        Some(other) => {
            return Err(update_error(format!(
                "field {} must be an array, found {}",
                path, other
            )))
        }
    }

    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let last = parts.peek().is_none();
        match current.get_mut(part) {
            Some(Bson::Array(items)) if last => return Ok(items),
            Some(Bson::Document(inner)) if !last => current = inner,
            _ => break,
        }
    }
    Err(update_error(format!("field {} is not reachable", path)))
}

fn append(doc: &mut Document, path: &str, value: &Bson, unique: bool) -> DocpipeResult<()> {
    let values = match value {
        Bson::Document(spec) if spec.contains_key("$each") => match spec.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => return Err(update_error("$each needs an array")),
        },
        single => vec![single.clone()],
    };
    let items = array_at(doc, path)?;
    for value in values {
        if !unique || !items.iter().any(|item| values_equal(item, &value)) {
            items.push(value);
        }
    }
    Ok(())
}

fn pull_all(doc: &mut Document, path: &str, value: &Bson) -> DocpipeResult<()> {
    let removed = match value {
        Bson::Array(items) => items,
        other => return Err(update_error(format!("$pullAll needs an array, got {}", other))),
    };
    if get_path(doc, path).is_none() {
        return Ok(());
    }
    let items = array_at(doc, path)?;
    items.retain(|item| !removed.iter().any(|r| values_equal(item, r)));
    Ok(())
}
