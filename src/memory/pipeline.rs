//! Aggregation pipeline interpreter.

use bson::{Bson, Document};
use std::cmp::Ordering;

use super::document::{as_f64, compare, get_path, is_truthy, remove_path, set_path, values_equal};
use super::matcher::{equals, eval, matches};
use crate::error::{DocpipeError, DocpipeResult};

fn stage_error(stage: &str, message: impl std::fmt::Display) -> DocpipeError {
    DocpipeError::Store(format!("{}: {}", stage, message))
}

/// Run `pipeline` over `input`. `collection` resolves `$lookup` sources.
pub(crate) fn run<F>(
    input: Vec<Document>,
    pipeline: &[Document],
    collection: &F,
) -> DocpipeResult<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    let mut docs = input;
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => return Err(stage_error("pipeline", "each stage needs exactly one operator")),
        };
        docs = match name.as_str() {
            "$match" => exec_match(docs, as_spec(name, spec)?)?,
            "$project" => exec_project(docs, as_spec(name, spec)?)?,
            "$group" => exec_group(docs, as_spec(name, spec)?)?,
            "$replaceRoot" => exec_replace_root(docs, as_spec(name, spec)?)?,
            "$sort" => exec_sort(docs, as_spec(name, spec)?)?,
            "$skip" => {
                let n = as_count(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = as_count(name, spec)?;
                docs.into_iter().take(n).collect()
            }
            "$count" => match spec {
                Bson::String(field) if !field.is_empty() => exec_count(docs, field),
                other => return Err(stage_error(name, format!("invalid field {}", other))),
            },
            "$lookup" => exec_lookup(docs, as_spec(name, spec)?, collection)?,
            "$unwind" => exec_unwind(docs, spec)?,
            other => return Err(stage_error(other, "unsupported stage")),
        };
    }
    Ok(docs)
}

fn as_spec<'a>(stage: &str, spec: &'a Bson) -> DocpipeResult<&'a Document> {
    match spec {
        Bson::Document(doc) => Ok(doc),
        other => Err(stage_error(stage, format!("expected a document, got {}", other))),
    }
}

fn as_count(stage: &str, spec: &Bson) -> DocpipeResult<usize> {
    let n = match spec {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        other => return Err(stage_error(stage, format!("expected an integer, got {}", other))),
    };
    usize::try_from(n).map_err(|_| stage_error(stage, format!("negative count {}", n)))
}

fn exec_match(docs: Vec<Document>, predicate: &Document) -> DocpipeResult<Vec<Document>> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        if matches(&doc, predicate)? {
            out.push(doc);
        }
    }
    Ok(out)
}

fn is_exclusion(spec: &Document) -> bool {
    let zero = |value: &Bson| matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false));
    let mut others = spec.iter().filter(|(key, _)| key.as_str() != "_id").peekable();
    match others.peek() {
        None => spec.get("_id").is_some_and(zero),
        Some(_) => others.all(|(_, value)| zero(value)),
    }
}

fn is_flag(value: &Bson) -> bool {
    matches!(
        value,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_)
    )
}

fn exec_project(docs: Vec<Document>, spec: &Document) -> DocpipeResult<Vec<Document>> {
    if is_exclusion(spec) {
        return Ok(docs
            .into_iter()
            .map(|mut doc| {
                for (key, value) in spec {
                    if !is_truthy(value) {
                        remove_path(&mut doc, key);
                    }
                }
                doc
            })
            .collect());
    }

    let keep_id = spec.get("_id").map(is_truthy).unwrap_or(true);
    docs.into_iter()
        .map(|doc| -> DocpipeResult<Document> {
            let mut out = Document::new();
            if keep_id {
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
            }
            for (key, value) in spec {
                if key == "_id" && is_flag(value) {
                    continue;
                }
                if is_flag(value) {
                    if is_truthy(value) {
                        if let Some(found) = get_path(&doc, key) {
                            set_path(&mut out, key, found.clone());
                        }
                    }
                } else {
                    set_path(&mut out, key, eval(&doc, value)?);
                }
            }
            Ok(out)
        })
        .collect()
}

enum Accumulator {
    First(Option<Bson>),
    Last(Bson),
    Sum(Vec<Bson>),
    Avg(Vec<f64>),
    Min(Option<Bson>),
    Max(Option<Bson>),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn new(op: &str) -> DocpipeResult<Self> {
        Ok(match op {
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$sum" => Accumulator::Sum(Vec::new()),
            "$avg" => Accumulator::Avg(Vec::new()),
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => return Err(stage_error("$group", format!("unsupported accumulator {}", other))),
        })
    }

    fn feed(&mut self, value: Bson) {
        match self {
            Accumulator::First(slot) => {
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            Accumulator::Last(slot) => *slot = value,
            Accumulator::Sum(values) => values.push(value),
            Accumulator::Avg(values) => {
                if let Some(n) = as_f64(&value) {
                    values.push(n);
                }
            }
            Accumulator::Min(_) | Accumulator::Max(_) if matches!(value, Bson::Null) => {}
            Accumulator::Min(slot) => {
                if slot.as_ref().map_or(true, |cur| compare(&value, cur) == Ordering::Less) {
                    *slot = Some(value);
                }
            }
            Accumulator::Max(slot) => {
                if slot.as_ref().map_or(true, |cur| compare(&value, cur) == Ordering::Greater) {
                    *slot = Some(value);
                }
            }
            Accumulator::Push(values) => values.push(value),
            Accumulator::AddToSet(values) => {
                if !values.iter().any(|v| values_equal(v, &value)) {
                    values.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::First(slot) => slot.unwrap_or(Bson::Null),
            Accumulator::Last(slot) => slot,
            Accumulator::Sum(values) => sum(&values),
            Accumulator::Avg(values) => {
                if values.is_empty() {
                    Bson::Null
                } else {
                    Bson::Double(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Accumulator::Min(slot) | Accumulator::Max(slot) => slot.unwrap_or(Bson::Null),
            Accumulator::Push(values) | Accumulator::AddToSet(values) => Bson::Array(values),
        }
    }
}

/// Sum numeric values, staying integral while every input is.
fn sum(values: &[Bson]) -> Bson {
    let mut total: i64 = 0;
    let mut wide = false;
    let mut float: Option<f64> = None;
    for value in values {
        match value {
            Bson::Int32(n) => total = total.saturating_add(i64::from(*n)),
            Bson::Int64(n) => {
                wide = true;
                total = total.saturating_add(*n);
            }
            Bson::Double(n) => *float.get_or_insert(0.0) += n,
            _ => {}
        }
    }
    match float {
        Some(f) => Bson::Double(f + total as f64),
        None if wide => Bson::Int64(total),
        None => match i32::try_from(total) {
            Ok(n) => Bson::Int32(n),
            Err(_) => Bson::Int64(total),
        },
    }
}

fn exec_group(docs: Vec<Document>, spec: &Document) -> DocpipeResult<Vec<Document>> {
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| stage_error("$group", "missing _id"))?;

    let mut fields = Vec::new();
    for (name, acc) in spec.iter().filter(|(name, _)| name.as_str() != "_id") {
        let acc = as_spec("$group", acc)?;
        let mut entries = acc.iter();
        match (entries.next(), entries.next()) {
            (Some((op, expr)), None) => fields.push((name.clone(), op.clone(), expr.clone())),
            _ => return Err(stage_error("$group", format!("invalid accumulator for {}", name))),
        }
    }

    // Groups are kept in order of first appearance.
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = eval(doc, id_expr)?;
        let index = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(index) => index,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<DocpipeResult<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };
        for ((_, _, expr), acc) in fields.iter().zip(groups[index].1.iter_mut()) {
            acc.feed(eval(doc, expr)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for ((name, _, _), acc) in fields.iter().zip(accumulators) {
                out.insert(name.clone(), acc.finish());
            }
            out
        })
        .collect())
}

fn exec_replace_root(docs: Vec<Document>, spec: &Document) -> DocpipeResult<Vec<Document>> {
    let expr = spec
        .get("newRoot")
        .ok_or_else(|| stage_error("$replaceRoot", "missing newRoot"))?;
    docs.into_iter()
        .map(|doc| match eval(&doc, expr)? {
            Bson::Document(root) => Ok(root),
            other => Err(stage_error(
                "$replaceRoot",
                format!("newRoot must be a document, got {}", other),
            )),
        })
        .collect()
}

fn exec_sort(mut docs: Vec<Document>, spec: &Document) -> DocpipeResult<Vec<Document>> {
    let mut keys = Vec::with_capacity(spec.len());
    for (path, direction) in spec {
        let descending = match direction {
            Bson::Int32(1) | Bson::Int64(1) => false,
            Bson::Int32(-1) | Bson::Int64(-1) => true,
            other => return Err(stage_error("$sort", format!("unsupported direction {}", other))),
        };
        keys.push((path.as_str(), descending));
    }

    docs.sort_by(|a, b| {
        for (path, descending) in &keys {
            let left = get_path(a, path).unwrap_or(&Bson::Null);
            let right = get_path(b, path).unwrap_or(&Bson::Null);
            let ord = compare(left, right);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn exec_count(docs: Vec<Document>, field: &str) -> Vec<Document> {
    if docs.is_empty() {
        return Vec::new();
    }
    let count = i32::try_from(docs.len()).unwrap_or(i32::MAX);
    let mut out = Document::new();
    out.insert(field, count);
    vec![out]
}

fn lookup_field<'a>(spec: &'a Document, name: &str) -> DocpipeResult<&'a str> {
    spec.get_str(name)
        .map_err(|_| stage_error("$lookup", format!("missing {}", name)))
}

fn exec_lookup<F>(docs: Vec<Document>, spec: &Document, collection: &F) -> DocpipeResult<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    let from = lookup_field(spec, "from")?;
    let local_field = lookup_field(spec, "localField")?;
    let foreign_field = lookup_field(spec, "foreignField")?;
    let alias = lookup_field(spec, "as")?;

    let foreign = collection(from);
    Ok(docs
        .into_iter()
        .map(|mut doc| {
            let local = get_path(&doc, local_field).cloned().unwrap_or(Bson::Null);
            let candidates = match &local {
                Bson::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            let joined: Vec<Bson> = foreign
                .iter()
                .filter(|other| {
                    let value = get_path(other, foreign_field);
                    candidates.iter().any(|candidate| equals(value, candidate))
                })
                .cloned()
                .map(Bson::Document)
                .collect();
            set_path(&mut doc, alias, Bson::Array(joined));
            doc
        })
        .collect())
}

fn exec_unwind(docs: Vec<Document>, spec: &Bson) -> DocpipeResult<Vec<Document>> {
    let (path, preserve) = match spec {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(spec) => (
            spec.get_str("path")
                .map_err(|_| stage_error("$unwind", "missing path"))?,
            spec.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        other => return Err(stage_error("$unwind", format!("invalid spec {}", other))),
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| stage_error("$unwind", format!("path must start with $: {}", path)))?;

    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        match get_path(&doc, path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut row = doc.clone();
                    set_path(&mut row, path, item);
                    out.push(row);
                }
            }
            Some(Bson::Array(_)) => {
                if preserve {
                    remove_path(&mut doc, path);
                    out.push(doc);
                }
            }
            None | Some(Bson::Null) => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}
