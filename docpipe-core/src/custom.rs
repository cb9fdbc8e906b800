//! Extension point for query nodes the model has no variant for.
//!
//! Each `Custom(..)` variant of the query model carries a [`Custom`] handle.
//! The payload only has to know how to render itself as a native value; the
//! compile site that receives it checks the rendered shape.

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::CompileResult;

/// Caller-defined query node rendered straight to the store's native form.
pub trait CustomNode: fmt::Debug + Send + Sync {
    fn render(&self) -> CompileResult<Bson>;
}

/// Shared handle to a custom node
pub type Custom = Arc<dyn CustomNode>;

/// Wrap any custom node in a shareable handle.
pub fn custom<N: CustomNode + 'static>(node: N) -> Custom {
    Arc::new(node)
}

impl CustomNode for Bson {
    fn render(&self) -> CompileResult<Bson> {
        Ok(self.clone())
    }
}

impl CustomNode for Document {
    fn render(&self) -> CompileResult<Bson> {
        Ok(Bson::Document(self.clone()))
    }
}

impl CustomNode for String {
    fn render(&self) -> CompileResult<Bson> {
        Ok(Bson::String(self.clone()))
    }
}

impl CustomNode for &'static str {
    fn render(&self) -> CompileResult<Bson> {
        Ok(Bson::String((*self).to_string()))
    }
}

impl CustomNode for i64 {
    fn render(&self) -> CompileResult<Bson> {
        Ok(Bson::Int64(*self))
    }
}

/// Render a custom node and require a document.
pub(crate) fn render_document(node: &Custom) -> Option<CompileResult<Document>> {
    match node.render() {
        Ok(Bson::Document(doc)) => Some(Ok(doc)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Render a custom node and require a non-negative integer.
pub(crate) fn render_count(node: &Custom) -> Option<CompileResult<i64>> {
    match node.render() {
        Ok(Bson::Int32(n)) if n >= 0 => Some(Ok(i64::from(n))),
        Ok(Bson::Int64(n)) if n >= 0 => Some(Ok(n)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}
