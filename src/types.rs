use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single document row.
///
/// Persisted documents carry the (non-negative) SQL key value. Documents that
/// were created in memory but not yet saved carry a negative placeholder id
/// handed out by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(i64);

impl DocumentId {
    pub fn new(id: i64) -> Self {
        DocumentId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// True for placeholder ids of documents that were never persisted.
    pub fn is_new(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a detail relation (tab) under a parent entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetailId(String);

impl DetailId {
    pub fn new(id: impl Into<String>) -> Self {
        DetailId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SQL table alias used when this detail's entity is queried.
    pub fn table_alias(&self) -> String {
        format!("d_{}", self.0)
    }
}

impl fmt::Display for DetailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hierarchical address of a document: window, root document, optional
/// detail relation and row within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPath {
    window_id: String,
    document_id: DocumentId,
    detail_id: Option<DetailId>,
    row_id: Option<DocumentId>,
}

impl DocumentPath {
    pub fn root(window_id: impl Into<String>, document_id: DocumentId) -> Self {
        DocumentPath {
            window_id: window_id.into(),
            document_id,
            detail_id: None,
            row_id: None,
        }
    }

    /// Address of a row inside a detail relation of this document.
    pub fn create_child_path(&self, detail_id: DetailId, row_id: DocumentId) -> Self {
        DocumentPath {
            window_id: self.window_id.clone(),
            document_id: self.document_id,
            detail_id: Some(detail_id),
            row_id: Some(row_id),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    pub fn detail_id(&self) -> Option<&DetailId> {
        self.detail_id.as_ref()
    }

    pub fn row_id(&self) -> Option<DocumentId> {
        self.row_id
    }

    /// The same address with the leaf id replaced: the row id for detail
    /// paths, the root document id otherwise. Used when a new document gets
    /// its persistent id assigned on first save.
    pub fn replacing_id(mut self, id: DocumentId) -> Self {
        if self.row_id.is_some() {
            self.row_id = Some(id);
        } else {
            self.document_id = id;
        }
        self
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.window_id, self.document_id)?;
        if let Some(detail_id) = &self.detail_id {
            write!(f, "/{detail_id}")?;
        }
        if let Some(row_id) = &self.row_id {
            write!(f, "/{row_id}")?;
        }
        Ok(())
    }
}

/// A key/caption pair as produced by lookup fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupValue {
    pub key: i64,
    pub caption: String,
}

impl LookupValue {
    pub fn new(key: i64, caption: impl Into<String>) -> Self {
        LookupValue {
            key,
            caption: caption.into(),
        }
    }

    /// Extract the integer key from a JSON value shaped like a lookup value
    /// (`{"key": ..., "caption": ...}`).
    pub fn key_from_json(value: &serde_json::Value) -> Option<i64> {
        let key = value.as_object()?.get("key")?;
        match key {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

// ── JSON value coercions ─────────────────────────────────────────
// Shared by filter parameters and document field access.

pub(crate) fn json_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn json_to_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn json_to_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => Some(n.as_i64() != Some(0)),
        serde_json::Value::String(s) => match s.trim() {
            "Y" | "y" | "true" | "TRUE" | "yes" => Some(true),
            "N" | "n" | "false" | "FALSE" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path_display() {
        let root = DocumentPath::root("SalesOrder", DocumentId::new(1000));
        let child = root.create_child_path(DetailId::new("lines"), DocumentId::new(2));
        assert_eq!(child.to_string(), "SalesOrder/1000/lines/2");
        assert_eq!(root.to_string(), "SalesOrder/1000");
    }

    #[test]
    fn test_new_document_id() {
        assert!(DocumentId::new(-3).is_new());
        assert!(!DocumentId::new(0).is_new());
        assert!(!DocumentId::new(42).is_new());
    }

    #[test]
    fn test_lookup_key_from_json() {
        let v = serde_json::json!({"key": 17, "caption": "Standard"});
        assert_eq!(LookupValue::key_from_json(&v), Some(17));

        let v = serde_json::json!({"key": "23", "caption": "Express"});
        assert_eq!(LookupValue::key_from_json(&v), Some(23));

        assert_eq!(LookupValue::key_from_json(&serde_json::json!("17")), None);
    }
}
