pub mod included;

use crate::descriptor::DocumentEntityDescriptor;
use crate::error::{DocWinError, Result};
use crate::expr::EvalContext;
use crate::repository::DocumentsRepository;
use crate::types::{json_to_bool, json_to_int, DetailId, DocumentId, DocumentPath};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use included::IncludedDocumentsCollection;

/// Field name carrying the line number of ordered detail rows.
pub const FIELDNAME_LINE: &str = "Line";
/// Field name marking a document as processed (completed/closed).
pub const FIELDNAME_PROCESSED: &str = "Processed";

/// How a document tree is forked: as a read-only snapshot or as a writable
/// working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    CheckInReadonly,
    CheckOutWritable,
}

impl CopyMode {
    fn is_writable(&self) -> bool {
        matches!(self, CopyMode::CheckOutWritable)
    }
}

/// A change produced by a document mutation. Mutations report their effects
/// into a [`DocumentChanges`] collector handed in by the caller; there is no
/// ambient event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChangeEvent {
    FieldChanged {
        path: DocumentPath,
        field_name: String,
    },
    StaleDetail {
        path: DocumentPath,
        detail_id: DetailId,
    },
    DocumentDeleted {
        path: DocumentPath,
    },
}

#[derive(Debug, Default)]
pub struct DocumentChanges {
    events: Vec<DocumentChangeEvent>,
}

impl DocumentChanges {
    pub fn new() -> Self {
        DocumentChanges::default()
    }

    pub fn collect(&mut self, event: DocumentChangeEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[DocumentChangeEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Snapshot of the parent document handed to included-documents operations:
/// the parent's address, key id, writability and field values (for
/// evaluating allow-create/allow-delete logic).
#[derive(Debug, Clone)]
pub struct ParentDocument {
    path: DocumentPath,
    id: DocumentId,
    writable: bool,
    processed: bool,
    eval: EvalContext,
}

impl ParentDocument {
    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn eval_context(&self) -> &EvalContext {
        &self.eval
    }

    pub fn assert_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(DocWinError::InvalidDocumentState {
                document: self.path.to_string(),
                reason: "Document is not writable".into(),
            });
        }
        Ok(())
    }
}

/// In-memory representation of one row of a logical entity: its field
/// values plus one included-documents collection per detail relation.
///
/// Field storage is `Arc`-backed: [`Document::copy`] shares it, and the
/// first write to a copy clones the map (copy-on-write per document).
#[derive(Debug, Clone)]
pub struct Document {
    entity: Arc<DocumentEntityDescriptor>,
    path: DocumentPath,
    fields: Arc<HashMap<String, Value>>,
    new: bool,
    stale: bool,
    writable: bool,
    included: Vec<IncludedDocumentsCollection>,
}

impl Document {
    /// Create a document instance. Included-documents collections are
    /// created empty, one per detail entity, and load lazily.
    pub fn new(
        entity: Arc<DocumentEntityDescriptor>,
        path: DocumentPath,
        fields: HashMap<String, Value>,
        is_new: bool,
        writable: bool,
    ) -> Self {
        let included = entity
            .included_entities()
            .iter()
            .filter_map(|child| {
                let detail_id = child.detail_id()?.clone();
                Some(IncludedDocumentsCollection::new(
                    Arc::clone(child),
                    detail_id,
                ))
            })
            .collect();

        Document {
            entity,
            path,
            fields: Arc::new(fields),
            new: is_new,
            stale: false,
            writable,
            included,
        }
    }

    pub fn entity(&self) -> &Arc<DocumentEntityDescriptor> {
        &self.entity
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// The id of this document: the row id for detail documents, the root
    /// document id otherwise.
    pub fn document_id(&self) -> DocumentId {
        self.path.row_id().unwrap_or_else(|| self.path.document_id())
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Called by the repository once the document was persisted.
    pub fn mark_not_new(&mut self) {
        self.new = false;
    }

    /// Called by the repository when the backing store assigned the
    /// persistent id on first save: rewrites the path and the key field,
    /// and clears the new flag.
    pub fn assign_repository_id(&mut self, id: DocumentId) {
        self.path = self.path.clone().replacing_id(id);
        if let Some(key_field) = self
            .entity
            .binding()
            .fields()
            .iter()
            .find(|f| f.is_key_column())
        {
            Arc::make_mut(&mut self.fields)
                .insert(key_field.name().to_string(), Value::from(id.as_i64()));
        }
        self.new = false;
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn assert_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(DocWinError::InvalidDocumentState {
                document: self.path.to_string(),
                reason: "Document is not writable".into(),
            });
        }
        Ok(())
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_processed(&self) -> bool {
        self.field_value(FIELDNAME_PROCESSED)
            .and_then(json_to_bool)
            .unwrap_or(false)
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    pub fn field_value(&self, field_name: &str) -> Option<&Value> {
        self.fields.get(field_name)
    }

    pub fn field_value_as_int(&self, field_name: &str, default: i64) -> i64 {
        self.field_value(field_name)
            .and_then(json_to_int)
            .unwrap_or(default)
    }

    pub fn set_field_value(
        &mut self,
        field_name: &str,
        value: Value,
        changes: &mut DocumentChanges,
    ) -> Result<()> {
        self.assert_writable()?;
        Arc::make_mut(&mut self.fields).insert(field_name.to_string(), value);
        changes.collect(DocumentChangeEvent::FieldChanged {
            path: self.path.clone(),
            field_name: field_name.to_string(),
        });
        Ok(())
    }

    /// Replace this document's values with freshly loaded ones, keeping
    /// identity and writability.
    pub fn refresh_from(&mut self, loaded: Document) {
        self.fields = loaded.fields;
        self.stale = false;
    }

    /// Field values rendered as strings for logic-expression evaluation
    /// (booleans as `Y`/`N`).
    pub fn as_eval_context(&self) -> EvalContext {
        let mut ctx = EvalContext::new();
        for (name, value) in self.fields.iter() {
            let rendered = match value {
                Value::Null => continue,
                Value::Bool(true) => "Y".to_string(),
                Value::Bool(false) => "N".to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ctx.put(name.clone(), rendered);
        }
        ctx
    }

    pub fn as_parent_document(&self) -> ParentDocument {
        ParentDocument {
            path: self.path.clone(),
            id: self.document_id(),
            writable: self.writable,
            processed: self.is_processed(),
            eval: self.as_eval_context(),
        }
    }

    /// Fork this document tree. Structure is cloned, field storage is
    /// shared until a write; loaded/stale state of the included
    /// collections is preserved.
    pub fn copy(&self, mode: CopyMode) -> Document {
        Document {
            entity: Arc::clone(&self.entity),
            path: self.path.clone(),
            fields: Arc::clone(&self.fields),
            new: self.new,
            stale: self.stale,
            writable: mode.is_writable(),
            included: self.included.iter().map(|c| c.copy(mode)).collect(),
        }
    }

    pub fn included_collections(&self) -> &[IncludedDocumentsCollection] {
        &self.included
    }

    pub fn included_collection(&self, detail_id: &DetailId) -> Result<&IncludedDocumentsCollection> {
        self.included
            .iter()
            .find(|c| c.detail_id() == detail_id)
            .ok_or_else(|| {
                DocWinError::EntityNotFound(format!(
                    "No included collection '{detail_id}' in {}",
                    self.path
                ))
            })
    }

    pub fn included_collection_mut(
        &mut self,
        detail_id: &DetailId,
    ) -> Result<&mut IncludedDocumentsCollection> {
        let path = self.path.clone();
        self.included
            .iter_mut()
            .find(|c| c.detail_id() == detail_id)
            .ok_or_else(|| {
                DocWinError::EntityNotFound(format!(
                    "No included collection '{detail_id}' in {path}"
                ))
            })
    }

    /// Mark every included collection stale, e.g. on an external change
    /// notification for this document.
    pub fn mark_stale_all_included(&mut self, changes: &mut DocumentChanges) {
        let parent_path = self.path.clone();
        for collection in &mut self.included {
            collection.mark_stale_all(&parent_path, changes);
        }
    }

    // Convenience wrappers over the included collections, snapshotting this
    // document as the parent.

    pub fn included_documents(
        &mut self,
        repo: &dyn DocumentsRepository,
        detail_id: &DetailId,
    ) -> Result<Vec<&Document>> {
        let parent = self.as_parent_document();
        let collection = self.included_collection_mut(detail_id)?;
        collection.documents(repo, &parent)
    }

    pub fn included_document_by_id(
        &mut self,
        repo: &dyn DocumentsRepository,
        detail_id: &DetailId,
        row_id: DocumentId,
    ) -> Result<&Document> {
        let parent = self.as_parent_document();
        let collection = self.included_collection_mut(detail_id)?;
        collection.document_by_id(repo, &parent, row_id)
    }

    pub fn create_new_included_document(
        &mut self,
        repo: &dyn DocumentsRepository,
        detail_id: &DetailId,
    ) -> Result<DocumentId> {
        let parent = self.as_parent_document();
        let collection = self.included_collection_mut(detail_id)?;
        Ok(collection.create_new_document(repo, &parent)?.document_id())
    }

    pub fn delete_included_documents(
        &mut self,
        repo: &dyn DocumentsRepository,
        detail_id: &DetailId,
        row_ids: &[DocumentId],
        changes: &mut DocumentChanges,
    ) -> Result<()> {
        let parent = self.as_parent_document();
        let collection = self.included_collection_mut(detail_id)?;
        collection.delete_documents(repo, &parent, row_ids, changes)
    }

    pub fn next_included_line_no(
        &mut self,
        repo: &dyn DocumentsRepository,
        detail_id: &DetailId,
    ) -> Result<i64> {
        let parent = self.as_parent_document();
        let collection = self.included_collection_mut(detail_id)?;
        collection.next_line_no(repo, &parent)
    }
}
