use crate::descriptor::DocumentEntityDescriptor;
use crate::document::{
    CopyMode, Document, DocumentChangeEvent, DocumentChanges, ParentDocument, FIELDNAME_LINE,
};
use crate::error::{DocWinError, Result};
use crate::expr::LogicResult;
use crate::query::DocumentQuery;
use crate::repository::DocumentsRepository;
use crate::types::{DetailId, DocumentId, DocumentPath};
use std::collections::HashSet;
use std::sync::Arc;

/// The child rows of one detail relation (tab) of a parent document.
///
/// Lifecycle: created empty; loaded lazily on first full access or per id;
/// rows marked stale are refreshed transparently on next access; new
/// (unsaved) rows survive a full reload because they are not yet persisted.
///
/// All operations take the repository and a [`ParentDocument`] snapshot as
/// explicit arguments; mutators borrow the collection exclusively, so one
/// document tree is mutated by one caller at a time.
#[derive(Debug, Clone)]
pub struct IncludedDocumentsCollection {
    entity: Arc<DocumentEntityDescriptor>,
    detail_id: DetailId,
    documents: Vec<Document>,
    fully_loaded: bool,
    stale_ids: HashSet<DocumentId>,
}

impl IncludedDocumentsCollection {
    pub fn new(entity: Arc<DocumentEntityDescriptor>, detail_id: DetailId) -> Self {
        IncludedDocumentsCollection {
            entity,
            detail_id,
            documents: Vec::new(),
            fully_loaded: false,
            stale_ids: HashSet::new(),
        }
    }

    pub fn entity(&self) -> &Arc<DocumentEntityDescriptor> {
        &self.entity
    }

    pub fn detail_id(&self) -> &DetailId {
        &self.detail_id
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    fn is_stale(&self) -> bool {
        !self.stale_ids.is_empty()
    }

    /// The rows as currently loaded, without touching the repository.
    pub fn loaded_documents(&self) -> &[Document] {
        &self.documents
    }

    fn index_of(&self, document_id: DocumentId) -> Option<usize> {
        self.documents
            .iter()
            .position(|d| d.document_id() == document_id)
    }

    fn child_path(&self, parent: &ParentDocument, document_id: DocumentId) -> DocumentPath {
        parent
            .path()
            .create_child_path(self.detail_id.clone(), document_id)
    }

    /// Mark every cached row stale and drop the fully-loaded state, e.g. on
    /// an external change notification.
    pub fn mark_stale_all(&mut self, parent_path: &DocumentPath, changes: &mut DocumentChanges) {
        self.fully_loaded = false;
        self.stale_ids
            .extend(self.documents.iter().map(|d| d.document_id()));
        changes.collect(DocumentChangeEvent::StaleDetail {
            path: parent_path.clone(),
            detail_id: self.detail_id.clone(),
        });
    }

    /// Get one row: from the cache (refreshing it first if stale), or via a
    /// targeted repository query scoped to the parent.
    pub fn document_by_id(
        &mut self,
        repo: &dyn DocumentsRepository,
        parent: &ParentDocument,
        document_id: DocumentId,
    ) -> Result<&Document> {
        if let Some(index) = self.index_of(document_id) {
            self.refresh_stale_document_if_possible(repo, parent, index)?;
            return Ok(&self.documents[index]);
        }

        log::trace!(
            "No document with id '{document_id}' in {}; available: {:?}",
            self.detail_id,
            self.documents.iter().map(|d| d.document_id()).collect::<Vec<_>>()
        );

        if document_id.is_new() {
            // Placeholder ids address unsaved rows only; they cannot be queried
            return Err(DocWinError::InvalidDocumentPath(format!(
                "Actual ID was expected instead of '{document_id}'"
            )));
        }

        let query = DocumentQuery::builder(Arc::clone(&self.entity))
            .record_id(document_id)
            .parent(parent)
            .build();
        let mut document = repo.retrieve_document(&query)?.ok_or_else(|| {
            DocWinError::DocumentNotFound {
                path: self.child_path(parent, document_id),
            }
        })?;
        document.writable = parent.is_writable();

        self.documents.push(document);
        self.stale_ids.remove(&document_id);
        // A partial fetch never implies completeness
        self.fully_loaded = false;

        Ok(self.documents.last().expect("just pushed"))
    }

    /// All rows. Reloads the full set when the collection is stale or was
    /// never fully loaded; otherwise refreshes individual stale rows,
    /// silently dropping rows the repository reports as deleted.
    pub fn documents(
        &mut self,
        repo: &dyn DocumentsRepository,
        parent: &ParentDocument,
    ) -> Result<Vec<&Document>> {
        if self.is_stale() || !self.fully_loaded {
            self.load_all(repo, parent)?;
            return Ok(self.documents.iter().collect());
        }

        let mut index = 0;
        while index < self.documents.len() {
            match self.refresh_stale_document_if_possible(repo, parent, index) {
                Ok(()) => index += 1,
                Err(e) => {
                    // Tolerate only "this exact row is gone"
                    let path = self.documents[index].path().clone();
                    e.rethrow_if_not_matching(&path)?;
                    self.documents.remove(index);
                }
            }
        }

        Ok(self.documents.iter().collect())
    }

    fn refresh_stale_document_if_possible(
        &mut self,
        repo: &dyn DocumentsRepository,
        parent: &ParentDocument,
        index: usize,
    ) -> Result<()> {
        let document_id = self.documents[index].document_id();
        if document_id.is_new() {
            // Unsaved rows have nothing to refresh from
            self.stale_ids.remove(&document_id);
            return Ok(());
        }

        let stale = self.stale_ids.contains(&document_id) || self.documents[index].is_stale();
        if !stale {
            return Ok(());
        }

        log::trace!("Reloading stale document '{document_id}' of {}", self.detail_id);
        let query = DocumentQuery::builder(Arc::clone(&self.entity))
            .record_id(document_id)
            .parent(parent)
            .build();
        match repo.retrieve_document(&query)? {
            Some(loaded) => {
                self.documents[index].refresh_from(loaded);
                self.stale_ids.remove(&document_id);
                Ok(())
            }
            None => Err(DocWinError::DocumentNotFound {
                path: self.child_path(parent, document_id),
            }),
        }
    }

    /// Re-query the full child set. Previously loaded persisted rows are
    /// replaced by the fresh result; new (unsaved) rows are preserved, since
    /// discarding them would lose unsaved user edits.
    fn load_all(&mut self, repo: &dyn DocumentsRepository, parent: &ParentDocument) -> Result<()> {
        let query = DocumentQuery::builder(Arc::clone(&self.entity))
            .parent(parent)
            .build();
        let loaded = repo.retrieve_documents(&query)?;

        log::trace!(
            "Removing all documents except the new ones from {}",
            self.detail_id
        );
        self.documents.retain(|d| d.is_new());

        for mut document in loaded {
            document.writable = parent.is_writable();
            let document_id = document.document_id();
            if let Some(index) = self.index_of(document_id) {
                log::warn!(
                    "load_all: replacing document for id={document_id} in {}",
                    self.detail_id
                );
                self.documents[index] = document;
            } else {
                self.documents.push(document);
            }
        }

        self.stale_ids.clear();
        self.fully_loaded = true;
        Ok(())
    }

    pub fn allow_create_new_document(&self, parent: &ParentDocument) -> LogicResult {
        if parent.is_processed() {
            return LogicResult::named_constant("ParentDocumentProcessed", false);
        }
        self.entity
            .allow_create_new_logic()
            .evaluate(parent.eval_context())
    }

    pub fn assert_new_document_allowed(&self, parent: &ParentDocument) -> Result<()> {
        let allow = self.allow_create_new_document(parent);
        if allow.is_false() {
            return Err(DocWinError::InvalidDocumentState {
                document: parent.path().to_string(),
                reason: format!(
                    "Cannot create included document because it's not allowed.\n AllowCreateNewDocument: {allow}\n Entity: {} / {}",
                    self.entity.window_id(),
                    self.entity.binding().table_name()
                ),
            });
        }
        Ok(())
    }

    fn allow_delete_document(&self, parent: &ParentDocument) -> LogicResult {
        if parent.is_processed() {
            return LogicResult::named_constant("ParentDocumentProcessed", false);
        }
        self.entity
            .allow_delete_logic()
            .evaluate(parent.eval_context())
    }

    fn assert_delete_document_allowed(&self, parent: &ParentDocument) -> Result<()> {
        let allow = self.allow_delete_document(parent);
        if allow.is_false() {
            return Err(DocWinError::InvalidDocumentState {
                document: parent.path().to_string(),
                reason: format!(
                    "Cannot delete included document because it's not allowed: {allow}"
                ),
            });
        }
        Ok(())
    }

    /// Create a new (unsaved, writable) row, if the parent is writable and
    /// the entity's allow-create logic permits it.
    pub fn create_new_document(
        &mut self,
        repo: &dyn DocumentsRepository,
        parent: &ParentDocument,
    ) -> Result<&Document> {
        parent.assert_writable()?;
        self.assert_new_document_allowed(parent)?;

        let document = repo.create_new_document(&self.entity, Some(parent))?;
        self.documents.push(document);
        Ok(self.documents.last().expect("just pushed"))
    }

    /// Delete rows by id. Unsaved rows are simply dropped from memory;
    /// persisted rows are deleted from the repository first.
    pub fn delete_documents(
        &mut self,
        repo: &dyn DocumentsRepository,
        parent: &ParentDocument,
        document_ids: &[DocumentId],
        changes: &mut DocumentChanges,
    ) -> Result<()> {
        if document_ids.is_empty() {
            return Err(DocWinError::InvalidValue(
                "At least one rowId shall be specified when deleting included documents".into(),
            ));
        }
        parent.assert_writable()?;

        for &document_id in document_ids {
            self.document_by_id(repo, parent, document_id)?;
            self.assert_delete_document_allowed(parent)?;

            let index = self.index_of(document_id).expect("loaded above");
            if !self.documents[index].is_new() {
                repo.delete_document(&self.documents[index])?;
            }
            let document = self.documents.remove(index);
            self.stale_ids.remove(&document_id);
            changes.collect(DocumentChangeEvent::DocumentDeleted {
                path: document.path().clone(),
            });
        }

        Ok(())
    }

    /// Next line number for append-only ordered rows: the maximum `Line`
    /// value rounded down to a multiple of 10, plus 10.
    pub fn next_line_no(
        &mut self,
        repo: &dyn DocumentsRepository,
        parent: &ParentDocument,
    ) -> Result<i64> {
        let last_line_no = self
            .documents(repo, parent)?
            .iter()
            .map(|d| d.field_value_as_int(FIELDNAME_LINE, 0))
            .max()
            .unwrap_or(0);
        Ok(last_line_no / 10 * 10 + 10)
    }

    /// Deep-copy for forking a document tree; loaded/stale state is
    /// preserved, row data is copy-on-write per document.
    pub fn copy(&self, mode: CopyMode) -> Self {
        IncludedDocumentsCollection {
            entity: Arc::clone(&self.entity),
            detail_id: self.detail_id.clone(),
            documents: self.documents.iter().map(|d| d.copy(mode)).collect(),
            fully_loaded: self.fully_loaded,
            stale_ids: self.stale_ids.clone(),
        }
    }
}
