use crate::binding::{AllowAllAccess, TableAccessFilter};
use crate::descriptor::DocumentEntityDescriptor;
use crate::document::{Document, ParentDocument};
use crate::error::{DocWinError, Result};
use crate::filter::sql::FieldFilterConverter;
use crate::query::DocumentQuery;
use crate::types::{DocumentId, DocumentPath};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Backing store of documents. Queries are built against an entity's SQL
/// binding; new documents live in memory under a placeholder id until the
/// first save.
pub trait DocumentsRepository {
    /// Create a new, unsaved document (placeholder id, writable). For
    /// detail documents the link field is pre-set from the parent.
    fn create_new_document(
        &self,
        entity: &Arc<DocumentEntityDescriptor>,
        parent: Option<&ParentDocument>,
    ) -> Result<Document>;

    /// Retrieve the single document matched by the query, or `None`.
    fn retrieve_document(&self, query: &DocumentQuery) -> Result<Option<Document>>;

    fn retrieve_documents(&self, query: &DocumentQuery) -> Result<Vec<Document>>;

    /// Persist the document: INSERT for new documents (assigning their
    /// persistent id), UPDATE otherwise.
    fn save_document(&self, document: &mut Document) -> Result<()>;

    fn delete_document(&self, document: &Document) -> Result<()>;

    /// Read just the version column of one row, for optimistic-concurrency
    /// checks. `None` when the entity does not support versioning or the
    /// row is gone.
    fn retrieve_version(
        &self,
        entity: &Arc<DocumentEntityDescriptor>,
        record_id: DocumentId,
    ) -> Result<Option<String>>;
}

fn document_path_for(
    query: &DocumentQuery,
    entity: &Arc<DocumentEntityDescriptor>,
    id: DocumentId,
) -> DocumentPath {
    match (query.parent_path(), entity.detail_id()) {
        (Some(parent_path), Some(detail_id)) => {
            parent_path.create_child_path(detail_id.clone(), id)
        }
        _ => DocumentPath::root(entity.window_id(), id),
    }
}

/// SQLite-backed [`DocumentsRepository`]: executes the SQL produced by the
/// entity bindings and maps result rows back through them.
pub struct SqlDocumentsRepository {
    conn: Connection,
    access: Arc<dyn TableAccessFilter>,
    next_new_id: AtomicI64,
}

impl SqlDocumentsRepository {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::with_connection(Connection::open(path)?))
    }

    /// In-memory repository (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    pub fn with_connection(conn: Connection) -> Self {
        SqlDocumentsRepository {
            conn,
            access: Arc::new(AllowAllAccess),
            next_new_id: AtomicI64::new(-1),
        }
    }

    pub fn with_access_filter(mut self, access: Arc<dyn TableAccessFilter>) -> Self {
        self.access = access;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn next_new_document_id(&self) -> DocumentId {
        DocumentId::new(self.next_new_id.fetch_sub(1, Ordering::SeqCst))
    }

    fn query_documents(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let entity = query.entity();
        let binding = entity.binding();
        let converter = FieldFilterConverter::new(binding);
        let rendered = query.to_sql_and_params(self.access.as_ref(), &converter)?;

        let key_field_alias = binding
            .fields()
            .iter()
            .find(|f| f.is_key_column())
            .map(|f| f.column_alias().to_string())
            .ok_or_else(|| {
                DocWinError::Binding(format!(
                    "Entity {} has no key column, cannot retrieve documents",
                    binding.table_name()
                ))
            })?;

        let mut stmt = self.conn.prepare(rendered.sql())?;
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let params: Vec<rusqlite::types::Value> = rendered
            .params()
            .values()
            .iter()
            .map(json_to_sql_value)
            .collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let mut fields = HashMap::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                fields.insert(name.clone(), sql_value_to_json(row.get_ref(i)?));
            }

            let id = fields
                .get(&key_field_alias)
                .and_then(crate::types::json_to_int)
                .ok_or_else(|| {
                    DocWinError::InvalidValue(format!(
                        "Row of {} has no usable key value in column {key_field_alias}",
                        binding.table_name()
                    ))
                })?;
            let id = DocumentId::new(id);
            let path = document_path_for(query, entity, id);
            documents.push(Document::new(Arc::clone(entity), path, fields, false, false));
        }

        Ok(documents)
    }
}

impl DocumentsRepository for SqlDocumentsRepository {
    fn create_new_document(
        &self,
        entity: &Arc<DocumentEntityDescriptor>,
        parent: Option<&ParentDocument>,
    ) -> Result<Document> {
        let binding = entity.binding();
        let id = self.next_new_document_id();

        let path = match (parent, entity.detail_id()) {
            (Some(parent), Some(detail_id)) => {
                parent.path().create_child_path(detail_id.clone(), id)
            }
            _ => DocumentPath::root(entity.window_id(), id),
        };

        let mut fields = HashMap::new();
        if let Some(key_field) = binding.fields().iter().find(|f| f.is_key_column()) {
            fields.insert(
                key_field.name().to_string(),
                Value::from(id.as_i64()),
            );
        }
        if let (Some(parent), Some(link_column)) = (parent, binding.link_column_name()) {
            let link_field_name = binding
                .fields()
                .iter()
                .find(|f| f.column() == link_column)
                .map(|f| f.name().to_string())
                .unwrap_or_else(|| link_column.to_string());
            fields.insert(link_field_name, Value::from(parent.id().as_i64()));
        }

        Ok(Document::new(Arc::clone(entity), path, fields, true, true))
    }

    fn retrieve_document(&self, query: &DocumentQuery) -> Result<Option<Document>> {
        let mut documents = self.query_documents(query)?;
        if documents.len() > 1 {
            log::warn!(
                "Got {} documents for single-document query on {}; using the first one",
                documents.len(),
                query.entity().binding().table_name()
            );
        }
        if documents.is_empty() {
            Ok(None)
        } else {
            Ok(Some(documents.remove(0)))
        }
    }

    fn retrieve_documents(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        self.query_documents(query)
    }

    fn save_document(&self, document: &mut Document) -> Result<()> {
        let entity = Arc::clone(document.entity());
        let binding = entity.binding();
        let key_column = binding.key_column_name().ok_or_else(|| {
            DocWinError::Binding(format!(
                "Entity {} has no key column, cannot save",
                binding.table_name()
            ))
        })?;

        // Persistable columns: real (non-virtual) columns except the key
        let mut columns: Vec<&str> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        for field in binding.fields() {
            if field.is_key_column() || field.sql_select_value().is_virtual_column() {
                continue;
            }
            if let Some(value) = document.field_value(field.name()) {
                columns.push(field.column());
                values.push(json_to_sql_value(value));
            }
        }

        if document.is_new() {
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                binding.table_name(),
                columns.join(", "),
            );
            self.conn
                .execute(&sql, rusqlite::params_from_iter(values))?;
            let id = DocumentId::new(self.conn.last_insert_rowid());
            document.assign_repository_id(id);
        } else {
            if columns.is_empty() {
                return Ok(());
            }
            let assignments = columns
                .iter()
                .map(|c| format!("{c} = ?"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE {} SET {assignments} WHERE {key_column} = ?",
                binding.table_name(),
            );
            values.push(rusqlite::types::Value::Integer(
                document.document_id().as_i64(),
            ));
            self.conn
                .execute(&sql, rusqlite::params_from_iter(values))?;
        }

        Ok(())
    }

    fn delete_document(&self, document: &Document) -> Result<()> {
        let binding = document.entity().binding();
        let key_column = binding.key_column_name().ok_or_else(|| {
            DocWinError::Binding(format!(
                "Entity {} has no key column, cannot delete",
                binding.table_name()
            ))
        })?;

        let sql = format!(
            "DELETE FROM {} WHERE {key_column} = ?",
            binding.table_name()
        );
        self.conn
            .execute(&sql, [document.document_id().as_i64()])?;
        Ok(())
    }

    fn retrieve_version(
        &self,
        entity: &Arc<DocumentEntityDescriptor>,
        record_id: DocumentId,
    ) -> Result<Option<String>> {
        let binding = entity.binding();
        let sql = match binding.sql_select_version_by_id() {
            Some(sql) => sql,
            None => return Ok(None),
        };

        use rusqlite::OptionalExtension;
        let version: Option<String> = self
            .conn
            .query_row(sql, [record_id.as_i64()], |row| row.get(0))
            .optional()?;
        Ok(version)
    }
}

fn json_to_sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn sql_value_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::from(i),
        rusqlite::types::ValueRef::Real(f) => {
            serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        rusqlite::types::ValueRef::Text(text) => {
            Value::String(String::from_utf8_lossy(text).into_owned())
        }
        // Binary columns have no JSON field representation
        rusqlite::types::ValueRef::Blob(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{SqlEntityBinding, SqlFieldBinding};
    use crate::document::{CopyMode, DocumentChanges};
    use crate::expr::SqlExpression;
    use crate::filter::{DocumentFilter, DocumentFilterList, FilterOperator};
    use crate::types::DetailId;
    use serde_json::json;

    fn order_entity() -> Arc<DocumentEntityDescriptor> {
        let lines_detail = DetailId::new("lines");
        let lines = DocumentEntityDescriptor::builder("SalesOrder")
            .detail_id(lines_detail.clone())
            .binding(
                SqlEntityBinding::builder()
                    .table_name("C_OrderLine")
                    .table_alias_from_detail_id(Some(&lines_detail))
                    .child_to_parent_link_column_names("C_Order_ID", "C_Order_ID")
                    .add_field(SqlFieldBinding::new("C_OrderLine_ID").key(true))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("C_Order_ID"))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("Line").default_order_by(10, true))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("Description"))
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let display = SqlExpression::compile(
            "SELECT Name FROM C_BPartner WHERE C_BPartner_ID=@KeyId@",
        )
        .unwrap();

        DocumentEntityDescriptor::builder("SalesOrder")
            .binding(
                SqlEntityBinding::builder()
                    .table_name("C_Order")
                    .table_alias_from_detail_id(None)
                    .add_field(SqlFieldBinding::new("C_Order_ID").key(true))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("DocumentNo").default_order_by(10, true))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("C_BPartner_ID").display_expression(display))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("Processed"))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("Updated"))
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .add_included_entity(lines)
            .build()
            .unwrap()
    }

    fn setup_repository() -> SqlDocumentsRepository {
        let repo = SqlDocumentsRepository::open_in_memory().unwrap();
        repo.connection()
            .execute_batch(
                "
                CREATE TABLE C_Order (
                    C_Order_ID INTEGER PRIMARY KEY,
                    DocumentNo TEXT,
                    C_BPartner_ID INTEGER,
                    Processed TEXT DEFAULT 'N',
                    Updated TEXT
                );
                CREATE TABLE C_OrderLine (
                    C_OrderLine_ID INTEGER PRIMARY KEY,
                    C_Order_ID INTEGER,
                    Line INTEGER,
                    Description TEXT
                );
                CREATE TABLE C_BPartner (
                    C_BPartner_ID INTEGER PRIMARY KEY,
                    Name TEXT
                );
                INSERT INTO C_BPartner VALUES (50, 'ACME Corp');
                INSERT INTO C_Order VALUES (1000, 'SO-1000', 50, 'N', '2024-01-10 10:00:00');
                INSERT INTO C_Order VALUES (1001, 'SO-1001', 50, 'Y', '2024-01-11 11:00:00');
                INSERT INTO C_OrderLine VALUES (1, 1000, 10, 'first');
                INSERT INTO C_OrderLine VALUES (2, 1000, 20, 'second');
                INSERT INTO C_OrderLine VALUES (3, 1001, 10, 'other order');
                ",
            )
            .unwrap();
        repo
    }

    #[test]
    fn test_retrieve_documents_with_display_column() {
        let repo = setup_repository();
        let entity = order_entity();

        let query = DocumentQuery::builder(Arc::clone(&entity)).build();
        let documents = repo.retrieve_documents(&query).unwrap();
        assert_eq!(documents.len(), 2);

        let first = &documents[0];
        assert_eq!(first.field_value("DocumentNo"), Some(&json!("SO-1000")));
        assert_eq!(
            first.field_value("C_BPartner_ID$Display"),
            Some(&json!("ACME Corp"))
        );
        assert_eq!(first.document_id(), DocumentId::new(1000));
        assert_eq!(first.path().to_string(), "SalesOrder/1000");
    }

    #[test]
    fn test_retrieve_with_filters() {
        let repo = setup_repository();
        let entity = order_entity();

        let filters = DocumentFilterList::of(
            DocumentFilter::single_parameter_filter(
                "processed",
                "Processed",
                FilterOperator::Equal,
                json!("Y"),
            )
            .unwrap(),
        );
        let query = DocumentQuery::builder(Arc::clone(&entity))
            .filters(filters)
            .build();
        let documents = repo.retrieve_documents(&query).unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].document_id(), DocumentId::new(1001));
    }

    #[test]
    fn test_retrieve_single_by_record_id() {
        let repo = setup_repository();
        let entity = order_entity();

        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(1000))
            .build();
        let document = repo.retrieve_document(&query).unwrap().unwrap();
        assert_eq!(document.field_value("DocumentNo"), Some(&json!("SO-1000")));

        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(9999))
            .build();
        assert!(repo.retrieve_document(&query).unwrap().is_none());
    }

    #[test]
    fn test_save_new_document_assigns_id() {
        let repo = setup_repository();
        let entity = order_entity();

        let mut document = repo.create_new_document(&entity, None).unwrap();
        assert!(document.is_new());
        assert!(document.document_id().is_new());

        let mut changes = DocumentChanges::new();
        document
            .set_field_value("DocumentNo", json!("SO-2000"), &mut changes)
            .unwrap();
        repo.save_document(&mut document).unwrap();

        assert!(!document.is_new());
        assert!(!document.document_id().is_new());

        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(document.document_id())
            .build();
        let reloaded = repo.retrieve_document(&query).unwrap().unwrap();
        assert_eq!(reloaded.field_value("DocumentNo"), Some(&json!("SO-2000")));
    }

    #[test]
    fn test_delete_document() {
        let repo = setup_repository();
        let entity = order_entity();

        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(1001))
            .build();
        let document = repo.retrieve_document(&query).unwrap().unwrap();
        repo.delete_document(&document).unwrap();
        assert!(repo.retrieve_document(&query).unwrap().is_none());
    }

    #[test]
    fn test_retrieve_version() {
        let repo = setup_repository();
        let entity = order_entity();

        let version = repo
            .retrieve_version(&entity, DocumentId::new(1000))
            .unwrap();
        assert_eq!(version.as_deref(), Some("2024-01-10 10:00:00"));

        let missing = repo
            .retrieve_version(&entity, DocumentId::new(4242))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_document_graph_end_to_end() {
        let repo = setup_repository();
        let entity = order_entity();
        let lines = DetailId::new("lines");

        // Load the order read-only, then check out a writable working copy
        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(1000))
            .build();
        let order = repo.retrieve_document(&query).unwrap().unwrap();
        let mut order = order.copy(CopyMode::CheckOutWritable);

        // Lines load lazily through the graph
        let loaded = order.included_documents(&repo, &lines).unwrap();
        assert_eq!(loaded.len(), 2);

        // Append a new line using the line-numbering convention
        let next_line_no = order.next_included_line_no(&repo, &lines).unwrap();
        assert_eq!(next_line_no, 30);
        let row_id = order.create_new_included_document(&repo, &lines).unwrap();
        assert!(row_id.is_new());

        let mut changes = DocumentChanges::new();
        {
            let parent = order.as_parent_document();
            let collection = order.included_collection_mut(&lines).unwrap();
            let index = collection
                .loaded_documents()
                .iter()
                .position(|d| d.document_id() == row_id)
                .unwrap();
            let mut new_line = collection.loaded_documents()[index].clone();
            new_line
                .set_field_value("Line", json!(next_line_no), &mut changes)
                .unwrap();
            new_line
                .set_field_value("Description", json!("third"), &mut changes)
                .unwrap();
            repo.save_document(&mut new_line).unwrap();
            assert!(!new_line.document_id().is_new());

            // The placeholder row is superseded by the persisted one
            collection
                .delete_documents(&repo, &parent, &[row_id], &mut changes)
                .unwrap();
            collection.mark_stale_all(parent.path(), &mut changes);
        }

        let reloaded = order.included_documents(&repo, &lines).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded
                .iter()
                .map(|d| d.field_value_as_int("Line", 0))
                .max(),
            Some(30)
        );

        // Deleting a persisted line removes it from the backing table
        let persisted_id = reloaded
            .iter()
            .find(|d| d.field_value_as_int("Line", 0) == 30)
            .unwrap()
            .document_id();
        order
            .delete_included_documents(&repo, &lines, &[persisted_id], &mut changes)
            .unwrap();

        let count: i64 = repo
            .connection()
            .query_row("SELECT COUNT(*) FROM C_OrderLine WHERE C_Order_ID=1000", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_new_detail_document_gets_parent_link() {
        let repo = setup_repository();
        let entity = order_entity();

        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(1000))
            .build();
        let order = repo.retrieve_document(&query).unwrap().unwrap();
        let parent = order.as_parent_document();

        let lines_entity = Arc::clone(
            entity
                .included_entity(&DetailId::new("lines"))
                .unwrap(),
        );
        let line = repo
            .create_new_document(&lines_entity, Some(&parent))
            .unwrap();
        assert!(line.is_new());
        assert_eq!(line.field_value("C_Order_ID"), Some(&json!(1000)));
        assert_eq!(
            line.path().to_string(),
            format!("SalesOrder/1000/lines/{}", line.document_id())
        );
    }
}
