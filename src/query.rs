use crate::binding::{table_access_sql, TableAccessFilter, SQL_PARAM_TABLE_ACCESS};
use crate::descriptor::DocumentEntityDescriptor;
use crate::document::ParentDocument;
use crate::error::{DocWinError, Result};
use crate::expr::EvalContext;
use crate::filter::sql::{SqlAndParams, SqlFilterConverter, SqlParams};
use crate::filter::DocumentFilterList;
use crate::sql::{DocumentQueryOrderBy, SqlOptions, SqlOrderByBuilder};
use crate::types::{DocumentId, DocumentPath};
use std::sync::Arc;

/// A query for documents of one entity: by record id, by parent link,
/// and/or by filters; with explicit or entity-default ordering and optional
/// paging.
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    entity: Arc<DocumentEntityDescriptor>,
    record_id: Option<DocumentId>,
    parent_id: Option<DocumentId>,
    parent_path: Option<DocumentPath>,
    filters: DocumentFilterList,
    order_bys: Vec<DocumentQueryOrderBy>,
    first_row: i64,
    page_length: i64,
    eval_ctx: EvalContext,
}

impl DocumentQuery {
    pub fn builder(entity: Arc<DocumentEntityDescriptor>) -> DocumentQueryBuilder {
        DocumentQueryBuilder {
            query: DocumentQuery {
                entity,
                record_id: None,
                parent_id: None,
                parent_path: None,
                filters: DocumentFilterList::empty(),
                order_bys: Vec::new(),
                first_row: 0,
                page_length: 0,
                eval_ctx: EvalContext::new(),
            },
        }
    }

    pub fn entity(&self) -> &Arc<DocumentEntityDescriptor> {
        &self.entity
    }

    pub fn record_id(&self) -> Option<DocumentId> {
        self.record_id
    }

    pub fn parent_id(&self) -> Option<DocumentId> {
        self.parent_id
    }

    pub fn parent_path(&self) -> Option<&DocumentPath> {
        self.parent_path.as_ref()
    }

    pub fn filters(&self) -> &DocumentFilterList {
        &self.filters
    }

    /// Render the full SELECT statement with its bind parameters. Access
    /// control is injected around the innermost per-table select; filters
    /// and the entity where-clause land in the outer WHERE.
    pub fn to_sql_and_params(
        &self,
        access: &dyn TableAccessFilter,
        converter: &dyn SqlFilterConverter,
    ) -> Result<SqlAndParams> {
        let binding = self.entity.binding();
        let table_alias = binding.table_alias();

        let mut ctx = self.eval_ctx.clone();
        ctx.put(
            SQL_PARAM_TABLE_ACCESS,
            table_access_sql(access, binding.table_name()),
        );

        let mut sql = binding.sql_select_all().resolve(&ctx)?;
        let mut params = SqlParams::new();
        let mut where_parts: Vec<String> = Vec::new();

        if let Some(where_clause) = binding.sql_where_clause() {
            let rendered = where_clause.resolve(&ctx)?;
            if !rendered.trim().is_empty() {
                where_parts.push(format!("({rendered})"));
            }
        }

        if let (Some(link_column), Some(parent_id)) = (binding.link_column_name(), self.parent_id)
        {
            where_parts.push(format!("{table_alias}.{link_column} = ?"));
            params.push(parent_id.as_i64());
        }

        if let Some(record_id) = self.record_id {
            let key_column = binding.key_column_name().ok_or_else(|| {
                DocWinError::Binding(format!(
                    "Entity {} has no key column, cannot query by record id",
                    binding.table_name()
                ))
            })?;
            where_parts.push(format!("{table_alias}.{key_column} = ?"));
            params.push(record_id.as_i64());
        }

        if !self.filters.is_empty() {
            let sql_opts = SqlOptions::of_table_alias(table_alias);
            if let Some(filters_sql) = converter.list_sql(&mut params, &self.filters, &sql_opts)? {
                where_parts.push(filters_sql);
            }
        }

        if !where_parts.is_empty() {
            sql.push_str("\n WHERE ");
            sql.push_str(&where_parts.join("\n AND "));
        }

        let order_bys: &[DocumentQueryOrderBy] = if self.order_bys.is_empty() {
            binding.default_order_bys()
        } else {
            &self.order_bys
        };
        if let Some(order_by_sql) = SqlOrderByBuilder::new(binding)
            .join_on_table_name_or_alias(table_alias)
            .build_sql_order_by(order_bys)?
        {
            sql.push_str("\n ORDER BY ");
            sql.push_str(&order_by_sql);
        }

        if self.page_length > 0 {
            let first_row = self.first_row.max(0);
            sql.push_str(&format!("\n LIMIT {} OFFSET {}", self.page_length, first_row));
        }

        Ok(SqlAndParams::new(sql, params))
    }
}

pub struct DocumentQueryBuilder {
    query: DocumentQuery,
}

impl DocumentQueryBuilder {
    pub fn record_id(mut self, record_id: DocumentId) -> Self {
        self.query.record_id = Some(record_id);
        self
    }

    /// Scope the query to children of the given parent document.
    pub fn parent(mut self, parent: &ParentDocument) -> Self {
        self.query.parent_id = Some(parent.id());
        self.query.parent_path = Some(parent.path().clone());
        self
    }

    pub fn filters(mut self, filters: DocumentFilterList) -> Self {
        self.query.filters = filters;
        self
    }

    pub fn order_by(mut self, order_by: DocumentQueryOrderBy) -> Self {
        self.query.order_bys.push(order_by);
        self
    }

    pub fn first_row(mut self, first_row: i64) -> Self {
        self.query.first_row = first_row;
        self
    }

    pub fn page_length(mut self, page_length: i64) -> Self {
        self.query.page_length = page_length;
        self
    }

    pub fn eval_context(mut self, eval_ctx: EvalContext) -> Self {
        self.query.eval_ctx = eval_ctx;
        self
    }

    pub fn build(self) -> DocumentQuery {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{AllowAllAccess, SqlEntityBinding, SqlFieldBinding};
    use crate::filter::sql::FieldFilterConverter;
    use crate::filter::{DocumentFilter, FilterOperator};
    use serde_json::json;

    fn lines_entity() -> Arc<DocumentEntityDescriptor> {
        let detail_id = crate::types::DetailId::new("lines");
        DocumentEntityDescriptor::builder("SalesOrder")
            .detail_id(detail_id.clone())
            .binding(
                SqlEntityBinding::builder()
                    .table_name("C_OrderLine")
                    .table_alias_from_detail_id(Some(&detail_id))
                    .child_to_parent_link_column_names("C_Order_ID", "C_Order_ID")
                    .add_field(SqlFieldBinding::new("C_OrderLine_ID").key(true))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("Line").default_order_by(10, true))
                    .unwrap()
                    .add_field(SqlFieldBinding::new("StatusId"))
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_query_sql_composition() {
        let entity = lines_entity();
        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(7))
            .filters(DocumentFilterList::of(
                DocumentFilter::single_parameter_filter(
                    "status",
                    "StatusId",
                    FilterOperator::Equal,
                    json!(5),
                )
                .unwrap(),
            ))
            .build();

        let converter = FieldFilterConverter::new(entity.binding());
        let rendered = query.to_sql_and_params(&AllowAllAccess, &converter).unwrap();

        let sql = rendered.sql();
        assert!(sql.contains("FROM C_OrderLine"));
        assert!(sql.contains("d_lines.C_OrderLine_ID = ?"));
        assert!(sql.contains("/* status */ (d_lines.StatusId = ?)"));
        assert!(sql.contains("ORDER BY (d_lines.Line) ASC NULLS LAST"));
        assert_eq!(rendered.params().values(), &[json!(7), json!(5)]);
    }

    #[test]
    fn test_query_without_key_column_cannot_use_record_id() {
        let entity = DocumentEntityDescriptor::builder("W")
            .binding(
                SqlEntityBinding::builder()
                    .table_name("T")
                    .add_field(SqlFieldBinding::new("Name"))
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        let query = DocumentQuery::builder(Arc::clone(&entity))
            .record_id(DocumentId::new(1))
            .build();
        let converter = FieldFilterConverter::new(entity.binding());
        assert!(query.to_sql_and_params(&AllowAllAccess, &converter).is_err());
    }

    #[test]
    fn test_paging_clause() {
        let entity = lines_entity();
        let query = DocumentQuery::builder(Arc::clone(&entity))
            .first_row(40)
            .page_length(20)
            .build();
        let converter = FieldFilterConverter::new(entity.binding());
        let rendered = query.to_sql_and_params(&AllowAllAccess, &converter).unwrap();
        assert!(rendered.sql().ends_with("LIMIT 20 OFFSET 40"));
    }
}
