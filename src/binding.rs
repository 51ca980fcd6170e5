use crate::error::{DocWinError, Result};
use crate::expr::SqlExpression;
use crate::sql::{
    DocumentQueryOrderBy, SqlOrderByBindings, SqlOrderByValue, SqlSelectDisplayValue,
    SqlSelectValue,
};
use crate::types::DetailId;
use regex::Regex;

/// Field name that, together with a key column, enables the pre-built
/// "select version by id" statement used for optimistic-locking reads.
pub const FIELDNAME_VERSION: &str = "Updated";

/// Table alias of the root (header) entity.
pub const TABLE_ALIAS_MASTER: &str = "master";

/// Placeholder resolved per query with the row-level access predicate.
pub const SQL_PARAM_TABLE_ACCESS: &str = "TableAccess";

/// Row-level access control, keyed by table name and applied around the
/// innermost per-table SELECT, where column references are still
/// fully-qualified. Read-only mode: the predicate only restricts reads.
pub trait TableAccessFilter: Send + Sync {
    /// Access predicate for the table, or `None` for unrestricted access.
    fn row_access_sql(&self, table_name: &str) -> Option<String>;
}

/// Unrestricted access.
pub struct AllowAllAccess;

impl TableAccessFilter for AllowAllAccess {
    fn row_access_sql(&self, _table_name: &str) -> Option<String> {
        None
    }
}

pub fn table_access_sql(access: &dyn TableAccessFilter, table_name: &str) -> String {
    access
        .row_access_sql(table_name)
        .unwrap_or_else(|| "1=1".to_string())
}

/// Default ORDER BY metadata of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultOrderBy {
    pub priority: i32,
    pub ascending: bool,
}

/// Binding of one logical field to its SQL representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlFieldBinding {
    field_name: String,
    column_name: String,
    column_name_alias: String,
    virtual_column_sql: Option<String>,
    key: bool,
    sortable: bool,
    display_expression: Option<SqlExpression>,
    default_order_by: Option<DefaultOrderBy>,
}

impl SqlFieldBinding {
    pub fn new(field_name: impl Into<String>) -> Self {
        let field_name = field_name.into();
        SqlFieldBinding {
            column_name: field_name.clone(),
            column_name_alias: field_name.clone(),
            field_name,
            virtual_column_sql: None,
            key: false,
            sortable: true,
            display_expression: None,
            default_order_by: None,
        }
    }

    pub fn column_name(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self.column_name_alias = self.column_name.clone();
        self
    }

    pub fn virtual_column_sql(mut self, sql: impl Into<String>) -> Self {
        self.virtual_column_sql = Some(sql.into());
        self
    }

    pub fn key(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    /// Lookup display template; see [`crate::sql::SQL_PARAM_KEY_ID`].
    pub fn display_expression(mut self, expression: SqlExpression) -> Self {
        self.display_expression = Some(expression);
        self
    }

    pub fn default_order_by(mut self, priority: i32, ascending: bool) -> Self {
        self.default_order_by = Some(DefaultOrderBy {
            priority,
            ascending,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.field_name
    }

    pub fn column(&self) -> &str {
        &self.column_name
    }

    pub fn column_alias(&self) -> &str {
        &self.column_name_alias
    }

    pub fn is_key_column(&self) -> bool {
        self.key
    }

    pub fn is_using_display_column(&self) -> bool {
        self.display_expression.is_some()
    }

    pub fn display_column_name(&self) -> String {
        format!("{}$Display", self.column_name_alias)
    }

    pub fn default_order_by_meta(&self) -> Option<DefaultOrderBy> {
        self.default_order_by
    }

    pub fn sql_select_value(&self) -> SqlSelectValue {
        match &self.virtual_column_sql {
            Some(sql) => SqlSelectValue::of_virtual_column(sql.clone(), &self.column_name_alias),
            None => SqlSelectValue::of_column(None, &self.column_name, &self.column_name_alias),
        }
    }

    pub fn sql_select_display_value(&self) -> Option<SqlSelectDisplayValue> {
        self.display_expression.as_ref().map(|expression| {
            SqlSelectDisplayValue::new(
                None,
                &self.column_name,
                Some(expression.clone()),
                self.display_column_name(),
            )
        })
    }

    pub fn sql_order_by_value(&self) -> SqlOrderByValue {
        if !self.sortable {
            return SqlOrderByValue::null_expression();
        }
        SqlOrderByValue::of_select_value(self.sql_select_value())
    }
}

/// Binding of one document entity to its SQL shape: table, key/link columns,
/// field bindings and the cached query fragments derived from them.
#[derive(Debug)]
pub struct SqlEntityBinding {
    table_name: String,
    table_alias: String,
    key_column_name: Option<String>,
    link_column_name: Option<String>,
    parent_link_column_name: Option<String>,
    fields: Vec<SqlFieldBinding>,
    sql_select_all: SqlExpression,
    sql_where_clause: Option<SqlExpression>,
    default_order_bys: Vec<DocumentQueryOrderBy>,
    sql_select_version_by_id: Option<String>,
    table_dot_regex: Regex,
}

impl SqlEntityBinding {
    pub fn builder() -> SqlEntityBindingBuilder {
        SqlEntityBindingBuilder::default()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn table_alias(&self) -> &str {
        &self.table_alias
    }

    pub fn key_column_name(&self) -> Option<&str> {
        self.key_column_name.as_deref()
    }

    pub fn link_column_name(&self) -> Option<&str> {
        self.link_column_name.as_deref()
    }

    pub fn parent_link_column_name(&self) -> Option<&str> {
        self.parent_link_column_name.as_deref()
    }

    pub fn fields(&self) -> &[SqlFieldBinding] {
        &self.fields
    }

    pub fn field(&self, field_name: &str) -> Result<&SqlFieldBinding> {
        self.fields
            .iter()
            .find(|f| f.name() == field_name)
            .ok_or_else(|| DocWinError::FieldNotFound {
                field_name: field_name.to_string(),
                entity: self.describe(),
            })
    }

    fn describe(&self) -> String {
        format!(
            "{} (alias={}, fields=[{}])",
            self.table_name,
            self.table_alias,
            self.fields
                .iter()
                .map(|f| f.name())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    /// The cached `SELECT alias.*, <display columns> FROM (<inner>) alias`
    /// expression. The inner select is access-wrapped: resolve with
    /// [`SQL_PARAM_TABLE_ACCESS`] bound to the caller's access predicate.
    pub fn sql_select_all(&self) -> &SqlExpression {
        &self.sql_select_all
    }

    /// The compiled entity WHERE clause, alias-qualified. `None` when the
    /// entity has no clause or its legacy clause did not compile.
    pub fn sql_where_clause(&self) -> Option<&SqlExpression> {
        self.sql_where_clause.as_ref()
    }

    pub fn default_order_bys(&self) -> &[DocumentQueryOrderBy] {
        &self.default_order_bys
    }

    pub fn sql_select_version_by_id(&self) -> Option<&str> {
        self.sql_select_version_by_id.as_deref()
    }

    pub fn is_versioning_supported(&self) -> bool {
        self.sql_select_version_by_id.is_some()
    }

    /// Rewrite `TableName.` column qualifiers to this entity's alias.
    /// Single-quoted literals are left untouched.
    pub fn replace_table_name_with_table_alias(&self, sql: &str) -> String {
        if sql.is_empty() {
            return sql.to_string();
        }
        let replacement = format!("{}.", self.table_alias);
        replace_outside_quotes(sql, &self.table_dot_regex, &replacement)
    }
}

impl SqlOrderByBindings for SqlEntityBinding {
    fn field_order_by(&self, field_name: &str) -> Result<SqlOrderByValue> {
        Ok(self.field(field_name)?.sql_order_by_value())
    }
}

fn replace_outside_quotes(sql: &str, pattern: &Regex, replacement: &str) -> String {
    // Split on single quotes: even chunks are outside string literals
    let mut out = String::with_capacity(sql.len());
    for (i, chunk) in sql.split('\'').enumerate() {
        if i > 0 {
            out.push('\'');
        }
        if i % 2 == 0 {
            out.push_str(&pattern.replace_all(chunk, replacement));
        } else {
            out.push_str(chunk);
        }
    }
    out
}

#[derive(Default)]
pub struct SqlEntityBindingBuilder {
    table_name: Option<String>,
    table_alias: Option<String>,
    link_column_name: Option<String>,
    parent_link_column_name: Option<String>,
    sql_where_clause: Option<String>,
    fields: Vec<SqlFieldBinding>,
    key_field: Option<String>,
}

impl SqlEntityBindingBuilder {
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn table_alias(mut self, table_alias: impl Into<String>) -> Self {
        self.table_alias = Some(table_alias.into());
        self
    }

    /// Root entities get the `master` alias, details an alias derived from
    /// their detail id.
    pub fn table_alias_from_detail_id(self, detail_id: Option<&DetailId>) -> Self {
        match detail_id {
            None => self.table_alias(TABLE_ALIAS_MASTER),
            Some(detail_id) => self.table_alias(detail_id.table_alias()),
        }
    }

    pub fn child_to_parent_link_column_names(
        mut self,
        link_column_name: impl Into<String>,
        parent_link_column_name: impl Into<String>,
    ) -> Self {
        self.link_column_name = Some(link_column_name.into());
        self.parent_link_column_name = Some(parent_link_column_name.into());
        self
    }

    /// Legacy tab WHERE clause with table-name-qualified column references.
    pub fn sql_where_clause(mut self, sql_where_clause: impl Into<String>) -> Self {
        self.sql_where_clause = Some(sql_where_clause.into());
        self
    }

    /// Register a field. At most one key column is allowed per entity.
    pub fn add_field(mut self, field: SqlFieldBinding) -> Result<Self> {
        if field.is_key_column() {
            if let Some(existing) = &self.key_field {
                return Err(DocWinError::Binding(format!(
                    "More than one key field is not allowed: {}, {}",
                    existing,
                    field.name()
                )));
            }
            self.key_field = Some(field.name().to_string());
        }
        self.fields.push(field);
        Ok(self)
    }

    /// Build the binding. The builder is consumed; the cached SQL fragments
    /// are computed here, once, and are immutable afterwards.
    pub fn build(self) -> Result<SqlEntityBinding> {
        let table_name = self
            .table_name
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DocWinError::Binding("sqlTableName is not set".into()))?;
        let table_alias = self
            .table_alias
            .unwrap_or_else(|| TABLE_ALIAS_MASTER.to_string());

        if self.fields.is_empty() {
            return Err(DocWinError::Binding("No SQL fields found".into()));
        }

        let key_column_name = self
            .key_field
            .as_deref()
            .map(|field_name| {
                self.fields
                    .iter()
                    .find(|f| f.name() == field_name)
                    .expect("key field is registered")
                    .column()
                    .to_string()
            });

        let table_dot_regex = Regex::new(&format!(r"\b{}\.", regex::escape(&table_name)))
            .map_err(|e| DocWinError::Binding(format!("Table name regex: {e}")))?;

        let sql_select_all = build_sql_select_all(&table_name, &table_alias, &self.fields)?;
        let sql_where_clause = build_sql_where_clause(
            self.sql_where_clause.as_deref(),
            &table_name,
            &table_alias,
            &table_dot_regex,
        );
        let default_order_bys = build_default_order_bys(&self.fields);
        let sql_select_version_by_id =
            build_sql_select_version_by_id(&self.fields, key_column_name.as_deref(), &table_name);

        Ok(SqlEntityBinding {
            table_name,
            table_alias,
            key_column_name,
            link_column_name: self.link_column_name,
            parent_link_column_name: self.parent_link_column_name,
            fields: self.fields,
            sql_select_all,
            sql_where_clause,
            default_order_bys,
            sql_select_version_by_id,
            table_dot_regex,
        })
    }
}

/// Compose the two-level select:
///
/// ```sql
/// SELECT <alias>.*, <display columns...>
///  FROM (SELECT <columns> FROM <table> WHERE <access>) <alias>
/// ```
///
/// The access wrapper sees the original table name (fully-qualified column
/// references), everything above the inner select operates on the alias.
fn build_sql_select_all(
    table_name: &str,
    table_alias: &str,
    fields: &[SqlFieldBinding],
) -> Result<SqlExpression> {
    let select_values = fields
        .iter()
        .map(|f| f.sql_select_value().to_sql_string_with_column_name_alias())
        .collect::<Vec<_>>()
        .join("\n, ");

    let inner = SqlExpression::compile(&format!(
        "SELECT \n {select_values}\n FROM {table_name}\n WHERE @{}@",
        SQL_PARAM_TABLE_ACCESS
    ))?;

    let mut parts = vec![SqlExpression::constant(format!(
        "SELECT \n{table_alias}.*"
    ))];
    for field in fields {
        if let Some(display_value) = field.sql_select_display_value() {
            let display_value =
                display_value.with_join_on_table_name_or_alias(Some(table_alias));
            parts.push(SqlExpression::constant("\n, "));
            parts.push(display_value.to_expression_with_column_name_alias());
        }
    }
    parts.push(SqlExpression::constant("\n FROM ("));
    parts.push(inner);
    parts.push(SqlExpression::constant(format!(") {table_alias}")));

    Ok(SqlExpression::concat(parts))
}

/// Compile the legacy WHERE clause, rewriting table-name qualifiers to the
/// alias first. Malformed legacy SQL degrades to no clause instead of
/// failing the whole binding; the degradation is logged.
fn build_sql_where_clause(
    sql_where_clause: Option<&str>,
    table_name: &str,
    table_alias: &str,
    table_dot_regex: &Regex,
) -> Option<SqlExpression> {
    let sql = sql_where_clause?.trim();
    if sql.is_empty() {
        return None;
    }

    let replacement = format!("{table_alias}.");
    let prepared = replace_outside_quotes(sql, table_dot_regex, &replacement);

    let compiled = SqlExpression::compile(&prepared)
        .and_then(|expr| expr.validate_as_where_clause().map(|_| expr));
    match compiled {
        Ok(expr) => Some(expr),
        Err(e) => {
            log::warn!("Ignoring invalid WHERE clause of {table_name}: {e}");
            None
        }
    }
}

fn build_default_order_bys(fields: &[SqlFieldBinding]) -> Vec<DocumentQueryOrderBy> {
    let mut order_by_fields: Vec<&SqlFieldBinding> = fields
        .iter()
        .filter(|f| f.default_order_by_meta().is_some())
        .collect();
    // Stable sort: priority ties keep field insertion order
    order_by_fields.sort_by_key(|f| f.default_order_by_meta().expect("filtered").priority);

    order_by_fields
        .iter()
        .map(|f| {
            DocumentQueryOrderBy::by_field_name(
                f.name(),
                f.default_order_by_meta().expect("filtered").ascending,
            )
        })
        .collect()
}

fn build_sql_select_version_by_id(
    fields: &[SqlFieldBinding],
    key_column_name: Option<&str>,
    table_name: &str,
) -> Option<String> {
    fields
        .iter()
        .find(|f| f.name() == FIELDNAME_VERSION)?;
    let key_column_name = key_column_name?;
    Some(format!(
        "SELECT {FIELDNAME_VERSION} FROM {table_name} WHERE {key_column_name}=?"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::EvalContext;

    fn order_binding() -> SqlEntityBinding {
        SqlEntityBinding::builder()
            .table_name("C_Order")
            .table_alias_from_detail_id(None)
            .add_field(SqlFieldBinding::new("C_Order_ID").key(true))
            .unwrap()
            .add_field(SqlFieldBinding::new("DocumentNo").default_order_by(10, true))
            .unwrap()
            .add_field(SqlFieldBinding::new("Updated"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_without_fields_fails() {
        let err = SqlEntityBinding::builder()
            .table_name("C_Order")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("No SQL fields found"));
    }

    #[test]
    fn test_second_key_field_fails_fast() {
        let result = SqlEntityBinding::builder()
            .table_name("C_Order")
            .add_field(SqlFieldBinding::new("C_Order_ID").key(true))
            .unwrap()
            .add_field(SqlFieldBinding::new("OtherKey").key(true));
        assert!(result.is_err());
    }

    #[test]
    fn test_two_level_select() {
        let binding = order_binding();
        let ctx = EvalContext::new().with(SQL_PARAM_TABLE_ACCESS, "1=1");
        let sql = binding.sql_select_all().resolve(&ctx).unwrap();

        assert!(sql.starts_with("SELECT \nmaster.*"));
        assert!(sql.contains("FROM (SELECT"));
        assert!(sql.contains("C_Order_ID AS C_Order_ID"));
        assert!(sql.contains("FROM C_Order\n WHERE 1=1) master"));
    }

    #[test]
    fn test_access_predicate_wraps_inner_select() {
        let binding = order_binding();
        let ctx = EvalContext::new().with(
            SQL_PARAM_TABLE_ACCESS,
            "C_Order.AD_Org_ID IN (1,2)",
        );
        let sql = binding.sql_select_all().resolve(&ctx).unwrap();
        // The predicate lands inside the inner select, before the alias
        let inner_end = sql.find(") master").unwrap();
        let predicate_at = sql.find("C_Order.AD_Org_ID IN (1,2)").unwrap();
        assert!(predicate_at < inner_end);
    }

    #[test]
    fn test_display_column_in_outer_select() {
        let template =
            SqlExpression::compile("SELECT Name FROM C_BPartner WHERE C_BPartner_ID=@KeyId@")
                .unwrap();
        let binding = SqlEntityBinding::builder()
            .table_name("C_Order")
            .add_field(SqlFieldBinding::new("C_Order_ID").key(true))
            .unwrap()
            .add_field(SqlFieldBinding::new("C_BPartner_ID").display_expression(template))
            .unwrap()
            .build()
            .unwrap();

        let ctx = EvalContext::new().with(SQL_PARAM_TABLE_ACCESS, "1=1");
        let sql = binding.sql_select_all().resolve(&ctx).unwrap();
        assert!(sql.contains(
            "(SELECT Name FROM C_BPartner WHERE C_BPartner_ID=master.C_BPartner_ID) AS C_BPartner_ID$Display"
        ));
    }

    #[test]
    fn test_where_clause_rewritten_to_alias() {
        let binding = SqlEntityBinding::builder()
            .table_name("R_Request")
            .sql_where_clause("R_Request.SalesRep_ID=@#UserId@ AND R_Request.Note='R_Request.x'")
            .add_field(SqlFieldBinding::new("R_Request_ID").key(true))
            .unwrap()
            .build()
            .unwrap();

        let clause = binding.sql_where_clause().unwrap();
        let sql = clause
            .resolve(&EvalContext::new().with("#UserId", "101"))
            .unwrap();
        // Qualifier rewritten, quoted literal untouched
        assert_eq!(sql, "master.SalesRep_ID=101 AND master.Note='R_Request.x'");
    }

    #[test]
    fn test_malformed_where_clause_degrades_to_none() {
        let binding = SqlEntityBinding::builder()
            .table_name("C_Order")
            .sql_where_clause("((( not sql at all")
            .add_field(SqlFieldBinding::new("C_Order_ID").key(true))
            .unwrap()
            .build()
            .unwrap();
        assert!(binding.sql_where_clause().is_none());
    }

    #[test]
    fn test_default_order_bys_sorted_by_priority() {
        let binding = SqlEntityBinding::builder()
            .table_name("C_OrderLine")
            .add_field(SqlFieldBinding::new("C_OrderLine_ID").key(true))
            .unwrap()
            .add_field(SqlFieldBinding::new("Description").default_order_by(20, false))
            .unwrap()
            .add_field(SqlFieldBinding::new("Line").default_order_by(10, true))
            .unwrap()
            .build()
            .unwrap();

        let order_bys = binding.default_order_bys();
        assert_eq!(order_bys.len(), 2);
        assert_eq!(order_bys[0].field_name(), "Line");
        assert!(order_bys[0].is_ascending());
        assert_eq!(order_bys[1].field_name(), "Description");
        assert!(!order_bys[1].is_ascending());
    }

    #[test]
    fn test_versioning_support() {
        let binding = order_binding();
        assert!(binding.is_versioning_supported());
        assert_eq!(
            binding.sql_select_version_by_id().unwrap(),
            "SELECT Updated FROM C_Order WHERE C_Order_ID=?"
        );

        // No Updated field -> no versioning
        let binding = SqlEntityBinding::builder()
            .table_name("C_Order")
            .add_field(SqlFieldBinding::new("C_Order_ID").key(true))
            .unwrap()
            .build()
            .unwrap();
        assert!(!binding.is_versioning_supported());

        // Updated field but no key column -> no versioning
        let binding = SqlEntityBinding::builder()
            .table_name("C_Order")
            .add_field(SqlFieldBinding::new("Updated"))
            .unwrap()
            .build()
            .unwrap();
        assert!(!binding.is_versioning_supported());
    }

    #[test]
    fn test_field_lookup_error_carries_descriptor_context() {
        let binding = order_binding();
        let err = binding.field("NoSuchField").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("NoSuchField"));
        assert!(message.contains("C_Order"));
        assert!(message.contains("DocumentNo"));
    }
}
