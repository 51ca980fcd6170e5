use crate::error::Result;
use crate::expr::SqlExpression;
use std::collections::HashMap;
use std::fmt;

/// Placeholder name for the key-id SQL inside pre-compiled lookup templates.
pub const SQL_PARAM_KEY_ID: &str = "KeyId";
/// Placeholder name for the show-inactive flag inside lookup templates.
pub const SQL_PARAM_SHOW_INACTIVE: &str = "ShowInactive";
pub const SQL_PARAM_VALUE_SHOW_INACTIVE_YES: &str = "Y";

/// How generated SQL shall qualify column references: by table name (e.g.
/// for standalone predicates) or by the query's table alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlOptions {
    table_name_or_alias: String,
}

impl SqlOptions {
    pub fn of_table_name(table_name: impl Into<String>) -> Self {
        SqlOptions {
            table_name_or_alias: table_name.into(),
        }
    }

    pub fn of_table_alias(table_alias: impl Into<String>) -> Self {
        SqlOptions {
            table_name_or_alias: table_alias.into(),
        }
    }

    pub fn table_name_or_alias(&self) -> &str {
        &self.table_name_or_alias
    }
}

/// SQL to be used in expressions like `SELECT <this field's sql> FROM ...`:
/// either an `alias.column` reference, a bare `column`, or a virtual-column
/// SQL expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlSelectValue {
    table_name_or_alias: Option<String>,
    column_name: Option<String>,
    virtual_column_sql: Option<String>,
    column_name_alias: String,
}

impl SqlSelectValue {
    pub fn of_column(
        table_name_or_alias: Option<&str>,
        column_name: impl Into<String>,
        column_name_alias: impl Into<String>,
    ) -> Self {
        SqlSelectValue {
            table_name_or_alias: table_name_or_alias
                .filter(|a| !a.is_empty())
                .map(|a| a.to_string()),
            column_name: Some(column_name.into()),
            virtual_column_sql: None,
            column_name_alias: column_name_alias.into(),
        }
    }

    pub fn of_virtual_column(
        virtual_column_sql: impl Into<String>,
        column_name_alias: impl Into<String>,
    ) -> Self {
        SqlSelectValue {
            table_name_or_alias: None,
            column_name: None,
            virtual_column_sql: Some(virtual_column_sql.into()),
            column_name_alias: column_name_alias.into(),
        }
    }

    pub fn is_virtual_column(&self) -> bool {
        self.virtual_column_sql.is_some()
    }

    pub fn column_name_alias(&self) -> &str {
        &self.column_name_alias
    }

    pub fn to_sql_string(&self) -> String {
        if let Some(virtual_sql) = &self.virtual_column_sql {
            virtual_sql.clone()
        } else if let Some(table) = &self.table_name_or_alias {
            format!("{}.{}", table, self.column_name.as_deref().unwrap_or(""))
        } else {
            self.column_name.clone().unwrap_or_default()
        }
    }

    pub fn to_sql_string_with_column_name_alias(&self) -> String {
        format!("{} AS {}", self.to_sql_string(), self.column_name_alias)
    }

    /// Bind this select value to a different table alias. Column references
    /// are rebound; virtual-column SQL is literal and keeps its text.
    pub fn with_join_on_table_name_or_alias(&self, table_name_or_alias: Option<&str>) -> Self {
        if self.virtual_column_sql.is_some() {
            return self.clone();
        }

        let effective = table_name_or_alias
            .filter(|a| !a.is_empty())
            .map(|a| a.to_string());
        if self.table_name_or_alias == effective {
            return self.clone();
        }

        SqlSelectValue {
            table_name_or_alias: effective,
            ..self.clone()
        }
    }
}

impl fmt::Display for SqlSelectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_string())
    }
}

/// Display-column SQL for lookup fields: a pre-compiled template resolved
/// late with the key-id SQL and the show-inactive flag, rendered as
/// `(<expression>) AS <alias>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlSelectDisplayValue {
    join_on_table_name_or_alias: Option<String>,
    join_on_column_name: String,
    sql_expression: Option<SqlExpression>,
    column_name_alias: String,
}

impl SqlSelectDisplayValue {
    pub fn new(
        join_on_table_name_or_alias: Option<&str>,
        join_on_column_name: impl Into<String>,
        sql_expression: Option<SqlExpression>,
        column_name_alias: impl Into<String>,
    ) -> Self {
        SqlSelectDisplayValue {
            join_on_table_name_or_alias: join_on_table_name_or_alias
                .filter(|a| !a.is_empty())
                .map(|a| a.to_string()),
            join_on_column_name: join_on_column_name.into(),
            sql_expression,
            column_name_alias: column_name_alias.into(),
        }
    }

    pub fn column_name_alias(&self) -> &str {
        &self.column_name_alias
    }

    fn join_on_column_name_fq(&self) -> String {
        match &self.join_on_table_name_or_alias {
            Some(table) => format!("{}.{}", table, self.join_on_column_name),
            None => self.join_on_column_name.clone(),
        }
    }

    pub fn to_expression(&self) -> SqlExpression {
        match &self.sql_expression {
            None => SqlExpression::constant(self.join_on_column_name_fq()),
            Some(expression) => {
                let mut vars = HashMap::new();
                vars.insert(SQL_PARAM_KEY_ID, self.join_on_column_name_fq());
                vars.insert(
                    SQL_PARAM_SHOW_INACTIVE,
                    SQL_PARAM_VALUE_SHOW_INACTIVE_YES.to_string(),
                );
                expression.resolve_partial(&vars)
            }
        }
    }

    pub fn to_expression_with_column_name_alias(&self) -> SqlExpression {
        self.to_expression()
            .surrounded("(", &format!(") AS {}", self.column_name_alias))
    }

    pub fn with_join_on_table_name_or_alias(&self, table_name_or_alias: Option<&str>) -> Self {
        let effective = table_name_or_alias
            .filter(|a| !a.is_empty())
            .map(|a| a.to_string());
        if self.join_on_table_name_or_alias == effective {
            return self.clone();
        }
        SqlSelectDisplayValue {
            join_on_table_name_or_alias: effective,
            ..self.clone()
        }
    }
}

/// ORDER BY expression of one field; may be a null expression, in which case
/// the field is silently skipped when composing an ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlOrderByValue {
    select_value: Option<SqlSelectValue>,
}

impl SqlOrderByValue {
    pub fn of_select_value(select_value: SqlSelectValue) -> Self {
        SqlOrderByValue {
            select_value: Some(select_value),
        }
    }

    pub fn null_expression() -> Self {
        SqlOrderByValue { select_value: None }
    }

    pub fn is_null_expression(&self) -> bool {
        self.select_value.is_none()
    }

    pub fn with_join_on_table_name_or_alias(&self, table_name_or_alias: Option<&str>) -> Self {
        SqlOrderByValue {
            select_value: self
                .select_value
                .as_ref()
                .map(|v| v.with_join_on_table_name_or_alias(table_name_or_alias)),
        }
    }

    pub fn to_sql_string(&self) -> Option<String> {
        self.select_value.as_ref().map(|v| v.to_sql_string())
    }
}

/// One requested ordering: field, direction, null placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentQueryOrderBy {
    field_name: String,
    ascending: bool,
    nulls_last: bool,
}

impl DocumentQueryOrderBy {
    pub fn by_field_name(field_name: impl Into<String>, ascending: bool) -> Self {
        DocumentQueryOrderBy {
            field_name: field_name.into(),
            ascending,
            nulls_last: true,
        }
    }

    pub fn new(field_name: impl Into<String>, ascending: bool, nulls_last: bool) -> Self {
        DocumentQueryOrderBy {
            field_name: field_name.into(),
            ascending,
            nulls_last,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    pub fn is_nulls_last(&self) -> bool {
        self.nulls_last
    }
}

/// Resolves field names to their ORDER BY expressions.
pub trait SqlOrderByBindings {
    /// Fails for unknown field names; returns a null expression for fields
    /// that have no ORDER BY representation.
    fn field_order_by(&self, field_name: &str) -> Result<SqlOrderByValue>;
}

/// Composes a SQL ORDER BY clause (e.g. `(Column1) ASC NULLS LAST, ...`)
/// from requested orderings resolved against an entity's field bindings.
pub struct SqlOrderByBuilder<'a> {
    bindings: &'a dyn SqlOrderByBindings,
    join_on_table_name_or_alias: Option<String>,
}

impl<'a> SqlOrderByBuilder<'a> {
    pub fn new(bindings: &'a dyn SqlOrderByBindings) -> Self {
        SqlOrderByBuilder {
            bindings,
            join_on_table_name_or_alias: None,
        }
    }

    pub fn join_on_table_name_or_alias(mut self, table_name_or_alias: impl Into<String>) -> Self {
        self.join_on_table_name_or_alias = Some(table_name_or_alias.into());
        self
    }

    /// Build the ORDER BY clause. Fields bound to a null expression are
    /// dropped; an unknown field name is an error.
    pub fn build_sql_order_by(
        &self,
        order_bys: &[DocumentQueryOrderBy],
    ) -> Result<Option<String>> {
        if order_bys.is_empty() {
            return Ok(None);
        }

        let mut clauses = Vec::with_capacity(order_bys.len());
        for order_by in order_bys {
            let binding = self.bindings.field_order_by(order_by.field_name())?;
            if binding.is_null_expression() {
                continue;
            }
            let sql = binding
                .with_join_on_table_name_or_alias(self.join_on_table_name_or_alias.as_deref())
                .to_sql_string()
                .expect("non-null order by expression");
            clauses.push(format!(
                "({}){}{}",
                sql,
                if order_by.is_ascending() { " ASC" } else { " DESC" },
                if order_by.is_nulls_last() {
                    " NULLS LAST"
                } else {
                    " NULLS FIRST"
                },
            ));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(clauses.join(", ")))
    }
}
