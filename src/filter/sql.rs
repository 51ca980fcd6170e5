use crate::binding::SqlEntityBinding;
use crate::error::{DocWinError, Result};
use crate::filter::{DocumentFilter, DocumentFilterList, DocumentFilterParam, FilterOperator};
use crate::sql::SqlOptions;
use serde_json::Value;

/// Bind parameters collected while rendering filters to SQL, in the order
/// the corresponding `?` placeholders appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlParams {
    values: Vec<Value>,
}

impl SqlParams {
    pub fn new() -> Self {
        SqlParams::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A rendered SQL fragment plus its bind parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAndParams {
    sql: String,
    params: SqlParams,
}

impl SqlAndParams {
    pub fn new(sql: impl Into<String>, params: SqlParams) -> Self {
        SqlAndParams {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &SqlParams {
        &self.params
    }
}

/// Converts [`DocumentFilter`]s to SQL fragments, collecting bind
/// parameters as it goes.
pub trait SqlFilterConverter {
    /// True if the filter identified by `filter_id` can be converted by
    /// this converter.
    fn can_convert(&self, filter_id: &str) -> bool;

    /// Convert one filter. `None` when the filter produces no SQL.
    fn filter_sql(
        &self,
        params_out: &mut SqlParams,
        filter: &DocumentFilter,
        sql_opts: &SqlOptions,
    ) -> Result<Option<String>>;

    /// Convert a whole list: fragments are ANDed, each one prefixed with a
    /// comment naming the filter it came from.
    fn list_sql(
        &self,
        params_out: &mut SqlParams,
        filters: &DocumentFilterList,
        sql_opts: &SqlOptions,
    ) -> Result<Option<String>> {
        if filters.is_empty() {
            return Ok(None);
        }

        let mut sql = String::new();
        for filter in filters.iter() {
            let filter_sql = match self.filter_sql(params_out, filter, sql_opts)? {
                Some(s) if !s.trim().is_empty() => s,
                _ => continue,
            };

            if !sql.is_empty() {
                sql.push_str("\n AND ");
            }
            let comment = filter.filter_id().replace("*/", "");
            sql.push_str(&format!("/* {comment} */ ({filter_sql})"));
        }

        if sql.is_empty() {
            Ok(None)
        } else {
            Ok(Some(sql))
        }
    }
}

/// Default converter: resolves each parameter's field against an entity
/// binding and renders standard SQL for its operator, with positional `?`
/// binds collected in parameter-declaration order.
pub struct FieldFilterConverter<'a> {
    binding: &'a SqlEntityBinding,
}

impl<'a> FieldFilterConverter<'a> {
    pub fn new(binding: &'a SqlEntityBinding) -> Self {
        FieldFilterConverter { binding }
    }

    fn param_sql(
        &self,
        params_out: &mut SqlParams,
        param: &DocumentFilterParam,
        sql_opts: &SqlOptions,
    ) -> Result<String> {
        if let Some(sql_where_clause) = param.sql_where_clause() {
            return Ok(sql_where_clause.to_string());
        }

        let field_name = param
            .field_name()
            .ok_or_else(|| DocWinError::InvalidFilter("Parameter has no field name".into()))?;
        let column = self
            .binding
            .field(field_name)?
            .sql_select_value()
            .with_join_on_table_name_or_alias(Some(sql_opts.table_name_or_alias()))
            .to_sql_string();

        let operator = param
            .operator()
            .ok_or_else(|| DocWinError::InvalidFilter("Parameter has no operator".into()))?;

        match operator {
            FilterOperator::Equal => {
                if param.value().is_null() {
                    Ok(format!("{column} IS NULL"))
                } else {
                    params_out.push(param.value().clone());
                    Ok(format!("{column} = ?"))
                }
            }
            FilterOperator::NotEqual => {
                if param.value().is_null() {
                    Ok(format!("{column} IS NOT NULL"))
                } else {
                    params_out.push(param.value().clone());
                    Ok(format!("{column} <> ?"))
                }
            }
            FilterOperator::InArray => {
                let values = param.value_as_collection()?;
                if values.is_empty() {
                    // Empty selection matches nothing
                    return Ok("1=0".to_string());
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                for value in values {
                    params_out.push(value);
                }
                Ok(format!("{column} IN ({placeholders})"))
            }
            FilterOperator::Like
            | FilterOperator::LikeI
            | FilterOperator::NotLike
            | FilterOperator::NotLikeI => {
                let text = param.value_as_str().ok_or_else(|| {
                    DocWinError::InvalidFilter(format!(
                        "LIKE parameter '{field_name}' has no value"
                    ))
                })?;
                let pattern = if text.contains('%') {
                    text
                } else {
                    format!("%{text}%")
                };
                params_out.push(pattern);

                let negate = matches!(
                    operator,
                    FilterOperator::NotLike | FilterOperator::NotLikeI
                );
                let sql_not = if negate { " NOT" } else { "" };
                let case_insensitive = matches!(
                    operator,
                    FilterOperator::LikeI | FilterOperator::NotLikeI
                );
                if case_insensitive {
                    Ok(format!("UPPER({column}){sql_not} LIKE UPPER(?)"))
                } else {
                    Ok(format!("{column}{sql_not} LIKE ?"))
                }
            }
            FilterOperator::Greater => {
                params_out.push(param.value().clone());
                Ok(format!("{column} > ?"))
            }
            FilterOperator::GreaterOrEqual => {
                params_out.push(param.value().clone());
                Ok(format!("{column} >= ?"))
            }
            FilterOperator::Less => {
                params_out.push(param.value().clone());
                Ok(format!("{column} < ?"))
            }
            FilterOperator::LessOrEqual => {
                params_out.push(param.value().clone());
                Ok(format!("{column} <= ?"))
            }
            FilterOperator::Between => {
                if param.value_to().is_null() {
                    return Err(DocWinError::InvalidFilter(format!(
                        "BETWEEN parameter '{field_name}' has no valueTo"
                    )));
                }
                params_out.push(param.value().clone());
                params_out.push(param.value_to().clone());
                Ok(format!("{column} BETWEEN ? AND ?"))
            }
        }
    }
}

impl SqlFilterConverter for FieldFilterConverter<'_> {
    fn can_convert(&self, _filter_id: &str) -> bool {
        true
    }

    fn filter_sql(
        &self,
        params_out: &mut SqlParams,
        filter: &DocumentFilter,
        sql_opts: &SqlOptions,
    ) -> Result<Option<String>> {
        if !filter.has_parameters() {
            return Ok(None);
        }

        let mut sql = String::new();
        for param in filter.parameters() {
            let fragment = self.param_sql(params_out, param, sql_opts)?;
            if sql.is_empty() {
                sql.push_str(&fragment);
            } else if param.join_and() {
                sql.push_str(" AND ");
                sql.push_str(&fragment);
            } else {
                sql.push_str(" OR ");
                sql.push_str(&fragment);
            }
        }
        Ok(Some(sql))
    }
}
