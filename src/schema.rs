use crate::binding::{SqlEntityBinding, SqlFieldBinding};
use crate::descriptor::DocumentEntityDescriptor;
use crate::error::{DocWinError, Result};
use crate::expr::{LogicExpression, SqlExpression};
use crate::types::DetailId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Top-level window definition parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDefinition {
    pub window: String,
    pub entity: EntityDefinition,
}

/// Definition of one entity (root document or tab).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub table: String,
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub allow_create: Option<String>,
    #[serde(default)]
    pub allow_delete: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub tabs: Vec<TabDefinition>,
}

/// A detail tab: an entity plus its link to the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabDefinition {
    pub id: String,
    #[serde(default)]
    pub link_column: Option<String>,
    #[serde(default)]
    pub parent_link_column: Option<String>,
    #[serde(flatten)]
    pub entity: EntityDefinition,
}

/// Definition of a single field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub virtual_sql: Option<String>,
    #[serde(default)]
    pub display_sql: Option<String>,
    #[serde(default)]
    pub sortable: Option<bool>,
    #[serde(default)]
    pub order_by: Option<OrderByDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderByDefinition {
    pub priority: i32,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// Parse a window definition from a YAML file.
pub fn parse_window_definition(path: &Path) -> Result<WindowDefinition> {
    let yaml = std::fs::read_to_string(path)?;
    parse_window_definition_str(&yaml)
}

pub fn parse_window_definition_str(yaml: &str) -> Result<WindowDefinition> {
    let definition: WindowDefinition = serde_yaml::from_str(yaml)?;
    if definition.window.is_empty() {
        return Err(DocWinError::Schema("Window id is empty".into()));
    }
    Ok(definition)
}

impl WindowDefinition {
    /// Compile the definition into an entity-descriptor tree with all SQL
    /// bindings built.
    pub fn build_descriptor(&self) -> Result<Arc<DocumentEntityDescriptor>> {
        build_entity(&self.window, &self.entity, None)
    }
}

fn build_entity(
    window_id: &str,
    entity: &EntityDefinition,
    detail: Option<&TabDefinition>,
) -> Result<Arc<DocumentEntityDescriptor>> {
    let detail_id = detail.map(|tab| DetailId::new(tab.id.clone()));

    let mut binding = SqlEntityBinding::builder()
        .table_name(&entity.table)
        .table_alias_from_detail_id(detail_id.as_ref());

    if let Some(tab) = detail {
        let link_column = tab.link_column.as_deref().ok_or_else(|| {
            DocWinError::Schema(format!("Tab '{}' has no link_column", tab.id))
        })?;
        let parent_link_column = tab.parent_link_column.as_deref().unwrap_or(link_column);
        binding = binding.child_to_parent_link_column_names(link_column, parent_link_column);
    }

    if let Some(where_clause) = &entity.where_clause {
        binding = binding.sql_where_clause(where_clause);
    }

    for field in &entity.fields {
        binding = binding.add_field(build_field(field)?)?;
    }

    let mut descriptor = DocumentEntityDescriptor::builder(window_id)
        .binding(binding.build()?)
        .allow_create_new_logic(parse_logic(entity.allow_create.as_deref())?)
        .allow_delete_logic(parse_logic(entity.allow_delete.as_deref())?);
    if let Some(detail_id) = detail_id {
        descriptor = descriptor.detail_id(detail_id);
    }

    for tab in &entity.tabs {
        descriptor = descriptor.add_included_entity(build_entity(window_id, &tab.entity, Some(tab))?);
    }

    descriptor.build()
}

fn build_field(definition: &FieldDefinition) -> Result<SqlFieldBinding> {
    let mut field = SqlFieldBinding::new(&definition.name);
    if let Some(column) = &definition.column {
        field = field.column_name(column);
    }
    field = field.key(definition.key);
    if let Some(virtual_sql) = &definition.virtual_sql {
        field = field.virtual_column_sql(virtual_sql);
    }
    if let Some(display_sql) = &definition.display_sql {
        field = field.display_expression(SqlExpression::compile(display_sql)?);
    }
    if let Some(sortable) = definition.sortable {
        field = field.sortable(sortable);
    }
    if let Some(order_by) = &definition.order_by {
        field = field.default_order_by(order_by.priority, order_by.ascending);
    }
    Ok(field)
}

fn parse_logic(source: Option<&str>) -> Result<LogicExpression> {
    match source {
        None => Ok(LogicExpression::constant(true)),
        Some(source) => LogicExpression::parse(source),
    }
}
