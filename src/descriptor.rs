use crate::binding::SqlEntityBinding;
use crate::error::{DocWinError, Result};
use crate::expr::LogicExpression;
use crate::types::DetailId;
use std::sync::Arc;

/// Descriptor of one document entity: its SQL binding, the boolean logic
/// gating row creation/deletion, and the detail entities included under it.
#[derive(Debug)]
pub struct DocumentEntityDescriptor {
    window_id: String,
    detail_id: Option<DetailId>,
    binding: SqlEntityBinding,
    allow_create_new_logic: LogicExpression,
    allow_delete_logic: LogicExpression,
    included: Vec<Arc<DocumentEntityDescriptor>>,
}

impl DocumentEntityDescriptor {
    pub fn builder(window_id: impl Into<String>) -> DocumentEntityDescriptorBuilder {
        DocumentEntityDescriptorBuilder {
            window_id: window_id.into(),
            detail_id: None,
            binding: None,
            allow_create_new_logic: LogicExpression::constant(true),
            allow_delete_logic: LogicExpression::constant(true),
            included: Vec::new(),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn detail_id(&self) -> Option<&DetailId> {
        self.detail_id.as_ref()
    }

    pub fn binding(&self) -> &SqlEntityBinding {
        &self.binding
    }

    pub fn allow_create_new_logic(&self) -> &LogicExpression {
        &self.allow_create_new_logic
    }

    pub fn allow_delete_logic(&self) -> &LogicExpression {
        &self.allow_delete_logic
    }

    pub fn included_entities(&self) -> &[Arc<DocumentEntityDescriptor>] {
        &self.included
    }

    pub fn included_entity(&self, detail_id: &DetailId) -> Result<&Arc<DocumentEntityDescriptor>> {
        self.included
            .iter()
            .find(|e| e.detail_id.as_ref() == Some(detail_id))
            .ok_or_else(|| {
                DocWinError::EntityNotFound(format!(
                    "No included entity '{detail_id}' in window '{}'",
                    self.window_id
                ))
            })
    }
}

pub struct DocumentEntityDescriptorBuilder {
    window_id: String,
    detail_id: Option<DetailId>,
    binding: Option<SqlEntityBinding>,
    allow_create_new_logic: LogicExpression,
    allow_delete_logic: LogicExpression,
    included: Vec<Arc<DocumentEntityDescriptor>>,
}

impl DocumentEntityDescriptorBuilder {
    pub fn detail_id(mut self, detail_id: DetailId) -> Self {
        self.detail_id = Some(detail_id);
        self
    }

    pub fn binding(mut self, binding: SqlEntityBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn allow_create_new_logic(mut self, logic: LogicExpression) -> Self {
        self.allow_create_new_logic = logic;
        self
    }

    pub fn allow_delete_logic(mut self, logic: LogicExpression) -> Self {
        self.allow_delete_logic = logic;
        self
    }

    pub fn add_included_entity(mut self, entity: Arc<DocumentEntityDescriptor>) -> Self {
        self.included.push(entity);
        self
    }

    pub fn build(self) -> Result<Arc<DocumentEntityDescriptor>> {
        let binding = self
            .binding
            .ok_or_else(|| DocWinError::Binding("Entity descriptor has no SQL binding".into()))?;

        Ok(Arc::new(DocumentEntityDescriptor {
            window_id: self.window_id,
            detail_id: self.detail_id,
            binding,
            allow_create_new_logic: self.allow_create_new_logic,
            allow_delete_logic: self.allow_delete_logic,
            included: self.included,
        }))
    }
}
