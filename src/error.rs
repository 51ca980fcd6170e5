use crate::types::DocumentPath;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocWinError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Binding error: {0}")]
    Binding(String),

    #[error("No field found for fieldName={field_name} in {entity}")]
    FieldNotFound { field_name: String, entity: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Parameter {parameter} not found in filter '{filter_id}'")]
    ParameterNotFound {
        parameter: String,
        filter_id: String,
    },

    #[error("Document not found: {path}")]
    DocumentNotFound { path: DocumentPath },

    #[error("Invalid document path: {0}")]
    InvalidDocumentPath(String),

    #[error("Invalid document state ({document}): {reason}")]
    InvalidDocumentState { document: String, reason: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl DocWinError {
    /// Re-raise a not-found error unless it concerns the given path.
    /// Used when refreshing cached documents: a not-found for the document
    /// being refreshed means "deleted behind our back" and is tolerated,
    /// anything else is a genuine failure.
    pub fn rethrow_if_not_matching(self, path: &DocumentPath) -> crate::Result<()> {
        match self {
            DocWinError::DocumentNotFound { path: ref p } if p == path => Ok(()),
            other => Err(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DocWinError>;
