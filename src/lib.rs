pub mod binding;
pub mod cache;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod expr;
pub mod filter;
pub mod query;
pub mod repository;
pub mod schema;
pub mod sql;
pub mod types;
pub mod view;

pub use binding::{SqlEntityBinding, SqlFieldBinding, TableAccessFilter};
pub use descriptor::DocumentEntityDescriptor;
pub use document::{
    CopyMode, Document, DocumentChanges, IncludedDocumentsCollection, ParentDocument,
};
pub use error::{DocWinError, Result};
pub use filter::{DocumentFilter, DocumentFilterList, DocumentFilterParam, FilterOperator};
pub use query::DocumentQuery;
pub use repository::{DocumentsRepository, SqlDocumentsRepository};
pub use types::{DetailId, DocumentId, DocumentPath};
