use crate::cache::MemoizingSupplier;
use crate::error::{DocWinError, Result};
use crate::filter::DocumentFilterList;
use crate::sql::DocumentQueryOrderBy;
use crate::types::{DocumentId, LookupValue};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of one view instance within a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewId {
    window_id: String,
    view_id: String,
}

impl ViewId {
    pub fn random(window_id: impl Into<String>) -> Self {
        ViewId {
            window_id: window_id.into(),
            view_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.window_id, self.view_id)
    }
}

/// A row displayable in a view.
pub trait ViewRow: Clone {
    fn id(&self) -> DocumentId;

    /// Value used when sorting by the given field; `None` sorts according
    /// to the requested nulls placement.
    fn field_value(&self, field_name: &str) -> Option<Value>;
}

/// Selection of view rows: everything, or an explicit id set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowIdsSelection {
    All,
    Only(Vec<DocumentId>),
}

/// Structural change notification emitted by view mutations, for
/// downstream UI diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    FullyChanged { view_id: ViewId },
}

/// One page of view rows.
#[derive(Debug, Clone)]
pub struct ViewPage<T> {
    pub first_row: i64,
    pub page_length: i64,
    pub total_size: usize,
    pub rows: Vec<T>,
}

struct RowsIndex<T> {
    ordered: Vec<T>,
    by_id: HashMap<DocumentId, usize>,
}

impl<T: ViewRow> RowsIndex<T> {
    fn new(rows: Vec<T>) -> Self {
        let by_id = rows
            .iter()
            .enumerate()
            .map(|(index, row)| (row.id(), index))
            .collect();
        RowsIndex {
            ordered: rows,
            by_id,
        }
    }
}

const DEFAULT_PAGE_LENGTH: i64 = 30;

/// A generic in-memory view over a bounded row set produced on demand by a
/// supplier. The id-indexed row map is computed once and shared until
/// [`CustomView::invalidate_all`]; paging re-sorts the full set per
/// request, which is acceptable because this view type is reserved for
/// wholly in-memory datasets.
///
/// Filter dropdown/typeahead, SQL where-clauses and attributes are hard
/// unsupported contracts here, so misuse fails instead of silently doing
/// nothing.
pub struct CustomView<T: ViewRow> {
    view_id: ViewId,
    description: String,
    rows: MemoizingSupplier<RowsIndex<T>>,
}

impl<T: ViewRow + Send + Sync + 'static> CustomView<T> {
    pub fn new(
        view_id: ViewId,
        description: impl Into<String>,
        rows_supplier: impl Fn() -> Vec<T> + Send + Sync + 'static,
    ) -> Self {
        CustomView {
            view_id,
            description: description.into(),
            rows: MemoizingSupplier::new(move || RowsIndex::new(rows_supplier())),
        }
    }

    pub fn view_id(&self) -> &ViewId {
        &self.view_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn rows(&self) -> Arc<RowsIndex<T>> {
        self.rows.get()
    }

    pub fn size(&self) -> usize {
        self.rows().ordered.len()
    }

    pub fn by_id(&self, row_id: DocumentId) -> Result<T> {
        let rows = self.rows();
        rows.by_id
            .get(&row_id)
            .map(|&index| rows.ordered[index].clone())
            .ok_or_else(|| DocWinError::EntityNotFound(format!("Row not found: {row_id}")))
    }

    /// Rows for a selection. `All` is supported because the row set is
    /// bounded and wholly in memory.
    pub fn rows_by_ids(&self, selection: &RowIdsSelection) -> Result<Vec<T>> {
        match selection {
            RowIdsSelection::All => Ok(self.rows().ordered.clone()),
            RowIdsSelection::Only(row_ids) => {
                row_ids.iter().map(|&row_id| self.by_id(row_id)).collect()
            }
        }
    }

    /// One page: the full row set sorted by the requested orderings, then
    /// skip/limit applied. Negative first row defaults to 0, non-positive
    /// page length to 30.
    pub fn get_page(
        &self,
        first_row: i64,
        page_length: i64,
        order_bys: &[DocumentQueryOrderBy],
    ) -> ViewPage<T> {
        let rows = self.rows();
        let mut sorted: Vec<&T> = rows.ordered.iter().collect();
        if !order_bys.is_empty() {
            sorted.sort_by(|a, b| compare_rows(*a, *b, order_bys));
        }

        let first_row = first_row.max(0);
        let page_length = if page_length > 0 {
            page_length
        } else {
            DEFAULT_PAGE_LENGTH
        };
        let page_rows = sorted
            .into_iter()
            .skip(first_row as usize)
            .take(page_length as usize)
            .cloned()
            .collect();

        ViewPage {
            first_row,
            page_length,
            total_size: rows.ordered.len(),
            rows: page_rows,
        }
    }

    /// Discard the memoized rows; returns the structural change event for
    /// the caller to dispatch.
    pub fn invalidate_all(&self) -> ViewChange {
        self.rows.forget();
        ViewChange::FullyChanged {
            view_id: self.view_id.clone(),
        }
    }

    pub fn sticky_filters(&self) -> DocumentFilterList {
        DocumentFilterList::empty()
    }

    pub fn filters(&self) -> DocumentFilterList {
        DocumentFilterList::empty()
    }

    pub fn default_order_bys(&self) -> Vec<DocumentQueryOrderBy> {
        Vec::new()
    }

    pub fn query_limit(&self) -> Option<usize> {
        None
    }

    pub fn has_attributes_support(&self) -> bool {
        false
    }

    pub fn filter_parameter_dropdown(
        &self,
        _filter_id: &str,
        _parameter_name: &str,
    ) -> Result<Vec<LookupValue>> {
        Err(DocWinError::Unsupported(
            "filter parameter dropdown on a custom view",
        ))
    }

    pub fn filter_parameter_typeahead(
        &self,
        _filter_id: &str,
        _parameter_name: &str,
        _query: &str,
    ) -> Result<Vec<LookupValue>> {
        Err(DocWinError::Unsupported(
            "filter parameter typeahead on a custom view",
        ))
    }

    pub fn sql_where_clause(&self, _row_ids: &RowIdsSelection) -> Result<String> {
        Err(DocWinError::Unsupported(
            "SQL where clause on a custom view",
        ))
    }
}

fn compare_rows<T: ViewRow>(a: &T, b: &T, order_bys: &[DocumentQueryOrderBy]) -> Ordering {
    for order_by in order_bys {
        let a_value = a.field_value(order_by.field_name());
        let b_value = b.field_value(order_by.field_name());

        let ordering = match (&a_value, &b_value) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => {
                if order_by.is_nulls_last() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Some(_), None) => {
                if order_by.is_nulls_last() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(a_value), Some(b_value)) => {
                let ordering = compare_values(a_value, b_value);
                if order_by.is_ascending() {
                    ordering
                } else {
                    ordering.reverse()
                }
            }
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}
