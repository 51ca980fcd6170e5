pub mod sql;

use crate::error::{DocWinError, Result};
use crate::types::{
    json_to_bool as value_to_bool, json_to_int as value_to_int, json_to_string as value_to_string,
    LookupValue,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// Comparison operator of a single filter parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    InArray,
    Like,
    /// Like (case-insensitive)
    LikeI,
    NotLike,
    /// Not Like (case-insensitive)
    NotLikeI,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Between,
}

impl FilterOperator {
    pub fn is_range_operator(&self) -> bool {
        matches!(self, FilterOperator::Between)
    }
}

/// One predicate of a [`DocumentFilter`]: either a field/operator/value
/// triple or a raw SQL where-clause escape hatch (mutually exclusive).
///
/// Immutable after construction; equality is structural because filters are
/// used as cache keys (ETag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFilterParam {
    join_and: bool,
    field_name: Option<String>,
    operator: Option<FilterOperator>,
    value: Value,
    value_to: Value,
    sql_where_clause: Option<String>,
}

impl DocumentFilterParam {
    pub fn builder() -> DocumentFilterParamBuilder {
        DocumentFilterParamBuilder::default()
    }

    /// Hardcoded SQL WHERE clause parameter.
    pub fn of_sql_where_clause(join_and: bool, sql_where_clause: impl Into<String>) -> Self {
        DocumentFilterParam {
            join_and,
            field_name: None,
            operator: None,
            value: Value::Null,
            value_to: Value::Null,
            sql_where_clause: Some(sql_where_clause.into()),
        }
    }

    pub fn of_name_equals_value(field_name: impl Into<String>, value: Value) -> Result<Self> {
        Self::of_name_operator_value(field_name, FilterOperator::Equal, value)
    }

    /// Shortcut for the most common kind of parameter.
    pub fn of_name_operator_value(
        field_name: impl Into<String>,
        operator: FilterOperator,
        value: Value,
    ) -> Result<Self> {
        Self::builder()
            .field_name(field_name)
            .operator(operator)
            .value(value)
            .build()
    }

    pub fn is_sql_filter(&self) -> bool {
        self.sql_where_clause.is_some()
    }

    pub fn sql_where_clause(&self) -> Option<&str> {
        self.sql_where_clause.as_deref()
    }

    pub fn join_and(&self) -> bool {
        self.join_and
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn operator(&self) -> Option<FilterOperator> {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_to(&self) -> &Value {
        &self.value_to
    }

    pub fn value_as_str(&self) -> Option<String> {
        value_to_string(&self.value)
    }

    /// Integer value; `default` when the value is missing or not a number.
    pub fn value_as_int(&self, default: i64) -> i64 {
        value_to_int(&self.value).unwrap_or(default)
    }

    pub fn value_as_bool(&self, default: bool) -> bool {
        value_to_bool(&self.value).unwrap_or(default)
    }

    pub fn value_as_local_date_or(&self, default: Option<NaiveDate>) -> Option<NaiveDate> {
        value_to_local_date(&self.value).or(default)
    }

    pub fn value_to_as_local_date_or(&self, default: Option<NaiveDate>) -> Option<NaiveDate> {
        value_to_local_date(&self.value_to).or(default)
    }

    pub fn value_as_instant(&self) -> Result<Option<DateTime<Utc>>> {
        value_to_instant(&self.value)
    }

    pub fn value_to_as_instant(&self) -> Result<Option<DateTime<Utc>>> {
        value_to_instant(&self.value_to)
    }

    /// The value as a list, wrapping a scalar into a single-element list so
    /// EQUAL and IN_ARRAY parameters can be handled uniformly.
    pub fn value_as_collection(&self) -> Result<Vec<Value>> {
        match &self.value {
            Value::Null => Err(DocWinError::InvalidValue(
                "Cannot convert null value to a collection".into(),
            )),
            Value::Array(items) => Ok(items.clone()),
            scalar => Ok(vec![scalar.clone()]),
        }
    }

    /// The value as a list of integer ids: numbers pass through, lookup
    /// values resolve via their key, everything else is parsed from its
    /// string form.
    pub fn value_as_int_list(&self) -> Result<Vec<i64>> {
        self.value_as_collection()?
            .iter()
            .map(|item| {
                item_to_int(item).ok_or_else(|| {
                    DocWinError::InvalidValue(format!("Cannot convert '{item}' to an integer id"))
                })
            })
            .collect()
    }
}

fn value_to_local_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        }
        _ => None,
    }
}

fn value_to_instant(value: &Value) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(dt.with_timezone(&Utc)));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
                return Ok(Some(DateTime::from_naive_utc_and_offset(midnight, Utc)));
            }
            Err(DocWinError::InvalidValue(format!(
                "Cannot convert '{s}' to an instant"
            )))
        }
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| {
                DocWinError::InvalidValue(format!("Cannot convert '{n}' to an instant"))
            })?;
            DateTime::<Utc>::from_timestamp_millis(millis)
                .map(Some)
                .ok_or_else(|| {
                    DocWinError::InvalidValue(format!("Timestamp out of range: {millis}"))
                })
        }
        other => Err(DocWinError::InvalidValue(format!(
            "Cannot convert '{other}' to an instant"
        ))),
    }
}

fn item_to_int(item: &Value) -> Option<i64> {
    match item {
        Value::Number(n) => n.as_i64(),
        Value::Object(_) => LookupValue::key_from_json(item),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Default)]
pub struct DocumentFilterParamBuilder {
    join_and: Option<bool>,
    field_name: Option<String>,
    operator: Option<FilterOperator>,
    value: Value,
    value_to: Value,
}

impl DocumentFilterParamBuilder {
    pub fn join_and(mut self, join_and: bool) -> Self {
        self.join_and = Some(join_and);
        self
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn operator(mut self, operator: FilterOperator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn value_to(mut self, value_to: Value) -> Self {
        self.value_to = value_to;
        self
    }

    pub fn build(self) -> Result<DocumentFilterParam> {
        let field_name = self
            .field_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DocWinError::InvalidFilter("Parameter fieldName is not set".into()))?;

        Ok(DocumentFilterParam {
            join_and: self.join_and.unwrap_or(true),
            field_name: Some(field_name),
            operator: Some(self.operator.unwrap_or(FilterOperator::Equal)),
            value: self.value,
            value_to: self.value_to,
            sql_where_clause: None,
        })
    }
}

/// A named, immutable set of predicates, applied together to one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFilter {
    filter_id: String,
    caption: Option<String>,
    facet_filter: bool,
    params: Vec<DocumentFilterParam>,
    internal_parameter_names: BTreeSet<String>,
}

impl DocumentFilter {
    pub fn builder() -> DocumentFilterBuilder {
        DocumentFilterBuilder::default()
    }

    pub fn single_parameter_filter(
        filter_id: impl Into<String>,
        field_name: impl Into<String>,
        operator: FilterOperator,
        value: Value,
    ) -> Result<Self> {
        Self::builder()
            .filter_id(filter_id)
            .add_parameter(DocumentFilterParam::of_name_operator_value(
                field_name, operator, value,
            )?)?
            .build()
    }

    pub fn in_array_filter(
        filter_id: impl Into<String>,
        field_name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(DocWinError::InvalidFilter("values is empty".into()));
        }
        Self::builder()
            .filter_id(filter_id)
            .add_parameter(DocumentFilterParam::of_name_operator_value(
                field_name,
                FilterOperator::InArray,
                Value::Array(values),
            )?)?
            .build()
    }

    pub fn filter_id(&self) -> &str {
        &self.filter_id
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn is_facet_filter(&self) -> bool {
        self.facet_filter
    }

    pub fn has_parameters(&self) -> bool {
        !self.params.is_empty()
    }

    pub fn parameters(&self) -> &[DocumentFilterParam] {
        &self.params
    }

    /// True for parameters applied to queries but excluded from the
    /// user-facing filter editing UI.
    pub fn is_internal_parameter(&self, parameter_name: &str) -> bool {
        self.internal_parameter_names.contains(parameter_name)
    }

    pub fn parameter(&self, parameter_name: &str) -> Result<&DocumentFilterParam> {
        self.parameter_or_none(parameter_name)
            .ok_or_else(|| DocWinError::ParameterNotFound {
                parameter: parameter_name.to_string(),
                filter_id: self.filter_id.clone(),
            })
    }

    pub fn parameter_or_none(&self, parameter_name: &str) -> Option<&DocumentFilterParam> {
        self.params
            .iter()
            .find(|p| p.field_name() == Some(parameter_name))
    }

    pub fn param_value_as_str(
        &self,
        parameter_name: &str,
        default: Option<&str>,
    ) -> Option<String> {
        match self.parameter_or_none(parameter_name) {
            Some(param) => param.value_as_str(),
            None => default.map(|s| s.to_string()),
        }
    }

    pub fn param_value_as_int(&self, parameter_name: &str, default: i64) -> i64 {
        match self.parameter_or_none(parameter_name) {
            Some(param) => param.value_as_int(default),
            None => default,
        }
    }

    pub fn param_value_as_bool(&self, parameter_name: &str, default: bool) -> bool {
        match self.parameter_or_none(parameter_name) {
            Some(param) => param.value_as_bool(default),
            None => default,
        }
    }

    pub fn param_value_as_local_date_or(
        &self,
        parameter_name: &str,
        default: Option<NaiveDate>,
    ) -> Option<NaiveDate> {
        match self.parameter_or_none(parameter_name) {
            Some(param) => param.value_as_local_date_or(default),
            None => default,
        }
    }
}

#[derive(Default)]
pub struct DocumentFilterBuilder {
    filter_id: Option<String>,
    caption: Option<String>,
    facet_filter: bool,
    params: Vec<DocumentFilterParam>,
    internal_parameter_names: BTreeSet<String>,
}

impl DocumentFilterBuilder {
    pub fn filter_id(mut self, filter_id: impl Into<String>) -> Self {
        self.filter_id = Some(filter_id.into());
        self
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn facet_filter(mut self, facet_filter: bool) -> Self {
        self.facet_filter = facet_filter;
        self
    }

    pub fn has_parameters(&self) -> bool {
        !self.params.is_empty()
    }

    /// Add a parameter. Two parameters with the same field name would
    /// silently shadow each other at query time, so this fails instead.
    pub fn add_parameter(mut self, parameter: DocumentFilterParam) -> Result<Self> {
        if let Some(existing) = self
            .params
            .iter()
            .find(|p| p.field_name() == parameter.field_name())
        {
            return Err(DocWinError::InvalidFilter(format!(
                "Cannot add {parameter:?} because a parameter with the same name was already added: {existing:?}"
            )));
        }
        self.params.push(parameter);
        Ok(self)
    }

    /// Add a parameter that is applied to queries but hidden from the
    /// user-facing filter UI.
    pub fn add_internal_parameter(mut self, parameter: DocumentFilterParam) -> Result<Self> {
        if let Some(name) = parameter.field_name() {
            self.internal_parameter_names.insert(name.to_string());
        }
        self.add_parameter(parameter)
    }

    pub fn build(self) -> Result<DocumentFilter> {
        let filter_id = self
            .filter_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DocWinError::InvalidFilter("filterId is empty".into()))?;

        Ok(DocumentFilter {
            filter_id,
            caption: self.caption,
            facet_filter: self.facet_filter,
            params: self.params,
            internal_parameter_names: self.internal_parameter_names,
        })
    }
}

/// An immutable, ordered collection of filters keyed by filter id.
///
/// Backed by a shared `Arc`, so "unchanged" results of the set operations
/// can be detected via [`DocumentFilterList::ptr_eq`] and used as a no-op
/// signal for cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFilterList {
    filters: Arc<Vec<DocumentFilter>>,
}

static EMPTY_FILTER_LIST: OnceLock<DocumentFilterList> = OnceLock::new();

impl DocumentFilterList {
    /// The canonical empty list (shared, no per-call allocation).
    pub fn empty() -> DocumentFilterList {
        EMPTY_FILTER_LIST
            .get_or_init(|| DocumentFilterList {
                filters: Arc::new(Vec::new()),
            })
            .clone()
    }

    pub fn of(filter: DocumentFilter) -> DocumentFilterList {
        DocumentFilterList {
            filters: Arc::new(vec![filter]),
        }
    }

    /// Build from a list; filter ids must be unique.
    pub fn of_list(filters: Vec<DocumentFilter>) -> Result<DocumentFilterList> {
        if filters.is_empty() {
            return Ok(Self::empty());
        }
        for (i, filter) in filters.iter().enumerate() {
            if filters[..i].iter().any(|f| f.filter_id() == filter.filter_id()) {
                return Err(DocWinError::InvalidFilter(format!(
                    "Duplicate filterId '{}'",
                    filter.filter_id()
                )));
            }
        }
        Ok(DocumentFilterList {
            filters: Arc::new(filters),
        })
    }

    /// True when both lists share the same backing storage; used by callers
    /// as a "nothing changed" signal.
    pub fn ptr_eq(&self, other: &DocumentFilterList) -> bool {
        Arc::ptr_eq(&self.filters, &other.filters)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentFilter> {
        self.filters.iter()
    }

    pub fn to_list(&self) -> Vec<DocumentFilter> {
        self.filters.as_ref().clone()
    }

    pub fn filter_by_id(&self, filter_id: &str) -> Option<&DocumentFilter> {
        self.filters.iter().find(|f| f.filter_id() == filter_id)
    }

    pub fn contains_filter_by_id(&self, filter_id: &str) -> bool {
        self.filter_by_id(filter_id).is_some()
    }

    /// Merge, overriding by filter id (right side wins); overridden filters
    /// keep their original position, new ones are appended.
    pub fn merge_with(&self, other: &DocumentFilterList) -> DocumentFilterList {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }

        let mut merged: Vec<DocumentFilter> = self.filters.as_ref().clone();
        for filter in other.iter() {
            match merged.iter_mut().find(|f| f.filter_id() == filter.filter_id()) {
                Some(slot) => *slot = filter.clone(),
                None => merged.push(filter.clone()),
            }
        }
        DocumentFilterList {
            filters: Arc::new(merged),
        }
    }

    pub fn merge_with_filter(&self, filter: DocumentFilter) -> DocumentFilterList {
        self.merge_with(&DocumentFilterList::of(filter))
    }

    /// Keep only filters matching the predicate. Returns a list sharing this
    /// list's storage when nothing was removed.
    pub fn retaining_only(&self, predicate: impl Fn(&DocumentFilter) -> bool) -> DocumentFilterList {
        if self.is_empty() {
            return self.clone();
        }

        let retained: Vec<DocumentFilter> =
            self.filters.iter().filter(|f| predicate(f)).cloned().collect();
        if retained.len() == self.filters.len() {
            return self.clone();
        }
        if retained.is_empty() {
            return Self::empty();
        }
        DocumentFilterList {
            filters: Arc::new(retained),
        }
    }

    /// Remove the filters whose id is present in `other`.
    pub fn subtract(&self, other: &DocumentFilterList) -> DocumentFilterList {
        self.retaining_only(|filter| !other.contains_filter_by_id(filter.filter_id()))
    }

    pub fn param_value_as_str(
        &self,
        filter_id: &str,
        parameter_name: &str,
    ) -> Option<String> {
        self.filter_by_id(filter_id)?
            .param_value_as_str(parameter_name, None)
    }

    pub fn param_value_as_int(&self, filter_id: &str, parameter_name: &str, default: i64) -> i64 {
        match self.filter_by_id(filter_id) {
            Some(filter) => filter.param_value_as_int(parameter_name, default),
            None => default,
        }
    }

    pub fn param_value_as_bool(
        &self,
        filter_id: &str,
        parameter_name: &str,
        default: bool,
    ) -> bool {
        match self.filter_by_id(filter_id) {
            Some(filter) => filter.param_value_as_bool(parameter_name, default),
            None => default,
        }
    }
}

impl Default for DocumentFilterList {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn equals_filter(filter_id: &str, field_name: &str, value: Value) -> DocumentFilter {
        DocumentFilter::single_parameter_filter(filter_id, field_name, FilterOperator::Equal, value)
            .unwrap()
    }

    #[test]
    fn test_param_equality_with_value_to() {
        let param1 = DocumentFilterParam::builder()
            .field_name("param1")
            .operator(FilterOperator::Between)
            .value(json!("value1"))
            .value_to(json!("value2"))
            .build()
            .unwrap();
        let param2 = DocumentFilterParam::builder()
            .field_name("param1")
            .operator(FilterOperator::Between)
            .value(json!("value1"))
            .value_to(json!("value2"))
            .build()
            .unwrap();
        let param3 = DocumentFilterParam::builder()
            .field_name("param1")
            .operator(FilterOperator::Between)
            .value(json!("value1"))
            .value_to(json!("value3"))
            .build()
            .unwrap();

        assert_eq!(param1, param2);
        assert_ne!(param1, param3);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let hash = |p: &DocumentFilterParam| {
            let mut hasher = DefaultHasher::new();
            p.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(&param1), hash(&param2));
    }

    #[test]
    fn test_builder_rejects_duplicate_parameter_names() {
        let builder = DocumentFilter::builder()
            .filter_id("default")
            .add_parameter(
                DocumentFilterParam::of_name_equals_value("StatusId", json!(5)).unwrap(),
            )
            .unwrap()
            .add_parameter(
                DocumentFilterParam::of_name_equals_value("CategoryId", json!(1)).unwrap(),
            )
            .unwrap();

        let filter = builder.build().unwrap();
        assert!(filter.parameter("StatusId").is_ok());
        assert!(filter.parameter("CategoryId").is_ok());

        let result = DocumentFilter::builder()
            .filter_id("default")
            .add_parameter(DocumentFilterParam::of_name_equals_value("StatusId", json!(5)).unwrap())
            .unwrap()
            .add_parameter(
                DocumentFilterParam::of_name_equals_value("StatusId", json!(6)).unwrap(),
            );
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_empty_filter_id() {
        assert!(DocumentFilter::builder().filter_id("").build().is_err());
        assert!(DocumentFilter::builder().build().is_err());
    }

    #[test]
    fn test_internal_parameters() {
        let filter = DocumentFilter::builder()
            .filter_id("f")
            .add_internal_parameter(
                DocumentFilterParam::of_name_equals_value("AD_Client_ID", json!(1)).unwrap(),
            )
            .unwrap()
            .add_parameter(DocumentFilterParam::of_name_equals_value("Name", json!("x")).unwrap())
            .unwrap()
            .build()
            .unwrap();

        assert!(filter.is_internal_parameter("AD_Client_ID"));
        assert!(!filter.is_internal_parameter("Name"));
    }

    #[test]
    fn test_parameter_not_found_carries_context() {
        let filter = equals_filter("f1", "A", json!(1));
        let err = filter.parameter("B").unwrap_err();
        assert!(err.to_string().contains("f1"));
        assert!(err.to_string().contains('B'));
    }

    #[test]
    fn test_value_coercions() {
        let param = DocumentFilterParam::of_name_equals_value("x", json!("42")).unwrap();
        assert_eq!(param.value_as_int(-1), 42);
        assert_eq!(param.value_as_str().as_deref(), Some("42"));

        let param = DocumentFilterParam::of_name_equals_value("x", json!("Y")).unwrap();
        assert!(param.value_as_bool(false));

        let param = DocumentFilterParam::of_name_equals_value("x", json!("2024-05-03")).unwrap();
        assert_eq!(
            param.value_as_local_date_or(None),
            NaiveDate::from_ymd_opt(2024, 5, 3)
        );

        let param = DocumentFilterParam::of_name_equals_value("x", Value::Null).unwrap();
        assert_eq!(param.value_as_int(7), 7);
        assert_eq!(param.value_as_str(), None);
    }

    #[test]
    fn test_value_as_collection_wraps_scalar() {
        let scalar = DocumentFilterParam::of_name_equals_value("x", json!(5)).unwrap();
        assert_eq!(scalar.value_as_collection().unwrap(), vec![json!(5)]);

        let list = DocumentFilterParam::of_name_operator_value(
            "x",
            FilterOperator::InArray,
            json!([1, 2, 3]),
        )
        .unwrap();
        assert_eq!(
            list.value_as_collection().unwrap(),
            vec![json!(1), json!(2), json!(3)]
        );

        let null = DocumentFilterParam::of_name_equals_value("x", Value::Null).unwrap();
        assert!(null.value_as_collection().is_err());
    }

    #[test]
    fn test_value_as_int_list() {
        let param = DocumentFilterParam::of_name_operator_value(
            "x",
            FilterOperator::InArray,
            json!([1, "2", {"key": 3, "caption": "Three"}]),
        )
        .unwrap();
        assert_eq!(param.value_as_int_list().unwrap(), vec![1, 2, 3]);

        let bad = DocumentFilterParam::of_name_operator_value(
            "x",
            FilterOperator::InArray,
            json!(["not-a-number"]),
        )
        .unwrap();
        assert!(bad.value_as_int_list().is_err());
    }

    #[test]
    fn test_merge_is_right_biased() {
        let a = DocumentFilterList::of_list(vec![
            equals_filter("f1", "A", json!(1)),
            equals_filter("f2", "B", json!(2)),
        ])
        .unwrap();
        let b = DocumentFilterList::of_list(vec![
            equals_filter("f2", "B", json!(20)),
            equals_filter("f3", "C", json!(3)),
        ])
        .unwrap();

        let merged = a.merge_with(&b);
        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged.filter_by_id("f2").unwrap().param_value_as_int("B", -1),
            20
        );
        assert_eq!(
            merged.filter_by_id("f1").unwrap().param_value_as_int("A", -1),
            1
        );

        // Identity short-circuits
        let empty = DocumentFilterList::empty();
        assert!(a.merge_with(&empty).ptr_eq(&a));
        assert!(empty.merge_with(&a).ptr_eq(&a));
    }

    #[test]
    fn test_subtract() {
        let a = DocumentFilterList::of_list(vec![
            equals_filter("f1", "A", json!(1)),
            equals_filter("f2", "B", json!(2)),
        ])
        .unwrap();
        let only_f2 = DocumentFilterList::of(equals_filter("f2", "B", json!(999)));

        let result = a.subtract(&only_f2);
        assert_eq!(result.len(), 1);
        assert!(result.contains_filter_by_id("f1"));

        assert!(a.subtract(&a).is_empty());
        assert!(a.subtract(&DocumentFilterList::empty()).ptr_eq(&a));
    }

    #[test]
    fn test_retaining_only_is_zero_copy_when_nothing_removed() {
        let a = DocumentFilterList::of_list(vec![
            equals_filter("f1", "A", json!(1)),
            equals_filter("f2", "B", json!(2)),
        ])
        .unwrap();

        let unchanged = a.retaining_only(|_| true);
        assert!(unchanged.ptr_eq(&a));

        let changed = a.retaining_only(|f| f.filter_id() == "f1");
        assert!(!changed.ptr_eq(&a));
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn test_of_list_rejects_duplicate_ids() {
        let result = DocumentFilterList::of_list(vec![
            equals_filter("f1", "A", json!(1)),
            equals_filter("f1", "B", json!(2)),
        ]);
        assert!(result.is_err());
    }
}
