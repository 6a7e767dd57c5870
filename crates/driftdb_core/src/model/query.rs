//! Queries and the targets they listen to.

use super::document::Document;
use super::document_key::DocumentKey;
use super::field_path::FieldPath;
use driftdb_codec::{ResourcePath, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `array-contains`
    ArrayContains,
    /// `in`
    In,
    /// `array-contains-any`
    ArrayContainsAny,
    /// `not-in`
    NotIn,
}

impl Operator {
    /// Canonical spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::ArrayContains => "array-contains",
            Self::In => "in",
            Self::ArrayContainsAny => "array-contains-any",
            Self::NotIn => "not-in",
        }
    }

    /// True for range and not-equal operators.
    #[must_use]
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
                | Self::NotEqual
                | Self::NotIn
        )
    }
}

/// A `field op value` filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Filtered field.
    pub field: FieldPath,
    /// Operator.
    pub op: Operator,
    /// Operand. An array for `in`, `not-in` and `array-contains-any`.
    pub value: Value,
}

impl FieldFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(field: FieldPath, op: Operator, value: Value) -> Self {
        Self { field, op, value }
    }

    /// Evaluates the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        let field = doc.field(&self.field);
        let operands = self.value.as_array().unwrap_or_default();
        match self.op {
            Operator::ArrayContains => field
                .as_ref()
                .and_then(Value::as_array)
                .is_some_and(|a| a.contains(&self.value)),
            Operator::ArrayContainsAny => field
                .as_ref()
                .and_then(Value::as_array)
                .is_some_and(|a| a.iter().any(|v| operands.contains(v))),
            Operator::In => field.is_some_and(|v| operands.contains(&v)),
            Operator::NotIn => {
                !operands.contains(&Value::Null)
                    && field.is_some_and(|v| !operands.contains(&v))
            }
            Operator::NotEqual => field.is_some_and(|v| v != self.value),
            Operator::Equal => field.is_some_and(|v| v == self.value),
            op => field.is_some_and(|v| {
                v.type_order() == self.value.type_order() && matches_comparison(op, v.compare(&self.value))
            }),
        }
    }
}

fn matches_comparison(op: Operator, ord: Ordering) -> bool {
    match op {
        Operator::LessThan => ord == Ordering::Less,
        Operator::LessThanOrEqual => ord != Ordering::Greater,
        Operator::GreaterThan => ord == Ordering::Greater,
        Operator::GreaterThanOrEqual => ord != Ordering::Less,
        _ => false,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl Direction {
    fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Sorted field.
    pub field: FieldPath,
    /// Direction.
    pub direction: Direction,
}

impl OrderBy {
    /// Creates an ordering.
    #[must_use]
    pub fn new(field: FieldPath, direction: Direction) -> Self {
        Self { field, direction }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = if self.field.is_key_field() {
            a.key.cmp(&b.key)
        } else {
            a.field(&self.field).cmp(&b.field(&self.field))
        };
        match self.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }
}

/// Which end of the result a limit keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitType {
    /// Keep the first `limit` results.
    First,
    /// Keep the last `limit` results.
    Last,
}

/// The backend-facing form of a query: what the server is asked to watch.
///
/// Limit-to-last queries are flipped into limit-to-first targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Collection or document path.
    pub path: ResourcePath,
    /// Collection id for collection group queries.
    pub collection_group: Option<String>,
    /// Filters.
    pub filters: Vec<FieldFilter>,
    /// Full ordering, including the implicit key ordering.
    pub order_by: Vec<OrderBy>,
    /// Result limit.
    pub limit: Option<u32>,
}

impl Target {
    /// A stable string identifying equal targets.
    #[must_use]
    pub fn canonical_id(&self) -> String {
        let mut id = self.path.canonical_string();
        if let Some(group) = &self.collection_group {
            let _ = write!(id, "|cg:{group}");
        }
        id.push_str("|f:");
        for filter in &self.filters {
            let _ = write!(id, "{}{}{:?}", filter.field, filter.op.as_str(), filter.value);
        }
        id.push_str("|ob:");
        for order in &self.order_by {
            let _ = write!(id, "{}{}", order.field, order.direction.as_str());
        }
        if let Some(limit) = self.limit {
            let _ = write!(id, "|l:{limit}");
        }
        id
    }

    /// True if the target names a single document.
    #[must_use]
    pub fn is_document_query(&self) -> bool {
        DocumentKey::is_document_key(&self.path)
            && self.collection_group.is_none()
            && self.filters.is_empty()
    }
}

/// A user query over a collection, a collection group or one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    path: ResourcePath,
    collection_group: Option<String>,
    filters: Vec<FieldFilter>,
    explicit_order_by: Vec<OrderBy>,
    limit: Option<u32>,
    limit_type: LimitType,
}

impl Query {
    /// Queries the collection or document at `path`.
    #[must_use]
    pub fn at_path(path: ResourcePath) -> Self {
        Self {
            path,
            collection_group: None,
            filters: Vec::new(),
            explicit_order_by: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
        }
    }

    /// Queries every collection named `collection_id`.
    #[must_use]
    pub fn collection_group(collection_id: impl Into<String>) -> Self {
        Self {
            collection_group: Some(collection_id.into()),
            ..Self::at_path(ResourcePath::empty())
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds an ordering.
    #[must_use]
    pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
        self.explicit_order_by.push(order_by);
        self
    }

    /// Keeps the first `limit` results.
    #[must_use]
    pub fn with_limit_to_first(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self.limit_type = LimitType::First;
        self
    }

    /// Keeps the last `limit` results.
    #[must_use]
    pub fn with_limit_to_last(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self.limit_type = LimitType::Last;
        self
    }

    /// Replaces the collection group with a concrete parent path.
    #[must_use]
    pub fn as_collection_query_at_path(&self, path: ResourcePath) -> Self {
        Self {
            path,
            collection_group: None,
            ..self.clone()
        }
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Returns the collection group id.
    #[must_use]
    pub fn collection_group_id(&self) -> Option<&str> {
        self.collection_group.as_deref()
    }

    /// Returns the filters.
    #[must_use]
    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Returns the limit.
    #[must_use]
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Returns the limit type.
    #[must_use]
    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    /// True for a single-document lookup.
    #[must_use]
    pub fn is_document_query(&self) -> bool {
        self.collection_group.is_none()
            && DocumentKey::is_document_key(&self.path)
            && self.filters.is_empty()
    }

    /// True for a collection group query.
    #[must_use]
    pub fn is_collection_group_query(&self) -> bool {
        self.collection_group.is_some()
    }

    /// True if every document in the collection matches.
    #[must_use]
    pub fn matches_all_documents(&self) -> bool {
        self.filters.is_empty()
            && self.limit.is_none()
            && self
                .explicit_order_by
                .iter()
                .all(|o| o.field.is_key_field())
    }

    /// The full ordering: explicit orderings, then the first inequality
    /// field if none were given, then the document key.
    #[must_use]
    pub fn order_by(&self) -> Vec<OrderBy> {
        let mut order = self.explicit_order_by.clone();
        if order.is_empty() {
            if let Some(filter) = self.filters.iter().find(|f| f.op.is_inequality()) {
                if !filter.field.is_key_field() {
                    order.push(OrderBy::new(filter.field.clone(), Direction::Ascending));
                }
            }
        }
        if !order.iter().any(|o| o.field.is_key_field()) {
            let direction = order.last().map_or(Direction::Ascending, |o| o.direction);
            order.push(OrderBy::new(FieldPath::key_path(), direction));
        }
        order
    }

    /// True if `doc` belongs to the query's result set, ignoring limits.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_path(&doc.key)
            && self
                .explicit_order_by
                .iter()
                .all(|o| o.field.is_key_field() || doc.field(&o.field).is_some())
            && self.filters.iter().all(|f| f.matches(doc))
    }

    fn matches_path(&self, key: &DocumentKey) -> bool {
        let path = key.path();
        if let Some(group) = &self.collection_group {
            key.has_collection_id(group) && self.path.is_prefix_of(path)
        } else if DocumentKey::is_document_key(&self.path) {
            &self.path == path
        } else {
            self.path.is_immediate_parent_of(path)
        }
    }

    /// Compares two documents in query order.
    #[must_use]
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for order in self.order_by() {
            let ord = order.compare(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Converts to the target the server should watch.
    #[must_use]
    pub fn to_target(&self) -> Target {
        let mut order_by = self.order_by();
        if self.limit_type == LimitType::Last {
            for order in &mut order_by {
                order.direction = order.direction.flipped();
            }
        }
        Target {
            path: self.path.clone(),
            collection_group: self.collection_group.clone(),
            filters: self.filters.clone(),
            order_by,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object_value::ObjectValue;
    use crate::types::SnapshotVersion;

    fn doc(path: &str, entries: Vec<(&str, Value)>) -> Document {
        Document::new(
            DocumentKey::from_string(path).unwrap(),
            SnapshotVersion::MIN,
            ObjectValue::from_entries(entries),
        )
    }

    fn field(name: &str) -> FieldPath {
        FieldPath::from_dotted(name)
    }

    #[test]
    fn collection_query_matches_immediate_children_only() {
        let query = Query::at_path(ResourcePath::from_string("rooms"));
        assert!(query.matches(&doc("rooms/a", vec![])));
        assert!(!query.matches(&doc("rooms/a/messages/1", vec![])));
        assert!(!query.matches(&doc("users/a", vec![])));
    }

    #[test]
    fn collection_group_matches_any_depth() {
        let query = Query::collection_group("messages");
        assert!(query.matches(&doc("rooms/a/messages/1", vec![])));
        assert!(query.matches(&doc("messages/1", vec![])));
        assert!(!query.matches(&doc("rooms/a", vec![])));
    }

    #[test]
    fn filters() {
        let d = doc(
            "c/a",
            vec![
                ("n", Value::Integer(5)),
                ("tags", Value::Array(vec![Value::from("x"), Value::from("y")])),
            ],
        );
        let matches = |f: FieldFilter| f.matches(&d);
        assert!(matches(FieldFilter::new(field("n"), Operator::Equal, Value::Double(5.0))));
        assert!(matches(FieldFilter::new(field("n"), Operator::GreaterThan, Value::Integer(4))));
        assert!(!matches(FieldFilter::new(field("n"), Operator::LessThan, Value::from("z"))));
        assert!(matches(FieldFilter::new(field("n"), Operator::NotEqual, Value::Integer(4))));
        assert!(!matches(FieldFilter::new(field("missing"), Operator::NotEqual, Value::Integer(4))));
        assert!(matches(FieldFilter::new(field("tags"), Operator::ArrayContains, Value::from("y"))));
        assert!(matches(FieldFilter::new(
            field("n"),
            Operator::In,
            Value::Array(vec![Value::Integer(1), Value::Integer(5)])
        )));
        assert!(matches(FieldFilter::new(
            field("tags"),
            Operator::ArrayContainsAny,
            Value::Array(vec![Value::from("q"), Value::from("x")])
        )));
        assert!(!matches(FieldFilter::new(
            field("n"),
            Operator::NotIn,
            Value::Array(vec![Value::Integer(5)])
        )));
        assert!(!matches(FieldFilter::new(
            field("n"),
            Operator::NotIn,
            Value::Array(vec![Value::Null])
        )));
    }

    #[test]
    fn implicit_order_follows_inequality_then_key() {
        let query = Query::at_path(ResourcePath::from_string("c"))
            .with_filter(FieldFilter::new(field("n"), Operator::GreaterThan, Value::Integer(1)));
        let order = query.order_by();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].field, field("n"));
        assert!(order[1].field.is_key_field());

        let low = doc("c/b", vec![("n", Value::Integer(2))]);
        let high = doc("c/a", vec![("n", Value::Integer(3))]);
        assert_eq!(query.compare(&low, &high), Ordering::Less);
    }

    #[test]
    fn limit_to_last_flips_target_order() {
        let query = Query::at_path(ResourcePath::from_string("c"))
            .with_order_by(OrderBy::new(field("n"), Direction::Ascending))
            .with_limit_to_last(2);
        let target = query.to_target();
        assert!(target
            .order_by
            .iter()
            .all(|o| o.direction == Direction::Descending));
        assert_ne!(
            target.canonical_id(),
            Query::at_path(ResourcePath::from_string("c"))
                .with_order_by(OrderBy::new(field("n"), Direction::Ascending))
                .with_limit_to_first(2)
                .to_target()
                .canonical_id()
        );
    }

    #[test]
    fn order_by_requires_field_presence() {
        let query = Query::at_path(ResourcePath::from_string("c"))
            .with_order_by(OrderBy::new(field("n"), Direction::Ascending));
        assert!(!query.matches(&doc("c/a", vec![])));
        assert!(query.matches(&doc("c/a", vec![("n", Value::Null)])));
        assert!(!query.matches_all_documents());
    }
}
