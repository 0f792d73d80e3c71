//! Filter, sort and pagination primitives shared by every [`Record`] lookup.
//!
//! Callers describe a query with plain strings (`field:value:op` triples and a
//! `field:direction` sort rule). Nothing caller-supplied reaches the SQL text:
//! field names are resolved against the entity's whitelist of [`FieldSpec`]s
//! and every value is parsed into a typed [`Value`] and bound as a parameter.
//!
//! [`Record`]: super::Record

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::parse_cents;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown field '{field}' for {entity}")]
    UnknownField { entity: &'static str, field: String },

    #[error("malformed filter condition: {0:?} (expected field:value:operator)")]
    MalformedCondition(String),

    #[error("unknown filter operator: {0:?}")]
    UnknownOperator(String),

    #[error("operator '{op}' is not supported on field '{field}'")]
    UnsupportedOperator { field: String, op: Operator },

    #[error("invalid value {value:?} for field '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("malformed sort rule: {0:?} (expected field:direction)")]
    MalformedSort(String),

    #[error("unknown sort direction: {0:?}")]
    UnknownDirection(String),

    #[error("invalid page request: {0}")]
    InvalidPage(String),
}

/// Closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Lte,
    Gte,
    In,
    Like,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Lte => "lte",
            Operator::Gte => "gte",
            Operator::In => "in",
            Operator::Like => "like",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => " = ",
            Operator::Lt => " < ",
            Operator::Gt => " > ",
            Operator::Lte => " <= ",
            Operator::Gte => " >= ",
            Operator::In => " IN ",
            Operator::Like => " LIKE ",
        }
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eq" | "=" => Ok(Operator::Eq),
            "lt" | "<" => Ok(Operator::Lt),
            "gt" | ">" => Ok(Operator::Gt),
            "lte" | "<=" => Ok(Operator::Lte),
            "gte" | ">=" => Ok(Operator::Gte),
            "in" => Ok(Operator::In),
            "like" => Ok(Operator::Like),
            other => Err(QueryError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type of a whitelisted column, used to parse filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Text,
    Money,
    Integer,
    Bool,
    Timestamp,
}

/// A filterable and sortable column exposed by an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            column: name,
            kind,
        }
    }
}

/// A value bound to a statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl Value {
    pub fn push_bind(self, qb: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Value::Text(s) => {
                qb.push_bind(s);
            }
            Value::Integer(i) => {
                qb.push_bind(i);
            }
            Value::Bool(b) => {
                qb.push_bind(b);
            }
            Value::Null => {
                qb.push_bind(None::<String>);
            }
        }
    }

    pub fn opt_text(value: Option<impl ToString>) -> Self {
        value.map_or(Value::Null, |v| Value::Text(v.to_string()))
    }
}

/// Timestamps are stored as RFC 3339 in UTC with second precision,
/// so text comparison matches chronological order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_value(field: &FieldSpec, raw: &str) -> Result<Value, QueryError> {
    let invalid = |reason: &str| QueryError::InvalidValue {
        field: field.name.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let raw = raw.trim();
    match field.kind {
        FieldKind::Text => Ok(Value::Text(raw.to_string())),
        FieldKind::Id => Uuid::parse_str(raw)
            .map(|id| Value::Text(id.to_string()))
            .map_err(|_| invalid("expected a UUID")),
        FieldKind::Money => parse_cents(raw)
            .map(Value::Integer)
            .map_err(|e| invalid(&e.to_string())),
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("expected an integer")),
        FieldKind::Bool => match raw.to_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid("expected true or false")),
        },
        FieldKind::Timestamp => parse_timestamp(raw)
            .map(|dt| Value::Text(format_timestamp(&dt)))
            .ok_or_else(|| invalid("expected RFC 3339 or YYYY-MM-DD")),
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len() + 2);
    escaped.push('%');
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// A single `field op value` condition, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: String,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Operator, value: impl ToString) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.to_string(),
        }
    }

    /// Parse `field:value:op`. The operator is optional and defaults to `eq`;
    /// values may themselves contain colons (timestamps). A trailing word that
    /// is not an operator is rejected rather than folded into the value.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let malformed = || QueryError::MalformedCondition(raw.to_string());
        let (field, rest) = raw.split_once(':').ok_or_else(malformed)?;
        let field = field.trim();
        if field.is_empty() {
            return Err(malformed());
        }

        let (value, op) = match rest.rsplit_once(':') {
            Some((value, op)) => match op.parse::<Operator>() {
                Ok(op) => (value, op),
                Err(err) if looks_like_operator(op) => return Err(err),
                Err(_) => (rest, Operator::Eq),
            },
            None => (rest, Operator::Eq),
        };

        Ok(Self::new(field, op, value))
    }
}

fn looks_like_operator(segment: &str) -> bool {
    let segment = segment.trim();
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphabetic())
}

/// A conjunction of conditions. Empty selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, field: impl Into<String>, op: Operator, value: impl ToString) -> Self {
        self.conditions.push(Condition::new(field, op, value));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl ToString) -> Self {
        self.and(field, Operator::Eq, value)
    }

    /// Parse a comma-separated list of `field:value:op` triples.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let conditions = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Condition::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(QueryError::UnknownDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse `field:direction`; the direction defaults to ascending.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let raw = raw.trim();
        let (field, direction) = match raw.split_once(':') {
            Some((field, direction)) => (field.trim(), direction.parse()?),
            None => (raw, SortDirection::Asc),
        };
        if field.is_empty() {
            return Err(QueryError::MalformedSort(raw.to_string()));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

/// A validated page window. Build it with [`PageRequest::new`] or `default()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Result<Self, QueryError> {
        if page < 1 {
            return Err(QueryError::InvalidPage("page must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(QueryError::InvalidPage(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, page_size })
    }

    /// One-based page number.
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

/// One window of a query's result set.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_count: u64,
    pub rows_on_page: usize,
    pub rows: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(request: PageRequest, total_count: u64, rows: Vec<T>) -> Self {
        Self {
            page: request.page(),
            page_size: request.page_size(),
            total_pages: total_count.div_ceil(u64::from(request.page_size())),
            total_count,
            rows_on_page: rows.len(),
            rows,
        }
    }
}

fn lookup_field<'a>(
    entity: &'static str,
    fields: &'a [FieldSpec],
    name: &str,
) -> Result<&'a FieldSpec, QueryError> {
    fields
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| QueryError::UnknownField {
            entity,
            field: name.to_string(),
        })
}

/// A condition resolved against an entity's whitelist and ready to bind.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Compare {
        column: &'static str,
        op: Operator,
        value: Value,
    },
    In {
        column: &'static str,
        values: Vec<Value>,
    },
    Like {
        column: &'static str,
        pattern: String,
    },
}

/// A validated WHERE and ORDER BY pair for a specific entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    predicates: Vec<Predicate>,
    order: Option<(&'static str, SortDirection)>,
}

impl QueryPlan {
    pub fn build(
        entity: &'static str,
        fields: &[FieldSpec],
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Self, QueryError> {
        let mut predicates = Vec::with_capacity(filter.conditions.len());
        for condition in &filter.conditions {
            let spec = lookup_field(entity, fields, condition.field.trim())?;
            let predicate = match condition.op {
                Operator::In => Predicate::In {
                    column: spec.column,
                    values: condition
                        .value
                        .split('|')
                        .map(|v| parse_value(spec, v))
                        .collect::<Result<_, _>>()?,
                },
                Operator::Like if spec.kind == FieldKind::Text => Predicate::Like {
                    column: spec.column,
                    pattern: escape_like(&condition.value),
                },
                Operator::Like => {
                    return Err(QueryError::UnsupportedOperator {
                        field: spec.name.to_string(),
                        op: Operator::Like,
                    });
                }
                op => Predicate::Compare {
                    column: spec.column,
                    op,
                    value: parse_value(spec, &condition.value)?,
                },
            };
            predicates.push(predicate);
        }

        let order = match sort {
            Some(rule) => {
                let spec = lookup_field(entity, fields, rule.field.trim())?;
                Some((spec.column, rule.direction))
            }
            None => None,
        };

        Ok(Self { predicates, order })
    }

    /// Append ` WHERE ...` (if any predicate) with bound values.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for (i, predicate) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Compare { column, op, value } => {
                    qb.push(*column).push(op.sql());
                    value.clone().push_bind(qb);
                }
                Predicate::In { column, values } => {
                    qb.push(*column).push(Operator::In.sql()).push("(");
                    for (j, value) in values.iter().enumerate() {
                        if j > 0 {
                            qb.push(", ");
                        }
                        value.clone().push_bind(qb);
                    }
                    qb.push(")");
                }
                Predicate::Like { column, pattern } => {
                    qb.push(*column).push(Operator::Like.sql());
                    qb.push_bind(pattern.clone());
                    qb.push(" ESCAPE '\\'");
                }
            }
        }
    }

    /// Append ` ORDER BY ...` when a sort rule was given.
    pub fn push_order(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some((column, direction)) = self.order {
            qb.push(" ORDER BY ").push(column).push(direction.sql());
        }
    }
}
