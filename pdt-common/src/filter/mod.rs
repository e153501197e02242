//! Typed filter predicates
//!
//! Query parameters are turned into an expression tree ([`Expr`]) over
//! per-entity atoms and evaluated against rows loaded from the store. Plain
//! column lookups go through [`FieldMatch`] and the [`Fields`] accessor;
//! filters that join across reports are entity-specific atoms
//! (see [`cases`] and [`migrations`]).
//!
//! Parameter names follow `field[__lookup]` where lookup is one of `lte`,
//! `gte` or `contains` (text fields only); a bare name is an exact match.

pub mod cases;
pub mod migrations;
pub mod records;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{Error, Result};

pub use cases::{case_filter, CaseAtom, CaseView};
pub use migrations::{migration_filter, MigrationAtom, MigrationView, ReportSummary};

/// A comparable field value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::DateTime(v)
    }
}

/// Named field access used by direct filters and ordering
pub trait Fields {
    /// Value of `name`, `None` when the field is unset or unknown
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// How a parameter value is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Text,
    Bool,
    DateTime,
    /// Text restricted to a fixed set of codes
    Choice(&'static [&'static str]),
    /// Handled by an entity-specific atom rather than a field lookup
    Derived,
}

impl FieldKind {
    /// Parse a raw query-string value
    pub fn parse(&self, name: &str, raw: &str) -> Result<FieldValue> {
        match self {
            FieldKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| Error::validation(format!("'{}' must be an integer, got '{}'", name, raw))),
            FieldKind::Text | FieldKind::Derived => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Bool => parse_bool(raw)
                .map(FieldValue::Bool)
                .ok_or_else(|| Error::validation(format!("'{}' must be a boolean, got '{}'", name, raw))),
            FieldKind::DateTime => DateTime::parse_from_rfc3339(raw.trim())
                .map(|dt| FieldValue::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| {
                    Error::validation(format!("'{}' must be an RFC 3339 datetime, got '{}'", name, raw))
                }),
            FieldKind::Choice(codes) => {
                if codes.contains(&raw) {
                    Ok(FieldValue::Text(raw.to_string()))
                } else {
                    Err(Error::validation(format!(
                        "'{}' must be one of {:?}, got '{}'",
                        name, codes, raw
                    )))
                }
            }
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Comparison applied by a [`FieldMatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    Lte,
    Gte,
    Contains,
}

impl Lookup {
    /// Split `field__lookup` into its parts
    pub fn split(param: &str) -> Result<(&str, Lookup)> {
        match param.rsplit_once("__") {
            None => Ok((param, Lookup::Exact)),
            Some((field, "lte")) => Ok((field, Lookup::Lte)),
            Some((field, "gte")) => Ok((field, Lookup::Gte)),
            Some((field, "contains")) => Ok((field, Lookup::Contains)),
            Some((_, other)) => Err(Error::validation(format!(
                "unsupported lookup '{}' in '{}'",
                other, param
            ))),
        }
    }
}

/// Comparison of one field against a value
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    pub field: String,
    pub lookup: Lookup,
    pub value: FieldValue,
}

impl FieldMatch {
    pub fn exact(field: &str, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.to_string(),
            lookup: Lookup::Exact,
            value: value.into(),
        }
    }

    pub fn new(field: &str, lookup: Lookup, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.to_string(),
            lookup,
            value: value.into(),
        }
    }
}

impl<R: Fields> Predicate<R> for FieldMatch {
    fn matches(&self, row: &R) -> bool {
        let Some(actual) = row.field(&self.field) else {
            return false;
        };
        match self.lookup {
            Lookup::Exact => actual == self.value,
            Lookup::Lte => actual <= self.value,
            Lookup::Gte => actual >= self.value,
            Lookup::Contains => match (&actual, &self.value) {
                (FieldValue::Text(haystack), FieldValue::Text(needle)) => haystack.contains(needle.as_str()),
                _ => false,
            },
        }
    }
}

/// A condition evaluated against a row of type `R`
pub trait Predicate<R> {
    fn matches(&self, row: &R) -> bool;
}

/// Boolean expression tree over atoms `A`
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<A> {
    Atom(A),
    And(Vec<Expr<A>>),
    Or(Vec<Expr<A>>),
    Not(Box<Expr<A>>),
}

impl<A> Expr<A> {
    /// Expression matching every row
    pub fn all() -> Self {
        Expr::And(Vec::new())
    }

    pub fn not(expr: Expr<A>) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Conjoin `expr`, flattening nested conjunctions
    pub fn and(self, expr: Expr<A>) -> Self {
        match (self, expr) {
            (Expr::And(mut left), Expr::And(right)) => {
                left.extend(right);
                Expr::And(left)
            }
            (Expr::And(mut left), other) => {
                left.push(other);
                Expr::And(left)
            }
            (this, other) => Expr::And(vec![this, other]),
        }
    }

    /// Convert every atom, keeping the tree shape
    pub fn map<B>(self, f: &impl Fn(A) -> B) -> Expr<B> {
        match self {
            Expr::Atom(atom) => Expr::Atom(f(atom)),
            Expr::And(exprs) => Expr::And(exprs.into_iter().map(|e| e.map(f)).collect()),
            Expr::Or(exprs) => Expr::Or(exprs.into_iter().map(|e| e.map(f)).collect()),
            Expr::Not(expr) => Expr::Not(Box::new(expr.map(f))),
        }
    }

    pub fn eval<R>(&self, row: &R) -> bool
    where
        A: Predicate<R>,
    {
        match self {
            Expr::Atom(atom) => atom.matches(row),
            Expr::And(exprs) => exprs.iter().all(|e| e.eval(row)),
            Expr::Or(exprs) => exprs.iter().any(|e| e.eval(row)),
            Expr::Not(expr) => !expr.eval(row),
        }
    }

    /// Keep the rows matching the expression, preserving their order
    pub fn apply<R>(&self, rows: Vec<R>) -> Vec<R>
    where
        A: Predicate<R>,
    {
        rows.into_iter().filter(|row| self.eval(row)).collect()
    }
}

/// Filter parameters of one request, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams {
    values: BTreeMap<String, String>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    /// Raw value; empty strings count as not supplied
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Supplied parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>> {
        self.typed(name, FieldKind::Int).map(|v| match v {
            Some(FieldValue::Int(i)) => Some(i),
            _ => None,
        })
    }

    fn typed(&self, name: &str, kind: FieldKind) -> Result<Option<FieldValue>> {
        self.get(name).map(|raw| kind.parse(name, raw)).transpose()
    }
}

/// Build a conjunction of field lookups for every supplied parameter
///
/// `fields` lists the filterable fields and how their values parse;
/// [`FieldKind::Derived`] fields are skipped and left to the caller.
/// Parameters naming unknown fields are rejected.
pub fn direct_filter(params: &FilterParams, fields: &[(&str, FieldKind)]) -> Result<Expr<FieldMatch>> {
    let mut expr = Expr::all();

    for (param, raw) in params.iter() {
        let (name, lookup) = Lookup::split(param)?;
        let Some((_, kind)) = fields.iter().find(|(field, _)| *field == name) else {
            return Err(Error::validation(format!("unknown filter '{}'", param)));
        };

        if *kind == FieldKind::Derived {
            if lookup != Lookup::Exact {
                return Err(Error::validation(format!("unsupported lookup in '{}'", param)));
            }
            continue;
        }

        if lookup == Lookup::Contains && !matches!(kind, FieldKind::Text) {
            return Err(Error::validation(format!(
                "'contains' is only supported on text fields, not '{}'",
                name
            )));
        }

        let value = kind.parse(param, raw)?;
        expr = expr.and(Expr::Atom(FieldMatch::new(name, lookup, value)));
    }

    Ok(expr)
}

/// One `order_by` key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub descending: bool,
}

impl OrderKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }
}

/// Parse `order_by=a,-b` against the allowed field names
pub fn parse_ordering(raw: &str, allowed: &[&str]) -> Result<Vec<OrderKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (field, descending) = match part.strip_prefix('-') {
                Some(field) => (field, true),
                None => (part, false),
            };
            if !allowed.contains(&field) {
                return Err(Error::validation(format!(
                    "cannot order by '{}', allowed: {:?}",
                    field, allowed
                )));
            }
            Ok(OrderKey {
                field: field.to_string(),
                descending,
            })
        })
        .collect()
}

/// Stable sort by the given keys, with `id` as final tie-break
///
/// Unset values sort before set values.
pub fn apply_ordering<R: Fields>(rows: &mut [R], keys: &[OrderKey]) {
    rows.sort_by(|a, b| {
        for key in keys {
            let ordering = a.field(&key.field).cmp(&b.field(&key.field));
            let ordering = if key.descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.field("id").cmp(&b.field("id"))
    });
}
