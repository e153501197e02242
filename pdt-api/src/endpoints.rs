//! Per-endpoint list configuration
//!
//! Each collection endpoint declares which query parameters filter it, which
//! fields it can be ordered by and whether it is paginated. Anything else in
//! the query string is rejected.

use std::collections::HashMap;

use pdt_common::db::{DeploymentStatus, MigrationCategory, MigrationStatus};
use pdt_common::filter::{parse_ordering, FieldKind, FilterParams, OrderKey};
use pdt_common::{Error, Result};

use crate::pagination::DEFAULT_PAGE_SIZE;

const ORDER_PARAM: &str = "order_by";
const PAGE_PARAM: &str = "page";
const PAGE_SIZE_PARAM: &str = "page_size";

#[derive(Debug, Clone, Copy)]
pub struct EndpointConfig {
    pub filters: &'static [(&'static str, FieldKind)],
    pub orderings: &'static [&'static str],
    pub default_ordering: &'static [&'static str],
    pub paginate: bool,
}

pub const INSTANCES: EndpointConfig = EndpointConfig {
    filters: &[("name", FieldKind::Text)],
    orderings: &["name"],
    default_ordering: &["name"],
    paginate: true,
};

pub const RELEASES: EndpointConfig = EndpointConfig {
    filters: &[("number", FieldKind::Int), ("datetime", FieldKind::DateTime)],
    orderings: &["number", "datetime"],
    default_ordering: &["number"],
    paginate: true,
};

pub const CI_PROJECTS: EndpointConfig = EndpointConfig {
    filters: &[("name", FieldKind::Text)],
    orderings: &["name"],
    default_ordering: &["name"],
    paginate: true,
};

pub const CASES: EndpointConfig = EndpointConfig {
    filters: &[
        ("id", FieldKind::Int),
        ("title", FieldKind::Text),
        ("project", FieldKind::Text),
        ("release", FieldKind::Int),
        ("ci_project", FieldKind::Text),
        ("revision", FieldKind::Text),
        ("deployed_on", FieldKind::Derived),
        ("exclude_deployed_on", FieldKind::Derived),
    ],
    orderings: &["id", "title", "project", "release", "ci_project"],
    default_ordering: &["id"],
    paginate: true,
};

/// Orderings are accepted but the dependency sort decides the final order
pub const MIGRATIONS: EndpointConfig = EndpointConfig {
    filters: &[
        ("uid", FieldKind::Text),
        ("case", FieldKind::Int),
        ("release", FieldKind::Derived),
        ("category", FieldKind::Choice(MigrationCategory::CODES)),
        ("ci_project", FieldKind::Text),
        ("instance", FieldKind::Derived),
        ("status", FieldKind::Derived),
        ("exclude_status", FieldKind::Derived),
        ("reviewed", FieldKind::Bool),
    ],
    orderings: &["case", "category"],
    default_ordering: &["case", "id"],
    paginate: false,
};

pub const MIGRATION_REPORTS: EndpointConfig = EndpointConfig {
    filters: &[
        ("migration", FieldKind::Int),
        ("instance", FieldKind::Text),
        ("status", FieldKind::Choice(MigrationStatus::CODES)),
        ("datetime", FieldKind::DateTime),
    ],
    orderings: &["migration", "instance", "status", "datetime"],
    default_ordering: &["migration", "instance", "datetime", "id"],
    paginate: true,
};

pub const MIGRATION_STEP_REPORTS: EndpointConfig = EndpointConfig {
    filters: &[
        ("report", FieldKind::Int),
        ("status", FieldKind::Choice(MigrationStatus::CODES)),
        ("datetime", FieldKind::DateTime),
    ],
    orderings: &["report", "status", "datetime"],
    default_ordering: &["report", "datetime", "id"],
    paginate: true,
};

pub const DEPLOYMENT_REPORTS: EndpointConfig = EndpointConfig {
    filters: &[
        ("release", FieldKind::Int),
        ("instance", FieldKind::Text),
        ("status", FieldKind::Choice(DeploymentStatus::CODES)),
        ("datetime", FieldKind::DateTime),
    ],
    orderings: &["instance", "status", "datetime"],
    default_ordering: &["instance", "datetime", "id"],
    paginate: true,
};

/// Parsed query string of a list request
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filters: FilterParams,
    pub ordering: Vec<OrderKey>,
    pub page: i64,
    pub page_size: i64,
}

impl EndpointConfig {
    /// Split the query string into filters, ordering and page selection
    pub fn parse_query(&self, raw: HashMap<String, String>) -> Result<ListQuery> {
        let mut filters = FilterParams::new();
        let mut ordering = None;
        let mut page = 1;
        let mut page_size = DEFAULT_PAGE_SIZE;

        for (name, value) in raw {
            match name.as_str() {
                ORDER_PARAM => ordering = Some(parse_ordering(&value, self.orderings)?),
                PAGE_PARAM if self.paginate => page = parse_page_number(PAGE_PARAM, &value)?,
                PAGE_SIZE_PARAM if self.paginate => page_size = parse_page_number(PAGE_SIZE_PARAM, &value)?,
                _ => filters.insert(name, value),
            }
        }

        let ordering = match ordering {
            Some(keys) if !keys.is_empty() => keys,
            _ => self.default_ordering.iter().map(|f| OrderKey::asc(f)).collect(),
        };

        Ok(ListQuery {
            filters,
            ordering,
            page,
            page_size,
        })
    }
}

fn parse_page_number(name: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| Error::validation(format!("'{}' must be a positive integer, got '{}'", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_default_ordering_applies() {
        let parsed = CASES.parse_query(query(&[("project", "Backend")])).unwrap();
        assert_eq!(parsed.ordering, vec![OrderKey::asc("id")]);
        assert_eq!(parsed.filters.get("project"), Some("Backend"));
        assert_eq!(parsed.page, 1);
        assert_eq!(parsed.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_order_and_page_are_not_filters() {
        let parsed = RELEASES
            .parse_query(query(&[("order_by", "-number"), ("page", "2"), ("page_size", "10")]))
            .unwrap();
        assert!(parsed.filters.iter().next().is_none());
        assert_eq!(parsed.ordering, vec![OrderKey { field: "number".into(), descending: true }]);
        assert_eq!((parsed.page, parsed.page_size), (2, 10));
    }

    #[test]
    fn test_unknown_ordering_rejected() {
        let result = INSTANCES.parse_query(query(&[("order_by", "description")]));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_bad_page_rejected() {
        assert!(CASES.parse_query(query(&[("page", "0")])).is_err());
        assert!(CASES.parse_query(query(&[("page_size", "many")])).is_err());
    }

    #[test]
    fn test_unpaginated_endpoint_treats_page_as_filter() {
        let parsed = MIGRATIONS.parse_query(query(&[("page", "2")])).unwrap();
        assert_eq!(parsed.filters.get("page"), Some("2"));
    }
}
