//! Case filtering
//!
//! Besides column lookups, cases can be filtered by whether they were
//! deployed on an instance: a `deployed` deployment report for that instance
//! lists the case.

use std::collections::BTreeSet;

use super::{direct_filter, Expr, FieldKind, FieldMatch, FieldValue, Fields, FilterParams, Predicate};
use crate::db::Case;
use crate::{Error, Result};

/// A case together with the instances it was deployed on
#[derive(Debug, Clone, PartialEq)]
pub struct CaseView {
    pub case: Case,
    /// Names of instances with a `deployed` report covering the case
    pub deployed_on: BTreeSet<String>,
}

impl Fields for CaseView {
    fn field(&self, name: &str) -> Option<FieldValue> {
        let case = &self.case;
        match name {
            "id" => Some(case.id.into()),
            "title" => Some(case.title.as_str().into()),
            "description" => Some(case.description.as_str().into()),
            "project" => Some(case.project.as_str().into()),
            "area" => Some(case.area.as_str().into()),
            "revision" => Some(case.revision.as_str().into()),
            "release" => case.release.map(FieldValue::Int),
            "ci_project" => case.ci_project.as_deref().map(FieldValue::from),
            "modified_date" => case.modified_date.map(FieldValue::DateTime),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseAtom {
    Field(FieldMatch),
    /// Deployed on the named instance
    DeployedOn(String),
}

impl Predicate<CaseView> for CaseAtom {
    fn matches(&self, row: &CaseView) -> bool {
        match self {
            CaseAtom::Field(m) => m.matches(row),
            CaseAtom::DeployedOn(instance) => row.deployed_on.contains(instance),
        }
    }
}

/// Build the case predicate from request parameters
///
/// `deployed_on` and `exclude_deployed_on` must be declared as
/// [`FieldKind::Derived`] in `fields` and require both `ci_project` and
/// `release` to be supplied.
pub fn case_filter(params: &FilterParams, fields: &[(&str, FieldKind)]) -> Result<Expr<CaseAtom>> {
    let mut expr = direct_filter(params, fields)?.map(&CaseAtom::Field);

    for (param, exclude) in [("deployed_on", false), ("exclude_deployed_on", true)] {
        let Some(instance) = params.get(param) else {
            continue;
        };
        if !params.contains("ci_project") {
            return Err(Error::validation(format!("CI project is required to filter by {}", param)));
        }
        if !params.contains("release") {
            return Err(Error::validation(format!("Release is required to filter by {}", param)));
        }

        let atom = Expr::Atom(CaseAtom::DeployedOn(instance.to_string()));
        expr = expr.and(if exclude { Expr::not(atom) } else { atom });
    }

    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[(&str, FieldKind)] = &[
        ("id", FieldKind::Int),
        ("title", FieldKind::Text),
        ("project", FieldKind::Text),
        ("release", FieldKind::Int),
        ("ci_project", FieldKind::Text),
        ("revision", FieldKind::Text),
        ("deployed_on", FieldKind::Derived),
        ("exclude_deployed_on", FieldKind::Derived),
    ];

    fn view(id: i64, release: Option<i64>, ci_project: &str, deployed_on: &[&str]) -> CaseView {
        CaseView {
            case: Case {
                id,
                title: format!("Case {}", id),
                description: String::new(),
                project: "Project".to_string(),
                area: String::new(),
                revision: String::new(),
                tags: vec![],
                release,
                ci_project: Some(ci_project.to_string()),
                modified_date: None,
            },
            deployed_on: deployed_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn rows() -> Vec<CaseView> {
        vec![
            view(1, Some(5), "alpha", &["prod"]),
            view(2, Some(5), "alpha", &[]),
            view(3, Some(5), "beta", &["prod"]),
            view(4, Some(6), "alpha", &["staging"]),
        ]
    }

    fn ids(params: FilterParams) -> Vec<i64> {
        case_filter(&params, FIELDS)
            .unwrap()
            .apply(rows())
            .iter()
            .map(|v| v.case.id)
            .collect()
    }

    #[test]
    fn test_deployed_on_requires_ci_project_and_release() {
        for param in ["deployed_on", "exclude_deployed_on"] {
            let missing_both = FilterParams::new().with(param, "prod");
            let missing_release = FilterParams::new().with(param, "prod").with("ci_project", "alpha");
            let missing_project = FilterParams::new().with(param, "prod").with("release", "5");
            for params in [missing_both, missing_release, missing_project] {
                assert!(matches!(case_filter(&params, FIELDS), Err(Error::Validation(_))));
            }
        }
    }

    #[test]
    fn test_deployed_on_and_exclusion_partition_the_release() {
        let base = FilterParams::new().with("ci_project", "alpha").with("release", "5");
        assert_eq!(ids(base.clone().with("deployed_on", "prod")), vec![1]);
        assert_eq!(ids(base.with("exclude_deployed_on", "prod")), vec![2]);
    }

    #[test]
    fn test_plain_filters() {
        assert_eq!(ids(FilterParams::new().with("release", "6")), vec![4]);
        assert_eq!(ids(FilterParams::new().with("ci_project", "beta")), vec![3]);
        assert_eq!(ids(FilterParams::new().with("title__contains", "Case")).len(), 4);
    }
}
