//! Migration filtering
//!
//! Migration filters mostly look through the owning case and the migration
//! reports. A migration can have any number of reports per instance, so the
//! report-based atoms reason about "at least one report" rather than "the
//! report".

use std::collections::BTreeSet;

use super::{direct_filter, Expr, FieldKind, FieldMatch, FieldValue, Fields, FilterParams, Predicate};
use crate::db::{Migration, MigrationStatus};
use crate::sort::DependencyNode;
use crate::{Error, Result};

/// Instance and status of one migration report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub instance: String,
    pub status: MigrationStatus,
}

/// A migration with the case and report data its filters need
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationView {
    pub migration: Migration,
    /// Release number of the owning case
    pub case_release: Option<i64>,
    /// CI project name of the owning case
    pub case_ci_project: Option<String>,
    /// Instances linked to the owning case's CI project
    pub ci_project_instances: BTreeSet<String>,
    pub reports: Vec<ReportSummary>,
}

impl Fields for MigrationView {
    fn field(&self, name: &str) -> Option<FieldValue> {
        let migration = &self.migration;
        match name {
            "id" => Some(migration.id.into()),
            "uid" => Some(migration.uid.as_str().into()),
            "case" => Some(migration.case.into()),
            "category" => Some(migration.category.as_str().into()),
            "reviewed" => Some(migration.reviewed.into()),
            "ci_project" => self.case_ci_project.as_deref().map(FieldValue::from),
            "release" => self.case_release.map(FieldValue::Int),
            _ => None,
        }
    }
}

impl DependencyNode for MigrationView {
    fn node_id(&self) -> i64 {
        self.migration.node_id()
    }

    fn tie_break_key(&self) -> (i64, i64) {
        self.migration.tie_break_key()
    }

    fn dependencies(&self) -> &[i64] {
        self.migration.dependencies()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationAtom {
    Field(FieldMatch),
    /// Owning case's release number is at most the value
    ReleaseUpTo(i64),
    /// Some report has exactly this status
    Status(MigrationStatus),
    /// No report for `instance` has exactly `status`
    NotStatusOn {
        instance: String,
        status: MigrationStatus,
    },
    /// Reported on the instance, not reported anywhere yet, or owned by a
    /// case whose CI project deploys to the instance
    RelevantTo(String),
}

impl Predicate<MigrationView> for MigrationAtom {
    fn matches(&self, row: &MigrationView) -> bool {
        match self {
            MigrationAtom::Field(m) => m.matches(row),
            MigrationAtom::ReleaseUpTo(number) => row.case_release.is_some_and(|r| r <= *number),
            MigrationAtom::Status(status) => row.reports.iter().any(|r| r.status == *status),
            MigrationAtom::NotStatusOn { instance, status } => !row
                .reports
                .iter()
                .any(|r| r.instance == *instance && r.status == *status),
            MigrationAtom::RelevantTo(instance) => {
                row.reports.is_empty()
                    || row.reports.iter().any(|r| r.instance == *instance)
                    || row.ci_project_instances.contains(instance)
            }
        }
    }
}

/// Build the migration predicate from request parameters
///
/// `release`, `status`, `instance` and `exclude_status` must be declared as
/// [`FieldKind::Derived`] in `fields`. `exclude_status` requires `instance`.
pub fn migration_filter(params: &FilterParams, fields: &[(&str, FieldKind)]) -> Result<Expr<MigrationAtom>> {
    let mut expr = direct_filter(params, fields)?.map(&MigrationAtom::Field);

    if let Some(number) = params.int("release")? {
        expr = expr.and(Expr::Atom(MigrationAtom::ReleaseUpTo(number)));
    }

    if let Some(status) = params.get("status") {
        expr = expr.and(Expr::Atom(MigrationAtom::Status(status.parse()?)));
    }

    if let Some(instance) = params.get("instance") {
        expr = expr.and(Expr::Atom(MigrationAtom::RelevantTo(instance.to_string())));
    }

    if let Some(status) = params.get("exclude_status") {
        let Some(instance) = params.get("instance") else {
            return Err(Error::validation("Instance is required to exclude status"));
        };
        expr = expr.and(Expr::Atom(MigrationAtom::NotStatusOn {
            instance: instance.to_string(),
            status: status.parse()?,
        }));
    }

    Ok(expr)
}
