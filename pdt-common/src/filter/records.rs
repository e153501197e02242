//! Field accessors for entities filtered by plain column lookups

use super::{FieldValue, Fields};
use crate::db::{CIProject, DeploymentReport, Instance, MigrationReport, MigrationStepReport, Release};

impl Fields for Instance {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "description" => Some(self.description.as_str().into()),
            _ => None,
        }
    }
}

impl Fields for CIProject {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.as_str().into()),
            "description" => Some(self.description.as_str().into()),
            _ => None,
        }
    }
}

impl Fields for Release {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "number" => Some(self.number.into()),
            "datetime" => Some(self.datetime.into()),
            _ => None,
        }
    }
}

impl Fields for MigrationReport {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "migration" => Some(self.migration.into()),
            "instance" => Some(self.instance.as_str().into()),
            "status" => Some(self.status.as_str().into()),
            "datetime" => Some(self.datetime.into()),
            _ => None,
        }
    }
}

impl Fields for MigrationStepReport {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "report" => Some(self.report.into()),
            "step" => Some(self.step.into()),
            "status" => Some(self.status.as_str().into()),
            "datetime" => Some(self.datetime.into()),
            _ => None,
        }
    }
}

impl Fields for DeploymentReport {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "id" => Some(self.id.into()),
            "release" => Some(self.release.into()),
            "instance" => Some(self.instance.as_str().into()),
            "status" => Some(self.status.as_str().into()),
            "datetime" => Some(self.datetime.into()),
            _ => None,
        }
    }
}
