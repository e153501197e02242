//! Database models
//!
//! Entities reference each other by natural key in their serialized form
//! (instance and CI project by name, release by number) while storage uses
//! integer ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Declares a lowercase string-coded enum with `as_str`, `FromStr` and serde support
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $code)] $variant),+
        }

        impl $name {
            /// Every accepted code
            pub const CODES: &'static [&'static str] = &[$($code),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                match s {
                    $($code => Ok(Self::$variant),)+
                    other => Err(crate::Error::validation(format!(
                        "invalid {} '{}', expected one of {:?}",
                        stringify!($name),
                        other,
                        Self::CODES
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Outcome of applying a migration (or one of its steps) on an instance
    MigrationStatus {
        Pending => "pending",
        Applied => "applied",
        Error => "error",
    }
);

string_enum!(
    /// Outcome of deploying a release on an instance
    DeploymentStatus {
        Deployed => "deployed",
        Error => "error",
    }
);

string_enum!(
    MigrationCategory {
        Onerous => "onerous",
        Impossible => "impossible",
        Usual => "usual",
    }
);

string_enum!(
    /// When a migration step runs relative to the code deployment
    StepKind {
        PreDeploy => "pre-deploy",
        PostDeploy => "post-deploy",
    }
);

string_enum!(
    StepType {
        Sql => "sql",
        Python => "python",
        Sh => "sh",
    }
);

string_enum!(
    /// Kind of pending local modification of a case
    EditKind {
        Title => "title",
        Tags => "tags",
    }
);

string_enum!(
    EmailStatus {
        Queued => "queued",
        Sent => "sent",
        Failed => "failed",
    }
);

impl Default for MigrationCategory {
    fn default() -> Self {
        MigrationCategory::Usual
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Instance / CI project / Release
// ============================================================================

/// A deployment target environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Names of the linked CI projects, sorted
    pub ci_projects: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ci_projects: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstancePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ci_projects: Option<Vec<String>>,
}

impl InstancePatch {
    pub fn apply(self, current: Instance) -> InstanceInput {
        InstanceInput {
            name: self.name.unwrap_or(current.name),
            description: self.description.unwrap_or(current.description),
            ci_projects: self.ci_projects.unwrap_or(current.ci_projects),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CIProject {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CIProjectInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CIProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl CIProjectPatch {
    pub fn apply(self, current: CIProject) -> CIProjectInput {
        CIProjectInput {
            name: self.name.unwrap_or(current.name),
            description: self.description.unwrap_or(current.description),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub number: i64,
    pub datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInput {
    pub number: i64,
    #[serde(default = "Utc::now")]
    pub datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleasePatch {
    pub number: Option<i64>,
    pub datetime: Option<DateTime<Utc>>,
}

impl ReleasePatch {
    pub fn apply(self, current: Release) -> ReleaseInput {
        ReleaseInput {
            number: self.number.unwrap_or(current.number),
            datetime: self.datetime.unwrap_or(current.datetime),
        }
    }
}

// ============================================================================
// Cases
// ============================================================================

/// A unit of work imported from the issue tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Tracker identifier
    pub id: i64,
    pub title: String,
    pub description: String,
    pub project: String,
    pub area: String,
    pub revision: String,
    pub tags: Vec<String>,
    /// Release number
    pub release: Option<i64>,
    /// CI project name
    pub ci_project: Option<String>,
    /// Last modification time reported by the tracker
    pub modified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseInput {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub release: Option<i64>,
    #[serde(default)]
    pub ci_project: Option<String>,
    #[serde(default)]
    pub modified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CasePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub project: Option<String>,
    pub area: Option<String>,
    pub revision: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub release: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub ci_project: Option<Option<String>>,
}

impl CasePatch {
    pub fn apply(self, current: Case) -> CaseInput {
        CaseInput {
            id: current.id,
            title: self.title.unwrap_or(current.title),
            description: self.description.unwrap_or(current.description),
            project: self.project.unwrap_or(current.project),
            area: self.area.unwrap_or(current.area),
            revision: self.revision.unwrap_or(current.revision),
            tags: self.tags.unwrap_or(current.tags),
            release: self.release.unwrap_or(current.release),
            ci_project: self.ci_project.unwrap_or(current.ci_project),
            modified_date: current.modified_date,
        }
    }
}

/// Pending local modification of a case, waiting to be pushed to the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseEdit {
    pub id: i64,
    pub case_id: i64,
    pub kind: EditKind,
    pub params: serde_json::Value,
    pub datetime: DateTime<Utc>,
}

impl CaseEdit {
    /// Replay this edit on top of a title and tag list
    pub fn apply_to(&self, title: &mut String, tags: &mut Vec<String>) -> crate::Result<()> {
        match self.kind {
            EditKind::Title => {
                let change: TitleChange = serde_json::from_value(self.params.clone())?;
                *title = change.title;
            }
            EditKind::Tags => {
                let change: TagChange = serde_json::from_value(self.params.clone())?;
                change.apply(tags);
            }
        }
        Ok(())
    }
}

/// Parameters of a title edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleChange {
    pub title: String,
}

/// Parameters of a tags edit
///
/// Only the added and removed tags are recorded, so tags set in the tracker
/// meanwhile survive the push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagChange {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl TagChange {
    /// Changes that turn `from` into `to`
    pub fn between(from: &[String], to: &[String]) -> Self {
        Self {
            add: to.iter().filter(|t| !from.contains(t)).cloned().collect(),
            remove: from.iter().filter(|t| !to.contains(t)).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply to `tags`, keeping their order and adding new tags at the end
    pub fn apply(&self, tags: &mut Vec<String>) {
        tags.retain(|t| !self.remove.contains(t));
        for tag in &self.add {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
}

/// Tracker-side state of a case, as written by a pull
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseSnapshot {
    pub id: i64,
    pub title: String,
    pub original_title: String,
    pub project: String,
    pub area: String,
    /// Fix-for release number, when the tracker's fix-for is a release
    pub release_number: Option<i64>,
    pub release_datetime: Option<DateTime<Utc>>,
    pub ci_project: Option<String>,
    pub revision: String,
    pub tags: Vec<String>,
    pub modified_date: Option<DateTime<Utc>>,
}

// ============================================================================
// Migrations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub id: i64,
    pub position: i64,
    pub kind: StepKind,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub code: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationStepInput {
    pub kind: StepKind,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub path: String,
}

impl From<MigrationStep> for MigrationStepInput {
    fn from(step: MigrationStep) -> Self {
        Self {
            kind: step.kind,
            step_type: step.step_type,
            code: step.code,
            path: step.path,
        }
    }
}

/// A data/schema change belonging to a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: i64,
    pub uid: String,
    /// Owning case id
    pub case: i64,
    pub category: MigrationCategory,
    pub reviewed: bool,
    /// Ids of migrations that must be applied first, sorted
    pub depends_on: Vec<i64>,
    pub steps: Vec<MigrationStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationInput {
    /// Generated when omitted
    #[serde(default)]
    pub uid: Option<String>,
    pub case: i64,
    #[serde(default)]
    pub category: MigrationCategory,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub depends_on: Vec<i64>,
    /// `None` keeps the stored steps on update
    #[serde(default)]
    pub steps: Option<Vec<MigrationStepInput>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationPatch {
    pub uid: Option<String>,
    pub case: Option<i64>,
    pub category: Option<MigrationCategory>,
    pub reviewed: Option<bool>,
    pub depends_on: Option<Vec<i64>>,
    pub steps: Option<Vec<MigrationStepInput>>,
}

impl MigrationPatch {
    pub fn apply(self, current: Migration) -> MigrationInput {
        MigrationInput {
            uid: Some(self.uid.unwrap_or(current.uid)),
            case: self.case.unwrap_or(current.case),
            category: self.category.unwrap_or(current.category),
            reviewed: self.reviewed.unwrap_or(current.reviewed),
            depends_on: self.depends_on.unwrap_or(current.depends_on),
            steps: self.steps,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub id: i64,
    pub migration: i64,
    /// Instance name
    pub instance: String,
    pub status: MigrationStatus,
    pub datetime: DateTime<Utc>,
    pub log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationReportInput {
    pub migration: i64,
    pub instance: String,
    pub status: MigrationStatus,
    #[serde(default = "Utc::now")]
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub log: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationReportPatch {
    pub migration: Option<i64>,
    pub instance: Option<String>,
    pub status: Option<MigrationStatus>,
    pub datetime: Option<DateTime<Utc>>,
    pub log: Option<String>,
}

impl MigrationReportPatch {
    pub fn apply(self, current: MigrationReport) -> MigrationReportInput {
        MigrationReportInput {
            migration: self.migration.unwrap_or(current.migration),
            instance: self.instance.unwrap_or(current.instance),
            status: self.status.unwrap_or(current.status),
            datetime: self.datetime.unwrap_or(current.datetime),
            log: self.log.unwrap_or(current.log),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStepReport {
    pub id: i64,
    pub report: i64,
    pub step: i64,
    pub status: MigrationStatus,
    pub datetime: DateTime<Utc>,
    pub log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationStepReportInput {
    pub report: i64,
    pub step: i64,
    pub status: MigrationStatus,
    #[serde(default = "Utc::now")]
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub log: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationStepReportPatch {
    pub report: Option<i64>,
    pub step: Option<i64>,
    pub status: Option<MigrationStatus>,
    pub datetime: Option<DateTime<Utc>>,
    pub log: Option<String>,
}

impl MigrationStepReportPatch {
    pub fn apply(self, current: MigrationStepReport) -> MigrationStepReportInput {
        MigrationStepReportInput {
            report: self.report.unwrap_or(current.report),
            step: self.step.unwrap_or(current.step),
            status: self.status.unwrap_or(current.status),
            datetime: self.datetime.unwrap_or(current.datetime),
            log: self.log.unwrap_or(current.log),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub id: i64,
    /// Release number
    pub release: i64,
    /// Instance name
    pub instance: String,
    pub status: DeploymentStatus,
    pub datetime: DateTime<Utc>,
    pub log: String,
    /// Ids of the cases covered by the deployment, sorted
    pub cases: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentReportInput {
    pub release: i64,
    pub instance: String,
    pub status: DeploymentStatus,
    #[serde(default = "Utc::now")]
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub cases: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentReportPatch {
    pub release: Option<i64>,
    pub instance: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub datetime: Option<DateTime<Utc>>,
    pub log: Option<String>,
    pub cases: Option<Vec<i64>>,
}

impl DeploymentReportPatch {
    pub fn apply(self, current: DeploymentReport) -> DeploymentReportInput {
        DeploymentReportInput {
            release: self.release.unwrap_or(current.release),
            instance: self.instance.unwrap_or(current.instance),
            status: self.status.unwrap_or(current.status),
            datetime: self.datetime.unwrap_or(current.datetime),
            log: self.log.unwrap_or(current.log),
            cases: self.cases.unwrap_or(current.cases),
        }
    }
}

// ============================================================================
// Outbound mail
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEmail {
    pub id: i64,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: EmailStatus,
    pub attempts: i64,
    pub created: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_through_from_str() {
        for code in MigrationStatus::CODES {
            let status: MigrationStatus = code.parse().unwrap();
            assert_eq!(status.as_str(), *code);
        }
        assert!("apl".parse::<MigrationStatus>().is_err());
    }

    #[test]
    fn test_step_type_serializes_as_type() {
        let step = MigrationStep {
            id: 1,
            position: 0,
            kind: StepKind::PreDeploy,
            step_type: StepType::Sql,
            code: "SELECT 1".to_string(),
            path: String::new(),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "sql");
        assert_eq!(json["kind"], "pre-deploy");
    }

    #[test]
    fn test_case_patch_distinguishes_null_from_missing() {
        let current = Case {
            id: 7,
            title: "Old".to_string(),
            description: String::new(),
            project: String::new(),
            area: String::new(),
            revision: String::new(),
            tags: vec![],
            release: Some(5),
            ci_project: Some("alpha".to_string()),
            modified_date: None,
        };

        let patch: CasePatch = serde_json::from_str(r#"{"release": null}"#).unwrap();
        let input = patch.apply(current.clone());
        assert_eq!(input.release, None);
        assert_eq!(input.ci_project.as_deref(), Some("alpha"));

        let patch: CasePatch = serde_json::from_str(r#"{"title": "New"}"#).unwrap();
        let input = patch.apply(current);
        assert_eq!(input.release, Some(5));
        assert_eq!(input.title, "New");
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tag_change_keeps_unrelated_tags() {
        let change = TagChange::between(&tags(&["old", "keep"]), &tags(&["keep", "deployed-prod"]));
        assert_eq!(change.add, tags(&["deployed-prod"]));
        assert_eq!(change.remove, tags(&["old"]));

        // Tracker gained "customer-x" since the edit was made
        let mut current = tags(&["old", "customer-x"]);
        change.apply(&mut current);
        assert_eq!(current, tags(&["customer-x", "deployed-prod"]));

        assert!(TagChange::between(&tags(&["a"]), &tags(&["a"])).is_empty());
    }

    #[test]
    fn test_case_edit_replay() {
        let edit = |kind, params| CaseEdit {
            id: 1,
            case_id: 1,
            kind,
            params,
            datetime: Utc::now(),
        };
        let mut title = "Tracker title".to_string();
        let mut current = tags(&["reviewed"]);

        edit(EditKind::Tags, serde_json::json!({ "add": ["deployed-prod"] }))
            .apply_to(&mut title, &mut current)
            .unwrap();
        edit(EditKind::Title, serde_json::json!({ "title": "Local title" }))
            .apply_to(&mut title, &mut current)
            .unwrap();

        assert_eq!(title, "Local title");
        assert_eq!(current, tags(&["reviewed", "deployed-prod"]));
    }
}
