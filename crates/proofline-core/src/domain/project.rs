//! The project aggregate and its upstream manifest.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::artifact::Polarity;
use crate::domain::config::RunConfig;
use crate::domain::error::{ProoflineError, Result};
use crate::domain::stage::Stage;
use crate::domain::unit::{UnitKind, UnitRef, UnitStatus, WorkUnit};

/// One entity listed by the project parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Output of the upstream project/documentation parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<ManifestEntry>,
    #[serde(default)]
    pub apis: Vec<ManifestEntry>,
}

impl ProjectManifest {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let manifest: ProjectManifest = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Unit names must be unique per kind.
    pub fn validate(&self) -> Result<()> {
        proofline_state::validate_project_name(&self.name)
            .map_err(|e| ProoflineError::InvalidManifest(e.to_string()))?;
        for (kind, entries) in [("table", &self.tables), ("api", &self.apis)] {
            let mut seen = HashSet::new();
            for entry in entries {
                if entry.name.trim().is_empty() {
                    return Err(ProoflineError::InvalidManifest(format!(
                        "{kind} with empty name"
                    )));
                }
                if !seen.insert(entry.name.as_str()) {
                    return Err(ProoflineError::InvalidManifest(format!(
                        "duplicate {kind} '{}'",
                        entry.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Progress marker persisted with every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCursor {
    /// Last stage that finished with every unit succeeded.
    pub last_completed: Option<Stage>,
    /// Stage the run halted in, if the last run halted.
    pub halted: Option<Stage>,
}

impl StageCursor {
    /// Stage a resumed run begins at; `None` when everything is done.
    pub fn resume_stage(&self) -> Option<Stage> {
        if let Some(stage) = self.halted {
            return Some(stage);
        }
        match self.last_completed {
            Some(stage) => stage.next(),
            None => Some(Stage::first()),
        }
    }
}

/// The aggregate root. Owns every unit and is checkpointed wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub tables: Vec<WorkUnit>,
    pub apis: Vec<WorkUnit>,
    #[serde(default)]
    pub cursor: StageCursor,
    pub config: RunConfig,
}

/// Unit and theorem counts logged at run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectBrief {
    pub tables: usize,
    pub apis: usize,
    pub requirements: usize,
    pub theorems: usize,
    pub proofs: usize,
}

impl Project {
    pub fn new(name: impl Into<String>, config: RunConfig) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
            apis: Vec::new(),
            cursor: StageCursor::default(),
            config,
        }
    }

    pub fn from_manifest(manifest: &ProjectManifest, config: RunConfig) -> Result<Self> {
        manifest.validate()?;
        let mut project = Self::new(manifest.name.clone(), config);
        project.tables = manifest
            .tables
            .iter()
            .map(|e| WorkUnit::new(UnitKind::Table, &e.name, &e.description))
            .collect();
        project.apis = manifest
            .apis
            .iter()
            .map(|e| WorkUnit::new(UnitKind::Api, &e.name, &e.description))
            .collect();
        Ok(project)
    }

    pub fn units(&self, kind: UnitKind) -> &[WorkUnit] {
        match kind {
            UnitKind::Table => &self.tables,
            UnitKind::Api => &self.apis,
        }
    }

    fn units_mut(&mut self, kind: UnitKind) -> &mut Vec<WorkUnit> {
        match kind {
            UnitKind::Table => &mut self.tables,
            UnitKind::Api => &mut self.apis,
        }
    }

    pub fn all_units(&self) -> impl Iterator<Item = &WorkUnit> {
        self.tables.iter().chain(self.apis.iter())
    }

    pub fn unit(&self, unit: &UnitRef) -> Option<&WorkUnit> {
        self.units(unit.kind).iter().find(|u| u.name == unit.name)
    }

    pub fn unit_mut(&mut self, unit: &UnitRef) -> Option<&mut WorkUnit> {
        self.units_mut(unit.kind)
            .iter_mut()
            .find(|u| u.name == unit.name)
    }

    /// Commit a unit's working copy back into the aggregate.
    pub fn replace_unit(&mut self, unit: WorkUnit) -> Result<()> {
        let target = unit.unit_ref();
        let slot = self
            .unit_mut(&target)
            .ok_or_else(|| ProoflineError::UnknownUnit(target.to_string()))?;
        *slot = unit;
        Ok(())
    }

    pub fn brief(&self) -> ProjectBrief {
        ProjectBrief {
            tables: self.tables.len(),
            apis: self.apis.len(),
            requirements: self.all_units().map(|u| u.requirements.len()).sum(),
            theorems: self
                .all_units()
                .map(|u| u.theorems(Polarity::Positive).count())
                .sum(),
            proofs: self.all_units().map(|u| u.proofs().count()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ProjectManifest {
        ProjectManifest::from_json_str(
            r#"{
                "name": "Shop",
                "tables": [{"name": "users", "description": "id, email"}, {"name": "orders"}],
                "apis": [{"name": "CreateUser", "description": "POST /users"}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn from_manifest_builds_pending_units() {
        let project = Project::from_manifest(&manifest(), RunConfig::default()).unwrap();
        assert_eq!(project.tables.len(), 2);
        assert_eq!(project.apis.len(), 1);
        assert_eq!(project.tables[0].description, "id, email");
        assert_eq!(
            project.unit(&UnitRef::api("CreateUser")).unwrap().kind,
            UnitKind::Api
        );
        assert_eq!(project.cursor, StageCursor::default());
    }

    #[test]
    fn duplicate_unit_names_rejected() {
        let err = ProjectManifest::from_json_str(
            r#"{"name": "Shop", "tables": [{"name": "users"}, {"name": "users"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate table"));
    }

    #[test]
    fn replace_unknown_unit_fails() {
        let mut project = Project::from_manifest(&manifest(), RunConfig::default()).unwrap();
        let stranger = WorkUnit::new(UnitKind::Table, "ghosts", "");
        assert!(project.replace_unit(stranger).is_err());
    }

    #[test]
    fn cursor_resume_stage() {
        let mut cursor = StageCursor::default();
        assert_eq!(cursor.resume_stage(), Some(Stage::TableDependency));

        cursor.last_completed = Some(Stage::ApiDependency);
        assert_eq!(cursor.resume_stage(), Some(Stage::ApiFormalization));

        cursor.halted = Some(Stage::ApiFormalization);
        assert_eq!(cursor.resume_stage(), Some(Stage::ApiFormalization));

        let done = StageCursor {
            last_completed: Some(Stage::Proofs),
            halted: None,
        };
        assert_eq!(done.resume_stage(), None);
    }
}
