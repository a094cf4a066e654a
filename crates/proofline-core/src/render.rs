//! Renderer: artifact -> on-disk target-language file.

use std::path::{Path, PathBuf};

use crate::domain::artifact::{Artifact, ArtifactKind};
use crate::domain::project::Project;
use crate::domain::unit::{UnitKind, WorkUnit};

/// A file ready for materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Relative to the project tree root.
    pub path: PathBuf,
    pub content: String,
}

pub trait Renderer: Send + Sync {
    /// Render `artifact` of `unit`. `project` supplies dependency artifacts;
    /// `unit` is the caller's working copy and takes precedence over it.
    fn render(&self, project: &Project, unit: &WorkUnit, artifact: &Artifact) -> RenderedFile;
}

/// Lean 4 layout:
///
/// - `<Project>/Structures/<Table>.lean`
/// - `<Project>/Functions/<Api>.lean`
/// - `<Project>/Theorems/<Unit>/<Artifact>.lean`
///
/// Each file imports the succeeded formalizations it builds on.
#[derive(Debug, Clone, Default)]
pub struct LeanRenderer;

impl LeanRenderer {
    pub fn artifact_path(project: &str, unit: &WorkUnit, artifact: &Artifact) -> PathBuf {
        let dir = Path::new(project).join(artifact.kind.directory());
        match artifact.kind {
            ArtifactKind::Theorem { .. } => dir
                .join(&unit.name)
                .join(format!("{}.lean", artifact.name)),
            _ => dir.join(format!("{}.lean", artifact.name)),
        }
    }

    /// `Shop/Structures/users.lean` -> `Shop.Structures.users`
    pub fn module_name(path: &Path) -> String {
        path.with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(".")
    }

    fn formalization_of(unit: &WorkUnit) -> Option<&Artifact> {
        let kind = match unit.kind {
            UnitKind::Table => ArtifactKind::Structure,
            UnitKind::Api => ArtifactKind::Function,
        };
        unit.artifacts
            .iter()
            .find(|a| a.kind == kind && a.is_succeeded())
    }

    fn imports(project: &Project, unit: &WorkUnit, artifact: &Artifact) -> Vec<String> {
        let mut imports = Vec::new();
        match artifact.kind {
            ArtifactKind::Structure | ArtifactKind::Function => {
                for dep in &unit.dependencies {
                    let Some(dep_unit) = project.unit(dep) else {
                        continue;
                    };
                    if let Some(dep_artifact) = Self::formalization_of(dep_unit) {
                        let path = Self::artifact_path(&project.name, dep_unit, dep_artifact);
                        imports.push(Self::module_name(&path));
                    }
                }
            }
            ArtifactKind::Theorem { .. } => {
                if let Some(own) = Self::formalization_of(unit) {
                    let path = Self::artifact_path(&project.name, unit, own);
                    imports.push(Self::module_name(&path));
                }
            }
        }
        imports.sort();
        imports.dedup();
        imports
    }
}

impl Renderer for LeanRenderer {
    fn render(&self, project: &Project, unit: &WorkUnit, artifact: &Artifact) -> RenderedFile {
        let path = Self::artifact_path(&project.name, unit, artifact);
        let mut content = String::new();
        for module in Self::imports(project, unit, artifact) {
            content.push_str("import ");
            content.push_str(&module);
            content.push('\n');
        }
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(artifact.source.trim_end());
        content.push('\n');
        RenderedFile { path, content }
    }
}
