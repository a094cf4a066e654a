//! Pipeline stages in their fixed execution order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ProoflineError;
use crate::domain::unit::UnitKind;

/// A named pipeline stage.
///
/// The derived `Ord` is the execution order: a stage consumes exactly the
/// outputs of the stages that sort before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    TableDependency,
    TableFormalization,
    ApiDependency,
    ApiFormalization,
    ApiRequirements,
    ApiTheorems,
    TableProperties,
    TableTheorems,
    Proofs,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 9] = [
        Stage::TableDependency,
        Stage::TableFormalization,
        Stage::ApiDependency,
        Stage::ApiFormalization,
        Stage::ApiRequirements,
        Stage::ApiTheorems,
        Stage::TableProperties,
        Stage::TableTheorems,
        Stage::Proofs,
    ];

    pub fn first() -> Stage {
        Stage::TableDependency
    }

    pub fn last() -> Stage {
        Stage::Proofs
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Stages in `[start, end]`, in order. Empty when `start > end`.
    pub fn range(start: Stage, end: Stage) -> Vec<Stage> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| *s >= start && *s <= end)
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::TableDependency => "TABLE_DEPENDENCY",
            Stage::TableFormalization => "TABLE_FORMALIZATION",
            Stage::ApiDependency => "API_DEPENDENCY",
            Stage::ApiFormalization => "API_FORMALIZATION",
            Stage::ApiRequirements => "API_REQUIREMENTS",
            Stage::ApiTheorems => "API_THEOREMS",
            Stage::TableProperties => "TABLE_PROPERTIES",
            Stage::TableTheorems => "TABLE_THEOREMS",
            Stage::Proofs => "PROOFS",
        }
    }

    /// Unit kinds this stage operates on.
    pub fn unit_kinds(self) -> &'static [UnitKind] {
        match self {
            Stage::TableDependency
            | Stage::TableFormalization
            | Stage::TableProperties
            | Stage::TableTheorems => &[UnitKind::Table],
            Stage::ApiDependency
            | Stage::ApiFormalization
            | Stage::ApiRequirements
            | Stage::ApiTheorems => &[UnitKind::Api],
            Stage::Proofs => &[UnitKind::Table, UnitKind::Api],
        }
    }

    /// Whether units of this stage run in dependency rank order.
    pub fn is_ranked(self) -> bool {
        matches!(
            self,
            Stage::TableFormalization | Stage::ApiFormalization | Stage::Proofs
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ProoflineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| ProoflineError::UnknownStage(s.to_string()))
    }
}
