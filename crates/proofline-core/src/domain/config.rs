//! Immutable run configuration threaded into every component.

use serde::{Deserialize, Serialize};

use crate::domain::error::{ProoflineError, Result};

/// Proof-search budgets. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    /// Inner repair attempts per global proof attempt.
    pub max_theorem_retries: u32,
    /// Outer proof-search rounds per theorem.
    pub max_global_attempts: u32,
    /// Negative companion theorems generated per proved theorem.
    pub max_examples: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_theorem_retries: 5,
            max_global_attempts: 1,
            max_examples: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub random_seed: u64,
    pub max_workers: usize,
    pub budget: RetryBudget,
    /// Repair attempts for table/API formalization and theorem statements.
    pub max_formalization_retries: u32,
    /// Attempts at getting parseable analysis output.
    pub max_analysis_retries: u32,
    /// Already-proved theorems passed to the prover as examples.
    pub proof_example_count: usize,
    pub generator_timeout_secs: u64,
    pub toolchain_timeout_secs: u64,
    /// Retries of transient generator failures inside a single attempt.
    pub generator_retries: u32,
    /// Log prompts and responses at trace level.
    pub log_model_io: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            random_seed: 42,
            max_workers: 4,
            budget: RetryBudget::default(),
            max_formalization_retries: 5,
            max_analysis_retries: 3,
            proof_example_count: 3,
            generator_timeout_secs: 300,
            toolchain_timeout_secs: 300,
            generator_retries: 3,
            log_model_io: false,
        }
    }
}

impl RunConfig {
    /// Reject configurations that would make a loop run zero times.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, u64); 6] = [
            ("max_workers", self.max_workers as u64),
            ("max_theorem_retries", self.budget.max_theorem_retries as u64),
            ("max_global_attempts", self.budget.max_global_attempts as u64),
            ("max_formalization_retries", self.max_formalization_retries as u64),
            ("max_analysis_retries", self.max_analysis_retries as u64),
            ("generator_timeout_secs", self.generator_timeout_secs),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ProoflineError::InvalidConfig(format!(
                    "{field} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = RunConfig {
            max_workers: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn zero_global_attempts_rejected() {
        let cfg = RunConfig {
            budget: RetryBudget {
                max_global_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: RunConfig = serde_json::from_str(r#"{"max_workers": 8}"#).unwrap();
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.random_seed, 42);
    }
}
