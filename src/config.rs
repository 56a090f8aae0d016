// Hyperparameters for the learning loop.
// Loaded once per process; only epsilon changes afterwards, via decay.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QloopError, QloopResult};

fn default_alpha() -> f64 {
    0.1
}
fn default_gamma() -> f64 {
    0.9
}
fn default_epsilon() -> f64 {
    0.2
}
fn default_epsilon_decay() -> f64 {
    0.995
}
fn default_epsilon_min() -> f64 {
    0.05
}
fn default_max_qtable_size() -> usize {
    1000
}
fn default_max_experiences() -> usize {
    1000
}
fn default_max_iterations() -> usize {
    10
}
fn default_convergence_threshold() -> f64 {
    100.0
}

/// Tunable parameters of the Q-learning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Learning rate (α) - how quickly new information overrides old
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Discount factor (γ) - importance of future rewards
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Exploration rate (ε) - probability of taking a random action
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Multiplicative decay applied to ε once per completed session
    #[serde(default = "default_epsilon_decay")]
    pub epsilon_decay: f64,
    /// Floor below which ε never decays
    #[serde(default = "default_epsilon_min")]
    pub epsilon_min: f64,
    /// Maximum number of state entries kept in the Q-table
    #[serde(default = "default_max_qtable_size")]
    pub max_qtable_size: usize,
    /// Maximum number of experiences kept in the replay buffer
    #[serde(default = "default_max_experiences")]
    pub max_experiences: usize,
    /// Iteration budget per optimization session
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Minimum total reward (with constraint pass and semantic match) to stop
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            gamma: default_gamma(),
            epsilon: default_epsilon(),
            epsilon_decay: default_epsilon_decay(),
            epsilon_min: default_epsilon_min(),
            max_qtable_size: default_max_qtable_size(),
            max_experiences: default_max_experiences(),
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
        }
    }
}

impl Hyperparameters {
    /// Load hyperparameters from a JSON file, filling absent fields with defaults
    pub fn from_file(path: impl AsRef<Path>) -> QloopResult<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| QloopError::io_error(e, Some(path)))?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    /// Check that every parameter is inside its legal range
    pub fn validate(&self) -> QloopResult<()> {
        if !(0.0..=1.0).contains(&self.alpha) || self.alpha == 0.0 {
            return Err(QloopError::invalid_hyperparameter(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(QloopError::invalid_hyperparameter(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(QloopError::invalid_hyperparameter(format!(
                "epsilon must be in [0, 1], got {}",
                self.epsilon
            )));
        }
        if !(0.0..=1.0).contains(&self.epsilon_decay) || self.epsilon_decay == 0.0 {
            return Err(QloopError::invalid_hyperparameter(format!(
                "epsilon_decay must be in (0, 1], got {}",
                self.epsilon_decay
            )));
        }
        if self.epsilon_min > self.epsilon {
            return Err(QloopError::invalid_hyperparameter(format!(
                "epsilon_min ({}) exceeds epsilon ({})",
                self.epsilon_min, self.epsilon
            )));
        }
        if self.max_qtable_size == 0 || self.max_experiences == 0 || self.max_iterations == 0 {
            return Err(QloopError::invalid_hyperparameter(
                "max_qtable_size, max_experiences and max_iterations must be positive",
            ));
        }
        Ok(())
    }

    /// Decay the exploration rate: ε = max(ε_min, ε * decay).
    /// Called once per completed optimization session, not per iteration.
    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = Hyperparameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.alpha, 0.1);
        assert_eq!(params.gamma, 0.9);
        assert_eq!(params.epsilon, 0.2);
    }

    #[test]
    fn test_epsilon_decay_closed_form() {
        let mut params = Hyperparameters {
            epsilon: 0.5,
            epsilon_decay: 0.9,
            epsilon_min: 0.01,
            ..Default::default()
        };

        let n = 5;
        for _ in 0..n {
            params.decay_epsilon();
        }

        let expected = (0.5f64 * 0.9f64.powi(n)).max(0.01);
        assert!((params.epsilon - expected).abs() < 1e-12);
    }

    #[test]
    fn test_epsilon_decay_respects_floor() {
        let mut params = Hyperparameters {
            epsilon: 0.06,
            epsilon_decay: 0.5,
            epsilon_min: 0.05,
            ..Default::default()
        };

        for _ in 0..10 {
            params.decay_epsilon();
        }
        assert_eq!(params.epsilon, 0.05);
    }

    #[test]
    fn test_rejects_out_of_range_alpha() {
        let params = Hyperparameters {
            alpha: 1.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let params: Hyperparameters = serde_json::from_str(r#"{"epsilon": 0.3}"#).unwrap();
        assert_eq!(params.epsilon, 0.3);
        assert_eq!(params.alpha, 0.1);
        assert_eq!(params.max_iterations, 10);
    }
}
