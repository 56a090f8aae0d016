// State representation for the learning loop.
// A state is derived from a (candidate, objective) pair, never stored on its
// own; it exists to produce a stable StateKey for Q-table lookups.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::candidate::Candidate;
use crate::objective::Objective;

/// First 16 hex chars of a SHA-256 digest. Stability matters here, not
/// collision resistance against an adversary.
pub(crate) fn digest16(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// A single extracted feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Bool(v) => write!(f, "{}", v),
            FeatureValue::Int(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{:.2}", v),
            FeatureValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Feature map with deterministic iteration order
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// The subset of features that defines a state for Q-table purposes.
/// Everything else (timings, iteration counters, free-form analyzer output)
/// is carried for reward calculation but never enters the key.
pub const STATE_DEFINING_FEATURES: &[&str] = &[
    "empty",
    "size_bucket",
    "required_ratio",
    "has_filter",
    "has_timeframe",
    "has_aggregation",
    "cost_bucket",
];

/// Derived state of one (objective, candidate) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Hash of the objective, so states across objectives never collide
    pub objective_hash: String,
    /// Hash of the candidate content
    pub candidate_hash: String,
    /// All extracted features, state-defining or not
    pub features: FeatureMap,
}

impl State {
    /// Combine objective hash, candidate hash and the state-defining feature
    /// subset into the canonical Q-table key.
    pub fn key(&self) -> String {
        let mut parts = Vec::with_capacity(STATE_DEFINING_FEATURES.len());
        for name in STATE_DEFINING_FEATURES {
            if let Some(value) = self.features.get(*name) {
                parts.push(format!("{}={}", name, value));
            }
        }
        format!(
            "{}:{}:{}",
            self.objective_hash,
            self.candidate_hash,
            parts.join(";")
        )
    }

    /// Shortened key for iteration logs
    pub fn key_prefix(&self) -> String {
        let key = self.key();
        key.chars().take(24).collect()
    }
}

/// Bucket a byte length into a coarse size class (0..=5)
fn size_bucket(len: usize) -> i64 {
    match len {
        0 => 0,
        1..=80 => 1,
        81..=200 => 2,
        201..=400 => 3,
        401..=800 => 4,
        _ => 5,
    }
}

/// Fraction of required fields whose name appears in the candidate text,
/// bucketed to quarters so nearby candidates share a state.
fn required_ratio(candidate: &Candidate, objective: &Objective) -> i64 {
    let required = &objective.constraints.required_fields;
    if required.is_empty() {
        return 4;
    }
    let text = candidate.as_text().to_lowercase();
    let present = required
        .iter()
        .filter(|f| text.contains(&f.to_lowercase()))
        .count();
    ((present as f64 / required.len() as f64) * 4.0).round() as i64
}

/// Derive the state of a candidate under an objective.
///
/// `analysis` carries analyzer and strategy features; they are merged in as-is
/// and may override nothing (universal features win on key collisions). The
/// iteration number is recorded as a feature for inspection but is not
/// state-defining, so keys stay iteration-invariant.
pub fn extract_state(
    candidate: &Candidate,
    objective: &Objective,
    analysis: &FeatureMap,
    iteration: usize,
) -> State {
    let mut features = analysis.clone();

    features.insert("empty".to_string(), FeatureValue::Bool(candidate.is_empty()));
    features.insert(
        "size_bucket".to_string(),
        FeatureValue::Int(size_bucket(candidate.len())),
    );
    features.insert(
        "required_ratio".to_string(),
        FeatureValue::Int(required_ratio(candidate, objective)),
    );
    features.insert("iteration".to_string(), FeatureValue::Int(iteration as i64));

    State {
        objective_hash: objective.content_hash(),
        candidate_hash: candidate.content_hash(),
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::{Constraints, Objective, Scope};

    fn objective_with_required(fields: &[&str]) -> Objective {
        Objective {
            intent: "list orders".to_string(),
            scope: Scope::default(),
            constraints: Constraints {
                required_fields: fields.iter().map(|f| f.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_identical_inputs_identical_key() {
        let objective = objective_with_required(&["id"]);
        let candidate = Candidate::from("SELECT id FROM orders");
        let analysis = FeatureMap::new();

        let a = extract_state(&candidate, &objective, &analysis, 1);
        let b = extract_state(&candidate, &objective, &analysis, 1);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_iteration_does_not_change_key() {
        let objective = objective_with_required(&["id"]);
        let candidate = Candidate::from("SELECT id FROM orders");
        let analysis = FeatureMap::new();

        let a = extract_state(&candidate, &objective, &analysis, 1);
        let b = extract_state(&candidate, &objective, &analysis, 7);
        assert_eq!(a.key(), b.key());
        assert_ne!(
            a.features.get("iteration"),
            b.features.get("iteration"),
            "iteration is still recorded as a non-defining feature"
        );
    }

    #[test]
    fn test_volatile_features_excluded_from_key() {
        let objective = objective_with_required(&["id"]);
        let candidate = Candidate::from("SELECT id FROM orders");

        let mut fast = FeatureMap::new();
        fast.insert("elapsed_ms".to_string(), FeatureValue::Int(12));
        let mut slow = FeatureMap::new();
        slow.insert("elapsed_ms".to_string(), FeatureValue::Int(900));

        let a = extract_state(&candidate, &objective, &fast, 1);
        let b = extract_state(&candidate, &objective, &slow, 1);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_different_objectives_never_collide() {
        let candidate = Candidate::from("SELECT id FROM orders");
        let analysis = FeatureMap::new();

        let a = extract_state(&candidate, &objective_with_required(&["id"]), &analysis, 1);
        let other = Objective::new("count users");
        let b = extract_state(&candidate, &other, &analysis, 1);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_state_defining_features_enter_key() {
        let objective = objective_with_required(&[]);
        let candidate = Candidate::from("SELECT * FROM orders");

        let mut with_filter = FeatureMap::new();
        with_filter.insert("has_filter".to_string(), FeatureValue::Bool(true));
        let mut without_filter = FeatureMap::new();
        without_filter.insert("has_filter".to_string(), FeatureValue::Bool(false));

        let a = extract_state(&candidate, &objective, &with_filter, 1);
        let b = extract_state(&candidate, &objective, &without_filter, 1);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_required_ratio_buckets() {
        let objective = objective_with_required(&["id", "total"]);
        let none = Candidate::from("SELECT name FROM orders");
        let half = Candidate::from("SELECT id FROM orders");
        let all = Candidate::from("SELECT id, total FROM orders");

        assert_eq!(required_ratio(&none, &objective), 0);
        assert_eq!(required_ratio(&half, &objective), 2);
        assert_eq!(required_ratio(&all, &objective), 4);
    }
}
