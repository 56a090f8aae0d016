// Transformations the policy can choose between.
// The set is closed and versioned: snapshots record the version they were
// written under so stale tables are discarded instead of misread.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::candidate::Candidate;

/// Version of the action vocabulary. Bump when variants are added, removed
/// or renamed; persisted snapshots from other versions are ignored on load.
pub const ACTION_SPACE_VERSION: u32 = 1;

/// One transformation applicable to a candidate. Parameters (which field,
/// which filter value) are derived from the objective at application time,
/// which keeps Q-table keys closed and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Add a missing required field to the candidate
    AddField,
    /// Remove a forbidden field from the candidate
    RemoveField,
    /// Add a filter from the objective scope
    AddFilter,
    /// Add the objective's timeframe restriction
    AddTimeframe,
    /// Introduce an aggregation over the required fields
    AddAggregation,
    /// Strip aggregation back to plain selection
    RemoveAggregation,
    /// Rewrite an entity reference to its mapped field
    FixEntityMapping,
    /// Ask the external generator for a guided rewrite
    UseGenerator,
    /// Discard the candidate and regenerate from scratch
    Reset,
    /// Keep the candidate as-is
    NoOp,
}

impl Action {
    /// Every action, in enumeration order. Selection ties break on this order.
    pub const ALL: &'static [Action] = &[
        Action::AddField,
        Action::RemoveField,
        Action::AddFilter,
        Action::AddTimeframe,
        Action::AddAggregation,
        Action::RemoveAggregation,
        Action::FixEntityMapping,
        Action::UseGenerator,
        Action::Reset,
        Action::NoOp,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Action::AddField => "add_field",
            Action::RemoveField => "remove_field",
            Action::AddFilter => "add_filter",
            Action::AddTimeframe => "add_timeframe",
            Action::AddAggregation => "add_aggregation",
            Action::RemoveAggregation => "remove_aggregation",
            Action::FixEntityMapping => "fix_entity_mapping",
            Action::UseGenerator => "use_generator",
            Action::Reset => "reset",
            Action::NoOp => "no_op",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Result of applying an action to a candidate.
///
/// Transformations are pure; the ones that need new content (`UseGenerator`,
/// `Reset`, content expansion on a candidate with no usable structure) return
/// `RequiresGeneration` so the driver invokes the external generator instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Transformed(Candidate),
    RequiresGeneration {
        /// When true the generator starts over without the previous candidate
        fresh: bool,
    },
}

impl ActionOutcome {
    /// Shorthand for "structural anchor absent, candidate returned unchanged"
    pub fn unchanged(candidate: &Candidate) -> Self {
        ActionOutcome::Transformed(candidate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_every_variant_once() {
        let mut seen = std::collections::HashSet::new();
        for action in Action::ALL {
            assert!(seen.insert(*action), "{} listed twice", action);
        }
        assert_eq!(Action::ALL.len(), 10);
    }

    #[test]
    fn test_serializes_as_stable_name() {
        let json = serde_json::to_string(&Action::UseGenerator).unwrap();
        assert_eq!(json, "\"UseGenerator\"");
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Action::UseGenerator);
    }

    #[test]
    fn test_usable_as_json_map_key() {
        let mut map = std::collections::HashMap::new();
        map.insert(Action::AddFilter, 1.5f64);
        let json = serde_json::to_string(&map).unwrap();
        let back: std::collections::HashMap<Action, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&Action::AddFilter), Some(&1.5));
    }
}
