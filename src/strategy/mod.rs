// Strategy seam: everything the engine needs to know about a candidate
// domain lives behind this trait. The driver itself stays domain-agnostic.

pub mod sql;

pub use sql::SqlStrategy;

use crate::action::{Action, ActionOutcome};
use crate::candidate::Candidate;
use crate::objective::Objective;
use crate::reward::{ConstraintProgress, ExecutionMetrics, SemanticReport};
use crate::state::FeatureMap;

/// Iteration from which `Reset` joins the applicable set. Earlier resets
/// produce trivial oscillation between regeneration and first fixes.
pub const RESET_MIN_ITERATION: usize = 3;

/// Domain knowledge plugged into the optimization loop.
///
/// Implementations must keep `apply_action` pure and total: no panics on
/// malformed candidates, and when the structural anchor an action needs is
/// absent the candidate comes back unchanged.
pub trait OptimizationStrategy: Send + Sync {
    /// Actions legal for this candidate right now, in enumeration order.
    /// `UseGenerator` must always be included.
    fn applicable_actions(
        &self,
        candidate: &Candidate,
        objective: &Objective,
        iteration: usize,
    ) -> Vec<Action>;

    /// Apply one transformation, or signal that the external generator is
    /// needed instead.
    fn apply_action(
        &self,
        candidate: &Candidate,
        action: Action,
        objective: &Objective,
    ) -> ActionOutcome;

    /// Domain features contributed to state extraction
    fn state_features(&self, candidate: &Candidate, objective: &Objective) -> FeatureMap;

    /// Sub-constraint satisfaction used for partial credit while the
    /// evaluator still fails the candidate
    fn constraint_progress(&self, candidate: &Candidate, objective: &Objective)
        -> ConstraintProgress;

    /// Raw quality heuristics; the reward calculator clamps the result
    fn quality_score(
        &self,
        candidate: &Candidate,
        objective: &Objective,
        metrics: Option<&ExecutionMetrics>,
    ) -> f64;

    /// Heuristic check that candidate structure matches the stated intent,
    /// independent of hard constraint checking
    fn validate_semantics(
        &self,
        candidate: &Candidate,
        objective: &Objective,
        analysis: &FeatureMap,
    ) -> SemanticReport;

    /// Deterministic, always-valid candidate built from the objective alone.
    /// Used when the external generator fails.
    fn fallback_candidate(&self, objective: &Objective) -> Candidate;
}
