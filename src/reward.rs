// Reward calculation: hard-constraint scoring, soft quality heuristics and
// semantic penalties, combined into one bounded breakdown per iteration.

use serde::{Deserialize, Serialize};

/// Constraint score awarded when the evaluator reports a full pass
pub const CONSTRAINT_FULL_PASS: f64 = 100.0;

/// Ceiling for partial credit. Kept below the full-pass value so a partially
/// correct candidate can never be mistaken for a converged one.
pub const PARTIAL_CREDIT_CAP: f64 = 90.0;

/// Symmetric bound on the quality score
pub const QUALITY_BOUND: f64 = 30.0;

/// Flat penalty subtracted from the total per semantic issue
pub const SEMANTIC_ISSUE_PENALTY: f64 = 15.0;

/// Structured feedback from the evaluator on a failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Stable machine-readable code, e.g. `MISSING_FILTER_FIELD`
    pub code: String,
    pub message: String,
    /// Suggested remedy, forwarded to the generator on regeneration
    #[serde(default)]
    pub fix: Option<String>,
}

/// Outcome of the external constraint check. A failed evaluation is ordinary
/// data that feeds the loop, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub passed: bool,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    /// Measurements from executing the candidate, when the evaluator ran it
    #[serde(default)]
    pub metrics: Option<ExecutionMetrics>,
}

impl Evaluation {
    pub fn pass() -> Self {
        Self {
            passed: true,
            feedback: None,
            metrics: None,
        }
    }

    pub fn fail(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: Some(Feedback {
                code: code.into(),
                message: message.into(),
                fix: None,
            }),
            metrics: None,
        }
    }
}

/// Optional measurements from actually executing the candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub elapsed_ms: u64,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub expected_rows: Option<u64>,
}

/// Independently checkable sub-constraints, reported by the strategy, that
/// earn partial credit while the evaluator still fails the candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstraintProgress {
    /// Timeframe / date filtering present where the objective asks for one
    pub timeframe_satisfied: bool,
    /// Entity references resolve to their mapped fields
    pub entities_mapped: bool,
    /// Fraction of required fields present, in [0, 1]
    pub required_ratio: f64,
}

/// One intent/structure mismatch found by semantic validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticIssue {
    /// Stable machine-readable code, e.g. `UNWANTED_AGGREGATION`
    pub code: String,
    pub message: String,
}

impl SemanticIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result of semantic validation, independent of hard constraint checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticReport {
    pub matches: bool,
    pub issues: Vec<SemanticIssue>,
}

impl SemanticReport {
    pub fn ok() -> Self {
        Self {
            matches: true,
            issues: Vec::new(),
        }
    }

    pub fn with_issues(issues: Vec<SemanticIssue>) -> Self {
        Self {
            matches: issues.is_empty(),
            issues,
        }
    }
}

/// Reward breakdown for one iteration.
/// `total = constraint_score + quality_score + semantic_penalty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    /// Hard-constraint score in [0, 100]
    pub constraint_score: f64,
    /// Heuristic quality score in [-30, 30]
    pub quality_score: f64,
    /// Non-positive, −15 per semantic issue
    pub semantic_penalty: f64,
    pub total: f64,
}

/// Score the hard constraints: full marks on a pass, otherwise weighted
/// partial credit for the independently satisfied sub-constraints.
pub fn constraint_score(evaluation: &Evaluation, progress: &ConstraintProgress) -> f64 {
    if evaluation.passed {
        return CONSTRAINT_FULL_PASS;
    }

    let mut score = 0.0;
    if progress.timeframe_satisfied {
        score += 25.0;
    }
    if progress.entities_mapped {
        score += 25.0;
    }
    score += progress.required_ratio.clamp(0.0, 1.0) * 40.0;

    score.min(PARTIAL_CREDIT_CAP)
}

/// Bonus for execution measurements when the candidate was actually run:
/// fast turnaround, a non-empty result, and a result size matching the
/// expected one each earn a small bump.
pub fn execution_bonus(metrics: &ExecutionMetrics) -> f64 {
    let mut bonus = 0.0;
    if metrics.elapsed_ms < 500 {
        bonus += 5.0;
    }
    if matches!(metrics.row_count, Some(n) if n > 0) {
        bonus += 5.0;
    }
    if let (Some(rows), Some(expected)) = (metrics.row_count, metrics.expected_rows) {
        if rows == expected {
            bonus += 5.0;
        }
    }
    bonus
}

/// Combine the channels into the iteration's reward. The raw quality score is
/// clamped to its documented range before entering the total.
pub fn calculate_reward(
    evaluation: &Evaluation,
    progress: &ConstraintProgress,
    raw_quality: f64,
    semantics: &SemanticReport,
) -> Reward {
    let constraint = constraint_score(evaluation, progress);
    let quality = raw_quality.clamp(-QUALITY_BOUND, QUALITY_BOUND);
    let semantic_penalty = -(semantics.issues.len() as f64) * SEMANTIC_ISSUE_PENALTY;

    Reward {
        constraint_score: constraint,
        quality_score: quality,
        semantic_penalty,
        total: constraint + quality + semantic_penalty,
    }
}

/// The convergence predicate: constraints pass, semantics match, and the
/// total reward reaches the threshold.
pub fn is_converged(
    evaluation: &Evaluation,
    semantics: &SemanticReport,
    reward: &Reward,
    threshold: f64,
) -> bool {
    evaluation.passed && semantics.matches && reward.total >= threshold
}
