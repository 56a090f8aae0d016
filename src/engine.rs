// The optimization loop driver: the only entry point external callers use.
// One session walks INIT -> ITERATING -> CONVERGED | EXHAUSTED, learning as
// it goes through the shared Q-table and experience buffer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionOutcome};
use crate::candidate::Candidate;
use crate::config::Hyperparameters;
use crate::error::QloopResult;
use crate::experience::{Experience, ExperienceBuffer};
use crate::objective::Objective;
use crate::persistence::FileStore;
use crate::policy::QTable;
use crate::reward::{
    calculate_reward, is_converged, Evaluation, Feedback, Reward, SemanticIssue,
};
use crate::state::{extract_state, FeatureMap};
use crate::strategy::OptimizationStrategy;

/// Produces candidates. Effectful and asynchronous; typically a call into an
/// external generative service. Failures never surface to the caller - the
/// driver falls back to the strategy's deterministic builder.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        objective: &Objective,
        context: &serde_json::Value,
        previous: Option<&Candidate>,
        feedback: Option<&Feedback>,
    ) -> QloopResult<Candidate>;
}

/// Checks a candidate against hard constraints. Must never fail: a candidate
/// that does not satisfy the objective is a `passed: false` evaluation.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        candidate: &Candidate,
        analysis: &FeatureMap,
        objective: &Objective,
    ) -> Evaluation;
}

/// Extracts features from a candidate. Must never fail: if analysis is
/// unavailable the feature map is simply empty.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, candidate: &Candidate) -> FeatureMap;
}

/// Analyzer that contributes no features
#[derive(Debug, Clone, Default)]
pub struct NoopAnalyzer;

impl Analyzer for NoopAnalyzer {
    fn analyze(&self, _candidate: &Candidate) -> FeatureMap {
        FeatureMap::new()
    }
}

/// Process-wide learning state: the Q-table, the experience buffer and the
/// hyperparameters they were trained under.
#[derive(Debug)]
pub struct Learner {
    pub qtable: QTable,
    pub experiences: ExperienceBuffer,
    pub hyperparams: Hyperparameters,
}

impl Learner {
    pub fn new(hyperparams: Hyperparameters) -> Self {
        Self {
            qtable: QTable::new(hyperparams.max_qtable_size),
            experiences: ExperienceBuffer::new(hyperparams.max_experiences),
            hyperparams,
        }
    }
}

/// Learner shared across concurrent sessions, lock-guarded so interleaved
/// reads and writes stay consistent at the operation level.
pub type SharedLearner = Arc<Mutex<Learner>>;

/// One optimization request
pub struct SessionRequest {
    pub objective: Objective,
    /// Opaque context forwarded to the generator (schema hints, user info)
    pub context: serde_json::Value,
    /// Overrides the configured iteration budget for this session
    pub max_iterations: Option<usize>,
    /// Session-local strategy override
    pub strategy: Option<Arc<dyn OptimizationStrategy>>,
}

impl SessionRequest {
    pub fn new(objective: Objective) -> Self {
        Self {
            objective,
            context: serde_json::Value::Null,
            max_iterations: None,
            strategy: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn OptimizationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Trace of one loop iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub action: Action,
    pub state_key_prefix: String,
    pub evaluation: Evaluation,
    pub semantics_match: bool,
    pub semantic_issues: Vec<SemanticIssue>,
    pub reward: Reward,
    pub converged: bool,
}

/// Result of one optimization session. Non-convergence is a normal outcome,
/// reported through `converged`, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub candidate: Candidate,
    pub iterations: usize,
    pub final_reward: f64,
    pub converged: bool,
    pub iteration_log: Vec<IterationRecord>,
}

/// The optimization engine. Owns the shared learner, the default strategy
/// and, optionally, the snapshot store.
pub struct Engine {
    learner: SharedLearner,
    strategy: Arc<dyn OptimizationStrategy>,
    store: Option<FileStore>,
}

impl Engine {
    /// In-memory engine: learning state lives and dies with the process
    pub fn new(strategy: Arc<dyn OptimizationStrategy>, hyperparams: Hyperparameters) -> Self {
        Self {
            learner: Arc::new(Mutex::new(Learner::new(hyperparams))),
            strategy,
            store: None,
        }
    }

    /// Engine backed by a snapshot store. Previously persisted learning state
    /// is loaded now; load failures are logged and start the engine cold.
    pub fn with_store(
        strategy: Arc<dyn OptimizationStrategy>,
        mut hyperparams: Hyperparameters,
        store: FileStore,
    ) -> Self {
        let mut learner = Learner::new(hyperparams.clone());

        match store.load_qtable(hyperparams.max_qtable_size) {
            Ok(Some((qtable, saved))) => {
                info!(states = qtable.len(), "loaded persisted Q-table");
                // Epsilon is the only hyperparameter the loop mutates; resume
                // its decayed value so exploration keeps narrowing across
                // process restarts.
                hyperparams.epsilon = saved.epsilon.clamp(hyperparams.epsilon_min, 1.0);
                learner.qtable = qtable;
                learner.hyperparams = hyperparams.clone();
            }
            Ok(None) => debug!("no usable Q-table snapshot, starting cold"),
            Err(e) => warn!(error = %e, "failed to load Q-table snapshot"),
        }

        match store.load_experiences(hyperparams.max_experiences) {
            Ok(Some(buffer)) => {
                info!(entries = buffer.len(), "loaded persisted experiences");
                learner.experiences = buffer;
            }
            Ok(None) => debug!("no usable experience snapshot, starting cold"),
            Err(e) => warn!(error = %e, "failed to load experience snapshot"),
        }

        Self {
            learner: Arc::new(Mutex::new(learner)),
            strategy,
            store: Some(store),
        }
    }

    /// Handle to the shared learning state
    pub fn learner(&self) -> SharedLearner {
        Arc::clone(&self.learner)
    }

    fn lock(&self) -> MutexGuard<'_, Learner> {
        self.learner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replay a random batch of stored experiences through the Bellman rule.
    /// Offline training helper; sessions do not call this.
    pub fn replay(&self, batch_size: usize) {
        let mut learner = self.lock();
        let batch = learner.experiences.sample_batch(batch_size);
        let (alpha, gamma) = (learner.hyperparams.alpha, learner.hyperparams.gamma);
        learner.qtable.replay(&batch, alpha, gamma);
    }

    /// Write both snapshots. Persistence failures are logged and swallowed;
    /// they never affect the session result.
    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let learner = self.lock();
        if let Err(e) = store.save_qtable(&learner.qtable, &learner.hyperparams) {
            warn!(error = %e, "failed to persist Q-table snapshot");
        }
        if let Err(e) = store.save_experiences(&learner.experiences) {
            warn!(error = %e, "failed to persist experience snapshot");
        }
    }

    /// Run one optimization session to convergence or exhaustion.
    ///
    /// The working candidate always advances to the newly produced one, so
    /// recorded transitions describe the path actually taken; the best-reward
    /// candidate is tracked separately and is what a non-converged session
    /// returns.
    pub async fn run_session(
        &self,
        request: SessionRequest,
        generator: &dyn Generator,
        evaluator: &dyn Evaluator,
        analyzer: &dyn Analyzer,
    ) -> QloopResult<SessionOutcome> {
        // INIT: fail fast on a malformed objective, before any iteration.
        request.objective.validate()?;
        let objective = &request.objective;
        let objective_hash = objective.content_hash();

        let strategy = request
            .strategy
            .as_ref()
            .unwrap_or(&self.strategy)
            .clone();

        let (epsilon, alpha, gamma, default_budget, default_threshold) = {
            let learner = self.lock();
            let hp = &learner.hyperparams;
            (
                hp.epsilon,
                hp.alpha,
                hp.gamma,
                hp.max_iterations,
                hp.convergence_threshold,
            )
        };
        let max_iterations = request
            .max_iterations
            .or(objective.constraints.max_iterations)
            .unwrap_or(default_budget)
            .max(1);
        let threshold = objective
            .constraints
            .convergence_threshold
            .unwrap_or(default_threshold);

        info!(
            objective = %objective_hash,
            max_iterations,
            threshold,
            "optimization session started"
        );

        let mut candidate = match generator
            .generate(objective, &request.context, None, None)
            .await
        {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(error = %e, "initial generation failed, using fallback candidate");
                strategy.fallback_candidate(objective)
            }
        };

        let mut best: Option<(Candidate, f64)> = None;
        let mut last_feedback: Option<Feedback> = None;
        let mut iteration_log = Vec::new();
        let mut converged = false;
        let mut last_reward = 0.0;
        let mut iterations_run = 0;

        for iteration in 1..=max_iterations {
            iterations_run = iteration;

            let mut features = analyzer.analyze(&candidate);
            features.extend(strategy.state_features(&candidate, objective));
            let state = extract_state(&candidate, objective, &features, iteration);
            let state_key = state.key();

            let applicable = strategy.applicable_actions(&candidate, objective, iteration);
            let action = {
                let learner = self.lock();
                learner
                    .qtable
                    .select_action(&state_key, &applicable, epsilon)
            }
            .unwrap_or(Action::UseGenerator);

            let next_candidate = match strategy.apply_action(&candidate, action, objective) {
                ActionOutcome::Transformed(next) => next,
                ActionOutcome::RequiresGeneration { fresh } => {
                    let previous = if fresh { None } else { Some(&candidate) };
                    match generator
                        .generate(objective, &request.context, previous, last_feedback.as_ref())
                        .await
                    {
                        Ok(next) => next,
                        Err(e) => {
                            warn!(
                                iteration,
                                error = %e,
                                "generation failed, using fallback candidate"
                            );
                            strategy.fallback_candidate(objective)
                        }
                    }
                }
            };

            let mut next_features = analyzer.analyze(&next_candidate);
            next_features.extend(strategy.state_features(&next_candidate, objective));

            let evaluation = evaluator.evaluate(&next_candidate, &next_features, objective);
            let semantics = strategy.validate_semantics(&next_candidate, objective, &next_features);
            let progress = strategy.constraint_progress(&next_candidate, objective);
            let quality =
                strategy.quality_score(&next_candidate, objective, evaluation.metrics.as_ref());
            let reward = calculate_reward(&evaluation, &progress, quality, &semantics);

            let next_state = extract_state(&next_candidate, objective, &next_features, iteration + 1);
            let next_state_key = next_state.key();

            let iteration_converged = is_converged(&evaluation, &semantics, &reward, threshold);

            {
                let mut learner = self.lock();
                learner.qtable.update(
                    &state_key,
                    action,
                    reward.total,
                    &next_state_key,
                    &applicable,
                    alpha,
                    gamma,
                );
                learner.experiences.add(Experience::new(
                    state_key,
                    action,
                    reward.total,
                    next_state_key,
                    iteration_converged,
                    objective_hash.clone(),
                ));
            }

            debug!(
                iteration,
                action = %action,
                total = reward.total,
                passed = evaluation.passed,
                "iteration complete"
            );

            iteration_log.push(IterationRecord {
                iteration,
                action,
                state_key_prefix: state.key_prefix(),
                evaluation: evaluation.clone(),
                semantics_match: semantics.matches,
                semantic_issues: semantics.issues.clone(),
                reward,
                converged: iteration_converged,
            });

            if best
                .as_ref()
                .map(|(_, best_reward)| reward.total > *best_reward)
                .unwrap_or(true)
            {
                best = Some((next_candidate.clone(), reward.total));
            }

            last_reward = reward.total;
            last_feedback = evaluation.feedback.clone();
            candidate = next_candidate;

            if iteration_converged {
                converged = true;
                break;
            }
        }

        {
            let mut learner = self.lock();
            learner.hyperparams.decay_epsilon();
        }
        self.persist();

        // A converged session returns the converging candidate; an exhausted
        // one returns the best-reward candidate seen.
        let (final_candidate, final_reward) = if converged {
            (candidate, last_reward)
        } else {
            best.unwrap_or((candidate, last_reward))
        };

        info!(
            objective = %objective_hash,
            iterations = iterations_run,
            converged,
            final_reward,
            "optimization session finished"
        );

        Ok(SessionOutcome {
            candidate: final_candidate,
            iterations: iterations_run,
            final_reward,
            converged,
            iteration_log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QloopError;
    use crate::objective::{Constraints, Filter, Scope};
    use crate::strategy::SqlStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGenerator {
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            _objective: &Objective,
            _context: &serde_json::Value,
            _previous: Option<&Candidate>,
            feedback: Option<&Feedback>,
        ) -> QloopResult<Candidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if feedback.is_some() {
                Ok(Candidate::from(
                    "SELECT total_amount FROM sales WHERE product = 'Coffee'",
                ))
            } else {
                Ok(Candidate::from("SELECT total_amount FROM sales"))
            }
        }
    }

    struct FilterEvaluator;

    impl Evaluator for FilterEvaluator {
        fn evaluate(
            &self,
            candidate: &Candidate,
            _analysis: &FeatureMap,
            _objective: &Objective,
        ) -> Evaluation {
            if candidate.as_text().to_lowercase().contains("coffee") {
                Evaluation::pass()
            } else {
                Evaluation::fail("MISSING_FILTER_FIELD", "filter on product is missing")
            }
        }
    }

    struct AlwaysPassEvaluator;

    impl Evaluator for AlwaysPassEvaluator {
        fn evaluate(
            &self,
            _candidate: &Candidate,
            _analysis: &FeatureMap,
            _objective: &Objective,
        ) -> Evaluation {
            Evaluation::pass()
        }
    }

    fn coffee_objective() -> Objective {
        Objective {
            intent: "sales figures for Coffee".to_string(),
            scope: Scope {
                filters: vec![Filter {
                    field: "product".to_string(),
                    value: "Coffee".to_string(),
                }],
                timeframe: None,
                entities: vec![],
            },
            constraints: Constraints {
                required_fields: vec!["total_amount".to_string()],
                ..Default::default()
            },
        }
    }

    fn exploit_only_params() -> Hyperparameters {
        Hyperparameters {
            epsilon: 0.0,
            epsilon_min: 0.0,
            ..Default::default()
        }
    }

    fn engine() -> Engine {
        Engine::new(Arc::new(SqlStrategy::new()), exploit_only_params())
    }

    #[tokio::test]
    async fn test_malformed_objective_fails_before_generation() {
        let generator = ScriptedGenerator::new();
        let result = engine()
            .run_session(
                SessionRequest::new(Objective::new("  ")),
                &generator,
                &AlwaysPassEvaluator,
                &NoopAnalyzer,
            )
            .await;

        assert!(matches!(
            result,
            Err(QloopError::MalformedObjective { .. })
        ));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_loop_halts_at_converging_iteration() {
        let generator = ScriptedGenerator::new();
        let outcome = engine()
            .run_session(
                SessionRequest::new(coffee_objective()).with_max_iterations(6),
                &generator,
                &FilterEvaluator,
                &NoopAnalyzer,
            )
            .await
            .unwrap();

        assert!(outcome.converged);
        assert!(outcome.iterations <= 6);
        assert_eq!(outcome.iteration_log.len(), outcome.iterations);
        // The converging record is the last one; nothing ran after it.
        assert!(outcome.iteration_log.last().unwrap().converged);
        assert!(outcome
            .iteration_log
            .iter()
            .rev()
            .skip(1)
            .all(|record| !record.converged));
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_and_continues() {
        struct FailingGenerator;

        #[async_trait]
        impl Generator for FailingGenerator {
            async fn generate(
                &self,
                _objective: &Objective,
                _context: &serde_json::Value,
                _previous: Option<&Candidate>,
                _feedback: Option<&Feedback>,
            ) -> QloopResult<Candidate> {
                Err(QloopError::generator("service unavailable"))
            }
        }

        let outcome = engine()
            .run_session(
                SessionRequest::new(coffee_objective()).with_max_iterations(6),
                &FailingGenerator,
                &FilterEvaluator,
                &NoopAnalyzer,
            )
            .await
            .unwrap();

        // The fallback builder embeds the scope filter, so the session still
        // converges without a single successful generator call.
        assert!(outcome.converged);
        assert!(outcome.candidate.as_text().contains("Coffee"));
    }

    #[tokio::test]
    async fn test_exhaustion_is_not_an_error() {
        struct NeverPassEvaluator;

        impl Evaluator for NeverPassEvaluator {
            fn evaluate(
                &self,
                _candidate: &Candidate,
                _analysis: &FeatureMap,
                _objective: &Objective,
            ) -> Evaluation {
                Evaluation::fail("UNSATISFIABLE", "never good enough")
            }
        }

        let generator = ScriptedGenerator::new();
        let outcome = engine()
            .run_session(
                SessionRequest::new(coffee_objective()).with_max_iterations(3),
                &generator,
                &NeverPassEvaluator,
                &NoopAnalyzer,
            )
            .await
            .unwrap();

        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.iteration_log.len(), 3);
    }

    #[tokio::test]
    async fn test_epsilon_decays_once_per_session() {
        let engine = engine();
        {
            let mut learner = engine.lock();
            learner.hyperparams.epsilon = 0.2;
            learner.hyperparams.epsilon_min = 0.01;
        }

        let generator = ScriptedGenerator::new();
        engine
            .run_session(
                SessionRequest::new(coffee_objective()).with_max_iterations(4),
                &generator,
                &FilterEvaluator,
                &NoopAnalyzer,
            )
            .await
            .unwrap();

        let learner = engine.lock();
        assert!((learner.hyperparams.epsilon - 0.2 * 0.995).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_experiences_are_recorded_per_iteration() {
        let engine = engine();
        let generator = ScriptedGenerator::new();
        let outcome = engine
            .run_session(
                SessionRequest::new(coffee_objective()).with_max_iterations(6),
                &generator,
                &FilterEvaluator,
                &NoopAnalyzer,
            )
            .await
            .unwrap();

        let learner = engine.lock();
        assert_eq!(learner.experiences.len(), outcome.iterations);
        assert_eq!(
            learner
                .experiences
                .by_objective(&coffee_objective().content_hash())
                .len(),
            outcome.iterations
        );
    }
}
