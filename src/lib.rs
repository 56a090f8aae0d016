// qloop - a reinforcement-learning feedback loop for refining generated
// artifacts: generate, score, learn which transformation to try next.

pub mod action;
pub mod candidate;
pub mod config;
pub mod engine;
pub mod error;
pub mod experience;
pub mod objective;
pub mod persistence;
pub mod policy;
pub mod reward;
pub mod state;
pub mod strategy;

// Re-export main components for easier access
pub use action::{Action, ActionOutcome};
pub use candidate::Candidate;
pub use config::Hyperparameters;
pub use engine::{
    Analyzer, Engine, Evaluator, Generator, IterationRecord, Learner, NoopAnalyzer,
    SessionOutcome, SessionRequest, SharedLearner,
};
pub use error::{QloopError, QloopResult};
pub use experience::{Experience, ExperienceBuffer};
pub use objective::{Constraints, EntityMapping, Filter, Objective, Scope, Timeframe};
pub use persistence::FileStore;
pub use policy::QTable;
pub use reward::{Evaluation, Feedback, Reward, SemanticIssue, SemanticReport};
pub use state::{extract_state, FeatureMap, FeatureValue, State};
pub use strategy::{OptimizationStrategy, SqlStrategy};

use anyhow::Result;
use tracing::info;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Initialize logging with default settings
pub fn init() -> Result<()> {
    init_with_logger(true)
}

/// Initialize logging with custom configuration
///
/// @param ansi_colors - Whether to enable ANSI color codes in logs.
/// Disable when log output is consumed by another process.
pub fn init_with_logger(ansi_colors: bool) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    if !ansi_colors {
        fmt::Subscriber::builder()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .without_time()
            .init();
    } else {
        fmt::Subscriber::builder()
            .with_ansi(true)
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(true)
            .init();
    }

    info!("Initializing qloop v{}", version());
    Ok(())
}
