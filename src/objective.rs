// The optimization goal: what the caller wants the candidate to become.
// Immutable for the duration of one optimization session.

use serde::{Deserialize, Serialize};

use crate::error::{QloopError, QloopResult};
use crate::state::digest16;

/// A single filter the candidate is expected to carry, e.g. `product = "Coffee"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: String,
}

/// Date or time restriction on the objective's scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeframe {
    /// Field the restriction applies to, e.g. `created_at`
    pub field: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Mapping from a domain entity named in the request to the field that
/// actually represents it, e.g. "customer" -> `client_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub entity: String,
    pub field: String,
}

/// Filters, timeframe and entity references bounding the objective
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    #[serde(default)]
    pub entities: Vec<EntityMapping>,
}

/// Hard requirements the converged candidate must satisfy
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub forbidden_fields: Vec<String>,
    /// Per-objective override of the session iteration budget
    #[serde(default)]
    pub max_iterations: Option<usize>,
    /// Per-objective override of the convergence threshold
    #[serde(default)]
    pub convergence_threshold: Option<f64>,
}

/// Caller-supplied goal description for one optimization session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Natural-language intent, e.g. "total revenue per product this month"
    pub intent: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub constraints: Constraints,
}

impl Objective {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            scope: Scope::default(),
            constraints: Constraints::default(),
        }
    }

    /// Fail-fast well-formedness check, run before any iteration.
    /// A malformed objective never starts a partial session.
    pub fn validate(&self) -> QloopResult<()> {
        if self.intent.trim().is_empty() {
            return Err(QloopError::malformed_objective("intent must not be empty"));
        }
        if let Some(filter) = self.scope.filters.iter().find(|f| f.field.trim().is_empty()) {
            return Err(QloopError::malformed_objective(format!(
                "filter with value {:?} has an empty field name",
                filter.value
            )));
        }
        if let Some(mapping) = self
            .scope
            .entities
            .iter()
            .find(|m| m.entity.trim().is_empty() || m.field.trim().is_empty())
        {
            return Err(QloopError::malformed_objective(format!(
                "entity mapping {:?} -> {:?} is incomplete",
                mapping.entity, mapping.field
            )));
        }
        if self
            .constraints
            .required_fields
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(QloopError::malformed_objective(
                "required_fields contains an empty name",
            ));
        }
        if let Some(field) = self
            .constraints
            .required_fields
            .iter()
            .find(|f| self.constraints.forbidden_fields.contains(*f))
        {
            return Err(QloopError::malformed_objective(format!(
                "field {:?} is both required and forbidden",
                field
            )));
        }
        if self.constraints.max_iterations == Some(0) {
            return Err(QloopError::malformed_objective(
                "max_iterations override must be positive",
            ));
        }
        Ok(())
    }

    /// Stable content hash. The objective holds no volatile fields, so the
    /// serialized form hashes identically across runs.
    pub fn content_hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        digest16(serialized.as_bytes())
    }
}
