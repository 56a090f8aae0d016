// SQL-flavored strategy: structural gating, transformations and heuristics
// for candidates that are query strings.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::action::{Action, ActionOutcome};
use crate::candidate::Candidate;
use crate::objective::{EntityMapping, Objective};
use crate::reward::{
    execution_bonus, ConstraintProgress, ExecutionMetrics, SemanticIssue, SemanticReport,
};
use crate::state::{FeatureMap, FeatureValue};
use crate::strategy::{OptimizationStrategy, RESET_MIN_ITERATION};

pub const EXCLUDED_TERM_PRESENT: &str = "EXCLUDED_TERM_PRESENT";
pub const UNWANTED_AGGREGATION: &str = "UNWANTED_AGGREGATION";
pub const MISSING_FILTER_VALUE: &str = "MISSING_FILTER_VALUE";

static RE_SELECT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\s+(.+?)\s+FROM\b").unwrap());
static RE_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\b").unwrap());
static RE_WHERE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static RE_AGG_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:COUNT|SUM|AVG|MIN|MAX)\s*\(\s*([^)]*?)\s*\)").unwrap());
static RE_GROUP_BY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());
static RE_JOIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bJOIN\b").unwrap());
static RE_SELECT_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+\*").unwrap());
static RE_CLAUSE_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:GROUP\s+BY|HAVING|ORDER\s+BY|LIMIT)\b").unwrap());
static RE_GROUP_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:ORDER\s+BY|LIMIT)\b").unwrap());
static RE_EXCLUDED_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:excluding|exclude|excludes|without|except)\s+([A-Za-z0-9_]+)").unwrap()
});
static RE_ALL_RECORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\ball\s+(?:records?|rows?|entries)\b|\blist\s+all\b|\bshow\s+all\b|\bevery\s+record\b")
        .unwrap()
});
static RE_WANTS_AGGREGATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:total|sum|count|average|avg|how\s+many|number\s+of)\b").unwrap()
});
static RE_WANTS_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:count|how\s+many|number\s+of)\b").unwrap());

fn contains_ci(text: &str, needle: &str) -> bool {
    text.to_lowercase().contains(&needle.to_lowercase())
}

fn word_present(text: &str, word: &str) -> bool {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn has_aggregation(text: &str) -> bool {
    RE_AGG_FN.is_match(text) || RE_GROUP_BY.is_match(text)
}

fn join_count(text: &str) -> usize {
    RE_JOIN.find_iter(text).count()
}

/// Insert a condition at the grammatically right spot: extends an existing
/// WHERE clause with AND, or opens one, in both cases ahead of any trailing
/// GROUP BY / ORDER BY / LIMIT.
fn insert_condition(text: &str, condition: &str) -> String {
    let connector = if RE_WHERE.is_match(text) { "AND" } else { "WHERE" };
    let clause = format!("{} {}", connector, condition);

    match RE_CLAUSE_TAIL.find(text) {
        Some(tail) => format!(
            "{} {} {}",
            text[..tail.start()].trim_end(),
            clause,
            &text[tail.start()..]
        ),
        None => format!("{} {}", text.trim_end(), clause),
    }
}

/// Remove a `GROUP BY ...` clause, leaving any ORDER BY / LIMIT tail intact
fn strip_group_by(text: &str) -> String {
    let Some(group) = RE_GROUP_BY.find(text) else {
        return text.to_string();
    };
    let rest = &text[group.end()..];
    match RE_GROUP_TAIL.find(rest) {
        Some(tail) => format!(
            "{} {}",
            text[..group.start()].trim_end(),
            &rest[tail.start()..]
        ),
        None => text[..group.start()].trim_end().to_string(),
    }
}

/// Strategy for SQL query candidates
#[derive(Debug, Clone, Default)]
pub struct SqlStrategy;

impl SqlStrategy {
    pub fn new() -> Self {
        Self
    }

    fn missing_required_field<'a>(&self, text: &str, objective: &'a Objective) -> Option<&'a str> {
        objective
            .constraints
            .required_fields
            .iter()
            .find(|field| !contains_ci(text, field))
            .map(|field| field.as_str())
    }

    fn present_forbidden_field<'a>(&self, text: &str, objective: &'a Objective) -> Option<&'a str> {
        objective
            .constraints
            .forbidden_fields
            .iter()
            .find(|field| contains_ci(text, field))
            .map(|field| field.as_str())
    }

    fn timeframe_satisfied(&self, text: &str, objective: &Objective) -> bool {
        match &objective.scope.timeframe {
            Some(timeframe) => contains_ci(text, &timeframe.field),
            None => true,
        }
    }

    /// A mapping counts as resolved when the mapped field is present or the
    /// raw entity name never appears.
    fn unmapped_entity<'a>(&self, text: &str, objective: &'a Objective) -> Option<&'a EntityMapping> {
        objective
            .scope
            .entities
            .iter()
            .find(|m| word_present(text, &m.entity) && !contains_ci(text, &m.field))
    }

    fn required_ratio(&self, text: &str, objective: &Objective) -> f64 {
        let required = &objective.constraints.required_fields;
        if required.is_empty() {
            return 1.0;
        }
        let present = required.iter().filter(|f| contains_ci(text, f)).count();
        present as f64 / required.len() as f64
    }

    fn replace_select_list(&self, text: &str, new_list: &str) -> Option<String> {
        let caps = RE_SELECT_LIST.captures(text)?;
        let list = caps.get(1)?;
        Some(format!(
            "{}{}{}",
            &text[..list.start()],
            new_list,
            &text[list.end()..]
        ))
    }
}

impl OptimizationStrategy for SqlStrategy {
    fn applicable_actions(
        &self,
        candidate: &Candidate,
        objective: &Objective,
        iteration: usize,
    ) -> Vec<Action> {
        let text = candidate.as_text();
        let mut actions = Vec::new();

        // Structural actions need structure to anchor on.
        if !candidate.is_empty() {
            let has_select = RE_SELECT_LIST.is_match(&text);
            if has_select && self.missing_required_field(&text, objective).is_some() {
                actions.push(Action::AddField);
            }
            if has_select && self.present_forbidden_field(&text, objective).is_some() {
                actions.push(Action::RemoveField);
            }
            if !objective.scope.filters.is_empty() && !RE_WHERE.is_match(&text) {
                actions.push(Action::AddFilter);
            }
            if objective.scope.timeframe.is_some() && !self.timeframe_satisfied(&text, objective) {
                actions.push(Action::AddTimeframe);
            }
            if has_select
                && !has_aggregation(&text)
                && RE_WANTS_AGGREGATION.is_match(&objective.intent)
            {
                actions.push(Action::AddAggregation);
            }
            if has_aggregation(&text) {
                actions.push(Action::RemoveAggregation);
            }
            if self.unmapped_entity(&text, objective).is_some() {
                actions.push(Action::FixEntityMapping);
            }
        }

        actions.push(Action::UseGenerator);
        if iteration >= RESET_MIN_ITERATION {
            actions.push(Action::Reset);
        }
        actions.push(Action::NoOp);

        actions
    }

    fn apply_action(
        &self,
        candidate: &Candidate,
        action: Action,
        objective: &Objective,
    ) -> ActionOutcome {
        let text = candidate.as_text().into_owned();

        match action {
            Action::UseGenerator => ActionOutcome::RequiresGeneration { fresh: false },
            Action::Reset => ActionOutcome::RequiresGeneration { fresh: true },
            Action::NoOp => ActionOutcome::unchanged(candidate),

            Action::AddField => {
                let Some(field) = self.missing_required_field(&text, objective) else {
                    return ActionOutcome::unchanged(candidate);
                };
                let Some(caps) = RE_SELECT_LIST.captures(&text) else {
                    return ActionOutcome::unchanged(candidate);
                };
                let list = match caps.get(1) {
                    Some(list) => list.as_str().trim(),
                    None => return ActionOutcome::unchanged(candidate),
                };
                let new_list = if list == "*" {
                    objective.constraints.required_fields.join(", ")
                } else {
                    format!("{}, {}", list, field)
                };
                match self.replace_select_list(&text, &new_list) {
                    Some(updated) => ActionOutcome::Transformed(Candidate::Text(updated)),
                    None => ActionOutcome::unchanged(candidate),
                }
            }

            Action::RemoveField => {
                let Some(field) = self.present_forbidden_field(&text, objective) else {
                    return ActionOutcome::unchanged(candidate);
                };
                let Some(caps) = RE_SELECT_LIST.captures(&text) else {
                    return ActionOutcome::unchanged(candidate);
                };
                let list = match caps.get(1) {
                    Some(list) => list.as_str(),
                    None => return ActionOutcome::unchanged(candidate),
                };
                let kept: Vec<&str> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !contains_ci(item, field))
                    .collect();
                if kept.is_empty() || kept.len() == list.split(',').count() {
                    return ActionOutcome::unchanged(candidate);
                }
                match self.replace_select_list(&text, &kept.join(", ")) {
                    Some(updated) => ActionOutcome::Transformed(Candidate::Text(updated)),
                    None => ActionOutcome::unchanged(candidate),
                }
            }

            Action::AddFilter => {
                if !RE_FROM.is_match(&text) {
                    return ActionOutcome::unchanged(candidate);
                }
                let Some(filter) = objective
                    .scope
                    .filters
                    .iter()
                    .find(|f| !contains_ci(&text, &f.value))
                else {
                    return ActionOutcome::unchanged(candidate);
                };
                let condition = format!("{} = '{}'", filter.field, filter.value);
                ActionOutcome::Transformed(Candidate::Text(insert_condition(&text, &condition)))
            }

            Action::AddTimeframe => {
                let Some(timeframe) = &objective.scope.timeframe else {
                    return ActionOutcome::unchanged(candidate);
                };
                if !RE_FROM.is_match(&text) {
                    return ActionOutcome::unchanged(candidate);
                }
                let mut parts = Vec::new();
                if let Some(start) = &timeframe.start {
                    parts.push(format!("{} >= '{}'", timeframe.field, start));
                }
                if let Some(end) = &timeframe.end {
                    parts.push(format!("{} <= '{}'", timeframe.field, end));
                }
                if parts.is_empty() {
                    return ActionOutcome::unchanged(candidate);
                }
                let condition = parts.join(" AND ");
                ActionOutcome::Transformed(Candidate::Text(insert_condition(&text, &condition)))
            }

            Action::AddAggregation => {
                let expression = if RE_WANTS_COUNT.is_match(&objective.intent) {
                    "COUNT(*)".to_string()
                } else if let Some(field) = objective.constraints.required_fields.first() {
                    format!("SUM({})", field)
                } else {
                    return ActionOutcome::unchanged(candidate);
                };
                match self.replace_select_list(&text, &expression) {
                    Some(updated) => ActionOutcome::Transformed(Candidate::Text(updated)),
                    None => ActionOutcome::unchanged(candidate),
                }
            }

            Action::RemoveAggregation => {
                if !has_aggregation(&text) {
                    return ActionOutcome::unchanged(candidate);
                }
                let unwrapped = RE_AGG_FN.replace_all(&text, "$1").into_owned();
                let stripped = strip_group_by(&unwrapped);
                ActionOutcome::Transformed(Candidate::Text(stripped))
            }

            Action::FixEntityMapping => {
                let mut updated = text.clone();
                let mut changed = false;
                for mapping in &objective.scope.entities {
                    if word_present(&updated, &mapping.entity)
                        && !contains_ci(&updated, &mapping.field)
                    {
                        if let Ok(re) = Regex::new(&format!(
                            r"(?i)\b{}\b",
                            regex::escape(&mapping.entity)
                        )) {
                            updated = re.replace_all(&updated, mapping.field.as_str()).into_owned();
                            changed = true;
                        }
                    }
                }
                if changed {
                    ActionOutcome::Transformed(Candidate::Text(updated))
                } else {
                    ActionOutcome::unchanged(candidate)
                }
            }
        }
    }

    fn state_features(&self, candidate: &Candidate, objective: &Objective) -> FeatureMap {
        let text = candidate.as_text();
        let mut features = FeatureMap::new();
        features.insert(
            "has_filter".to_string(),
            FeatureValue::Bool(RE_WHERE.is_match(&text)),
        );
        features.insert(
            "has_timeframe".to_string(),
            FeatureValue::Bool(self.timeframe_satisfied(&text, objective)),
        );
        features.insert(
            "has_aggregation".to_string(),
            FeatureValue::Bool(has_aggregation(&text)),
        );
        features.insert(
            "cost_bucket".to_string(),
            FeatureValue::Int(join_count(&text).min(3) as i64),
        );
        features
    }

    fn constraint_progress(
        &self,
        candidate: &Candidate,
        objective: &Objective,
    ) -> ConstraintProgress {
        let text = candidate.as_text();
        ConstraintProgress {
            timeframe_satisfied: self.timeframe_satisfied(&text, objective),
            entities_mapped: self.unmapped_entity(&text, objective).is_none(),
            required_ratio: self.required_ratio(&text, objective),
        }
    }

    fn quality_score(
        &self,
        candidate: &Candidate,
        _objective: &Objective,
        metrics: Option<&ExecutionMetrics>,
    ) -> f64 {
        let text = candidate.as_text();
        let mut score = 0.0;

        // Conciseness: shorter candidates score higher, down to a floor of 0.
        score += match candidate.len() {
            0..=120 => 10.0,
            121..=300 => 5.0,
            _ => 0.0,
        };

        // Specificity: "select everything" candidates are penalized.
        if RE_SELECT_STAR.is_match(&text) {
            score -= 10.0;
        }

        // Structural cost: unfiltered scans and each join are penalized.
        if !RE_WHERE.is_match(&text) {
            score -= 5.0;
        }
        score -= 3.0 * join_count(&text) as f64;

        if let Some(metrics) = metrics {
            score += execution_bonus(metrics);
        }

        score
    }

    fn validate_semantics(
        &self,
        candidate: &Candidate,
        objective: &Objective,
        _analysis: &FeatureMap,
    ) -> SemanticReport {
        let text = candidate.as_text();
        let mut issues = Vec::new();

        for caps in RE_EXCLUDED_TERM.captures_iter(&objective.intent) {
            if let Some(term) = caps.get(1) {
                if word_present(&text, term.as_str()) {
                    issues.push(SemanticIssue::new(
                        EXCLUDED_TERM_PRESENT,
                        format!(
                            "objective excludes {:?} but the candidate still references it",
                            term.as_str()
                        ),
                    ));
                }
            }
        }

        if RE_ALL_RECORDS.is_match(&objective.intent) && has_aggregation(&text) {
            issues.push(SemanticIssue::new(
                UNWANTED_AGGREGATION,
                "objective asks for all records but the candidate aggregates",
            ));
        }

        for filter in &objective.scope.filters {
            if !contains_ci(&text, &filter.value) {
                issues.push(SemanticIssue::new(
                    MISSING_FILTER_VALUE,
                    format!(
                        "filter value {:?} does not appear in the candidate",
                        filter.value
                    ),
                ));
            }
        }

        SemanticReport::with_issues(issues)
    }

    fn fallback_candidate(&self, objective: &Objective) -> Candidate {
        let fields = if objective.constraints.required_fields.is_empty() {
            "*".to_string()
        } else {
            objective.constraints.required_fields.join(", ")
        };
        let table = objective
            .scope
            .entities
            .first()
            .map(|m| m.entity.clone())
            .unwrap_or_else(|| "records".to_string());

        let mut conditions = Vec::new();
        for filter in &objective.scope.filters {
            conditions.push(format!("{} = '{}'", filter.field, filter.value));
        }
        if let Some(timeframe) = &objective.scope.timeframe {
            if let Some(start) = &timeframe.start {
                conditions.push(format!("{} >= '{}'", timeframe.field, start));
            }
            if let Some(end) = &timeframe.end {
                conditions.push(format!("{} <= '{}'", timeframe.field, end));
            }
        }

        let query = if conditions.is_empty() {
            format!("SELECT {} FROM {}", fields, table)
        } else {
            format!("SELECT {} FROM {} WHERE {}", fields, table, conditions.join(" AND "))
        };
        Candidate::Text(query)
    }
}
