// Q-table and epsilon-greedy action selection.
// The table is the only learned state in the system; it is mutated solely by
// the Bellman update and bounded by insertion-order eviction.

use rand::Rng;
use std::collections::{HashMap, VecDeque};

use crate::action::Action;
use crate::experience::Experience;

/// Seeded Q-value for unseen (state, UseGenerator) pairs. The small positive
/// bias steers early sessions toward the external generator before the table
/// has learned anything.
pub const GENERATOR_SEED_BIAS: f64 = 0.5;

/// Learned mapping from (state key, action) to an expected-value estimate.
///
/// Bounded to `max_size` state entries; when the bound is exceeded the
/// oldest-inserted state is evicted. This is insertion-order eviction, not
/// access-order LRU: reading or updating an existing state does not refresh
/// its position.
#[derive(Debug, Clone)]
pub struct QTable {
    table: HashMap<String, HashMap<Action, f64>>,
    insertion_order: VecDeque<String>,
    max_size: usize,
}

impl QTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            table: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Number of state entries currently held
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Initial estimate for a pair the table has never seen
    fn seed_value(action: Action) -> f64 {
        if action == Action::UseGenerator {
            GENERATOR_SEED_BIAS
        } else {
            0.0
        }
    }

    /// Current estimate for a (state, action) pair, seeded if unseen
    pub fn q_value(&self, state_key: &str, action: Action) -> f64 {
        self.table
            .get(state_key)
            .and_then(|actions| actions.get(&action))
            .copied()
            .unwrap_or_else(|| Self::seed_value(action))
    }

    /// Highest estimate over the given action set for a state
    fn max_q(&self, state_key: &str, actions: &[Action]) -> f64 {
        actions
            .iter()
            .map(|a| self.q_value(state_key, *a))
            .fold(0.0, f64::max)
    }

    /// Best action in `applicable` by current estimate. Ties break toward the
    /// earlier entry, so callers passing actions in enumeration order get
    /// deterministic exploitation.
    pub fn best_action(&self, state_key: &str, applicable: &[Action]) -> Option<Action> {
        let mut best: Option<(Action, f64)> = None;
        for action in applicable {
            let q = self.q_value(state_key, *action);
            match best {
                Some((_, best_q)) if q <= best_q => {}
                _ => best = Some((*action, q)),
            }
        }
        best.map(|(action, _)| action)
    }

    /// Epsilon-greedy selection over the applicable set: with probability
    /// `epsilon` a uniformly random applicable action, otherwise the best
    /// known one.
    pub fn select_action(
        &self,
        state_key: &str,
        applicable: &[Action],
        epsilon: f64,
    ) -> Option<Action> {
        if applicable.is_empty() {
            return None;
        }

        let mut rng = rand::rng();
        if epsilon > 0.0 && rng.random::<f64>() < epsilon {
            let index = rng.random_range(0..applicable.len());
            return Some(applicable[index]);
        }

        self.best_action(state_key, applicable)
    }

    /// Bellman update: Q(s,a) ← Q(s,a) + α[r + γ·max_a' Q(s',a') − Q(s,a)].
    ///
    /// The max is taken over the current iteration's applicable-action set,
    /// reused as an approximation of the next state's set. Returns the new
    /// estimate.
    pub fn update(
        &mut self,
        state_key: &str,
        action: Action,
        reward: f64,
        next_state_key: &str,
        applicable: &[Action],
        alpha: f64,
        gamma: f64,
    ) -> f64 {
        let current_q = self.q_value(state_key, action);
        let max_next_q = self.max_q(next_state_key, applicable);

        let temporal_difference = reward + gamma * max_next_q - current_q;
        let new_q = current_q + alpha * temporal_difference;

        self.insert_value(state_key, action, new_q);
        new_q
    }

    /// Write an estimate directly. Used by the Bellman update and by snapshot
    /// restore; everything else should go through `update`.
    pub fn insert_value(&mut self, state_key: &str, action: Action, value: f64) {
        if !self.table.contains_key(state_key) {
            self.insertion_order.push_back(state_key.to_string());
        }
        self.table
            .entry(state_key.to_string())
            .or_default()
            .insert(action, value);
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&mut self) {
        while self.table.len() > self.max_size {
            match self.insertion_order.pop_front() {
                Some(oldest) => {
                    self.table.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Replay a batch of stored transitions through the Bellman rule.
    /// The next-state max is taken over the full action vocabulary, since the
    /// applicable set at recording time is not part of the experience tuple.
    pub fn replay(&mut self, batch: &[Experience], alpha: f64, gamma: f64) {
        for experience in batch {
            self.update(
                &experience.state_key,
                experience.action,
                experience.reward,
                &experience.next_state_key,
                Action::ALL,
                alpha,
                gamma,
            );
        }
    }

    /// Iterate all entries for snapshotting, oldest-inserted first
    pub fn entries(&self) -> impl Iterator<Item = (&String, &HashMap<Action, f64>)> {
        self.insertion_order
            .iter()
            .filter_map(|key| self.table.get(key).map(|actions| (key, actions)))
    }

    /// Rebuild a table from snapshot data. Entries arrive in the snapshot's
    /// iteration order, which becomes the new insertion order.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, HashMap<Action, f64>)>,
        max_size: usize,
    ) -> Self {
        let mut qtable = Self::new(max_size);
        for (state_key, actions) in entries {
            for (action, value) in actions {
                qtable.insert_value(&state_key, action, value);
            }
        }
        qtable
    }
}
