// Experience buffer: a bounded, persisted log of learning transitions,
// kept for offline inspection and replay.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::action::Action;

/// One recorded transition: the state the policy acted in, the action taken,
/// the reward observed, and the state that followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: Uuid,
    pub state_key: String,
    pub action: Action,
    pub reward: f64,
    pub next_state_key: String,
    /// Whether this transition ended the session in convergence
    pub terminal: bool,
    pub timestamp: DateTime<Utc>,
    pub objective_hash: String,
}

impl Experience {
    pub fn new(
        state_key: String,
        action: Action,
        reward: f64,
        next_state_key: String,
        terminal: bool,
        objective_hash: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state_key,
            action,
            reward,
            next_state_key,
            terminal,
            timestamp: Utc::now(),
            objective_hash,
        }
    }
}

/// Fixed-capacity FIFO queue of experiences; the oldest entry is evicted
/// first when the buffer is full.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    entries: VecDeque<Experience>,
    capacity: usize,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild a buffer from persisted entries. When the snapshot holds more
    /// than `capacity` entries only the newest survive, in original order.
    pub fn from_entries(entries: Vec<Experience>, capacity: usize) -> Self {
        let mut buffer = Self::new(capacity);
        for experience in entries {
            buffer.add(experience);
        }
        buffer
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an experience, evicting the oldest entry if at capacity
    pub fn add(&mut self, experience: Experience) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(experience);
    }

    /// Sample up to `n` distinct experiences uniformly, without replacement
    pub fn sample_batch(&self, n: usize) -> Vec<Experience> {
        let len = self.entries.len();
        let take = n.min(len);
        if take == 0 {
            return Vec::new();
        }

        // Partial Fisher-Yates over an index vector
        let mut rng = rand::rng();
        let mut indices: Vec<usize> = (0..len).collect();
        for i in 0..take {
            let j = rng.random_range(i..len);
            indices.swap(i, j);
        }

        indices[..take]
            .iter()
            .map(|&i| self.entries[i].clone())
            .collect()
    }

    /// All experiences recorded under the given objective, oldest first
    pub fn by_objective(&self, objective_hash: &str) -> Vec<&Experience> {
        self.entries
            .iter()
            .filter(|e| e.objective_hash == objective_hash)
            .collect()
    }

    /// The most recent `n` experiences, oldest of those first
    pub fn recent(&self, n: usize) -> Vec<&Experience> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Experiences whose reward reached `min_reward`
    pub fn high_reward(&self, min_reward: f64) -> Vec<&Experience> {
        self.entries
            .iter()
            .filter(|e| e.reward >= min_reward)
            .collect()
    }

    /// Mean reward over the whole buffer, 0.0 when empty
    pub fn average_reward(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let total: f64 = self.entries.iter().map(|e| e.reward).sum();
        total / self.entries.len() as f64
    }

    /// Fraction of experiences that ended a session in convergence
    pub fn success_rate(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let terminal = self.entries.iter().filter(|e| e.terminal).count();
        terminal as f64 / self.entries.len() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }

    /// Snapshot the whole buffer in order for persistence
    pub fn to_vec(&self) -> Vec<Experience> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experience(reward: f64, terminal: bool) -> Experience {
        Experience::new(
            "s".to_string(),
            Action::AddFilter,
            reward,
            "s2".to_string(),
            terminal,
            "obj".to_string(),
        )
    }

    #[test]
    fn test_fifo_keeps_newest_in_order() {
        let capacity = 5;
        let extra = 3;
        let mut buffer = ExperienceBuffer::new(capacity);

        let mut ids = Vec::new();
        for i in 0..capacity + extra {
            let e = experience(i as f64, false);
            ids.push(e.id);
            buffer.add(e);
        }

        assert_eq!(buffer.len(), capacity);
        let kept: Vec<Uuid> = buffer.iter().map(|e| e.id).collect();
        assert_eq!(&kept[..], &ids[extra..]);
    }

    #[test]
    fn test_sample_batch_without_replacement() {
        let mut buffer = ExperienceBuffer::new(100);
        for i in 0..20 {
            buffer.add(experience(i as f64, false));
        }

        let batch = buffer.sample_batch(10);
        assert_eq!(batch.len(), 10);
        let distinct: std::collections::HashSet<Uuid> = batch.iter().map(|e| e.id).collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn test_sample_batch_larger_than_buffer() {
        let mut buffer = ExperienceBuffer::new(100);
        for _ in 0..3 {
            buffer.add(experience(1.0, false));
        }
        assert_eq!(buffer.sample_batch(10).len(), 3);
        assert!(ExperienceBuffer::new(10).sample_batch(5).is_empty());
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut buffer = ExperienceBuffer::new(10);
        for i in 0..6 {
            buffer.add(experience(i as f64, false));
        }
        let recent: Vec<f64> = buffer.recent(3).iter().map(|e| e.reward).collect();
        assert_eq!(recent, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_objective_and_reward_queries() {
        let mut buffer = ExperienceBuffer::new(10);
        buffer.add(experience(10.0, false));
        let mut other = experience(90.0, true);
        other.objective_hash = "other".to_string();
        buffer.add(other);

        assert_eq!(buffer.by_objective("obj").len(), 1);
        assert_eq!(buffer.by_objective("other").len(), 1);
        assert_eq!(buffer.high_reward(50.0).len(), 1);
    }

    #[test]
    fn test_aggregate_stats() {
        let mut buffer = ExperienceBuffer::new(10);
        buffer.add(experience(10.0, true));
        buffer.add(experience(30.0, false));

        assert!((buffer.average_reward() - 20.0).abs() < 1e-12);
        assert!((buffer.success_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_from_entries_truncates_to_newest() {
        let entries: Vec<Experience> = (0..8).map(|i| experience(i as f64, false)).collect();
        let buffer = ExperienceBuffer::from_entries(entries, 5);
        let rewards: Vec<f64> = buffer.iter().map(|e| e.reward).collect();
        assert_eq!(rewards, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }
}
