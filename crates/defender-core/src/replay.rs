//! Experience Replay
//!
//! Bounded FIFO memory of transitions with uniform sampling without
//! replacement.

use crate::{DefenderError, DefenderResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::Arc;

/// One `(state, action, reward, next_state, terminal)` experience
///
/// States are shared slices so sampling never copies feature data.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    state: Arc<[f64]>,
    action: usize,
    reward: f64,
    next_state: Arc<[f64]>,
    terminal: bool,
}

impl Transition {
    /// Build a transition, rejecting non-finite numbers
    pub fn new(
        state: Vec<f64>,
        action: usize,
        reward: f64,
        next_state: Vec<f64>,
        terminal: bool,
    ) -> DefenderResult<Self> {
        if !reward.is_finite() {
            return Err(DefenderError::Numeric(format!("reward is {}", reward)));
        }
        if state.len() != next_state.len() {
            return Err(DefenderError::Input(format!(
                "state length {} differs from next_state length {}",
                state.len(),
                next_state.len()
            )));
        }
        if let Some(bad) = state.iter().chain(next_state.iter()).find(|v| !v.is_finite()) {
            return Err(DefenderError::Numeric(format!("state contains {}", bad)));
        }
        Ok(Self {
            state: state.into(),
            action,
            reward,
            next_state: next_state.into(),
            terminal,
        })
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn action(&self) -> usize {
        self.action
    }

    pub fn reward(&self) -> f64 {
        self.reward
    }

    pub fn next_state(&self) -> &[f64] {
        &self.next_state
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }
}

/// Replay buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub total_added: u64,
    pub total_evicted: u64,
    pub batches_sampled: u64,
}

/// Bounded FIFO replay buffer; `len() <= capacity()` always holds
#[derive(Debug)]
pub struct ReplayBuffer {
    capacity: usize,
    entries: VecDeque<Transition>,
    rng: StdRng,
    stats: BufferStats,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Deterministic sampling for reproducible runs
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4096)),
            rng,
            stats: BufferStats::default(),
        }
    }

    /// Append, evicting the oldest entry once full
    pub fn push(&mut self, transition: Transition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.stats.total_evicted += 1;
        }
        self.entries.push_back(transition);
        self.stats.total_added += 1;
    }

    /// Draw `k` distinct transitions uniformly at random
    pub fn sample(&mut self, k: usize) -> DefenderResult<Vec<Transition>> {
        if self.entries.len() < k {
            return Err(DefenderError::InsufficientData {
                available: self.entries.len(),
                requested: k,
            });
        }
        let batch = rand::seq::index::sample(&mut self.rng, self.entries.len(), k)
            .iter()
            .map(|i| self.entries[i].clone())
            .collect();
        self.stats.batches_sampled += 1;
        Ok(batch)
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

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn transition(tag: usize) -> Transition {
        Transition::new(vec![tag as f64], tag, 1.0, vec![0.0], false).unwrap()
    }

    #[test]
    fn test_fifo_eviction() {
        let capacity = 20;
        let mut buffer = ReplayBuffer::with_seed(capacity, 7);
        for tag in 0..capacity + 5 {
            buffer.push(transition(tag));
            assert!(buffer.len() <= capacity);
        }

        assert_eq!(buffer.len(), capacity);
        let actions: HashSet<usize> = buffer.iter().map(|t| t.action()).collect();
        for oldest in 0..5 {
            assert!(!actions.contains(&oldest));
        }
        assert!(actions.contains(&5));
        assert!(actions.contains(&24));
        assert_eq!(buffer.stats().total_evicted, 5);
    }

    #[test]
    fn test_sample_insufficient() {
        let mut buffer = ReplayBuffer::with_seed(10, 1);
        buffer.push(transition(0));
        match buffer.sample(2) {
            Err(DefenderError::InsufficientData { available, requested }) => {
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_sample_without_replacement() {
        let mut buffer = ReplayBuffer::with_seed(100, 3);
        for tag in 0..50 {
            buffer.push(transition(tag));
        }
        let batch = buffer.sample(50).unwrap();
        let distinct: HashSet<usize> = batch.iter().map(|t| t.action()).collect();
        assert_eq!(distinct.len(), 50);
        assert_eq!(buffer.stats().batches_sampled, 1);
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(matches!(
            Transition::new(vec![0.0], 0, f64::NAN, vec![0.0], false),
            Err(DefenderError::Numeric(_))
        ));
        assert!(matches!(
            Transition::new(vec![f64::INFINITY], 0, 1.0, vec![0.0], false),
            Err(DefenderError::Numeric(_))
        ));
        assert!(Transition::new(vec![0.0, 1.0], 0, 1.0, vec![0.0], false).is_err());
    }
}
