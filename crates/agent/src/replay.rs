use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

use common::{Error, Result};
use strategy::StateVector;

use crate::table::Action;

/// One step of experience.
///
/// `done` marks episode termination; the decision loop treats trading as a
/// continuing task and never sets it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: StateVector,
    pub action: Action,
    pub reward: f64,
    pub next_state: StateVector,
    pub done: bool,
}

/// Capacity-bounded FIFO store of transitions.
///
/// Once full, each push evicts the oldest transition.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Draw `k` distinct transitions uniformly at random, in random order.
    pub fn sample<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> Result<Vec<Transition>> {
        if k > self.buffer.len() {
            return Err(Error::InsufficientSamples {
                requested: k,
                available: self.buffer.len(),
            });
        }
        Ok(rand::seq::index::sample(rng, self.buffer.len(), k)
            .iter()
            .map(|i| self.buffer[i])
            .collect())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn transition(reward: f64) -> Transition {
        let state = StateVector {
            short_ma: 1.0,
            long_ma: 1.0,
            position_sign: 0.0,
            momentum: 0.0,
            rsi: 50.0,
            volatility: 0.0,
            time_of_day: 10.0,
        };
        Transition {
            state,
            action: Action::Sell,
            reward,
            next_state: state,
            done: false,
        }
    }

    fn rewards(buffer: &ReplayBuffer) -> Vec<f64> {
        buffer.iter().map(|t| t.reward).collect()
    }

    #[test]
    fn evicts_oldest_first() {
        let mut buffer = ReplayBuffer::new(3);
        for r in 1..=5 {
            buffer.push(transition(r as f64));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(rewards(&buffer), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = ReplayBuffer::new(4);
        for r in 0..100 {
            buffer.push(transition(r as f64));
            assert!(buffer.len() <= 4);
        }
        assert_eq!(rewards(&buffer), vec![96.0, 97.0, 98.0, 99.0]);
    }

    #[test]
    fn sample_without_replacement() {
        let mut buffer = ReplayBuffer::new(10);
        for r in 0..10 {
            buffer.push(transition(r as f64));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let mut drawn: Vec<f64> = buffer
            .sample(10, &mut rng)
            .unwrap()
            .iter()
            .map(|t| t.reward)
            .collect();
        drawn.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(drawn, (0..10).map(|r| r as f64).collect::<Vec<_>>());
    }

    #[test]
    fn sample_larger_than_buffer_fails() {
        let mut buffer = ReplayBuffer::new(10);
        buffer.push(transition(1.0));
        let mut rng = StdRng::seed_from_u64(7);
        let err = buffer.sample(2, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientSamples {
                requested: 2,
                available: 1
            }
        ));
    }
}
