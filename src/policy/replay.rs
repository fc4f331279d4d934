//! Bounded experience store
// (c) 2024 Ross Younger

use std::collections::VecDeque;

use rand::Rng;

use crate::tunnel::Transition;

/// A FIFO of recent transitions. The oldest is discarded when full.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayBuffer {
    capacity: usize,
    items: VecDeque<Transition>,
}

impl ReplayBuffer {
    /// Creates an empty buffer. A zero capacity buffer stores nothing.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    /// Stores a transition
    pub fn push(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            let _ = self.items.pop_front();
        }
        self.items.push_back(transition);
    }

    /// Draws up to `batch` distinct stored transitions, uniformly at random
    pub fn sample<R: Rng + ?Sized>(&self, batch: usize, rng: &mut R) -> Vec<Transition> {
        let amount = batch.min(self.items.len());
        rand::seq::index::sample(rng, self.items.len(), amount)
            .into_iter()
            .filter_map(|i| self.items.get(i).copied())
            .collect()
    }

    /// Number of stored transitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, SeedableRng as _};

    use super::ReplayBuffer;
    use crate::tunnel::{Action, State, Transition};

    fn transition(reward: f64) -> Transition {
        Transition {
            state: State([0.1, 0.2, 0.3]),
            action: Action::IncreaseMtu,
            reward,
            next_state: State([0.1, 0.2, 0.3]),
            done: false,
        }
    }

    #[test]
    fn bounded() {
        let mut buf = ReplayBuffer::new(3);
        for i in 0..5 {
            buf.push(transition(f64::from(i)));
        }
        assert_eq!(buf.len(), 3);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rewards: Vec<_> = buf.sample(10, &mut rng).iter().map(|t| t.reward).collect();
        rewards.sort_by(f64::total_cmp);
        assert_eq!(rewards, vec![2., 3., 4.]);
    }

    #[test]
    fn batch_size() {
        let mut buf = ReplayBuffer::new(100);
        for i in 0..50 {
            buf.push(transition(f64::from(i)));
        }
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(buf.sample(8, &mut rng).len(), 8);
    }

    #[test]
    fn disabled() {
        let mut buf = ReplayBuffer::new(0);
        buf.push(transition(1.));
        assert!(buf.is_empty());
        let mut rng = StdRng::seed_from_u64(3);
        assert!(buf.sample(4, &mut rng).is_empty());
    }
}
