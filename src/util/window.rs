// Trailing-window statistics
// (c) 2024 Ross Younger

use std::collections::VecDeque;

/// The most recent `capacity` values of some series
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    /// Creates an empty window. A capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Adds a value, discarding the oldest if the window is full
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            let _ = self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Arithmetic mean, if there are any values
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.values.len() as f64;
        Some(self.values.iter().sum::<f64>() / n)
    }

    /// Whether the window holds `capacity` values
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Number of values held
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Empties the window
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
