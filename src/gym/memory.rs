use rand::{seq::index::sample, Rng};

use crate::error::{Error, Result};

/// Fixed capacity ring of transitions.
///
/// Slots are filled in push order until `capacity` is reached, after which each push
/// overwrites the oldest transition.
#[derive(Debug, Clone)]
pub struct ReplayMemory<T> {
    capacity: usize,
    storage: Vec<T>,
    cursor: usize,
}

impl<T> ReplayMemory<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay memory needs a capacity of at least one");

        Self {
            capacity,
            storage: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn push(&mut self, transition: T) {
        if self.storage.len() < self.capacity {
            self.storage.push(transition);
        } else {
            self.storage[self.cursor] = transition;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Draws `batch_size` distinct transitions uniformly at random
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, batch_size: usize) -> Result<Vec<&T>> {
        if batch_size > self.storage.len() {
            return Err(Error::InsufficientData {
                requested: batch_size,
                available: self.storage.len(),
            });
        }

        Ok(sample(rng, self.storage.len(), batch_size)
            .into_iter()
            .map(|index| &self.storage[index])
            .collect())
    }

    /// Stored transitions, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let split = if self.storage.len() < self.capacity {
            0
        } else {
            self.cursor
        };
        self.storage[split..].iter().chain(self.storage[..split].iter())
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn len_saturates_at_capacity() {
        for capacity in [1, 3, 7] {
            for pushes in 0..20 {
                let mut memory = ReplayMemory::new(capacity);
                for i in 0..pushes {
                    memory.push(i);
                }
                assert_eq!(memory.len(), pushes.min(capacity));
            }
        }
    }

    #[test]
    fn keeps_last_pushed_transitions() {
        let mut memory = ReplayMemory::new(4);
        for i in 0..11 {
            memory.push(i);
        }

        let stored: Vec<i32> = memory.iter().copied().collect();
        assert_eq!(stored, vec![7, 8, 9, 10]);
    }

    #[test]
    fn iter_before_wrap_is_push_order() {
        let mut memory = ReplayMemory::new(5);
        for i in 0..3 {
            memory.push(i);
        }

        assert_eq!(memory.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn sample_too_large_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut memory = ReplayMemory::new(10);
        for i in 0..3 {
            memory.push(i);
        }

        match memory.sample(&mut rng, 4) {
            Err(Error::InsufficientData {
                requested,
                available,
            }) => {
                assert_eq!(requested, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
    }

    #[test]
    fn sample_is_distinct_and_stored() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut memory = ReplayMemory::new(16);
        for i in 0..40 {
            memory.push(i);
        }
        let stored: HashSet<i32> = memory.iter().copied().collect();

        for k in [0, 1, 8, 16] {
            let batch = memory.sample(&mut rng, k).unwrap();
            let unique: HashSet<i32> = batch.iter().map(|t| **t).collect();

            assert_eq!(batch.len(), k);
            assert_eq!(unique.len(), k);
            assert!(unique.is_subset(&stored));
        }
    }
}
