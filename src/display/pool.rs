//! Display number allocation for running tasks.
//!
//! The [`DisplayPool`] owns the mapping from running task to display number.
//! Leases are keyed by the task's submission index, which is unique within a
//! run even when two tasks share a name. The pool is a plain value threaded through the admission loop: a number is
//! claimed when a task is admitted and released when its worker settles, so
//! no two running tasks ever share a display.

use std::collections::{BTreeSet, HashMap};

/// A fixed-size pool of display numbers.
///
/// Numbers are handed out lowest-first, which keeps allocations
/// deterministic for a given admission/settlement order.
///
/// # Example
///
/// ```
/// use fanout::display::DisplayPool;
///
/// let mut pool = DisplayPool::new(99, 2);
/// assert_eq!(pool.claim(0), Some(99));
/// assert_eq!(pool.claim(1), Some(100));
/// assert_eq!(pool.claim(2), None);
///
/// assert_eq!(pool.release(0), Some(99));
/// assert_eq!(pool.claim(2), Some(99));
/// ```
#[derive(Debug, Clone)]
pub struct DisplayPool {
    capacity: usize,
    free: BTreeSet<u32>,
    leased: HashMap<usize, u32>,
    peak: usize,
}

impl DisplayPool {
    /// Creates a pool of `capacity` numbers starting at `base`.
    ///
    /// Capacity is clamped to at least 1 and to the numbers representable
    /// above `base`.
    pub fn new(base: u32, capacity: usize) -> Self {
        let free: BTreeSet<u32> = (0..capacity.max(1))
            .map_while(|offset| u32::try_from(offset).ok().and_then(|o| base.checked_add(o)))
            .collect();
        Self {
            capacity: free.len(),
            free,
            leased: HashMap::new(),
            peak: 0,
        }
    }

    /// Claims the lowest free number for `task`.
    ///
    /// Returns `None` when every number is in use. A task that already holds
    /// a number gets the same number back.
    pub fn claim(&mut self, task: usize) -> Option<u32> {
        if let Some(number) = self.leased.get(&task) {
            return Some(*number);
        }
        let number = self.free.pop_first()?;
        self.leased.insert(task, number);
        self.peak = self.peak.max(self.leased.len());
        Some(number)
    }

    /// Releases the number held by `task`, making it immediately reusable.
    pub fn release(&mut self, task: usize) -> Option<u32> {
        let number = self.leased.remove(&task)?;
        self.free.insert(number);
        Some(number)
    }

    /// Number of displays currently in use.
    pub fn active(&self) -> usize {
        self.leased.len()
    }

    /// Highest number of simultaneously used displays seen so far.
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
