//! Registry of parked fibers
//!
//! Holds exactly the non-program fibers that are Suspended or Awaken.
//! New entries go to the front, and lookups and scheduling scans walk
//! front to back, so the most recently parked fiber is considered first.

use std::collections::VecDeque;

use skein_core::{FiberId, SchedError, SchedResult};

#[derive(Default)]
pub(crate) struct WaitRegistry {
    waiting: VecDeque<FiberId>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: FiberId) {
        debug_assert!(!self.contains(id), "fiber {} registered twice", id);
        self.waiting.push_front(id);
    }

    pub fn remove(&mut self, id: FiberId) -> SchedResult<()> {
        let pos = self
            .waiting
            .iter()
            .position(|w| *w == id)
            .ok_or(SchedError::FiberNotFound(id))?;
        self.waiting.remove(pos);
        Ok(())
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.waiting.contains(&id)
    }

    /// First entry, front to back, satisfying `pred`
    pub fn find(&self, mut pred: impl FnMut(FiberId) -> bool) -> Option<FiberId> {
        self.waiting.iter().copied().find(|id| pred(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = FiberId> + '_ {
        self.waiting.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn drain(&mut self) -> Vec<FiberId> {
        self.waiting.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> FiberId {
        FiberId::new(n, 0)
    }

    #[test]
    fn test_newest_first() {
        let mut reg = WaitRegistry::new();
        reg.add(id(1));
        reg.add(id(2));
        reg.add(id(3));
        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![id(3), id(2), id(1)]);
        assert_eq!(reg.find(|i| i.index() < 3), Some(id(2)));
    }

    #[test]
    fn test_remove() {
        let mut reg = WaitRegistry::new();
        reg.add(id(1));
        reg.add(id(2));
        reg.remove(id(1)).unwrap();
        assert!(!reg.contains(id(1)));
        assert_eq!(reg.remove(id(1)), Err(SchedError::FiberNotFound(id(1))));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.drain(), vec![id(2)]);
        assert!(reg.is_empty());
    }
}
