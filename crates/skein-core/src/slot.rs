//! Generational slot arena for fibers
//!
//! Freed slots go on a LIFO free stack so recently released slots are
//! handed out first. Each reuse bumps the slot's generation, invalidating
//! any [`FiberId`] that still points at the old occupant.

use crate::error::{SchedError, SchedResult};
use crate::id::FiberId;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena keyed by [`FiberId`]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    /// LIFO stack of free slot indexes
    free: Vec<u32>,
    len: usize,
    max: usize,
}

impl<T> SlotArena<T> {
    pub fn new(max: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            max,
        }
    }

    /// Insert a value, reusing a freed slot if one exists.
    pub fn insert(&mut self, value: T) -> SchedResult<FiberId> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(value);
            self.len += 1;
            return Ok(FiberId::new(index, slot.generation));
        }

        if self.slots.len() >= self.max || self.slots.len() >= u32::MAX as usize {
            return Err(SchedError::TooManyFibers(self.max));
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(FiberId::new(index, 0))
    }

    pub fn remove(&mut self, id: FiberId) -> Option<T> {
        let slot = self.slot_mut(id)?;
        let value = slot.value.take()?;
        self.free.push(id.index());
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: FiberId) -> Option<&T> {
        self.slots
            .get(id.index() as usize)
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut T> {
        self.slot_mut(id).and_then(|s| s.value.as_mut())
    }

    #[inline]
    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (FiberId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value
                .as_ref()
                .map(|v| (FiberId::new(i as u32, s.generation), v))
        })
    }

    /// Remove every value, leaving the arena empty.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                out.push(value);
                self.free.push(index as u32);
            }
        }
        self.len = 0;
        out
    }

    fn slot_mut(&mut self, id: FiberId) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|s| s.generation == id.generation())
    }
}
