//! Generational arena holding wheel entries.

/// Stable handle to an arena slot.
///
/// The generation detects use of a handle whose entry has been removed and
/// whose slot has since been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    index: usize,
    generation: u64,
}

impl EntryHandle {
    /// Slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    /// Generation the slot had when the handle was issued.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

/// Slot pool with free-list reuse.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the arena holds no live entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store a value, reusing a free slot when one exists.
    pub fn insert(&mut self, value: T) -> EntryHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            if let Some(slot) = self.slots.get_mut(index) {
                slot.value = Some(value);
                return EntryHandle {
                    index,
                    generation: slot.generation,
                };
            }
        }

        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        EntryHandle {
            index,
            generation: 0,
        }
    }

    /// Look up a live entry.
    #[must_use]
    pub fn get(&self, handle: EntryHandle) -> Option<&T> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Look up a live entry mutably.
    pub fn get_mut(&mut self, handle: EntryHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Check if a handle still refers to a live entry.
    #[must_use]
    pub fn contains(&self, handle: EntryHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove an entry, invalidating its handle.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Iterate over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (EntryHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    EntryHandle {
                        index,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_remove_invalidates_handle() {
        let mut arena = Arena::new();
        let a = arena.insert(1);

        assert_eq!(arena.remove(a), Some(1));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let mut arena = Arena::new();
        let old = arena.insert(1);
        arena.remove(old);
        let new = arena.insert(2);

        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_iter_skips_removed() {
        let mut arena = Arena::new();
        let a = arena.insert('a');
        arena.insert('b');
        arena.remove(a);

        let values: Vec<char> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!['b']);
    }

    #[test]
    fn test_get_mut() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        if let Some(v) = arena.get_mut(a) {
            *v = 5;
        }
        assert_eq!(arena.get(a), Some(&5));
    }
}
