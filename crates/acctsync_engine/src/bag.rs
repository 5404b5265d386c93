//! Subscriber bags with stable removal tokens.

/// Handle returned by [`SubscriberBag::insert`].
///
/// The generation makes a token stale once its slot is reused, so removing
/// twice never drops somebody else's subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BagToken {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// An arena of subscribers.
#[derive(Debug)]
pub struct SubscriberBag<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> SubscriberBag<T> {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Adds a subscriber.
    pub fn insert(&mut self, value: T) -> BagToken {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return BagToken {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        BagToken {
            index,
            generation: 0,
        }
    }

    /// Removes the subscriber behind `token`, if it is still there.
    pub fn remove(&mut self, token: BagToken) -> Option<T> {
        let slot = self.slots.get_mut(token.index as usize)?;
        if slot.generation != token.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(token.index);
        self.len -= 1;
        Some(value)
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no subscriber is live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates live subscribers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }
}

impl<T: Clone> SubscriberBag<T> {
    /// Copies the live subscribers out so dispatch does not hold the bag.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> Default for SubscriberBag<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let mut bag = SubscriberBag::new();
        let a = bag.insert("a");
        let b = bag.insert("b");
        assert_eq!(bag.len(), 2);

        assert_eq!(bag.remove(a), Some("a"));
        assert_eq!(bag.snapshot(), vec!["b"]);
        assert_eq!(bag.remove(b), Some("b"));
        assert!(bag.is_empty());
    }

    #[test]
    fn stale_token_does_not_remove_new_occupant() {
        let mut bag = SubscriberBag::new();
        let a = bag.insert(1);
        assert_eq!(bag.remove(a), Some(1));

        let b = bag.insert(2);
        assert_ne!(a, b);
        assert_eq!(bag.remove(a), None);
        assert_eq!(bag.snapshot(), vec![2]);
        assert_eq!(bag.remove(b), Some(2));
    }

    #[test]
    fn double_remove_is_noop() {
        let mut bag = SubscriberBag::new();
        let a = bag.insert(1);
        bag.insert(2);
        assert_eq!(bag.remove(a), Some(1));
        assert_eq!(bag.remove(a), None);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn snapshot_survives_removal() {
        let mut bag = SubscriberBag::new();
        let a = bag.insert(1);
        bag.insert(2);
        let snapshot = bag.snapshot();
        bag.remove(a);
        assert_eq!(snapshot, vec![1, 2]);
        assert_eq!(bag.snapshot(), vec![2]);
    }
}
