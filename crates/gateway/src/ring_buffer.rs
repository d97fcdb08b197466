//! Fixed-capacity circular buffer with overwrite-oldest semantics.
//!
//! Writing into a full buffer silently replaces the oldest unread entry.
//! The loss is reported only through the push outcome: the push that fills
//! the buffer returns [`PushOutcome::BecameFull`] exactly once per fill, and
//! every later push into the full buffer returns [`PushOutcome::Overwrote`].
//!
//! ```text
//! capacity 4, after pushing a b c d e:
//!
//!   slots:  [ e | b | c | d ]
//!                 ^ head = 1 (next write), count = 4
//!   snapshot: b c d e      (starts at (head - count + N) mod N)
//! ```

/// What a single [`RingBuffer::push`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// Stored in a free slot; the buffer still has room.
    Stored,
    /// Stored in the last free slot; the buffer is now full.
    BecameFull,
    /// The buffer was already full; the oldest entry was discarded.
    Overwrote,
}

impl PushOutcome {
    #[cfg(test)]
    pub(crate) fn became_full(self) -> bool {
        self == Self::BecameFull
    }
}

pub(crate) struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    count: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items.
    ///
    /// Panics if `capacity` is zero; configuration validation rejects that
    /// before a buffer is ever built.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            count: 0,
        }
    }

    pub(crate) fn push(&mut self, item: T) -> PushOutcome {
        let capacity = self.capacity();
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % capacity;

        if self.count < capacity {
            self.count += 1;
            if self.count == capacity {
                PushOutcome::BecameFull
            } else {
                PushOutcome::Stored
            }
        } else {
            PushOutcome::Overwrote
        }
    }

    /// Current contents, oldest first. Does not consume anything: callers
    /// [`reset`](Self::reset) once the batch has been delivered.
    pub(crate) fn snapshot(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        let start = (self.head + capacity - self.count) % capacity;
        (0..self.count).filter_map(move |i| self.slots[(start + i) % capacity].as_ref())
    }

    /// Forget every entry. `head` stays where it is; slots only count as
    /// valid while `count > 0`.
    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn contents(buf: &RingBuffer<u32>) -> Vec<u32> {
        buf.snapshot().copied().collect()
    }

    #[test]
    fn new_buffer_is_empty() {
        let buf: RingBuffer<u32> = RingBuffer::new(6);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 6);
        assert!(contents(&buf).is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn zero_capacity_panics() {
        let _ = RingBuffer::<u32>::new(0);
    }

    #[test]
    fn seventh_push_overwrites_first() {
        let mut buf = RingBuffer::new(6);
        let outcomes: Vec<PushOutcome> = (1..=7).map(|i| buf.push(i)).collect();

        assert_eq!(
            outcomes,
            vec![
                PushOutcome::Stored,
                PushOutcome::Stored,
                PushOutcome::Stored,
                PushOutcome::Stored,
                PushOutcome::Stored,
                PushOutcome::BecameFull,
                PushOutcome::Overwrote,
            ]
        );
        assert_eq!(contents(&buf), vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn became_full_fires_only_on_the_filling_push() {
        let mut buf = RingBuffer::new(2);
        assert!(!buf.push(1).became_full());
        assert!(buf.push(2).became_full());
        assert!(!buf.push(3).became_full());
        assert!(!buf.push(4).became_full());
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut buf = RingBuffer::new(3);
        buf.push(10);
        buf.push(20);
        assert_eq!(contents(&buf), vec![10, 20]);
        assert_eq!(contents(&buf), vec![10, 20]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn reset_keeps_head_and_continues_in_order() {
        let mut buf = RingBuffer::new(3);
        buf.push(1);
        buf.push(2);
        buf.reset();
        assert!(buf.is_empty());
        assert!(contents(&buf).is_empty());

        buf.push(3);
        buf.push(4);
        assert_eq!(contents(&buf), vec![3, 4]);
    }

    #[test]
    fn refill_after_reset_signals_full_again() {
        let mut buf = RingBuffer::new(2);
        buf.push(1);
        assert!(buf.push(2).became_full());
        buf.reset();
        buf.push(3);
        assert!(buf.push(4).became_full());
        assert_eq!(contents(&buf), vec![3, 4]);
    }

    #[test]
    fn capacity_one_buffer() {
        let mut buf = RingBuffer::new(1);
        assert_eq!(buf.push(1), PushOutcome::BecameFull);
        assert_eq!(buf.push(2), PushOutcome::Overwrote);
        assert_eq!(contents(&buf), vec![2]);
    }

    proptest! {
        #[test]
        fn pushes_within_capacity_keep_insertion_order(
            capacity in 1usize..=16,
            items in prop::collection::vec(any::<u32>(), 0..=16),
        ) {
            let items: Vec<u32> = items.into_iter().take(capacity).collect();
            let mut buf = RingBuffer::new(capacity);
            for &i in &items {
                buf.push(i);
            }
            prop_assert_eq!(buf.len(), items.len());
            prop_assert_eq!(contents(&buf), items);
        }

        #[test]
        fn overflow_keeps_newest_capacity_items(
            capacity in 1usize..=8,
            items in prop::collection::vec(any::<u32>(), 0..=40),
        ) {
            let mut buf = RingBuffer::new(capacity);
            let mut full_signals = 0;
            for &i in &items {
                if buf.push(i).became_full() {
                    full_signals += 1;
                }
            }
            let keep = items.len().min(capacity);
            prop_assert!(buf.len() <= capacity);
            prop_assert_eq!(contents(&buf), items[items.len() - keep..].to_vec());
            prop_assert_eq!(full_signals, usize::from(items.len() >= capacity));
        }
    }
}
