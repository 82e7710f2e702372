//! Fixed-capacity ring of timestamped events.
//!
//! Both the sound generator and the display keep a queue of register
//! writes stamped with the 2 MHz cycle count at which they happened.  The
//! consumer (the audio callback, or the once-per-frame render pass) walks
//! the queue in order and retires entries without shifting the rest.
//!
//! Storage is a boxed arena whose length is a power of two; the read
//! cursor wraps by masking and a separate count tells full from empty, so
//! every slot is usable.

/// Cycle timestamp.  Wraps at 2³², all arithmetic on it is wrapping.
pub type Cycles = u32;

/// Anything that can sit in a [`TimedEventQueue`].
pub trait Timed {
    fn timestamp(&self) -> Cycles;
}

pub struct TimedEventQueue<T> {
    slots: Box<[T]>,
    mask: usize,
    read: usize,
    count: usize,
}

impl<T: Timed + Clone + Default> TimedEventQueue<T> {
    /// Create a queue holding up to `capacity` events.  `capacity` must be
    /// a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "event queue capacity must be a power of two"
        );
        Self {
            slots: vec![T::default(); capacity].into_boxed_slice(),
            mask: capacity - 1,
            read: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.count
    }

    fn slot(&self, offset: usize) -> usize {
        (self.read + offset) & self.mask
    }

    /// Append `event`.
    ///
    /// When the ring is full the oldest pending event is retired to make
    /// room and handed back, so the caller can report the loss.
    pub fn enqueue(&mut self, event: T) -> Option<T> {
        let dropped = if self.is_full() { self.advance() } else { None };
        let write = self.slot(self.count);
        self.slots[write] = event;
        self.count += 1;
        dropped
    }

    /// Oldest pending event.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.read])
        }
    }

    pub fn peek_mut(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            None
        } else {
            Some(&mut self.slots[self.read])
        }
    }

    /// Retire the oldest pending event.
    pub fn advance(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let event = self.slots[self.read].clone();
        self.read = self.slot(1);
        self.count -= 1;
        Some(event)
    }

    /// Most recently enqueued event that is still pending.
    pub fn newest(&self) -> Option<&T> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.slot(self.count - 1)])
        }
    }

    /// Cycles between the oldest and the newest pending event.
    pub fn pending_span(&self) -> Cycles {
        match (self.peek(), self.newest()) {
            (Some(oldest), Some(newest)) => newest.timestamp().wrapping_sub(oldest.timestamp()),
            _ => 0,
        }
    }

    /// Pending events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.count).map(move |i| &self.slots[self.slot(i)])
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.read = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Stamp(Cycles);

    impl Timed for Stamp {
        fn timestamp(&self) -> Cycles {
            self.0
        }
    }

    #[test]
    fn fifo_order_and_wraparound() {
        let mut q = TimedEventQueue::new(4);
        for round in 0..5u32 {
            q.enqueue(Stamp(round * 10));
            q.enqueue(Stamp(round * 10 + 1));
            assert_eq!(q.len(), 2);
            assert_eq!(q.advance(), Some(Stamp(round * 10)));
            assert_eq!(q.peek(), Some(&Stamp(round * 10 + 1)));
            assert_eq!(q.advance(), Some(Stamp(round * 10 + 1)));
            assert!(q.is_empty());
        }
        assert_eq!(q.advance(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = TimedEventQueue::new(4);
        assert_eq!(q.enqueue(Stamp(1)), None);
        assert_eq!(q.enqueue(Stamp(2)), None);
        assert_eq!(q.enqueue(Stamp(3)), None);
        assert!(!q.is_full());
        assert_eq!(q.enqueue(Stamp(4)), None);
        assert!(q.is_full());
        assert_eq!(q.len(), q.capacity());

        assert_eq!(q.enqueue(Stamp(5)), Some(Stamp(1)));
        let pending: Vec<_> = q.iter().map(|s| s.0).collect();
        assert_eq!(pending, vec![2, 3, 4, 5]);
        assert_eq!(q.newest(), Some(&Stamp(5)));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn pending_span_wraps() {
        let mut q = TimedEventQueue::new(8);
        assert_eq!(q.pending_span(), 0);
        q.enqueue(Stamp(u32::MAX - 9));
        q.enqueue(Stamp(20));
        assert_eq!(q.pending_span(), 30);
        assert_eq!(q.newest(), Some(&Stamp(20)));
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.newest(), None);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_odd_capacity() {
        let _ = TimedEventQueue::<Stamp>::new(12);
    }
}
