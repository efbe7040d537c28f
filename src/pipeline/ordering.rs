//! Reorders out-of-order completions into strict sequence order.
//!
//! A sliding window of slots starts at the cursor `next_expected`. Slot `i`
//! holds sequence number `next_expected + i`. Completing a sequence fills its
//! slot; draining pops filled slots from the front until the first gap.
//!
//! The window only grows as far as the highest sequence seen, and never past
//! its configured width: a sequence number that far ahead is refused rather
//! than allocated.

use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderingError {
    #[error("sequence {sequence_number} already released (next expected is {next_expected})")]
    Stale {
        sequence_number: u64,
        next_expected: u64,
    },

    #[error("sequence {sequence_number} already reserved or completed")]
    Duplicate { sequence_number: u64 },

    #[error("sequence {sequence_number} is out of range (next expected is {next_expected})")]
    OutOfRange {
        sequence_number: u64,
        next_expected: u64,
    },
}

#[derive(Debug)]
enum Slot<T> {
    Empty,
    /// Accepted, result not produced yet.
    Reserved,
    Ready(T),
}

/// Window width of [`OrderingQueue::new`].
pub const DEFAULT_WINDOW: usize = 1024;

/// Sequence-ordered release buffer.
#[derive(Debug)]
pub struct OrderingQueue<T> {
    next_expected: u64,
    slots: VecDeque<Slot<T>>,
    /// Maximum distance ahead of `next_expected` a sequence may be.
    window: usize,
}

impl<T> OrderingQueue<T> {
    /// Creates a queue whose first released sequence is `first_sequence`.
    /// Accepts sequences up to [`DEFAULT_WINDOW`] ahead of the cursor.
    pub fn new(first_sequence: u64) -> Self {
        Self {
            next_expected: first_sequence,
            slots: VecDeque::new(),
            window: DEFAULT_WINDOW,
        }
    }

    /// Creates a queue that accepts sequence numbers below
    /// `first_sequence + window` (sliding with the cursor), with the slot
    /// storage pre-sized to `window`.
    pub fn with_window(first_sequence: u64, window: usize) -> Self {
        Self {
            next_expected: first_sequence,
            slots: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Whether `sequence_number` lies inside the window.
    pub fn in_window(&self, sequence_number: u64) -> bool {
        self.offset(sequence_number).is_some()
    }

    /// Next sequence number that will be released.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Number of sequences reserved or completed but not yet released.
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !matches!(slot, Slot::Empty))
            .count()
    }

    /// Number of completed results held back by a gap.
    pub fn buffered(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Marks `sequence_number` as accepted and in progress.
    pub fn reserve(&mut self, sequence_number: u64) -> Result<(), OrderingError> {
        let slot = self.slot_mut(sequence_number)?;
        match slot {
            Slot::Empty => {
                *slot = Slot::Reserved;
                Ok(())
            }
            Slot::Reserved | Slot::Ready(_) => Err(OrderingError::Duplicate { sequence_number }),
        }
    }

    /// Whether `sequence_number` could be reserved right now.
    pub fn can_reserve(&self, sequence_number: u64) -> bool {
        if sequence_number < self.next_expected {
            return false;
        }
        let Some(offset) = self.offset(sequence_number) else {
            return false;
        };
        !matches!(
            self.slots.get(offset),
            Some(Slot::Reserved) | Some(Slot::Ready(_))
        )
    }

    /// Stores the result for `sequence_number`.
    ///
    /// Reserving first is optional; submitting twice is an error.
    pub fn submit(&mut self, sequence_number: u64, item: T) -> Result<(), OrderingError> {
        let slot = self.slot_mut(sequence_number)?;
        if matches!(slot, Slot::Ready(_)) {
            return Err(OrderingError::Duplicate { sequence_number });
        }
        *slot = Slot::Ready(item);
        Ok(())
    }

    /// Releases every result that is next in line.
    pub fn drain(&mut self) -> Drain<'_, T> {
        Drain { queue: self }
    }

    /// Releases everything still buffered, in order, skipping gaps.
    ///
    /// Used at end of stream when no more completions can arrive. Returns the
    /// released items and the sequence numbers that were skipped.
    pub fn flush(&mut self) -> (Vec<T>, Vec<u64>) {
        let mut released = Vec::new();
        let mut skipped = Vec::new();
        while let Some(slot) = self.slots.pop_front() {
            match slot {
                Slot::Ready(item) => released.push(item),
                Slot::Empty | Slot::Reserved => skipped.push(self.next_expected),
            }
            self.next_expected += 1;
        }
        (released, skipped)
    }

    fn slot_mut(&mut self, sequence_number: u64) -> Result<&mut Slot<T>, OrderingError> {
        if sequence_number < self.next_expected {
            return Err(OrderingError::Stale {
                sequence_number,
                next_expected: self.next_expected,
            });
        }
        let out_of_range = OrderingError::OutOfRange {
            sequence_number,
            next_expected: self.next_expected,
        };
        let offset = self.offset(sequence_number).ok_or(out_of_range.clone())?;
        let len = offset.checked_add(1).ok_or(out_of_range)?;
        if len > self.slots.len() {
            self.slots.resize_with(len, || Slot::Empty);
        }
        Ok(&mut self.slots[offset])
    }

    /// Distance of `sequence_number` ahead of the cursor, if it is inside
    /// the window.
    fn offset(&self, sequence_number: u64) -> Option<usize> {
        let distance = sequence_number.checked_sub(self.next_expected)?;
        usize::try_from(distance)
            .ok()
            .filter(|offset| *offset < self.window)
    }
}

/// Iterator returned by [`OrderingQueue::drain`].
pub struct Drain<'a, T> {
    queue: &'a mut OrderingQueue<T>,
}

impl<T> Iterator for Drain<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if !matches!(self.queue.slots.front(), Some(Slot::Ready(_))) {
            return None;
        }
        let Some(Slot::Ready(item)) = self.queue.slots.pop_front() else {
            return None;
        };
        self.queue.next_expected += 1;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_submission_releases_immediately() {
        let mut queue = OrderingQueue::new(0);
        queue.submit(0, "a").unwrap();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec!["a"]);
        queue.submit(1, "b").unwrap();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(queue.next_expected(), 2);
    }

    #[test]
    fn test_out_of_order_completion_is_reordered() {
        let mut queue = OrderingQueue::new(1);
        queue.submit(3, 3).unwrap();
        assert_eq!(queue.drain().count(), 0);
        queue.submit(1, 1).unwrap();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec![1]);
        queue.submit(2, 2).unwrap();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec![2, 3]);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_every_permutation_releases_gap_free() {
        let orders: Vec<Vec<u64>> = vec![
            vec![0, 1, 2, 3],
            vec![3, 2, 1, 0],
            vec![1, 3, 0, 2],
            vec![2, 0, 3, 1],
            vec![0, 3, 1, 2],
        ];
        for order in orders {
            let mut queue = OrderingQueue::new(0);
            let mut released = Vec::new();
            for seq in &order {
                queue.reserve(*seq).unwrap();
            }
            for seq in order.iter().copied() {
                queue.submit(seq, seq).unwrap();
                released.extend(queue.drain());
            }
            assert_eq!(released, vec![0, 1, 2, 3], "completion order {:?}", order);
        }
    }

    #[test]
    fn test_duplicate_and_stale_submissions_are_rejected() {
        let mut queue = OrderingQueue::new(0);
        queue.submit(1, "x").unwrap();
        assert_eq!(
            queue.submit(1, "y"),
            Err(OrderingError::Duplicate { sequence_number: 1 })
        );

        queue.submit(0, "w").unwrap();
        assert_eq!(queue.drain().count(), 2);
        assert_eq!(
            queue.submit(0, "z"),
            Err(OrderingError::Stale {
                sequence_number: 0,
                next_expected: 2
            })
        );
    }

    #[test]
    fn test_reserve_tracks_in_progress_sequences() {
        let mut queue: OrderingQueue<&str> = OrderingQueue::new(0);
        queue.reserve(0).unwrap();
        assert!(!queue.can_reserve(0));
        assert_eq!(
            queue.reserve(0),
            Err(OrderingError::Duplicate { sequence_number: 0 })
        );
        assert!(queue.can_reserve(1));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.buffered(), 0);

        queue.submit(0, "done").unwrap();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec!["done"]);
        assert!(!queue.can_reserve(0));
    }

    #[test]
    fn test_held_results_wait_for_gap() {
        let mut queue = OrderingQueue::new(0);
        queue.reserve(0).unwrap();
        for seq in 1..5 {
            queue.submit(seq, seq).unwrap();
        }
        assert_eq!(queue.drain().count(), 0);
        assert_eq!(queue.buffered(), 4);
        assert_eq!(queue.pending(), 5);

        queue.submit(0, 0).unwrap();
        assert_eq!(queue.drain().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_flush_releases_past_gaps() {
        let mut queue = OrderingQueue::new(0);
        queue.submit(1, "b").unwrap();
        queue.submit(3, "d").unwrap();

        let (released, skipped) = queue.flush();
        assert_eq!(released, vec!["b", "d"]);
        assert_eq!(skipped, vec![0, 2]);
        assert_eq!(queue.next_expected(), 4);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_far_future_sequence_is_out_of_range() {
        let mut queue: OrderingQueue<u64> = OrderingQueue::with_window(0, 20);
        assert!(queue.in_window(19));
        assert!(!queue.in_window(20));
        assert_eq!(
            queue.reserve(5_000_000),
            Err(OrderingError::OutOfRange {
                sequence_number: 5_000_000,
                next_expected: 0
            })
        );

        // The window slides with the cursor.
        queue.submit(0, 0).unwrap();
        assert_eq!(queue.drain().count(), 1);
        assert!(queue.in_window(20));
        queue.reserve(20).unwrap();

        let (_, skipped) = queue.flush();
        assert_eq!(skipped, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_max_sequence_does_not_overflow() {
        let mut queue: OrderingQueue<u64> = OrderingQueue::new(0);
        assert!(!queue.can_reserve(u64::MAX));
        assert!(queue.submit(u64::MAX, 1).is_err());
        assert!(queue.submit(u64::MAX - 1, 1).is_err());
        assert!(queue.is_idle());

        let mut bounded: OrderingQueue<u64> = OrderingQueue::with_window(1, 20);
        assert!(!bounded.can_reserve(u64::MAX));
        assert_eq!(
            bounded.reserve(u64::MAX),
            Err(OrderingError::OutOfRange {
                sequence_number: u64::MAX,
                next_expected: 1
            })
        );
    }
}
