//! Thread-safe FIFO queue, instantiated once for the ready queue and once
//! for the parked queue.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A mutex-guarded FIFO queue.
///
/// Producers and consumers may call from any thread; each operation holds
/// the queue's own lock for the duration of the push/pop only, never across
/// a context switch. There is no blocking wait for "queue became non-empty":
/// consumers poll with a short sleep between empty checks.
#[derive(Debug)]
pub(crate) struct FifoQueue<T> {
    entries: Mutex<VecDeque<T>>,
}

impl<T> FifoQueue<T> {
    pub(crate) fn new() -> Self {
        FifoQueue {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends `entry` at the tail. Wakes no one.
    pub(crate) fn push_tail(&self, entry: T) {
        self.entries.lock().push_back(entry);
    }

    /// Removes and returns the oldest entry, or `None` when empty.
    pub(crate) fn pop_head(&self) -> Option<T> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[allow(unused)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order_single_thread() {
        let q = FifoQueue::new();
        for i in 0..100 {
            q.push_tail(i);
        }
        for i in 0..100 {
            assert_eq!(q.pop_head(), Some(i));
        }
        assert_eq!(q.pop_head(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_concurrent_pushes_preserve_per_thread_order() {
        const PER_THREAD: u32 = 1000;

        let q = Arc::new(FifoQueue::new());

        let producers: Vec<_> = (0u32..4)
            .map(|tid| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for seq in 0..PER_THREAD {
                        q.push_tail((tid, seq));
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(q.len(), 4 * PER_THREAD as usize);

        // Pop order must be a linearization preserving each producer's own
        // push order: per thread id, sequence numbers come out ascending.
        let mut last_seen = [None::<u32>; 4];
        while let Some((tid, seq)) = q.pop_head() {
            if let Some(prev) = last_seen[tid as usize] {
                assert!(prev < seq, "thread {tid} popped {seq} after {prev}");
            }
            last_seen[tid as usize] = Some(seq);
        }

        for (tid, last) in last_seen.iter().enumerate() {
            assert_eq!(*last, Some(PER_THREAD - 1), "thread {tid} entries missing");
        }
    }
}
