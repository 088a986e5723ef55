//! Thread-safe FIFO queue used for pipeline input and output channels.

/// An unbounded multi-producer multi-consumer FIFO queue.
///
/// This is a thin wrapper holding both halves of a kanal channel,
/// providing the blocking/non-blocking pop pair the pipeline needs.
/// Cloning is cheap and shares the same underlying queue, so any thread
/// may push or pop concurrently.
///
/// The queue itself never drops items and carries no close signal;
/// capacity limits are enforced by the caller polling [`len`] before
/// pushing (see the streaming pipeline's backpressure policy).
///
/// [`len`]: BlockingQueue::len
///
/// # Example
///
/// ```rust
/// use millrace::queue::BlockingQueue;
///
/// let queue = BlockingQueue::new();
/// queue.push(1);
/// queue.push(2);
///
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.try_pop(), Some(1));
/// assert_eq!(queue.wait_and_pop(), Some(2));
/// assert!(queue.is_empty());
/// ```
pub struct BlockingQueue<T> {
    tx: kanal::Sender<T>,
    rx: kanal::Receiver<T>,
}

impl<T> BlockingQueue<T> {
    /// Create a new empty queue.
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Self { tx, rx }
    }

    /// Append an item to the back of the queue and wake one waiter.
    pub fn push(&self, item: T) {
        // Cannot fail: this handle keeps the receiver side alive.
        let _ = self.tx.send(item);
    }

    /// Pop the front item without blocking.
    ///
    /// Returns `None` if the queue is currently empty.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(Some(item)) => Some(item),
            _ => None,
        }
    }

    /// Pop the front item, blocking until one is available.
    pub fn wait_and_pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        for i in 0..10 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_wait_and_pop_blocks_until_push() {
        let queue = BlockingQueue::new();
        let popper = queue.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let value = popper.wait_and_pop();
            (value, start.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        queue.push(7u32);

        let (value, elapsed) = handle.join().unwrap();
        assert_eq!(value, Some(7));
        assert!(elapsed >= Duration::from_millis(40));
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        let queue = BlockingQueue::new();
        let count = 100u32;

        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(thread::spawn(move || {
                for i in 0..count {
                    queue.push(p * count + i);
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(thread::spawn(move || {
                let mut received = Vec::new();
                for _ in 0..count {
                    received.push(queue.wait_and_pop().unwrap());
                }
                received
            }));
        }

        for producer in producers {
            producer.join().unwrap();
        }
        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();

        let expected: Vec<u32> = (0..4 * count).collect();
        assert_eq!(all, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shared_clones_see_same_queue() {
        let a = BlockingQueue::new();
        let b = a.clone();

        a.push("x");
        assert_eq!(b.len(), 1);
        assert_eq!(b.try_pop(), Some("x"));
        assert!(a.is_empty());
    }
}
