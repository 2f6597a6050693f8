//! Lock-free MPMC queues for handing data between the control and audio domains.

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
}

/// A bounded lock-free queue for communication between audio and control threads.
///
/// Pushes from several producers are linearized, so values pushed by one
/// producer are always popped in the order that producer pushed them.
pub struct EventQueue<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> std::fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    pub fn try_push(&self, value: T) -> Result<(), QueueError> {
        self.queue.push(value).map_err(|_| QueueError::Full)
    }

    /// Pushes `value`, handing it back when the queue is full so ownership is
    /// never lost on the producer side.
    pub fn push_or_return(&self, value: T) -> Result<(), T> {
        self.queue.push(value)
    }

    pub fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.pop().ok_or(QueueError::Empty)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn rejected_value_is_handed_back() {
        let queue = EventQueue::new(1);
        queue.push_or_return(String::from("first")).unwrap();
        let rejected = queue.push_or_return(String::from("second")).unwrap_err();
        assert_eq!(rejected, "second");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn per_producer_order_is_preserved() {
        let queue = EventQueue::new(1024);
        let producers = (0..4u32)
            .map(|producer| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for seq in 0..200u32 {
                        queue.try_push((producer, seq)).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in producers {
            handle.join().unwrap();
        }

        let mut last = [None::<u32>; 4];
        while let Ok((producer, seq)) = queue.try_pop() {
            let slot = &mut last[producer as usize];
            if let Some(previous) = *slot {
                assert!(seq > previous);
            }
            *slot = Some(seq);
        }
        assert!(last.iter().all(|seq| *seq == Some(199)));
    }
}
