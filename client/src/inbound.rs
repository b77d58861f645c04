//! Queue between the socket reader task and the host tick

use shared::InboundMessage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared FIFO of decoded messages. The reader appends, the tick drains by
/// swapping the whole queue out under the lock.
#[derive(Debug, Clone, Default)]
pub struct InboundQueue {
    messages: Arc<Mutex<VecDeque<InboundMessage>>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_all(&self, messages: impl IntoIterator<Item = InboundMessage>) {
        self.lock().extend(messages);
    }

    /// Takes every queued message, leaving the queue empty.
    pub fn drain(&self) -> VecDeque<InboundMessage> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<InboundMessage>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_returns_messages_in_order() {
        let queue = InboundQueue::new();
        queue.push_all(vec![
            InboundMessage::parse("SUCCESS"),
            InboundMessage::parse("SET_REP|7"),
        ]);

        let drained: Vec<_> = queue.drain().into_iter().collect();
        assert_eq!(drained[0].keyword(), "SUCCESS");
        assert_eq!(drained[1].keyword(), "SET_REP");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = InboundQueue::new();
        let mut handles = Vec::new();

        for t in 0..4 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    queue.push_all([InboundMessage::parse(&format!("ROTATE|{}", t * 1000 + i))]);
                }
            }));
        }

        let mut seen = 0;
        while handles.iter().any(|h| !h.is_finished()) {
            seen += queue.drain().len();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        seen += queue.drain().len();

        assert_eq!(seen, 1000);
    }
}
