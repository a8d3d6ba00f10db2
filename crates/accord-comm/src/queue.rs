use std::collections::VecDeque;

use accord_core::Message;

/// Bounded FIFO of envelopes waiting for an agent to become reachable.
///
/// When full, the oldest envelope is evicted to make room.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    messages: VecDeque<Message>,
    bound: usize,
}

impl OutboundQueue {
    pub fn new(bound: usize) -> Self {
        OutboundQueue {
            messages: VecDeque::new(),
            bound: bound.max(1),
        }
    }

    /// Append an envelope, returning the evicted one if the queue was full
    pub fn push(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.messages.len() >= self.bound {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// Put envelopes back at the head, keeping their order
    pub fn requeue_front(&mut self, messages: Vec<Message>) {
        for message in messages.into_iter().rev() {
            self.messages.push_front(message);
        }
        while self.messages.len() > self.bound {
            self.messages.pop_back();
        }
    }

    pub fn drain(&mut self) -> Vec<Message> {
        self.messages.drain(..).collect()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn remove(&mut self, message_id: &str) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == message_id)?;
        self.messages.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
