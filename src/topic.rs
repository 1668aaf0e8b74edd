//! In-process publish/subscribe topic.
//!
//! Single producer, many consumers. Every subscriber owns a ring buffer of
//! 16 entries; a subscriber that falls behind loses the oldest entries and
//! is told how many it missed. Subscribers only receive values published
//! after they subscribed, and unsubscribe by dropping their subscription.

use tokio::sync::broadcast;

const SUBSCRIBER_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct Topic<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Topic<T> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { sender }
    }

    /// Fan a value out to all current subscribers without blocking. A value
    /// published while nobody is subscribed is dropped.
    pub fn publish(&self, value: T) {
        let _ = self.sender.send(value);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }
}

impl<T: Clone> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// The next published value, or `None` once the topic is gone.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("slow topic subscriber dropped {missed} values");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
