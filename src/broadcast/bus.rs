//! Message bus seam between producing and receiving contexts

use super::BroadcastMessage;
use tokio::sync::broadcast;

/// Fan-out channel carrying broadcast messages between contexts.
///
/// Delivery is fire-and-forget: a producer never learns whether anyone is
/// listening, and slow receivers lose old messages rather than applying
/// backpressure.
pub trait MessageBus: Send + Sync {
    fn send(&self, message: BroadcastMessage);
    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage>;
}

/// In-process bus connecting contexts within one program.
pub struct InProcessBus {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl InProcessBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InProcessBus {
    fn send(&self, message: BroadcastMessage) {
        // No receivers is fine; overlay contexts come and go.
        let _ = self.tx.send(message);
    }

    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_receivers_does_not_panic() {
        let bus = InProcessBus::new();
        bus.send(BroadcastMessage::Ping);
    }

    #[test]
    fn subscribers_see_messages_sent_after_subscribing() {
        let bus = InProcessBus::new();
        let mut rx = bus.subscribe();
        bus.send(BroadcastMessage::Ping);
        assert!(matches!(rx.try_recv().unwrap(), BroadcastMessage::Ping));
    }
}
