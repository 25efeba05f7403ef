use crate::progress::state::Event;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, warn};
use parking_lot::Mutex;

pub const DEFAULT_QUEUE_BOUND: usize = 64;

pub struct Subscription {
    pub id: String,
    pub receiver: Receiver<Event>,
}

struct Subscriber {
    id: String,
    sender: Sender<Event>,
}

/// Single-writer, many-reader fan-out with bounded per-subscriber queues.
/// A subscriber whose queue saturates is dropped and must re-subscribe; no
/// back-pressure ever reaches the producer.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    queue_bound: usize,
}

impl EventBus {
    pub fn new(queue_bound: usize) -> Self {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
            queue_bound,
        }
    }

    pub fn subscribe(&self, id: &str, initial: Event) -> Subscription {
        let (sender, receiver) = bounded(self.queue_bound);
        // The initial status always fits: the queue is fresh.
        let _ = sender.try_send(initial);
        let mut subscribers = self.subscribers.lock();
        // A re-subscribe under the same identifier replaces the old queue.
        subscribers.retain(|s| s.id != id);
        subscribers.push(Subscriber {
            id: id.to_string(),
            sender,
        });
        debug!("Subscriber {id} registered ({} total)", subscribers.len());
        Subscription {
            id: id.to_string(),
            receiver,
        }
    }

    pub fn unsubscribe(&self, id: &str) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Fans the event out. Saturated or disconnected subscribers are
    /// dropped; the others are unaffected.
    pub fn publish(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| match subscriber.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Dropping slow subscriber {}", subscriber.id);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Dropping disconnected subscriber {}", subscriber.id);
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_QUEUE_BOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::state::{SourceProgress, SourceState};

    fn status_change(source: &str) -> Event {
        let mut progress = SourceProgress::new(source);
        progress.state = SourceState::Running;
        Event::StatusChange(progress)
    }

    #[test]
    fn test_subscriber_receives_initial_then_updates() {
        let bus = EventBus::default();
        let sub = bus.subscribe("ui", Event::InitialStatus(vec![]));

        bus.publish(&status_change("panelapp"));

        assert_eq!(sub.receiver.recv().unwrap(), Event::InitialStatus(vec![]));
        assert!(matches!(
            sub.receiver.recv().unwrap(),
            Event::StatusChange(p) if p.source == "panelapp"
        ));
    }

    #[test]
    fn test_slow_subscriber_dropped_others_unaffected() {
        let bus = EventBus::new(2);
        let slow = bus.subscribe("slow", Event::InitialStatus(vec![]));
        let healthy = bus.subscribe("healthy", Event::InitialStatus(vec![]));

        // Fill the slow queue (initial event occupies one slot already)
        // and keep draining the healthy one.
        for i in 0..5 {
            bus.publish(&status_change(&format!("source-{i}")));
            while healthy.receiver.try_recv().is_ok() {}
        }

        assert_eq!(bus.subscriber_count(), 1);
        // The slow queue still holds its backlog; it just stops growing.
        assert!(slow.receiver.try_recv().is_ok());
    }

    #[test]
    fn test_resubscribe_replaces_queue() {
        let bus = EventBus::default();
        let _first = bus.subscribe("ui", Event::InitialStatus(vec![]));
        let _second = bus.subscribe("ui", Event::InitialStatus(vec![]));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::default();
        let _sub = bus.subscribe("ui", Event::InitialStatus(vec![]));
        bus.unsubscribe("ui");
        assert_eq!(bus.subscriber_count(), 0);
    }
}
