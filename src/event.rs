//! Hand-off of service events from the service thread to the tick thread.

use crate::listener::{guarded, EventListener, EventListeners, ListenerId};
use crate::types::TangoEvent;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Producer side of the broker. Cheap to clone and safe to use from any thread.
#[derive(Clone, Default)]
pub struct EventSink {
    pending: Arc<Mutex<Vec<TangoEvent>>>,
}

impl EventSink {
    pub fn push(&self, event: TangoEvent) {
        self.pending.lock().push(event);
    }

    fn take(&self) -> Vec<TangoEvent> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// Collects events pushed from any thread and fans them out on the tick thread.
#[derive(Default)]
pub struct EventBroker {
    sink: EventSink,
    listeners: EventListeners,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer handle for service callbacks.
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn push(&self, event: TangoEvent) {
        self.sink.push(event);
    }

    pub fn add_listener(&mut self, listener: Weak<dyn EventListener>) -> ListenerId {
        self.listeners.add(listener, ())
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn prune(&mut self) -> usize {
        self.listeners.prune()
    }

    /// Swap out everything pushed so far and deliver it in arrival order.
    ///
    /// `consume` sees each event first; events it claims (returns `true`
    /// for) are not broadcast. The pending lock is released before any
    /// listener runs. Returns the number of events broadcast.
    pub fn drain_and_broadcast<F>(&mut self, mut consume: F) -> usize
    where
        F: FnMut(&TangoEvent) -> bool,
    {
        let events = self.sink.take();
        let mut broadcast = 0;
        for event in events.iter() {
            if consume(event) {
                log::trace!("Event {:?} consumed before broadcast", event.key);
                continue;
            }
            for (id, listener, _) in self.listeners.iter() {
                guarded("event", id, || listener.on_event(event));
            }
            broadcast += 1;
        }
        broadcast
    }

    pub fn broadcast_connect(&self) {
        for (id, listener, _) in self.listeners.iter() {
            guarded("event", id, || listener.on_connect());
        }
    }

    pub fn broadcast_disconnect(&self) {
        for (id, listener, _) in self.listeners.iter() {
            guarded("event", id, || listener.on_disconnect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKey, EventType};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        connects: Mutex<u32>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: &TangoEvent) {
            self.seen.lock().push(event.message.clone());
        }

        fn on_connect(&self) {
            *self.connects.lock() += 1;
        }
    }

    struct Panicker;

    impl EventListener for Panicker {
        fn on_event(&self, _event: &TangoEvent) {
            panic!("broken listener");
        }
    }

    fn event(key: EventKey, msg: &str) -> TangoEvent {
        TangoEvent::new(key, EventType::General, msg, 0.0)
    }

    #[test]
    fn test_delivers_in_order_exactly_once() {
        let rec = Arc::new(Recorder::default());
        let mut broker = EventBroker::new();
        let weak: Weak<dyn EventListener> = Arc::downgrade(&rec) as Weak<dyn EventListener>;
        broker.add_listener(weak);

        let sink = broker.sink();
        let producer = std::thread::spawn(move || {
            for i in 0..50 {
                sink.push(event(EventKey::Unknown, &i.to_string()));
            }
        });
        producer.join().unwrap();

        assert_eq!(broker.drain_and_broadcast(|_| false), 50);
        assert_eq!(broker.drain_and_broadcast(|_| false), 0);
        let seen = rec.seen.lock();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(*seen, expected);
    }

    #[test]
    fn test_consumed_events_are_not_broadcast() {
        let rec = Arc::new(Recorder::default());
        let mut broker = EventBroker::new();
        broker.add_listener(Arc::downgrade(&rec) as Weak<dyn EventListener>);
        broker.push(event(EventKey::ExportResult, "0"));
        broker.push(event(EventKey::TooFewFeatures, "features"));
        let n = broker.drain_and_broadcast(|e| e.is_save_feedback());
        assert_eq!(n, 1);
        assert_eq!(*rec.seen.lock(), vec!["features".to_string()]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bad = Arc::new(Panicker);
        let rec = Arc::new(Recorder::default());
        let mut broker = EventBroker::new();
        broker.add_listener(Arc::downgrade(&bad) as Weak<dyn EventListener>);
        broker.add_listener(Arc::downgrade(&rec) as Weak<dyn EventListener>);
        broker.push(event(EventKey::ServiceException, "fault"));
        broker.drain_and_broadcast(|_| false);
        assert_eq!(rec.seen.lock().len(), 1);
    }

    #[test]
    fn test_connect_broadcast() {
        let rec = Arc::new(Recorder::default());
        let mut broker = EventBroker::new();
        broker.add_listener(Arc::downgrade(&rec) as Weak<dyn EventListener>);
        broker.broadcast_connect();
        broker.broadcast_disconnect();
        assert_eq!(*rec.connects.lock(), 1);
    }
}
