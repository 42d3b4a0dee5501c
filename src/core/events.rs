use std::{collections::HashMap, sync::{atomic::AtomicUsize, RwLock}};
use super::engine::EngineState;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Progress text for handpad box while operation runs
    Message([String; 3]),
    StateChanged(EngineState),
}

impl Event {
    pub fn message(line0: &str, line1: &str, line2: &str) -> Self {
        Self::Message([line0.to_string(), line1.to_string(), line2.to_string()])
    }
}

type SubscriptionFun = dyn Fn(Event) + Send + Sync + 'static;

pub struct EventSubscriptions {
    items:   RwLock<HashMap<usize, Box<SubscriptionFun>>>,
    next_id: AtomicUsize,
}

impl EventSubscriptions {
    pub fn new() -> Self {
        Self {
            items:     RwLock::new(HashMap::new()),
            next_id:   AtomicUsize::new(1),
        }
    }

    pub fn subscribe(
        &self,
        fun: impl Fn(Event) + Send + Sync + 'static
    ) {
        let mut items = self.items.write().unwrap();
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        items.insert(id, Box::new(fun));
    }

    pub fn notify(&self, event: Event) {
        let items = self.items.read().unwrap();
        for s in items.values() {
            s(event.clone());
        }
    }
}

#[test]
fn test_event_subscriptions() {
    use std::sync::{Arc, Mutex};
    let events = EventSubscriptions::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..2 {
        events.subscribe({
            let received = Arc::clone(&received);
            move |event| received.lock().unwrap().push(event)
        });
    }
    events.notify(Event::message("Plate solving", "", ""));
    events.notify(Event::StateChanged(EngineState::Idle));
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 4);
    assert_eq!(received.iter().filter(|e| **e == Event::StateChanged(EngineState::Idle)).count(), 2);
}
