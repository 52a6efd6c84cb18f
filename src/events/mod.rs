//! Typed publish/subscribe event bus.
//!
//! Handlers are registered per event type and invoked synchronously, in
//! registration order, on the thread that fires the event. The handler list
//! is copied out before dispatch, so a handler may itself register handlers
//! or fire further events.
//!
//! # Events
//!
//! - [`FirstValidFrameEvent`] - a live pipeline produced its first valid frame
//! - [`RunFinalizedEvent`] - a run was stopped and is about to be promoted
//! - [`FifoDeleteEvent`] - a completed run was evicted by the archive quota

use crate::sync::recover;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Marker for types that can travel over the [`EventBus`].
pub trait Event: Any + Send + Sync + std::fmt::Debug {}

impl<T: Any + Send + Sync + std::fmt::Debug> Event for T {}

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstValidFrameEvent {
    pub run_id: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFinalizedEvent {
    pub run_id: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoDeleteEvent {
    pub run_id: String,
    pub output_dir: String,
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<Handler>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = recover(self.handlers.read());
        f.debug_struct("EventBus")
            .field("event_types", &handlers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler<E, F>(&self, handler: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Handler = Arc::new(move |evt: &dyn Any| {
            if let Some(evt) = evt.downcast_ref::<E>() {
                handler(evt);
            }
        });
        recover(self.handlers.write())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    pub fn fire_event<E: Event>(&self, event: E) {
        let handlers: Vec<Handler> = recover(self.handlers.read())
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default();
        tracing::trace!("Firing {:?} to {} handler(s)", event, handlers.len());
        for handler in handlers {
            handler(&event as &dyn Any);
        }
    }

    #[cfg(test)]
    pub(crate) fn handler_count<E: Event>(&self) -> usize {
        recover(self.handlers.read())
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_by_type() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        bus.register_handler::<RunFinalizedEvent, _>(move |e| {
            s.lock().unwrap().push(format!("final:{}", e.run_id));
        });
        let s = seen.clone();
        bus.register_handler::<FifoDeleteEvent, _>(move |e| {
            s.lock().unwrap().push(format!("fifo:{}", e.run_id));
        });

        bus.fire_event(RunFinalizedEvent {
            run_id: "a".into(),
            output_dir: "/x/a".into(),
        });
        bus.fire_event(FifoDeleteEvent {
            run_id: "b".into(),
            output_dir: "/x/b".into(),
        });
        bus.fire_event(FirstValidFrameEvent {
            run_id: "c".into(),
            source: "test".into(),
        });

        assert_eq!(*seen.lock().unwrap(), vec!["final:a", "fifo:b"]);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let o = order.clone();
            bus.register_handler::<FirstValidFrameEvent, _>(move |_| o.lock().unwrap().push(i));
        }
        bus.fire_event(FirstValidFrameEvent {
            run_id: "r".into(),
            source: "s".into(),
        });
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(bus.handler_count::<FirstValidFrameEvent>(), 3);
    }

    #[test]
    fn test_handler_may_fire_nested_event() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(Mutex::new(0));
        let b = bus.clone();
        bus.register_handler::<RunFinalizedEvent, _>(move |e| {
            b.fire_event(FifoDeleteEvent {
                run_id: e.run_id.clone(),
                output_dir: e.output_dir.clone(),
            });
        });
        let h = hits.clone();
        bus.register_handler::<FifoDeleteEvent, _>(move |_| *h.lock().unwrap() += 1);
        bus.fire_event(RunFinalizedEvent {
            run_id: "x".into(),
            output_dir: "y".into(),
        });
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
