//! Event pool and active-event table
//!
//! Events are handed out detached: the caller activates the backend with the
//! event's data and only then either [`EventManager::track`]s it or gives it
//! back through [`EventManager::release_event`].

use std::collections::HashMap;

use crate::event::AtlEvent;
use crate::middleware::AudioMiddleware;
use crate::pool::InstancePool;
use crate::types::{EventId, INVALID_EVENT_ID, Subsystem};

pub struct EventManager {
    pool: InstancePool<AtlEvent, EventId>,
    active: HashMap<EventId, AtlEvent>,
}

impl EventManager {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool: InstancePool::new(pool_size, INVALID_EVENT_ID + 1),
            active: HashMap::new(),
        }
    }

    /// Fill the free pool up to its reserve size
    pub fn initialize(&mut self, middleware: &mut dyn AudioMiddleware) {
        let missing = self.pool.shortfall(self.active.len());
        for _ in 0..missing {
            let id = self.pool.next_id();
            match middleware.new_event_data(id) {
                Some(data) => {
                    let event = AtlEvent::new(id, Subsystem::Middleware, Some(data));
                    if self.pool.push_reserved(event).is_err() {
                        break;
                    }
                }
                None => {
                    self.pool.undo_id();
                    log::warn!("Event pool prefill stopped: backend refused new event data");
                    break;
                }
            }
        }
        log::debug!("Event pool holds {} free events", self.pool.reserved.len());
    }

    /// Delete backend data of every pooled and active event
    pub fn release(&mut self, middleware: &mut dyn AudioMiddleware) {
        for (_, event) in self.active.drain() {
            if let Some(data) = event.data {
                middleware.delete_event_data(data);
            }
        }
        for event in self.pool.reserved.drain(..) {
            if let Some(data) = event.data {
                middleware.delete_event_data(data);
            }
        }
    }

    /// Fresh event for `sender`; internal events never carry backend data
    pub fn get_event(
        &mut self,
        sender: Subsystem,
        middleware: &mut dyn AudioMiddleware,
    ) -> Option<AtlEvent> {
        match sender {
            Subsystem::Middleware => {
                if let Some(event) = self.pool.pop_reserved() {
                    return Some(event);
                }
                let id = self.pool.next_id();
                match middleware.new_event_data(id) {
                    Some(data) => Some(AtlEvent::new(id, sender, Some(data))),
                    None => {
                        self.pool.undo_id();
                        log::warn!("Backend could not allocate event data (id {})", id);
                        None
                    }
                }
            }
            Subsystem::AtlInternal => Some(AtlEvent::new(self.pool.next_id(), sender, None)),
        }
    }

    /// Start tracking an activated event
    pub fn track(&mut self, event: AtlEvent) {
        if self.active.insert(event.id, event).is_some() {
            log::error!("Event id collision in active event table");
        }
    }

    /// Stop tracking and hand back ownership
    pub fn take(&mut self, id: EventId) -> Option<AtlEvent> {
        self.active.remove(&id)
    }

    /// Recycle `event` into the pool, or free its backend data
    pub fn release_event(&mut self, mut event: AtlEvent, middleware: &mut dyn AudioMiddleware) {
        if event.sender != Subsystem::Middleware {
            return;
        }
        let Some(data) = event.data else {
            return;
        };
        if self.pool.reserved.len() < self.pool.reserve_size {
            middleware.reset_event_data(data);
            event.clear();
            if let Err(event) = self.pool.push_reserved(event) {
                if let Some(data) = event.data {
                    middleware.delete_event_data(data);
                }
            }
        } else {
            middleware.delete_event_data(data);
        }
    }

    pub fn lookup(&self, id: EventId) -> Option<&AtlEvent> {
        self.active.get(&id)
    }

    pub fn lookup_mut(&mut self, id: EventId) -> Option<&mut AtlEvent> {
        self.active.get_mut(&id)
    }

    pub fn is_playing(&self, id: EventId) -> bool {
        self.active.get(&id).is_some_and(AtlEvent::is_playing)
    }

    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    pub fn num_free(&self) -> usize {
        self.pool.reserved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventState;
    use crate::test_support::MockMiddleware;

    #[test]
    fn test_prefill_and_reuse() {
        let mut mw = MockMiddleware::new();
        let mut manager = EventManager::new(4);
        manager.initialize(&mut mw);
        assert_eq!(manager.num_free(), 4);
        assert_eq!(mw.count("new_event_data"), 4);

        let event = manager.get_event(Subsystem::Middleware, &mut mw).unwrap();
        assert!(event.data.is_some());
        assert_eq!(manager.num_free(), 3);
        assert_eq!(mw.count("new_event_data"), 4);

        manager.release_event(event, &mut mw);
        assert_eq!(manager.num_free(), 4);
        assert_eq!(mw.count("reset_event_data"), 1);
    }

    #[test]
    fn test_mint_failure_returns_id() {
        let mut mw = MockMiddleware::new();
        let mut manager = EventManager::new(0);
        mw.state.lock().fail_event_data = true;
        assert!(manager.get_event(Subsystem::Middleware, &mut mw).is_none());

        mw.state.lock().fail_event_data = false;
        let event = manager.get_event(Subsystem::Middleware, &mut mw).unwrap();
        assert_eq!(event.id, 1);
    }

    #[test]
    fn test_internal_events_are_not_pooled() {
        let mut mw = MockMiddleware::new();
        let mut manager = EventManager::new(2);
        let event = manager.get_event(Subsystem::AtlInternal, &mut mw).unwrap();
        assert!(event.data.is_none());
        manager.release_event(event, &mut mw);
        assert_eq!(manager.num_free(), 0);
        assert_eq!(mw.count("delete_event_data"), 0);
    }

    #[test]
    fn test_full_pool_deletes() {
        let mut mw = MockMiddleware::new();
        let mut manager = EventManager::new(1);
        manager.initialize(&mut mw);
        let a = manager.get_event(Subsystem::Middleware, &mut mw).unwrap();
        let b = manager.get_event(Subsystem::Middleware, &mut mw).unwrap();
        manager.release_event(a, &mut mw);
        manager.release_event(b, &mut mw);
        assert_eq!(manager.num_free(), 1);
        assert_eq!(mw.count("delete_event_data"), 1);
    }

    #[test]
    fn test_track_take_and_playing() {
        let mut mw = MockMiddleware::new();
        let mut manager = EventManager::new(2);
        let mut event = manager.get_event(Subsystem::Middleware, &mut mw).unwrap();
        event.state = EventState::Playing;
        let id = event.id;
        manager.track(event);
        assert!(manager.is_playing(id));
        assert_eq!(manager.num_active(), 1);

        manager.lookup_mut(id).unwrap().state = EventState::Loading;
        assert!(!manager.is_playing(id));

        let event = manager.take(id).unwrap();
        assert_eq!(manager.num_active(), 0);
        manager.release_event(event, &mut mw);

        manager.release(&mut mw);
        assert_eq!(mw.count("delete_event_data"), 1);
    }
}
