//! Listeners
//!
//! One default listener always exists. A fixed number of extra listeners is
//! preallocated and can be reserved. While an override listener is set,
//! requests addressed to it land on the default listener instead, and
//! requests that name no listener are rejected.

use std::collections::HashMap;

use crate::middleware::{AudioMiddleware, ListenerData};
use crate::position::{Vec3, WorldTransform};
use crate::types::{AudioObjectId, INVALID_AUDIO_OBJECT_ID, RequestStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerObject {
    pub id: AudioObjectId,
    pub data: ListenerData,
    pub transform: WorldTransform,
}

impl ListenerObject {
    fn new(id: AudioObjectId, data: ListenerData) -> Self {
        Self {
            id,
            data,
            transform: WorldTransform::default(),
        }
    }
}

pub struct ListenerManager {
    default_listener: Option<ListenerObject>,
    free: Vec<ListenerObject>,
    active: HashMap<AudioObjectId, ListenerObject>,
    override_id: AudioObjectId,
    num_reserved: usize,
}

impl ListenerManager {
    pub fn new(num_reserved: usize) -> Self {
        Self {
            default_listener: None,
            free: Vec::with_capacity(num_reserved),
            active: HashMap::new(),
            override_id: INVALID_AUDIO_OBJECT_ID,
            num_reserved,
        }
    }

    /// Create the default listener and the reservable ones.
    ///
    /// `allocate_id` hands out ids from the object id space.
    pub fn initialize(
        &mut self,
        middleware: &mut dyn AudioMiddleware,
        mut allocate_id: impl FnMut() -> AudioObjectId,
    ) {
        if self.default_listener.is_none() {
            let id = allocate_id();
            let data = middleware.new_default_listener_data(id);
            self.default_listener = Some(ListenerObject::new(id, data));
        }

        while self.free.len() + self.active.len() < self.num_reserved {
            let id = allocate_id();
            let data = middleware.new_listener_data(id);
            self.free.push(ListenerObject::new(id, data));
        }
    }

    pub fn release(&mut self, middleware: &mut dyn AudioMiddleware) {
        for listener in self
            .free
            .drain(..)
            .chain(self.active.drain().map(|(_, l)| l))
            .chain(self.default_listener.take())
        {
            middleware.delete_listener_data(listener.data);
        }
        self.override_id = INVALID_AUDIO_OBJECT_ID;
    }

    pub fn default_listener_id(&self) -> AudioObjectId {
        self.default_listener
            .as_ref()
            .map_or(INVALID_AUDIO_OBJECT_ID, |l| l.id)
    }

    /// Position snapshot used by per-object updates
    pub fn default_listener_position(&self) -> Vec3 {
        self.default_listener
            .as_ref()
            .map_or(Vec3::ZERO, |l| l.transform.position)
    }

    pub fn reserve_id(&mut self) -> Option<AudioObjectId> {
        match self.free.pop() {
            Some(listener) => {
                let id = listener.id;
                self.active.insert(id, listener);
                Some(id)
            }
            None => {
                log::warn!("All {} reservable listeners are in use", self.num_reserved);
                None
            }
        }
    }

    pub fn release_id(&mut self, id: AudioObjectId) -> bool {
        if id == self.default_listener_id() {
            log::warn!("The default listener cannot be released");
            return false;
        }
        match self.active.remove(&id) {
            Some(mut listener) => {
                listener.transform = WorldTransform::default();
                if self.override_id == id {
                    self.override_id = INVALID_AUDIO_OBJECT_ID;
                }
                self.free.push(listener);
                true
            }
            None => {
                log::warn!("Release of unknown listener {}", id);
                false
            }
        }
    }

    pub fn lookup(&self, id: AudioObjectId) -> Option<&ListenerObject> {
        match &self.default_listener {
            Some(listener) if listener.id == id => Some(listener),
            _ => self.active.get(&id),
        }
    }

    pub fn lookup_mut(&mut self, id: AudioObjectId) -> Option<&mut ListenerObject> {
        match &mut self.default_listener {
            Some(listener) if listener.id == id => Some(listener),
            _ => self.active.get_mut(&id),
        }
    }

    pub fn override_listener_id(&self) -> AudioObjectId {
        self.override_id
    }

    /// Accepts `INVALID_AUDIO_OBJECT_ID` (clear) or a live listener
    pub fn set_override_listener_id(&mut self, id: AudioObjectId) -> bool {
        if id == INVALID_AUDIO_OBJECT_ID || self.lookup(id).is_some() {
            self.override_id = id;
            true
        } else {
            log::error!("Cannot override with unknown listener {}", id);
            false
        }
    }

    /// Listener a request addressed to `requested` acts on
    pub fn resolve(&self, requested: AudioObjectId) -> Option<AudioObjectId> {
        if self.override_id != INVALID_AUDIO_OBJECT_ID {
            if requested == self.override_id {
                Some(self.default_listener_id())
            } else if requested == INVALID_AUDIO_OBJECT_ID {
                None
            } else {
                Some(requested)
            }
        } else if requested == INVALID_AUDIO_OBJECT_ID {
            Some(self.default_listener_id())
        } else {
            Some(requested)
        }
    }

    /// Forward to the backend, caching the transform only on success
    pub fn set_position(
        &mut self,
        id: AudioObjectId,
        transform: WorldTransform,
        middleware: &mut dyn AudioMiddleware,
    ) -> RequestStatus {
        let Some(listener) = self.lookup_mut(id) else {
            log::error!("Set position on unknown listener {}", id);
            return RequestStatus::FailureInvalidObjectId;
        };
        let status = middleware.set_listener_position(listener.data, &transform);
        if status.is_success() {
            listener.transform = transform;
        }
        status
    }

    pub fn num_active(&self) -> usize {
        self.active.len()
    }
}
