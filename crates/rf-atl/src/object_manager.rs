//! Audio object registry
//!
//! Owns every reserved [`AudioObject`] plus a free pool of recycled ones.
//! The caller that reserved an id holds one reference; started events and
//! ray batches hold the others. An object is only recycled once the count
//! reaches zero, so releasing an id while sounds still play just drops the
//! caller's reference.

use std::collections::HashMap;

use crate::config::AtlConfig;
use crate::event::AtlEvent;
use crate::event_manager::EventManager;
use crate::middleware::AudioMiddleware;
use crate::object::{AtlObject, AudioObject, AudioObjectBase};
use crate::physics::RayHit;
use crate::pool::InstancePool;
use crate::position::Vec3;
use crate::propagation::{PropagationSettings, RayContext};
use crate::request::RequestSender;
use crate::types::{AudioObjectId, MIN_VALID_AUDIO_OBJECT_ID};

pub struct ObjectManager {
    pool: InstancePool<AudioObject, AudioObjectId>,
    active: HashMap<AudioObjectId, AudioObject>,
    settings: PropagationSettings,
    velocity_update_interval_ms: f32,
    velocity_tracking_threshold: f32,
    time_since_velocity_update_ms: f32,
}

impl ObjectManager {
    pub fn new(config: &AtlConfig) -> Self {
        Self {
            pool: InstancePool::new(config.object_pool_size, MIN_VALID_AUDIO_OBJECT_ID),
            active: HashMap::new(),
            settings: config.propagation_settings(),
            velocity_update_interval_ms: config.velocity_update_interval_ms,
            velocity_tracking_threshold: config.velocity_tracking_threshold,
            time_since_velocity_update_ms: 0.0,
        }
    }

    /// Fill the free pool up to its reserve size
    pub fn initialize(&mut self, middleware: &mut dyn AudioMiddleware) {
        let missing = self.pool.shortfall(self.active.len());
        for _ in 0..missing {
            let id = self.pool.next_id();
            let Some(data) = middleware.new_audio_object_data(id) else {
                self.pool.undo_id();
                log::warn!("Object pool prefill stopped: backend refused new object data");
                break;
            };
            let object = AudioObject::new(id, Some(data), &self.settings);
            if let Err(object) = self.pool.push_reserved(object) {
                if let Some(data) = object.base().data() {
                    middleware.delete_audio_object_data(data);
                }
                break;
            }
        }
        log::debug!("Object pool holds {} free objects", self.pool.reserved.len());
    }

    /// Unregister and free every object, active or pooled
    pub fn release(&mut self, middleware: &mut dyn AudioMiddleware) {
        for (_, mut object) in self.active.drain() {
            object.clear();
            if let Some(data) = object.base().data() {
                middleware.unregister_audio_object(data);
                middleware.delete_audio_object_data(data);
            }
        }
        for object in self.pool.reserved.drain(..) {
            if let Some(data) = object.base().data() {
                middleware.delete_audio_object_data(data);
            }
        }
    }

    /// Id the listener manager can use without clashing with objects
    pub fn allocate_id(&mut self) -> AudioObjectId {
        self.pool.next_id()
    }

    /// Reserve an object and hand its id to the caller, who then holds one reference
    pub fn reserve_id(
        &mut self,
        name: Option<&str>,
        middleware: &mut dyn AudioMiddleware,
    ) -> Option<AudioObjectId> {
        let mut object = match self.pool.pop_reserved() {
            Some(object) => object,
            None => {
                let id = self.pool.next_id();
                match middleware.new_audio_object_data(id) {
                    Some(data) => AudioObject::new(id, Some(data), &self.settings),
                    None => {
                        self.pool.undo_id();
                        log::error!("Failed to allocate a new audio object (id {})", id);
                        return None;
                    }
                }
            }
        };

        let id = object.id();
        let registered = object
            .base()
            .data()
            .is_some_and(|data| middleware.register_audio_object(data, name).is_success());

        if registered {
            object.base_mut().increment_ref_count();
            self.active.insert(id, object);
            log::debug!("Reserved audio object {} ({})", id, name.unwrap_or("unnamed"));
            Some(id)
        } else {
            log::warn!("Backend failed to register audio object {}", id);
            self.release_instance(object, middleware);
            None
        }
    }

    /// Drop the caller's reference, recycling the object if nothing else holds it
    pub fn release_id(&mut self, id: AudioObjectId, middleware: &mut dyn AudioMiddleware) -> bool {
        let Some(object) = self.active.get_mut(&id) else {
            log::warn!("Release of unknown audio object {}", id);
            return false;
        };

        if object.base().ref_count() < 2 {
            if let Some(object) = self.active.remove(&id) {
                self.release_instance(object, middleware);
            }
        } else {
            object.base_mut().decrement_ref_count();
        }
        true
    }

    fn release_instance(&mut self, mut object: AudioObject, middleware: &mut dyn AudioMiddleware) {
        if object.base().has_active_events() {
            log::warn!(
                "Audio object {} released with {} active events",
                object.id(),
                object.base().active_events().len()
            );
        }

        let id = object.id();
        object.clear();
        let Some(data) = object.base().data() else {
            return;
        };
        middleware.unregister_audio_object(data);

        if self.pool.reserved.len() < self.pool.reserve_size {
            middleware.reset_audio_object(data);
            if let Err(object) = self.pool.push_reserved(object) {
                if let Some(data) = object.base().data() {
                    middleware.delete_audio_object_data(data);
                }
            }
        } else {
            middleware.delete_audio_object_data(data);
        }
        log::debug!("Released audio object {}", id);
    }

    fn release_if_unreferenced(&mut self, id: AudioObjectId, middleware: &mut dyn AudioMiddleware) {
        let unreferenced = self
            .active
            .get(&id)
            .is_some_and(|object| object.base().ref_count() == 0);
        if unreferenced {
            if let Some(object) = self.active.remove(&id) {
                self.release_instance(object, middleware);
            }
        }
    }

    pub fn lookup(&self, id: AudioObjectId) -> Option<&AudioObject> {
        self.active.get(&id)
    }

    pub fn lookup_mut(&mut self, id: AudioObjectId) -> Option<&mut AudioObject> {
        self.active.get_mut(&id)
    }

    pub fn num_active(&self) -> usize {
        self.active.len()
    }

    pub fn num_free(&self) -> usize {
        self.pool.reserved.len()
    }

    pub fn report_started_event(&mut self, event: &AtlEvent) {
        match self.active.get_mut(&event.object_id) {
            Some(object) => object.base_mut().report_started_event(event),
            None => log::warn!(
                "Started event {} refers to unknown audio object {}",
                event.id,
                event.object_id
            ),
        }
    }

    pub fn report_finished_event(
        &mut self,
        event: &AtlEvent,
        success: bool,
        sender: &RequestSender,
        middleware: &mut dyn AudioMiddleware,
    ) {
        let Some(object) = self.active.get_mut(&event.object_id) else {
            log::warn!(
                "Finished event {} refers to unknown audio object {}",
                event.id,
                event.object_id
            );
            return;
        };
        object.base_mut().report_finished_event(event, success, sender);
        self.release_if_unreferenced(event.object_id, middleware);
    }

    pub fn report_obstruction_ray(
        &mut self,
        id: AudioObjectId,
        ray_index: usize,
        batch: u32,
        hits: &[RayHit],
        middleware: &mut dyn AudioMiddleware,
    ) {
        let Some(object) = self.active.get_mut(&id) else {
            log::trace!("Ray result for released audio object {}", id);
            return;
        };
        object.report_ray_processed(ray_index, batch, hits);
        self.release_if_unreferenced(id, middleware);
    }

    /// Give up on every in-flight ray batch
    pub fn release_pending_rays(&mut self, middleware: &mut dyn AudioMiddleware) {
        let ids: Vec<_> = self
            .active
            .iter_mut()
            .filter(|(_, object)| object.has_pending_rays())
            .map(|(id, object)| {
                object.release_pending_rays();
                *id
            })
            .collect();
        for id in ids {
            self.release_if_unreferenced(id, middleware);
        }
    }

    /// At least one of the object's events is playing
    pub fn has_active_events(base: &AudioObjectBase, events: &EventManager) -> bool {
        base.active_events().iter().any(|id| events.is_playing(*id))
    }

    /// Per-frame update of every object that is currently playing something
    pub fn update(
        &mut self,
        delta_ms: f32,
        listener_position: Vec3,
        rays: &RayContext<'_>,
        can_issue_rays: bool,
        events: &EventManager,
        middleware: &mut dyn AudioMiddleware,
    ) {
        self.time_since_velocity_update_ms += delta_ms;
        let elapsed_ms = self.time_since_velocity_update_ms;
        let velocity_due = elapsed_ms > self.velocity_update_interval_ms;

        for object in self.active.values_mut() {
            if !Self::has_active_events(object.base(), events) {
                continue;
            }

            object.update(listener_position, rays, can_issue_rays, &self.settings);

            let Some(data) = object.base().data() else {
                continue;
            };
            if object.can_run_obstruction_occlusion(can_issue_rays) {
                let propagation = object.propagation_data();
                middleware.set_obstruction_occlusion(
                    data,
                    propagation.obstruction,
                    propagation.occlusion,
                );
            }
            if velocity_due && object.velocity_tracking() {
                object.update_velocity(elapsed_ms, self.velocity_tracking_threshold, rays.sender);
            }
            middleware.update_audio_object(data);
        }

        if velocity_due {
            self.time_since_velocity_update_ms = 0.0;
        }
    }
}
