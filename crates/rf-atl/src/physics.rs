//! Physics raycast boundary used by obstruction/occlusion
//!
//! Synchronous casts return hits directly. Asynchronous casts run on the
//! physics side and answer through a [`RayReply`], which only posts an
//! immutable message onto the request queue.

use crate::position::Vec3;
use crate::request::{AudioRequest, CallbackRequest, RequestSender};
use crate::types::AudioObjectId;

/// One surface hit along an obstruction ray
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RayHit {
    /// Distance from the ray origin (hits at 0 are ignored)
    pub distance: f32,
    /// Surface sound obstruction coefficient in [0, 1]
    pub sound_obstruction: f32,
    /// Per-entity weighting of the surface coefficient
    pub obstruction_multiplier: f32,
}

impl RayHit {
    pub fn new(distance: f32, sound_obstruction: f32) -> Self {
        Self {
            distance,
            sound_obstruction,
            obstruction_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayQuery {
    pub object_id: AudioObjectId,
    pub ray_index: usize,
    pub origin: Vec3,
    /// Unnormalized; its length is the ray length
    pub direction: Vec3,
    pub max_hits: usize,
}

/// Completion token for an asynchronous ray
pub struct RayReply {
    sender: RequestSender,
    object_id: AudioObjectId,
    ray_index: usize,
    batch: u32,
}

impl RayReply {
    pub(crate) fn new(
        sender: RequestSender,
        object_id: AudioObjectId,
        ray_index: usize,
        batch: u32,
    ) -> Self {
        Self {
            sender,
            object_id,
            ray_index,
            batch,
        }
    }

    /// Hand the hits back to the audio thread
    pub fn complete(self, hits: Vec<RayHit>) {
        let request = AudioRequest::callback(CallbackRequest::ReportProcessedObstructionRay {
            object_id: self.object_id,
            ray_index: self.ray_index,
            batch: self.batch,
            hits,
        })
        .high_priority();
        if let Err(e) = self.sender.push_thread_safe(request) {
            log::debug!(
                "Obstruction ray result for object {} not delivered: {}",
                self.object_id,
                e
            );
        }
    }
}

/// Raycasting service
pub trait PhysicsWorld: Send + Sync {
    fn cast_ray(&self, query: &RayQuery) -> Vec<RayHit>;

    /// Cast later and answer through `reply`
    fn queue_ray(&self, query: RayQuery, reply: RayReply);
}

/// World without geometry: every ray is clear and answered immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSpace;

impl PhysicsWorld for OpenSpace {
    fn cast_ray(&self, _query: &RayQuery) -> Vec<RayHit> {
        Vec::new()
    }

    fn queue_ray(&self, _query: RayQuery, reply: RayReply) {
        reply.complete(Vec::new());
    }
}
