//! Obstruction / occlusion ray casting
//!
//! Each positioned object casts one (single ray) or five (multi ray) rays
//! from the listener towards itself. Ray 0 measures obstruction along the
//! direct path; rays 1..4 are offset around the listener and their average
//! is the occlusion. Results are damped twice: per ray against the previous
//! hit count, and per value through a [`SmoothFloat`].
//!
//! Asynchronous batches hold one reference on the owning object until the
//! last ray reports back or the batch is released.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::object::RefCount;
use crate::physics::{PhysicsWorld, RayHit, RayQuery, RayReply};
use crate::position::Vec3;
use crate::request::RequestSender;
use crate::types::{AudioObjectId, ObstructionCalcType};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

pub const MAX_RAYS: usize = 5;
pub const MAX_RAY_HITS: usize = 5;
/// Objects closer to the listener than this issue no rays
pub const MIN_OBSTRUCTION_DISTANCE: f32 = 0.3;

const RAY_SMOOTHING_ALPHA: f32 = 0.05;
const VALUE_SMOOTHING_ALPHA: f32 = 0.2;
const VALUE_SMOOTHING_PRECISION: f32 = 0.0001;

const PERIPHERAL_OFFSET_MIN: f32 = 0.3;
const PERIPHERAL_OFFSET_MAX: f32 = 1.0;
const RANDOM_OFFSET_MIN: f32 = 0.05;
const RANDOM_OFFSET_MAX: f32 = 0.5;
const OFFSET_DISTANCE_MIN: f32 = 1.0;
const OFFSET_DISTANCE_MAX: f32 = 20.0;
/// Below this the side axis is degenerate (listener and object stacked vertically)
const MIN_SIDE_LENGTH: f32 = 1e-4;

// ═══════════════════════════════════════════════════════════════════════════════
// SMOOTHED VALUE
// ═══════════════════════════════════════════════════════════════════════════════

/// Exponentially smoothed scalar that settles once within `precision`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothFloat {
    value: f32,
    target: f32,
    alpha: f32,
    precision: f32,
    active: bool,
}

impl SmoothFloat {
    pub fn new(alpha: f32, precision: f32) -> Self {
        Self {
            value: 0.0,
            target: 0.0,
            alpha,
            precision,
            active: false,
        }
    }

    pub fn update(&mut self) {
        if !self.active {
            return;
        }
        if (self.target - self.value).abs() > self.precision {
            self.value += (self.target - self.value) * self.alpha;
        } else {
            self.value = self.target;
            self.active = false;
        }
    }

    /// Move towards `target`; `reset` jumps there immediately
    pub fn set_new_target(&mut self, target: f32, reset: bool) {
        if reset {
            self.target = target;
            self.value = target;
            self.active = false;
        } else if (target - self.target).abs() > self.precision {
            self.target = target;
            self.active = true;
        }
    }

    pub fn reset(&mut self) {
        self.set_new_target(0.0, true);
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAY STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Damped result of one ray slot across batches
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RayInfo {
    pub total_sound_occlusion: f32,
    pub num_hits: usize,
    pub avg_hits: f32,
    pub distance_to_first_obstacle: f32,
}

/// Smoothed obstruction and occlusion of an object
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PropagationData {
    pub obstruction: f32,
    pub occlusion: f32,
}

/// Tuning shared by all objects of one ATL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationSettings {
    pub full_obstruction_max_distance: f32,
    pub occlusion_max_distance: f32,
    pub ray_seed: Option<u64>,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            full_obstruction_max_distance: 5.0,
            occlusion_max_distance: 500.0,
            ray_seed: None,
        }
    }
}

/// Collaborators needed to cast rays
pub struct RayContext<'a> {
    pub physics: &'a dyn PhysicsWorld,
    pub sender: &'a RequestSender,
}

pub fn num_rays_for(calc_type: ObstructionCalcType) -> usize {
    match calc_type {
        ObstructionCalcType::Ignore => 0,
        ObstructionCalcType::SingleRay => 1,
        ObstructionCalcType::MultiRay => MAX_RAYS,
        ObstructionCalcType::None => {
            log::warn!("Obstruction calculation type not set, casting no rays");
            0
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct ObstructionOcclusionProcessor {
    object_id: AudioObjectId,
    calc_type: ObstructionCalcType,
    obstruction: SmoothFloat,
    occlusion: SmoothFloat,
    rays: [RayInfo; MAX_RAYS],
    remaining_rays: usize,
    total_rays: usize,
    /// Incremented for every async batch; reports from older batches are dropped
    batch: u32,
    batch_reset: bool,
    pending_rays_released: bool,
    listener_distance: f32,
    full_obstruction_max_distance: f32,
    rng: StdRng,
}

impl ObstructionOcclusionProcessor {
    pub fn new(object_id: AudioObjectId, settings: &PropagationSettings) -> Self {
        let rng = match settings.ray_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ object_id),
            None => StdRng::from_os_rng(),
        };
        Self {
            object_id,
            calc_type: ObstructionCalcType::None,
            obstruction: SmoothFloat::new(VALUE_SMOOTHING_ALPHA, VALUE_SMOOTHING_PRECISION),
            occlusion: SmoothFloat::new(VALUE_SMOOTHING_ALPHA, VALUE_SMOOTHING_PRECISION),
            rays: [RayInfo::default(); MAX_RAYS],
            remaining_rays: 0,
            total_rays: 0,
            batch: 0,
            batch_reset: false,
            pending_rays_released: false,
            listener_distance: 0.0,
            full_obstruction_max_distance: settings.full_obstruction_max_distance,
            rng,
        }
    }

    pub fn update(&mut self) {
        self.obstruction.update();
        self.occlusion.update();
    }

    #[inline]
    pub fn calc_type(&self) -> ObstructionCalcType {
        self.calc_type
    }

    pub fn set_calc_type(&mut self, calc_type: ObstructionCalcType) {
        if calc_type == ObstructionCalcType::Ignore {
            self.reset_values();
        }
        self.calc_type = calc_type;
    }

    /// Rays are globally allowed and this object wants them
    pub fn can_run(&self, can_issue_rays: bool) -> bool {
        can_issue_rays
            && matches!(
                self.calc_type,
                ObstructionCalcType::SingleRay | ObstructionCalcType::MultiRay
            )
    }

    #[inline]
    pub fn has_pending_rays(&self) -> bool {
        self.remaining_rays > 0
    }

    #[inline]
    pub fn remaining_rays(&self) -> usize {
        self.remaining_rays
    }

    pub fn propagation_data(&self) -> PropagationData {
        PropagationData {
            obstruction: self.obstruction.value(),
            occlusion: self.occlusion.value(),
        }
    }

    pub fn ray_info(&self, index: usize) -> Option<&RayInfo> {
        self.rays.get(index)
    }

    /// Hard reset of both smoothed values
    pub fn reset_values(&mut self) {
        self.obstruction.reset();
        self.occlusion.reset();
    }

    /// Forget everything (object returned to the pool)
    pub fn clear(&mut self) {
        self.calc_type = ObstructionCalcType::None;
        self.reset_values();
        self.rays = [RayInfo::default(); MAX_RAYS];
        self.remaining_rays = 0;
        self.total_rays = 0;
        self.batch = self.batch.wrapping_add(1);
        self.pending_rays_released = false;
        self.listener_distance = 0.0;
    }

    /// Cast a batch of rays from the listener towards the object.
    ///
    /// No-op while an async batch is still in flight.
    pub fn run_obstruction_query(
        &mut self,
        object_position: Vec3,
        listener_position: Vec3,
        ctx: &RayContext<'_>,
        sync: bool,
        reset: bool,
        ref_count: &mut RefCount,
    ) {
        if self.remaining_rays != 0 {
            return;
        }

        let num_rays = num_rays_for(self.calc_type);
        if num_rays == 0 {
            return;
        }

        let diff = object_position - listener_position;
        let distance = diff.length();
        self.listener_distance = distance;
        self.total_rays = num_rays;

        let up = Vec3::UP;
        let direction = diff.normalize();
        let mut side = direction.cross(&up);
        if side.length() < MIN_SIDE_LENGTH {
            side = direction.cross(&Vec3::FORWARD);
        }
        let t = ((distance - OFFSET_DISTANCE_MIN) / (OFFSET_DISTANCE_MAX - OFFSET_DISTANCE_MIN))
            .clamp(0.0, 1.0);
        let offset_scale = PERIPHERAL_OFFSET_MIN + (PERIPHERAL_OFFSET_MAX - PERIPHERAL_OFFSET_MIN) * t;
        let random_scale = RANDOM_OFFSET_MIN + (RANDOM_OFFSET_MAX - RANDOM_OFFSET_MIN) * t;

        if !sync {
            self.batch = self.batch.wrapping_add(1);
            self.batch_reset = reset;
            self.pending_rays_released = false;
        }

        for ray_index in 0..num_rays {
            let (peripheral, jitter_scale) = match ray_index {
                0 => (Vec3::ZERO, random_scale * 0.5),
                1 => (up * offset_scale, random_scale),
                2 => (-up * offset_scale, random_scale),
                3 => (side * offset_scale, random_scale),
                _ => (-side * offset_scale, random_scale),
            };
            let r1: f32 = self.rng.random_range(-1.0..1.0);
            let r2: f32 = self.rng.random_range(-1.0..1.0);
            let jitter = (up * r1 + side * r2) * jitter_scale;

            let query = RayQuery {
                object_id: self.object_id,
                ray_index,
                origin: listener_position + peripheral + jitter,
                direction: diff,
                max_hits: MAX_RAY_HITS,
            };

            if sync {
                let hits = ctx.physics.cast_ray(&query);
                self.process_obstruction_ray(ray_index, &hits, reset);
            } else {
                self.remaining_rays += 1;
                let reply = RayReply::new(ctx.sender.clone(), self.object_id, ray_index, self.batch);
                ctx.physics.queue_ray(query, reply);
            }
        }

        if sync {
            self.process_obstruction_occlusion(reset);
        } else {
            ref_count.increment();
            log::trace!(
                "Object {} issued {} obstruction rays (batch {})",
                self.object_id,
                num_rays,
                self.batch
            );
        }
    }

    /// Async ray completion (delivered through the request queue)
    pub fn report_ray_processed(
        &mut self,
        ray_index: usize,
        batch: u32,
        hits: &[RayHit],
        ref_count: &mut RefCount,
    ) {
        if batch != self.batch || self.pending_rays_released {
            log::trace!(
                "Object {} ignoring ray {} of stale batch {}",
                self.object_id,
                ray_index,
                batch
            );
            return;
        }
        if self.remaining_rays == 0 || ref_count.get() == 0 {
            log::error!(
                "Object {} received ray {} with no rays pending (remaining {}, refcount {})",
                self.object_id,
                ray_index,
                self.remaining_rays,
                ref_count.get()
            );
            return;
        }

        if ray_index < self.total_rays {
            let reset = self.batch_reset;
            self.process_obstruction_ray(ray_index, hits, reset);
        }

        self.remaining_rays -= 1;
        if self.remaining_rays == 0 {
            let reset = self.batch_reset;
            self.process_obstruction_occlusion(reset);
            ref_count.decrement();
        }
    }

    /// Abandon the in-flight batch and give back its reference
    pub fn release_pending_rays(&mut self, ref_count: &mut RefCount) {
        if self.remaining_rays > 0 {
            self.remaining_rays = 0;
            self.pending_rays_released = true;
            ref_count.decrement();
        }
    }

    fn process_obstruction_ray(&mut self, ray_index: usize, hits: &[RayHit], reset: bool) {
        let mut total = 0.0f32;
        let mut real_hits = 0usize;
        let mut min_distance = f32::MAX;

        for hit in hits.iter().take(MAX_RAY_HITS) {
            if hit.distance > 0.0 {
                total += hit.sound_obstruction * hit.obstruction_multiplier;
                min_distance = min_distance.min(hit.distance);
                real_hits += 1;
            }
        }
        let total = total.clamp(0.0, 1.0);

        let info = &mut self.rays[ray_index];
        // Damp changes when the hit count jumps (entering/leaving geometry)
        let hit_diff = real_hits.abs_diff(info.num_hits);
        let correction = if hit_diff > 1 { 1.0 / hit_diff as f32 } else { 1.0 };

        if reset {
            info.total_sound_occlusion = total;
            info.avg_hits = real_hits as f32;
        } else {
            info.total_sound_occlusion +=
                correction * (total - info.total_sound_occlusion) * RAY_SMOOTHING_ALPHA;
            info.avg_hits += (real_hits as f32 - info.avg_hits) * RAY_SMOOTHING_ALPHA;
        }
        info.num_hits = real_hits;
        info.distance_to_first_obstacle = if real_hits > 0 { min_distance } else { 0.0 };
    }

    fn process_obstruction_occlusion(&mut self, reset: bool) {
        if self.listener_distance <= f32::EPSILON {
            // The sound tracks the listener
            self.obstruction.set_new_target(0.0, true);
            self.occlusion.set_new_target(0.0, true);
            return;
        }

        let mut obstruction = self.rays[0].total_sound_occlusion;
        let occlusion = if self.total_rays > 1 {
            let peripheral = &self.rays[1..self.total_rays];
            peripheral
                .iter()
                .map(|r| r.total_sound_occlusion)
                .sum::<f32>()
                / peripheral.len() as f32
        } else {
            obstruction
        };

        obstruction *= (self.full_obstruction_max_distance / self.listener_distance).min(1.0);
        // Only the part exceeding occlusion counts as obstruction
        obstruction = (obstruction - occlusion).max(0.0);

        self.obstruction.set_new_target(obstruction.clamp(0.0, 1.0), reset);
        self.occlusion.set_new_target(occlusion.clamp(0.0, 1.0), reset);
    }
}
