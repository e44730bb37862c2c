//! Audio objects
//!
//! [`AudioObjectBase`] carries the per-object bookkeeping shared by the
//! positioned [`AudioObject`] and the positionless [`GlobalAudioObject`]:
//! active events, trigger instances, prepared trigger impls, applied
//! parameter values and the reference count keeping the object alive.
//!
//! ## Trigger instance lifecycle
//!
//! ```text
//! report_starting_trigger_instance   STARTING
//!        │
//!        ├─ report_started_event × N   playing / loading counters
//!        │
//! report_started_trigger_instance    clears STARTING (finishes now if N == 0)
//!        │
//! report_finished_event × N          finishes when both counters reach 0
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::event::{AtlEvent, EventState, INVALID_TRIGGER_INSTANCE_ID};
use crate::middleware::ObjectData;
use crate::physics::RayHit;
use crate::position::{Vec3, WorldTransform};
use crate::propagation::{
    MIN_OBSTRUCTION_DISTANCE, ObstructionOcclusionProcessor, PropagationData,
    PropagationSettings, RayContext,
};
use crate::request::{AudioRequest, CallbackRequest, ObjectRequest, RequestFlags, RequestSender};
use crate::types::internal_controls::OBJECT_SPEED_RTPC_ID;
use crate::types::{
    AudioObjectId, ControlId, EnvironmentId, EventId, GLOBAL_AUDIO_OBJECT_ID, ObstructionCalcType,
    OwnerId, SwitchStateId, TriggerImplId, TriggerInstanceId, UserData,
};

// ═══════════════════════════════════════════════════════════════════════════════
// REFERENCE COUNT
// ═══════════════════════════════════════════════════════════════════════════════

/// Outstanding reasons an object must stay alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefCount(u32);

impl RefCount {
    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn increment(&mut self) {
        self.0 += 1;
    }

    /// Never goes below zero; an underflow is a bookkeeping bug
    pub fn decrement(&mut self) {
        debug_assert!(self.0 > 0, "audio object reference count underflow");
        if self.0 == 0 {
            log::error!("Audio object reference count would go negative");
            return;
        }
        self.0 -= 1;
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRIGGER STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TriggerStateFlags(u8);

impl TriggerStateFlags {
    pub const NONE: Self = Self(0);
    pub const PREPARED: Self = Self(1 << 0);
    pub const PLAYING: Self = Self(1 << 1);
    pub const STARTING: Self = Self(1 << 2);
    pub const LOADING: Self = Self(1 << 3);
    pub const UNLOADING: Self = Self(1 << 4);
    /// Finished notification is delivered on the audio thread
    pub const CALLBACK_ON_AUDIO_THREAD: Self = Self(1 << 5);

    #[inline]
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// State of one "play" call on an object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriggerInstanceState {
    pub trigger_id: ControlId,
    pub flags: TriggerStateFlags,
    pub num_playing_events: usize,
    pub num_loading_events: usize,
    pub owner: Option<OwnerId>,
    pub user_data: Option<UserData>,
    pub user_data_owner: Option<OwnerId>,
}

/// Prepare/unprepare state of one trigger impl on an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerImplState {
    pub flags: TriggerStateFlags,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct AudioObjectBase {
    id: AudioObjectId,
    data: Option<ObjectData>,
    active_events: BTreeSet<EventId>,
    trigger_instances: BTreeMap<TriggerInstanceId, TriggerInstanceState>,
    trigger_impl_states: HashMap<TriggerImplId, TriggerImplState>,
    switch_states: HashMap<ControlId, SwitchStateId>,
    rtpcs: HashMap<ControlId, f32>,
    environments: HashMap<EnvironmentId, f32>,
    ref_count: RefCount,
}

impl AudioObjectBase {
    pub fn new(id: AudioObjectId, data: Option<ObjectData>) -> Self {
        Self {
            id,
            data,
            active_events: BTreeSet::new(),
            trigger_instances: BTreeMap::new(),
            trigger_impl_states: HashMap::new(),
            switch_states: HashMap::new(),
            rtpcs: HashMap::new(),
            environments: HashMap::new(),
            ref_count: RefCount::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> AudioObjectId {
        self.id
    }

    #[inline]
    pub fn data(&self) -> Option<ObjectData> {
        self.data
    }

    pub(crate) fn set_data(&mut self, data: Option<ObjectData>) {
        self.data = data;
    }

    pub fn active_events(&self) -> &BTreeSet<EventId> {
        &self.active_events
    }

    pub fn trigger_instances(&self) -> &BTreeMap<TriggerInstanceId, TriggerInstanceState> {
        &self.trigger_instances
    }

    pub fn trigger_impl_state(&self, impl_id: TriggerImplId) -> TriggerImplState {
        self.trigger_impl_states
            .get(&impl_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn switch_states(&self) -> &HashMap<ControlId, SwitchStateId> {
        &self.switch_states
    }

    pub fn rtpcs(&self) -> &HashMap<ControlId, f32> {
        &self.rtpcs
    }

    pub fn environments(&self) -> &HashMap<EnvironmentId, f32> {
        &self.environments
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    pub fn increment_ref_count(&mut self) {
        self.ref_count.increment();
    }

    pub fn decrement_ref_count(&mut self) {
        self.ref_count.decrement();
    }

    pub(crate) fn ref_count_mut(&mut self) -> &mut RefCount {
        &mut self.ref_count
    }

    pub fn has_active_events(&self) -> bool {
        !self.active_events.is_empty()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Trigger instances
    // ───────────────────────────────────────────────────────────────────────────

    pub fn report_starting_trigger_instance(
        &mut self,
        instance_id: TriggerInstanceId,
        trigger_id: ControlId,
    ) {
        self.trigger_instances.insert(
            instance_id,
            TriggerInstanceState {
                trigger_id,
                flags: TriggerStateFlags::STARTING,
                ..Default::default()
            },
        );
    }

    /// All impls have been tried; finish now if none of them left an event
    pub fn report_started_trigger_instance(
        &mut self,
        instance_id: TriggerInstanceId,
        owner: Option<OwnerId>,
        user_data: Option<UserData>,
        user_data_owner: Option<OwnerId>,
        request_flags: RequestFlags,
        sender: &RequestSender,
    ) {
        let Some(state) = self.trigger_instances.get_mut(&instance_id) else {
            log::warn!(
                "Object {}: started unknown trigger instance {}",
                self.id,
                instance_id
            );
            return;
        };

        state.owner = owner;
        state.user_data = user_data;
        state.user_data_owner = user_data_owner;
        if !request_flags.contains(RequestFlags::SYNC_FINISHED_CALLBACK) {
            state.flags.insert(TriggerStateFlags::CALLBACK_ON_AUDIO_THREAD);
        }

        if state.num_playing_events > 0 || state.num_loading_events > 0 {
            state.flags.remove(TriggerStateFlags::STARTING);
            state.flags.insert(TriggerStateFlags::PLAYING);
        } else {
            self.report_finished_trigger_instance(instance_id, sender);
        }
    }

    pub fn report_started_event(&mut self, event: &AtlEvent) {
        self.active_events.insert(event.id);
        self.trigger_impl_states
            .entry(event.trigger_impl_id)
            .or_default();

        let prepared = self
            .trigger_impl_state(event.trigger_impl_id)
            .flags
            .contains(TriggerStateFlags::PREPARED);

        if let Some(state) = self.trigger_instances.get_mut(&event.trigger_instance_id) {
            match event.state {
                EventState::Playing => state.num_playing_events += 1,
                EventState::PlayingDelayed => {
                    debug_assert!(state.num_loading_events > 0);
                    state.num_loading_events = state.num_loading_events.saturating_sub(1);
                    state.num_playing_events += 1;
                }
                EventState::Loading => state.num_loading_events += 1,
                EventState::Unloading | EventState::None => {}
            }
            if prepared {
                state.flags.insert(TriggerStateFlags::PREPARED);
            }
        }
    }

    /// Backend finished `event`; releases the reference taken when it started
    pub fn report_finished_event(&mut self, event: &AtlEvent, success: bool, sender: &RequestSender) {
        self.active_events.remove(&event.id);

        match event.state {
            EventState::Playing | EventState::PlayingDelayed => {
                match self.trigger_instances.get_mut(&event.trigger_instance_id) {
                    Some(state) => {
                        debug_assert!(state.num_playing_events > 0);
                        state.num_playing_events = state.num_playing_events.saturating_sub(1);
                        self.finish_trigger_instance_if_done(event.trigger_instance_id, sender);
                    }
                    None => log::warn!(
                        "Object {}: finished event {} of unknown trigger instance {}",
                        self.id,
                        event.id,
                        event.trigger_instance_id
                    ),
                }
                self.ref_count.decrement();
            }
            EventState::Loading if event.trigger_instance_id != INVALID_TRIGGER_INSTANCE_ID => {
                // Pending activation that never started playing
                if let Some(state) = self.trigger_instances.get_mut(&event.trigger_instance_id) {
                    state.num_loading_events = state.num_loading_events.saturating_sub(1);
                    self.finish_trigger_instance_if_done(event.trigger_instance_id, sender);
                }
                self.ref_count.decrement();
            }
            EventState::Loading => {
                let state = self.trigger_impl_states.entry(event.trigger_impl_id).or_default();
                state.flags.remove(TriggerStateFlags::LOADING);
                if success {
                    state.flags.insert(TriggerStateFlags::PREPARED);
                }
                self.ref_count.decrement();
            }
            EventState::Unloading => {
                let state = self.trigger_impl_states.entry(event.trigger_impl_id).or_default();
                state.flags.remove(TriggerStateFlags::UNLOADING);
                if success {
                    state.flags.remove(TriggerStateFlags::PREPARED);
                }
                self.ref_count.decrement();
            }
            EventState::None => {
                log::warn!(
                    "Object {}: finished event {} was never started",
                    self.id,
                    event.id
                );
            }
        }
    }

    fn finish_trigger_instance_if_done(
        &mut self,
        instance_id: TriggerInstanceId,
        sender: &RequestSender,
    ) {
        let done = self.trigger_instances.get(&instance_id).is_some_and(|s| {
            s.num_playing_events == 0
                && s.num_loading_events == 0
                && !s.flags.contains(TriggerStateFlags::STARTING)
        });
        if done {
            self.report_finished_trigger_instance(instance_id, sender);
        }
    }

    /// Notify listeners and drop (or park, if prepared) the instance
    fn report_finished_trigger_instance(
        &mut self,
        instance_id: TriggerInstanceId,
        sender: &RequestSender,
    ) {
        let Some(state) = self.trigger_instances.get_mut(&instance_id) else {
            return;
        };

        let mut request = AudioRequest::callback(CallbackRequest::ReportFinishedTriggerInstance {
            trigger_id: state.trigger_id,
        })
        .high_priority();
        request.object_id = self.id;
        request.owner = state.owner;
        request.user_data = state.user_data;
        request.user_data_owner = state.user_data_owner;
        if !state.flags.contains(TriggerStateFlags::CALLBACK_ON_AUDIO_THREAD) {
            request.flags.insert(RequestFlags::SYNC_CALLBACK);
        }
        if sender.push_thread_safe(request).is_err() {
            log::warn!(
                "Object {}: could not queue finished notification for trigger {}",
                self.id,
                state.trigger_id
            );
        }

        if state.flags.contains(TriggerStateFlags::PREPARED) {
            state.flags.remove(TriggerStateFlags::PLAYING);
            state.flags.remove(TriggerStateFlags::STARTING);
        } else {
            self.trigger_instances.remove(&instance_id);
        }
    }

    pub(crate) fn set_trigger_impl_pending(&mut self, impl_id: TriggerImplId, prepare: bool) {
        let state = self.trigger_impl_states.entry(impl_id).or_default();
        if prepare {
            state.flags.insert(TriggerStateFlags::LOADING);
        } else {
            state.flags.insert(TriggerStateFlags::UNLOADING);
        }
    }

    pub fn trigger_instances_by_owner(&self, owner: Option<OwnerId>) -> BTreeSet<TriggerInstanceId> {
        self.trigger_instances
            .iter()
            .filter(|(_, state)| state.owner == owner)
            .map(|(id, _)| *id)
            .collect()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Parameters
    // ───────────────────────────────────────────────────────────────────────────

    pub fn set_switch_state(&mut self, switch_id: ControlId, state_id: SwitchStateId) {
        self.switch_states.insert(switch_id, state_id);
    }

    pub fn set_rtpc(&mut self, rtpc_id: ControlId, value: f32) {
        self.rtpcs.insert(rtpc_id, value);
    }

    /// Zero amounts remove the environment
    pub fn set_environment_amount(&mut self, environment_id: EnvironmentId, amount: f32) {
        if amount > 0.0 {
            self.environments.insert(environment_id, amount);
        } else {
            self.environments.remove(&environment_id);
        }
    }

    pub fn clear_rtpcs(&mut self) {
        self.rtpcs.clear();
    }

    pub fn clear_environments(&mut self) {
        self.environments.clear();
    }

    /// Drop all runtime state (object goes back to the pool)
    pub fn clear(&mut self) {
        self.active_events.clear();
        self.trigger_instances.clear();
        self.trigger_impl_states.clear();
        self.switch_states.clear();
        self.rtpcs.clear();
        self.environments.clear();
        self.ref_count.reset();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OBJECT KINDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Common access to global and positioned objects
pub trait AtlObject {
    fn base(&self) -> &AudioObjectBase;
    fn base_mut(&mut self) -> &mut AudioObjectBase;

    /// `None` for the global object
    fn as_positioned_mut(&mut self) -> Option<&mut AudioObject> {
        None
    }
}

/// Positionless object receiving requests that name no object
#[derive(Debug)]
pub struct GlobalAudioObject {
    base: AudioObjectBase,
}

impl GlobalAudioObject {
    pub fn new(data: ObjectData) -> Self {
        Self {
            base: AudioObjectBase::new(GLOBAL_AUDIO_OBJECT_ID, Some(data)),
        }
    }
}

impl AtlObject for GlobalAudioObject {
    fn base(&self) -> &AudioObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AudioObjectBase {
        &mut self.base
    }
}

/// Object with a world position, obstruction and velocity tracking
pub struct AudioObject {
    base: AudioObjectBase,
    transform: WorldTransform,
    previous_position: Vec3,
    previous_speed: f32,
    velocity_tracking: bool,
    propagation: ObstructionOcclusionProcessor,
}

impl AudioObject {
    pub fn new(id: AudioObjectId, data: Option<ObjectData>, settings: &PropagationSettings) -> Self {
        Self {
            base: AudioObjectBase::new(id, data),
            transform: WorldTransform::default(),
            previous_position: Vec3::ZERO,
            previous_speed: 0.0,
            velocity_tracking: false,
            propagation: ObstructionOcclusionProcessor::new(id, settings),
        }
    }

    #[inline]
    pub fn id(&self) -> AudioObjectId {
        self.base.id()
    }

    pub fn transform(&self) -> &WorldTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: WorldTransform) {
        self.transform = transform;
    }

    pub fn velocity_tracking(&self) -> bool {
        self.velocity_tracking
    }

    pub fn set_velocity_tracking(&mut self, on: bool) {
        if on {
            self.previous_position = self.transform.position;
        }
        self.velocity_tracking = on;
    }

    pub fn obstruction_calc_type(&self) -> ObstructionCalcType {
        self.propagation.calc_type()
    }

    pub fn set_obstruction_calc_type(&mut self, calc_type: ObstructionCalcType) {
        self.propagation.set_calc_type(calc_type);
    }

    pub fn can_run_obstruction_occlusion(&self, can_issue_rays: bool) -> bool {
        self.propagation.can_run(can_issue_rays)
    }

    pub fn propagation_data(&self) -> PropagationData {
        self.propagation.propagation_data()
    }

    pub fn has_pending_rays(&self) -> bool {
        self.propagation.has_pending_rays()
    }

    /// Per-frame smoothing and ray issuing
    pub fn update(
        &mut self,
        listener_position: Vec3,
        ctx: &RayContext<'_>,
        can_issue_rays: bool,
        settings: &PropagationSettings,
    ) {
        self.propagation.update();

        if self.propagation.can_run(can_issue_rays) {
            let position = self.transform.position;
            let distance = position.distance_to(&listener_position);
            if MIN_OBSTRUCTION_DISTANCE < distance && distance < settings.occlusion_max_distance {
                self.propagation.run_obstruction_query(
                    position,
                    listener_position,
                    ctx,
                    false,
                    false,
                    self.base.ref_count_mut(),
                );
            }
        } else {
            self.propagation.reset_values();
        }
    }

    /// Fresh query whose result snaps instead of smoothing in
    pub fn reset_obstruction_occlusion(&mut self, listener_position: Vec3, ctx: &RayContext<'_>) {
        let position = self.transform.position;
        self.propagation.run_obstruction_query(
            position,
            listener_position,
            ctx,
            false,
            true,
            self.base.ref_count_mut(),
        );
    }

    pub fn report_ray_processed(&mut self, ray_index: usize, batch: u32, hits: &[RayHit]) {
        self.propagation
            .report_ray_processed(ray_index, batch, hits, self.base.ref_count_mut());
    }

    pub fn release_pending_rays(&mut self) {
        self.propagation
            .release_pending_rays(self.base.ref_count_mut());
    }

    /// Push an object_speed update when the speed changed enough
    pub fn update_velocity(&mut self, interval_ms: f32, threshold: f32, sender: &RequestSender) {
        let position = self.transform.position;
        let speed = 1000.0 * position.distance_to(&self.previous_position) / interval_ms;

        if (speed - self.previous_speed).abs() > threshold {
            self.previous_speed = speed;
            let request = AudioRequest::object(
                self.id(),
                ObjectRequest::SetRtpcValue {
                    rtpc_id: OBJECT_SPEED_RTPC_ID,
                    value: speed,
                },
            );
            if sender.push_thread_safe(request).is_err() {
                log::warn!("Object {}: could not queue speed update", self.id());
            }
        }
        self.previous_position = position;
    }

    /// Reset for reuse from the pool
    pub fn clear(&mut self) {
        self.base.clear();
        self.transform = WorldTransform::default();
        self.previous_position = Vec3::ZERO;
        self.previous_speed = 0.0;
        self.velocity_tracking = false;
        self.propagation.clear();
    }
}

impl AtlObject for AudioObject {
    fn base(&self) -> &AudioObjectBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AudioObjectBase {
        &mut self.base
    }

    fn as_positioned_mut(&mut self) -> Option<&mut AudioObject> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestData, RequestReceiver, request_queue};
    use crate::types::Subsystem;

    fn playing_event(id: EventId, instance: TriggerInstanceId, state: EventState) -> AtlEvent {
        let mut event = AtlEvent::new(id, Subsystem::Middleware, None);
        event.trigger_id = 10;
        event.trigger_impl_id = 100 + id as u32;
        event.trigger_instance_id = instance;
        event.state = state;
        event
    }

    fn finished_notifications(receiver: &mut RequestReceiver) -> usize {
        receiver
            .drain_requests()
            .into_iter()
            .filter(|r| {
                matches!(
                    r.data,
                    RequestData::Callback(CallbackRequest::ReportFinishedTriggerInstance { .. })
                )
            })
            .count()
    }

    /// Mirror of what the ATL does around an activation
    fn start(base: &mut AudioObjectBase, event: &AtlEvent) {
        base.report_started_event(event);
        base.increment_ref_count();
    }

    #[test]
    fn test_instance_finishes_once() {
        let (sender, mut receiver) = request_queue(32);
        let mut base = AudioObjectBase::new(5, None);

        base.report_starting_trigger_instance(1, 10);
        let events: Vec<_> = (1..=3)
            .map(|id| playing_event(id, 1, EventState::Playing))
            .collect();
        for e in &events {
            start(&mut base, e);
        }
        base.report_started_trigger_instance(1, Some(77), None, None, RequestFlags::NONE, &sender);
        assert_eq!(base.ref_count(), 3);
        assert_eq!(finished_notifications(&mut receiver), 0);

        for e in &events {
            base.report_finished_event(e, true, &sender);
        }
        assert_eq!(base.ref_count(), 0);
        assert!(base.trigger_instances().is_empty());
        assert!(!base.has_active_events());
        assert_eq!(finished_notifications(&mut receiver), 1);
    }

    #[test]
    fn test_event_finishing_before_instance_started() {
        let (sender, mut receiver) = request_queue(32);
        let mut base = AudioObjectBase::new(5, None);

        base.report_starting_trigger_instance(1, 10);
        let e = playing_event(1, 1, EventState::Playing);
        start(&mut base, &e);
        // Finished synchronously while sibling impls are still being started
        base.report_finished_event(&e, true, &sender);
        assert_eq!(finished_notifications(&mut receiver), 0);
        assert!(base.trigger_instances().contains_key(&1));

        base.report_started_trigger_instance(1, None, None, None, RequestFlags::NONE, &sender);
        assert_eq!(finished_notifications(&mut receiver), 1);
        assert!(base.trigger_instances().is_empty());
        assert_eq!(base.ref_count(), 0);
    }

    #[test]
    fn test_instance_without_events_finishes_immediately() {
        let (sender, mut receiver) = request_queue(8);
        let mut base = AudioObjectBase::new(5, None);
        base.report_starting_trigger_instance(4, 10);
        base.report_started_trigger_instance(
            4,
            Some(1),
            Some(2),
            Some(3),
            RequestFlags::SYNC_FINISHED_CALLBACK,
            &sender,
        );

        let requests = receiver.drain_requests();
        assert_eq!(requests.len(), 1);
        let r = &requests[0];
        assert_eq!(r.object_id, 5);
        assert_eq!(r.owner, Some(1));
        assert_eq!(r.user_data, Some(2));
        assert_eq!(r.user_data_owner, Some(3));
        assert!(r.flags.contains(RequestFlags::SYNC_CALLBACK));
        assert!(base.trigger_instances().is_empty());
    }

    #[test]
    fn test_loading_then_playing_delayed() {
        let (sender, mut receiver) = request_queue(8);
        let mut base = AudioObjectBase::new(5, None);
        base.report_starting_trigger_instance(1, 10);

        let mut e = playing_event(1, 1, EventState::Loading);
        start(&mut base, &e);
        base.report_started_trigger_instance(1, None, None, None, RequestFlags::NONE, &sender);
        assert_eq!(base.trigger_instances()[&1].num_loading_events, 1);

        e.state = EventState::PlayingDelayed;
        base.report_started_event(&e);
        let state = &base.trigger_instances()[&1];
        assert_eq!(state.num_loading_events, 0);
        assert_eq!(state.num_playing_events, 1);
        assert_eq!(base.ref_count(), 1);

        base.report_finished_event(&e, true, &sender);
        assert_eq!(base.ref_count(), 0);
        assert_eq!(finished_notifications(&mut receiver), 1);
    }

    #[test]
    fn test_prepare_and_unprepare_flags() {
        let (sender, _receiver) = request_queue(8);
        let mut base = AudioObjectBase::new(5, None);

        let mut e = AtlEvent::new(9, Subsystem::Middleware, None);
        e.trigger_impl_id = 200;
        e.state = EventState::Loading;
        base.set_trigger_impl_pending(200, true);
        start(&mut base, &e);
        assert!(base.trigger_impl_state(200).flags.contains(TriggerStateFlags::LOADING));

        base.report_finished_event(&e, true, &sender);
        let flags = base.trigger_impl_state(200).flags;
        assert!(flags.contains(TriggerStateFlags::PREPARED));
        assert!(!flags.contains(TriggerStateFlags::LOADING));
        assert_eq!(base.ref_count(), 0);

        e.state = EventState::Unloading;
        base.set_trigger_impl_pending(200, false);
        start(&mut base, &e);
        base.report_finished_event(&e, false, &sender);
        // failed unload keeps it prepared
        assert!(base.trigger_impl_state(200).flags.contains(TriggerStateFlags::PREPARED));

        start(&mut base, &e);
        base.report_finished_event(&e, true, &sender);
        assert!(!base.trigger_impl_state(200).flags.contains(TriggerStateFlags::PREPARED));
        assert_eq!(base.ref_count(), 0);
    }

    #[test]
    fn test_prepared_instance_is_kept() {
        let (sender, _receiver) = request_queue(8);
        let mut base = AudioObjectBase::new(5, None);

        let mut prep = AtlEvent::new(1, Subsystem::Middleware, None);
        prep.trigger_impl_id = 101;
        prep.state = EventState::Loading;
        start(&mut base, &prep);
        base.report_finished_event(&prep, true, &sender);

        base.report_starting_trigger_instance(3, 10);
        let e = playing_event(1, 3, EventState::Playing);
        start(&mut base, &e);
        base.report_started_trigger_instance(3, None, None, None, RequestFlags::NONE, &sender);
        base.report_finished_event(&e, true, &sender);

        let state = &base.trigger_instances()[&3];
        assert!(state.flags.contains(TriggerStateFlags::PREPARED));
        assert!(!state.flags.contains(TriggerStateFlags::PLAYING));
    }

    #[test]
    fn test_instances_by_owner() {
        let mut base = AudioObjectBase::new(5, None);
        let (sender, _receiver) = request_queue(8);
        for (instance, owner) in [(1, Some(7)), (2, Some(8)), (3, Some(7))] {
            base.report_starting_trigger_instance(instance, 10);
            let e = playing_event(instance as EventId, instance, EventState::Playing);
            start(&mut base, &e);
            base.report_started_trigger_instance(instance, owner, None, None, RequestFlags::NONE, &sender);
        }
        let owned = base.trigger_instances_by_owner(Some(7));
        assert_eq!(owned.into_iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(base.trigger_instances_by_owner(Some(99)).is_empty());
    }

    #[test]
    fn test_environment_amount_zero_removes() {
        let mut base = AudioObjectBase::new(5, None);
        base.set_environment_amount(3, 0.5);
        assert_eq!(base.environments().get(&3), Some(&0.5));
        base.set_environment_amount(3, 0.0);
        assert!(base.environments().is_empty());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut base = AudioObjectBase::new(5, None);
        base.set_rtpc(1, 0.3);
        base.set_switch_state(2, 3);
        base.increment_ref_count();
        base.report_starting_trigger_instance(1, 10);
        base.clear();
        assert_eq!(base.ref_count(), 0);
        assert!(base.rtpcs().is_empty());
        assert!(base.switch_states().is_empty());
        assert!(base.trigger_instances().is_empty());
    }

    #[test]
    fn test_velocity_update_pushes_speed() {
        let (sender, mut receiver) = request_queue(8);
        let mut object = AudioObject::new(9, None, &PropagationSettings::default());
        object.set_velocity_tracking(true);

        object.set_transform(WorldTransform::at(Vec3::new(1.0, 0.0, 0.0)));
        object.update_velocity(100.0, 0.1, &sender);

        let requests = receiver.drain_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].object_id, 9);
        match &requests[0].data {
            RequestData::Object(ObjectRequest::SetRtpcValue { rtpc_id, value }) => {
                assert_eq!(*rtpc_id, OBJECT_SPEED_RTPC_ID);
                approx::assert_relative_eq!(*value, 10.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Same speed again: nothing pushed
        object.set_transform(WorldTransform::at(Vec3::new(2.0, 0.0, 0.0)));
        object.update_velocity(100.0, 0.1, &sender);
        assert!(receiver.drain_requests().is_empty());
    }
}
