//! Audio Translation Layer
//!
//! Owns every manager and the middleware, and turns queued requests into
//! backend calls. All state is mutated from the single processing context;
//! backend completions and physics results come back as callback requests.
//!
//! Fan-out operations (trigger activation, RTPCs, switches, environments)
//! succeed when at least one impl succeeds. Failing impls are only logged.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use crate::config::AtlConfig;
use crate::controls::{ControlImpl, ControlLookups, InternalSwitchState, InternalTrigger};
use crate::event::{AtlEvent, EventState};
use crate::event_listener::EventListenerManager;
use crate::event_manager::EventManager;
use crate::file_cache::FileCacheManager;
use crate::listener_manager::ListenerManager;
use crate::loader::ControlsLoader;
use crate::middleware::{AudioMiddleware, ObjectData, SourceInfo};
use crate::object::{AtlObject, GlobalAudioObject, TriggerStateFlags};
use crate::object_manager::ObjectManager;
use crate::physics::PhysicsWorld;
use crate::position::{MultiPositionParams, Vec3, WorldTransform};
use crate::propagation::RayContext;
use crate::request::{
    AudioRequest, CallbackRequest, ListenerRequest, ManagerRequest, ObjectRequest, RequestData,
    RequestFlags, RequestInfo, RequestResult, RequestSender,
};
use crate::types::internal_controls::*;
use crate::types::{
    AudioObjectId, ControlId, DataScope, EnvironmentId, EventId, GLOBAL_AUDIO_OBJECT_ID,
    INVALID_AUDIO_OBJECT_ID, INVALID_CONTROL_ID, INVALID_EVENT_ID, INVALID_PRELOAD_REQUEST_ID,
    ObstructionCalcType, OwnerId, PreloadRequestId, RequestStatus, Subsystem, SwitchStateId,
    SystemEvent, TriggerInstanceId, UserData,
};

/// Sub-directory of the controls root holding per-level data
pub const LEVELS_FOLDER: &str = "levels";

/// Caller context carried into trigger activation
#[derive(Debug, Clone, Copy, Default)]
struct ActivationContext {
    owner: Option<OwnerId>,
    user_data: Option<UserData>,
    user_data_owner: Option<OwnerId>,
    flags: RequestFlags,
}

impl ActivationContext {
    fn of(request: &AudioRequest) -> Self {
        Self {
            owner: request.owner,
            user_data: request.user_data,
            user_data_owner: request.user_data_owner,
            flags: request.flags,
        }
    }
}

pub struct AudioTranslationLayer {
    config: AtlConfig,
    middleware: Box<dyn AudioMiddleware>,
    physics: Arc<dyn PhysicsWorld>,
    sender: RequestSender,

    global_object: Option<GlobalAudioObject>,
    objects: ObjectManager,
    events: EventManager,
    listeners: ListenerManager,
    lookups: ControlLookups,
    loader: ControlsLoader,
    file_cache: FileCacheManager,
    request_listeners: Arc<Mutex<EventListenerManager>>,
    sync_callbacks: Option<Sender<RequestInfo>>,

    language: String,
    impl_sub_path: String,
    impl_initialized: bool,
    muted: bool,
    shutting_down: bool,
    can_issue_rays: bool,
    trigger_instance_counter: TriggerInstanceId,
    /// Default listener position, refreshed once per update
    listener_position: Vec3,
}

impl AudioTranslationLayer {
    /// `sender` feeds the queue this layer is drained from; the middleware
    /// and the managers push their completions through it.
    pub fn new(
        config: AtlConfig,
        middleware: Box<dyn AudioMiddleware>,
        physics: Arc<dyn PhysicsWorld>,
        sender: RequestSender,
    ) -> Self {
        Self {
            objects: ObjectManager::new(&config),
            events: EventManager::new(config.event_pool_size),
            listeners: ListenerManager::new(config.num_reserved_listeners),
            lookups: ControlLookups::new(),
            loader: ControlsLoader::new(config.platform.clone()),
            file_cache: FileCacheManager::new(config.file_cache_max_bytes),
            request_listeners: Arc::new(Mutex::new(EventListenerManager::new())),
            sync_callbacks: None,
            language: config.language.clone(),
            impl_sub_path: String::new(),
            impl_initialized: false,
            muted: false,
            shutting_down: false,
            can_issue_rays: false,
            trigger_instance_counter: 1,
            listener_position: Vec3::ZERO,
            global_object: None,
            config,
            middleware,
            physics,
            sender,
        }
    }

    /// Route notifications of `SYNC_CALLBACK` requests to `tx` instead of
    /// calling listeners on the processing thread
    pub fn set_sync_callback_channel(&mut self, tx: Sender<RequestInfo>) {
        self.sync_callbacks = Some(tx);
    }

    /// Subscriber table shared with the game-facing handle
    pub fn request_listeners(&self) -> Arc<Mutex<EventListenerManager>> {
        Arc::clone(&self.request_listeners)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &AtlConfig {
        &self.config
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn listeners(&self) -> &ListenerManager {
        &self.listeners
    }

    pub fn lookups(&self) -> &ControlLookups {
        &self.lookups
    }

    pub fn file_cache(&self) -> &FileCacheManager {
        &self.file_cache
    }

    pub fn global_object(&self) -> Option<&GlobalAudioObject> {
        self.global_object.as_ref()
    }

    pub fn is_impl_initialized(&self) -> bool {
        self.impl_initialized
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn can_issue_rays(&self) -> bool {
        self.can_issue_rays
    }

    pub fn impl_sub_path(&self) -> &str {
        &self.impl_sub_path
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRAME
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn update(&mut self, delta_ms: f32) {
        self.listener_position = self.listeners.default_listener_position();

        let rays = RayContext {
            physics: self.physics.as_ref(),
            sender: &self.sender,
        };
        self.objects.update(
            delta_ms,
            self.listener_position,
            &rays,
            self.can_issue_rays,
            &self.events,
            self.middleware.as_mut(),
        );
        self.file_cache.update(self.middleware.as_mut());
        self.middleware.update(delta_ms);
    }

    pub fn on_system_event(&mut self, event: SystemEvent) {
        match event {
            SystemEvent::LevelUnload => self.can_issue_rays = false,
            SystemEvent::GameplayStart | SystemEvent::PrecacheStart => {
                self.objects.release_pending_rays(self.middleware.as_mut());
                self.can_issue_rays = true;
            }
            SystemEvent::PostUnload => {
                self.objects.release_pending_rays(self.middleware.as_mut());
            }
            SystemEvent::EditorGameModeChanged(in_game) => {
                if in_game {
                    self.objects.release_pending_rays(self.middleware.as_mut());
                }
                self.can_issue_rays = in_game;
            }
        }
        log::debug!("System event {:?}, rays enabled: {}", event, self.can_issue_rays);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DISPATCH
    // ═══════════════════════════════════════════════════════════════════════════

    /// Process one request, storing and returning its status
    pub fn process_request(&mut self, request: &mut AudioRequest) -> RequestStatus {
        let status = match request.data {
            RequestData::Manager(_) => self.process_manager_request(request),
            RequestData::Object(_) => self.process_object_request(request),
            RequestData::Listener(_) => self.process_listener_request(request),
            RequestData::Callback(_) if self.shutting_down => {
                log::debug!("Callback ignored while the middleware shuts down");
                RequestStatus::Failure
            }
            RequestData::Callback(ref callback) => self.process_callback_request(callback),
        };
        request.status = status;
        status
    }

    /// Tell the first matching subscriber how `request` went
    pub fn notify_listener(&self, request: &AudioRequest) {
        let control_id = match &request.data {
            RequestData::Callback(CallbackRequest::ReportFinishedTriggerInstance { trigger_id })
            | RequestData::Object(ObjectRequest::ExecuteTrigger { trigger_id })
            | RequestData::Object(ObjectRequest::ExecuteSourceTrigger { trigger_id, .. }) => {
                *trigger_id
            }
            _ => INVALID_CONTROL_ID,
        };
        let event_id = match &request.data {
            RequestData::Callback(CallbackRequest::ReportStartedEvent { event_id }) => *event_id,
            _ => INVALID_EVENT_ID,
        };

        let info = RequestInfo {
            result: if request.status.is_success() {
                RequestResult::Success
            } else {
                RequestResult::Failure
            },
            owner: request.owner,
            user_data: request.user_data,
            user_data_owner: request.user_data_owner,
            request_type: request.request_type(),
            specific_request: request.data.specific_bit(),
            control_id,
            object_id: request.object_id,
            event_id,
        };

        if request.flags.contains(RequestFlags::SYNC_CALLBACK) {
            if let Some(tx) = &self.sync_callbacks {
                if tx.send(info).is_err() {
                    log::warn!("Game-thread notification channel closed");
                }
                return;
            }
        }
        let callback = self.request_listeners.lock().find_callback(&info);
        if let Some(callback) = callback {
            callback(&info);
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Manager requests
    // ───────────────────────────────────────────────────────────────────────────

    fn process_manager_request(&mut self, request: &mut AudioRequest) -> RequestStatus {
        let RequestData::Manager(manager_request) = &mut request.data else {
            return RequestStatus::FailureInvalidRequest;
        };

        match manager_request {
            ManagerRequest::None => RequestStatus::Success,
            ManagerRequest::ReserveAudioObjectId { name, object_id } => {
                match self.objects.reserve_id(name.as_deref(), self.middleware.as_mut()) {
                    Some(id) => {
                        *object_id = id;
                        RequestStatus::Success
                    }
                    None => {
                        *object_id = INVALID_AUDIO_OBJECT_ID;
                        RequestStatus::Failure
                    }
                }
            }
            ManagerRequest::ReleaseAudioObjectId { object_id } => RequestStatus::from_bool(
                self.objects.release_id(*object_id, self.middleware.as_mut()),
            ),
            ManagerRequest::CreateSource { config } => {
                RequestStatus::from_bool(self.middleware.create_audio_source(config))
            }
            ManagerRequest::DestroySource { source_id } => {
                self.middleware.destroy_audio_source(*source_id);
                RequestStatus::Success
            }
            ManagerRequest::InitAudioImpl => {
                let status = self.initialize_impl();
                if !status.is_success() {
                    self.release_impl();
                }
                status
            }
            ManagerRequest::ReleaseAudioImpl => {
                self.release_impl();
                RequestStatus::Success
            }
            ManagerRequest::RefreshAudioSystem {
                controls_path,
                level_name,
                level_preload_id,
            } => {
                let controls_path = controls_path.clone();
                let level_name = level_name.clone();
                let level_preload_id = *level_preload_id;
                self.refresh_audio_system(&controls_path, level_name.as_deref(), level_preload_id)
            }
            ManagerRequest::LoseFocus => {
                if self.config.ignore_window_focus || self.muted {
                    return RequestStatus::Failure;
                }
                let status = self.activate_internal_control(LOSE_FOCUS_TRIGGER_ID, "lose_focus");
                self.middleware.on_lose_focus();
                status
            }
            ManagerRequest::GetFocus => {
                if self.config.ignore_window_focus || self.muted {
                    return RequestStatus::Failure;
                }
                self.middleware.on_get_focus();
                self.activate_internal_control(GET_FOCUS_TRIGGER_ID, "get_focus")
            }
            ManagerRequest::MuteAll => {
                let status = self.activate_internal_control(MUTE_ALL_TRIGGER_ID, "mute_all");
                if status.is_success() {
                    self.muted = true;
                }
                self.middleware.on_mute();
                status
            }
            ManagerRequest::UnmuteAll => {
                let status = self.activate_internal_control(UNMUTE_ALL_TRIGGER_ID, "unmute_all");
                if status.is_success() {
                    self.muted = false;
                }
                self.middleware.on_unmute();
                status
            }
            ManagerRequest::StopAllSounds => self.middleware.stop_all_sounds(),
            ManagerRequest::ParseControlsData { path, scope } => {
                let (path, scope) = (path.clone(), *scope);
                self.parse_controls_data(Path::new(&path), scope)
            }
            ManagerRequest::ParsePreloadsData { path, scope } => {
                let (path, scope) = (path.clone(), *scope);
                self.parse_preloads_data(Path::new(&path), scope)
            }
            ManagerRequest::ClearControlsData { scope } => {
                self.loader
                    .clear_controls_data(*scope, &mut self.lookups, self.middleware.as_mut());
                RequestStatus::Success
            }
            ManagerRequest::ClearPreloadsData { scope } => {
                self.loader.clear_preloads_data(
                    *scope,
                    &mut self.lookups,
                    &mut self.file_cache,
                    self.middleware.as_mut(),
                );
                RequestStatus::Success
            }
            ManagerRequest::PreloadSingleRequest {
                preload_id,
                auto_load_only,
            } => {
                let load_synchronously = request.flags.contains(RequestFlags::EXECUTE_BLOCKING);
                let (preload_id, auto_load_only) = (*preload_id, *auto_load_only);
                self.load_preload_request(preload_id, load_synchronously, auto_load_only)
            }
            ManagerRequest::UnloadSingleRequest { preload_id } => {
                let preload_id = *preload_id;
                self.unload_preload_request(preload_id)
            }
            ManagerRequest::UnloadAfcmDataByScope { scope } => {
                self.file_cache
                    .unload_data_by_scope(*scope, self.middleware.as_mut());
                RequestStatus::Success
            }
            ManagerRequest::ChangeLanguage { language } => {
                self.language = language.clone();
                self.middleware.set_language(&self.language);
                self.file_cache
                    .update_localized_file_cache_entries(self.middleware.as_mut());
                RequestStatus::Success
            }
            ManagerRequest::SetAudioPanningMode { mode } => {
                self.middleware.set_panning_mode(*mode);
                RequestStatus::Success
            }
            ManagerRequest::ReserveListenerId { listener_id } => match self.listeners.reserve_id() {
                Some(id) => {
                    *listener_id = id;
                    RequestStatus::Success
                }
                None => {
                    *listener_id = INVALID_AUDIO_OBJECT_ID;
                    RequestStatus::Failure
                }
            },
            ManagerRequest::ReleaseListenerId { listener_id } => {
                RequestStatus::from_bool(self.listeners.release_id(*listener_id))
            }
            ManagerRequest::SetOverrideListenerId { listener_id } => {
                RequestStatus::from_bool(self.listeners.set_override_listener_id(*listener_id))
            }
        }
    }

    /// Fire a built-in trigger on the global object
    fn activate_internal_control(&mut self, trigger_id: ControlId, name: &str) -> RequestStatus {
        if !self.lookups.triggers.contains_key(&trigger_id) {
            log::warn!("No trigger defined for built-in control '{}'", name);
            return RequestStatus::Failure;
        }
        self.activate_trigger(
            GLOBAL_AUDIO_OBJECT_ID,
            trigger_id,
            ActivationContext::default(),
            None,
        )
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Object requests
    // ───────────────────────────────────────────────────────────────────────────

    fn process_object_request(&mut self, request: &AudioRequest) -> RequestStatus {
        let RequestData::Object(object_request) = &request.data else {
            return RequestStatus::FailureInvalidRequest;
        };
        let object_id = if request.object_id == INVALID_AUDIO_OBJECT_ID {
            GLOBAL_AUDIO_OBJECT_ID
        } else {
            request.object_id
        };

        if self.object_mut(object_id).is_none() {
            log::warn!("Request to unknown audio object {}", request.object_id);
            return RequestStatus::FailureInvalidObjectId;
        }

        match object_request {
            ObjectRequest::None => RequestStatus::Success,
            ObjectRequest::PrepareTrigger { trigger_id } => {
                self.prep_unprep_trigger_async(object_id, *trigger_id, true)
            }
            ObjectRequest::UnprepareTrigger { trigger_id } => {
                self.prep_unprep_trigger_async(object_id, *trigger_id, false)
            }
            ObjectRequest::ExecuteTrigger { trigger_id } => self.activate_trigger(
                object_id,
                *trigger_id,
                ActivationContext::of(request),
                None,
            ),
            ObjectRequest::ExecuteSourceTrigger { trigger_id, source } => self.activate_trigger(
                object_id,
                *trigger_id,
                ActivationContext::of(request),
                Some(source),
            ),
            ObjectRequest::StopTrigger { trigger_id } => self.stop_trigger(object_id, *trigger_id),
            ObjectRequest::StopAllTriggers { filter_by_owner } => {
                let owner = if *filter_by_owner { request.owner } else { None };
                self.stop_all_triggers(object_id, *filter_by_owner, owner)
            }
            ObjectRequest::SetPosition { transform } => self.set_position(object_id, transform),
            ObjectRequest::SetMultiplePositions { params } => {
                self.set_multiple_positions(object_id, params)
            }
            ObjectRequest::SetRtpcValue { rtpc_id, value } => {
                self.set_rtpc(object_id, *rtpc_id, *value)
            }
            ObjectRequest::SetSwitchState {
                switch_id,
                state_id,
            } => self.set_switch_state(object_id, *switch_id, *state_id),
            ObjectRequest::SetEnvironmentAmount {
                environment_id,
                amount,
            } => self.set_environment_amount(object_id, *environment_id, *amount),
            ObjectRequest::SetVolume { .. } => RequestStatus::FailureInvalidControlId,
            ObjectRequest::ResetEnvironments => self.reset_environments(object_id),
            ObjectRequest::ResetRtpcs => self.reset_rtpcs(object_id),
            ObjectRequest::ReleaseObject => {
                if object_id == GLOBAL_AUDIO_OBJECT_ID {
                    log::warn!("The global audio object cannot be released");
                    return RequestStatus::Failure;
                }
                RequestStatus::from_bool(self.objects.release_id(object_id, self.middleware.as_mut()))
            }
        }
    }

    fn object_mut(&mut self, object_id: AudioObjectId) -> Option<&mut dyn AtlObject> {
        resolve_object(&mut self.global_object, &mut self.objects, object_id)
    }

    /// Start every impl of a trigger on an object as one trigger instance
    fn activate_trigger(
        &mut self,
        object_id: AudioObjectId,
        trigger_id: ControlId,
        context: ActivationContext,
        source: Option<&SourceInfo>,
    ) -> RequestStatus {
        let Self {
            middleware,
            physics,
            sender,
            global_object,
            objects,
            events,
            lookups,
            can_issue_rays,
            trigger_instance_counter,
            listener_position,
            ..
        } = self;

        let Some(trigger) = lookups.triggers.get(&trigger_id) else {
            return RequestStatus::FailureInvalidControlId;
        };
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };

        // A cold object gets fresh obstruction values before its first sound
        if let Some(positioned) = object.as_positioned_mut() {
            if positioned.can_run_obstruction_occlusion(*can_issue_rays)
                && !ObjectManager::has_active_events(positioned.base(), events)
            {
                let rays = RayContext {
                    physics: physics.as_ref(),
                    sender: &*sender,
                };
                positioned.reset_obstruction_occlusion(*listener_position, &rays);
            }
        }

        let instance_id = *trigger_instance_counter;
        *trigger_instance_counter = trigger_instance_counter.checked_add(1).unwrap_or(1);
        object
            .base_mut()
            .report_starting_trigger_instance(instance_id, trigger.id);

        let object_data = object.base().data();
        let mut result = RequestStatus::Failure;

        for trigger_impl in &trigger.impls {
            let Some(mut event) = events.get_event(trigger_impl.target.subsystem(), middleware.as_mut())
            else {
                log::warn!("No event available for trigger impl {}", trigger_impl.id);
                continue;
            };

            let status = match &trigger_impl.target {
                ControlImpl::Middleware(trigger_data) => match (object_data, event.data) {
                    (Some(object_data), Some(event_data)) => {
                        middleware.activate_trigger(object_data, *trigger_data, event_data, source)
                    }
                    _ => RequestStatus::Failure,
                },
                ControlImpl::Internal(internal) => activate_internal_trigger(*internal, &event, sender),
            };

            if status.is_success_or_pending() {
                event.object_id = object.base().id();
                event.trigger_id = trigger.id;
                event.trigger_impl_id = trigger_impl.id;
                event.trigger_instance_id = instance_id;
                event.scope = trigger.scope;
                event.state = if status == RequestStatus::Pending {
                    EventState::Loading
                } else {
                    EventState::Playing
                };

                object.base_mut().report_started_event(&event);
                object.base_mut().increment_ref_count();
                events.track(event);
                result = RequestStatus::Success;
            } else {
                events.release_event(event, middleware.as_mut());
            }
        }

        object.base_mut().report_started_trigger_instance(
            instance_id,
            context.owner,
            context.user_data,
            context.user_data_owner,
            context.flags,
            sender,
        );

        if !result.is_success() {
            log::warn!(
                "Trigger '{}' failed on audio object {}",
                trigger.name,
                object.base().id()
            );
        }
        result
    }

    fn prep_unprep_trigger_async(
        &mut self,
        object_id: AudioObjectId,
        trigger_id: ControlId,
        prepare: bool,
    ) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            events,
            lookups,
            ..
        } = self;

        let Some(trigger) = lookups.triggers.get(&trigger_id) else {
            return RequestStatus::FailureInvalidControlId;
        };
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        let object_data = object.base().data();
        let mut result = RequestStatus::Failure;

        for trigger_impl in &trigger.impls {
            // Internal impls have nothing to prepare
            let ControlImpl::Middleware(trigger_data) = &trigger_impl.target else {
                continue;
            };
            let flags = object.base().trigger_impl_state(trigger_impl.id).flags;
            let wanted = if prepare {
                !flags.contains(TriggerStateFlags::PREPARED)
                    && !flags.contains(TriggerStateFlags::LOADING)
            } else {
                flags.contains(TriggerStateFlags::PREPARED)
                    && !flags.contains(TriggerStateFlags::UNLOADING)
            };
            if !wanted {
                continue;
            }

            let Some(mut event) = events.get_event(Subsystem::Middleware, middleware.as_mut()) else {
                continue;
            };
            let status = match (object_data, event.data) {
                (Some(object_data), Some(event_data)) if prepare => {
                    middleware.prepare_trigger_async(object_data, *trigger_data, event_data)
                }
                (Some(object_data), Some(event_data)) => {
                    middleware.unprepare_trigger_async(object_data, *trigger_data, event_data)
                }
                _ => RequestStatus::Failure,
            };

            if status.is_success() {
                event.object_id = object.base().id();
                event.trigger_id = trigger.id;
                event.trigger_impl_id = trigger_impl.id;
                event.scope = trigger.scope;
                event.state = if prepare {
                    EventState::Loading
                } else {
                    EventState::Unloading
                };

                let base = object.base_mut();
                base.set_trigger_impl_pending(trigger_impl.id, prepare);
                base.report_started_event(&event);
                base.increment_ref_count();
                events.track(event);
                result = RequestStatus::Success;
            } else {
                events.release_event(event, middleware.as_mut());
            }
        }

        if !result.is_success() {
            log::warn!(
                "{} of trigger '{}' failed on audio object {}",
                if prepare { "Prepare" } else { "Unprepare" },
                trigger.name,
                object_id
            );
        }
        result
    }

    fn stop_trigger(&mut self, object_id: AudioObjectId, trigger_id: ControlId) -> RequestStatus {
        if !self.lookups.triggers.contains_key(&trigger_id) {
            return RequestStatus::FailureInvalidControlId;
        }
        let Self {
            middleware,
            global_object,
            objects,
            events,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };

        let object_data = object.base().data();
        let mut result = RequestStatus::Failure;
        for event_id in object.base().active_events() {
            let Some(event) = events.lookup(*event_id) else {
                continue;
            };
            if event.is_playing()
                && event.trigger_id == trigger_id
                && stop_event(object_data, event, middleware.as_mut()).is_success()
            {
                result = RequestStatus::Success;
            }
        }
        result
    }

    fn stop_all_triggers(
        &mut self,
        object_id: AudioObjectId,
        filter_by_owner: bool,
        owner: Option<OwnerId>,
    ) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            events,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        let Some(object_data) = object.base().data() else {
            return RequestStatus::Failure;
        };

        if !filter_by_owner {
            return middleware.stop_all_events(object_data);
        }

        let instances = object.base().trigger_instances_by_owner(owner);
        let mut result = RequestStatus::Success;
        for event_id in object.base().active_events() {
            let Some(event) = events.lookup(*event_id) else {
                continue;
            };
            if instances.contains(&event.trigger_instance_id)
                && !stop_event(Some(object_data), event, middleware.as_mut()).is_success()
            {
                result = RequestStatus::Failure;
            }
        }
        result
    }

    fn set_position(&mut self, object_id: AudioObjectId, transform: &WorldTransform) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        let Some(positioned) = object.as_positioned_mut() else {
            log::warn!("Set position on the global audio object ignored");
            return RequestStatus::Failure;
        };
        let Some(data) = positioned.base().data() else {
            return RequestStatus::Failure;
        };

        let status = middleware.set_position(data, transform);
        if status.is_success() {
            positioned.set_transform(*transform);
        }
        status
    }

    fn set_multiple_positions(
        &mut self,
        object_id: AudioObjectId,
        params: &MultiPositionParams,
    ) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        let Some(positioned) = object.as_positioned_mut() else {
            log::warn!("Set multiple positions on the global audio object ignored");
            return RequestStatus::Failure;
        };
        let Some(data) = positioned.base().data() else {
            return RequestStatus::Failure;
        };

        let status = middleware.set_multiple_positions(data, params);
        // The first position stands in for the set when measuring distances
        if status.is_success() {
            if let Some(first) = params.positions.first() {
                positioned.set_transform(WorldTransform::at(*first));
            }
        }
        status
    }

    fn set_rtpc(&mut self, object_id: AudioObjectId, rtpc_id: ControlId, value: f32) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            lookups,
            ..
        } = self;
        let Some(rtpc) = lookups.rtpcs.get(&rtpc_id) else {
            return RequestStatus::FailureInvalidControlId;
        };
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        let Some(object_data) = object.base().data() else {
            return RequestStatus::Failure;
        };

        let mut result = RequestStatus::Failure;
        for rtpc_impl in &rtpc.impls {
            let status = match rtpc_impl {
                ControlImpl::Middleware(data) => middleware.set_rtpc(object_data, *data, value),
                ControlImpl::Internal(never) => match *never {},
            };
            if status.is_success() {
                result = RequestStatus::Success;
            }
        }

        if result.is_success() {
            object.base_mut().set_rtpc(rtpc_id, value);
        } else {
            log::warn!(
                "Failed to set RTPC '{}' to {} on audio object {}",
                rtpc.name,
                value,
                object_id
            );
        }
        result
    }

    fn reset_rtpcs(&mut self, object_id: AudioObjectId) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            lookups,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        let Some(object_data) = object.base().data() else {
            return RequestStatus::Failure;
        };

        let mut result = RequestStatus::Success;
        for rtpc_id in object.base().rtpcs().keys() {
            let Some(rtpc) = lookups.rtpcs.get(rtpc_id) else {
                continue;
            };
            for rtpc_impl in &rtpc.impls {
                let status = match rtpc_impl {
                    ControlImpl::Middleware(data) => middleware.reset_rtpc(object_data, *data),
                    ControlImpl::Internal(never) => match *never {},
                };
                if !status.is_success() {
                    result = RequestStatus::Failure;
                }
            }
        }

        if result.is_success() {
            object.base_mut().clear_rtpcs();
        } else {
            log::warn!("Failed to reset RTPCs on audio object {}", object_id);
        }
        result
    }

    fn set_switch_state(
        &mut self,
        object_id: AudioObjectId,
        switch_id: ControlId,
        state_id: SwitchStateId,
    ) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            lookups,
            ..
        } = self;
        let Some(state) = lookups
            .switches
            .get(&switch_id)
            .and_then(|switch| switch.states.get(&state_id))
        else {
            return RequestStatus::FailureInvalidControlId;
        };
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };

        let mut result = RequestStatus::Failure;
        for state_impl in &state.impls {
            let status = match state_impl {
                ControlImpl::Middleware(data) => match object.base().data() {
                    Some(object_data) => middleware.set_switch_state(object_data, *data),
                    None => RequestStatus::Failure,
                },
                ControlImpl::Internal(internal) => {
                    set_internal_switch_state(object, *internal, middleware.as_mut())
                }
            };
            if status.is_success() {
                result = RequestStatus::Success;
            }
        }

        if result.is_success() {
            object.base_mut().set_switch_state(switch_id, state_id);
        } else {
            log::warn!(
                "Failed to set switch state '{}' on audio object {}",
                state.name,
                object_id
            );
        }
        result
    }

    fn set_environment_amount(
        &mut self,
        object_id: AudioObjectId,
        environment_id: EnvironmentId,
        amount: f32,
    ) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            lookups,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };
        if object.as_positioned_mut().is_none() {
            log::warn!("Set environment on the global audio object ignored");
            return RequestStatus::Failure;
        }
        if !lookups.environments.contains_key(&environment_id) {
            return RequestStatus::FailureInvalidControlId;
        }
        set_environment(object, lookups, environment_id, amount, middleware.as_mut())
    }

    fn reset_environments(&mut self, object_id: AudioObjectId) -> RequestStatus {
        let Self {
            middleware,
            global_object,
            objects,
            lookups,
            ..
        } = self;
        let Some(object) = resolve_object(global_object, objects, object_id) else {
            return RequestStatus::FailureInvalidObjectId;
        };

        let environment_ids: Vec<EnvironmentId> =
            object.base().environments().keys().copied().collect();
        let mut result = RequestStatus::Success;
        for environment_id in environment_ids {
            if lookups.environments.contains_key(&environment_id)
                && !set_environment(object, lookups, environment_id, 0.0, middleware.as_mut())
                    .is_success()
            {
                result = RequestStatus::Failure;
            }
        }

        if result.is_success() {
            object.base_mut().clear_environments();
        } else {
            log::warn!("Failed to reset environments on audio object {}", object_id);
        }
        result
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Listener requests
    // ───────────────────────────────────────────────────────────────────────────

    fn process_listener_request(&mut self, request: &AudioRequest) -> RequestStatus {
        let RequestData::Listener(listener_request) = &request.data else {
            return RequestStatus::FailureInvalidRequest;
        };
        let Some(listener_id) = self.listeners.resolve(request.object_id) else {
            log::debug!("Listener request without target ignored while an override is set");
            return RequestStatus::Failure;
        };
        if self.listeners.lookup(listener_id).is_none() {
            log::error!("Could not find listener {}", listener_id);
            return RequestStatus::Failure;
        }

        match listener_request {
            ListenerRequest::None => RequestStatus::Success,
            ListenerRequest::SetPosition { transform } => {
                self.listeners
                    .set_position(listener_id, *transform, self.middleware.as_mut())
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Callback requests
    // ───────────────────────────────────────────────────────────────────────────

    fn process_callback_request(&mut self, request: &CallbackRequest) -> RequestStatus {
        match request {
            CallbackRequest::None | CallbackRequest::ReportFinishedTriggerInstance { .. } => {
                RequestStatus::Success
            }
            CallbackRequest::ReportStartedEvent { event_id } => {
                self.report_started_event(*event_id);
                RequestStatus::Success
            }
            CallbackRequest::ReportFinishedEvent { event_id, success } => {
                self.report_finished_event(*event_id, *success);
                RequestStatus::Success
            }
            CallbackRequest::ReportProcessedObstructionRay {
                object_id,
                ray_index,
                batch,
                hits,
            } => {
                self.objects.report_obstruction_ray(
                    *object_id,
                    *ray_index,
                    *batch,
                    hits,
                    self.middleware.as_mut(),
                );
                RequestStatus::Success
            }
        }
    }

    fn report_started_event(&mut self, event_id: EventId) {
        let Some(event) = self.events.lookup_mut(event_id) else {
            log::warn!("Started report for unknown event {}", event_id);
            return;
        };
        event.state = EventState::PlayingDelayed;

        if event.object_id == GLOBAL_AUDIO_OBJECT_ID {
            if let Some(global) = self.global_object.as_mut() {
                global.base_mut().report_started_event(event);
            }
        } else {
            self.objects.report_started_event(event);
        }
    }

    fn report_finished_event(&mut self, event_id: EventId, success: bool) {
        let Some(event) = self.events.take(event_id) else {
            log::warn!("Finished report for unknown event {}", event_id);
            return;
        };

        if event.object_id == GLOBAL_AUDIO_OBJECT_ID {
            if let Some(global) = self.global_object.as_mut() {
                global
                    .base_mut()
                    .report_finished_event(&event, success, &self.sender);
            }
        } else {
            self.objects.report_finished_event(
                &event,
                success,
                &self.sender,
                self.middleware.as_mut(),
            );
        }
        self.events.release_event(event, self.middleware.as_mut());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DATA
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn parse_controls_data(&mut self, folder: &Path, scope: DataScope) -> RequestStatus {
        match self
            .loader
            .parse_controls_data(folder, scope, &mut self.lookups, self.middleware.as_mut())
        {
            Ok(_) => RequestStatus::Success,
            Err(e) => {
                log::error!("Failed to parse controls in {}: {}", folder.display(), e);
                RequestStatus::Failure
            }
        }
    }

    pub fn parse_preloads_data(&mut self, folder: &Path, scope: DataScope) -> RequestStatus {
        match self.loader.parse_preloads_data(
            folder,
            scope,
            &mut self.lookups,
            &mut self.file_cache,
            self.middleware.as_mut(),
        ) {
            Ok(_) => RequestStatus::Success,
            Err(e) => {
                log::error!("Failed to parse preloads in {}: {}", folder.display(), e);
                RequestStatus::Failure
            }
        }
    }

    fn load_preload_request(
        &mut self,
        preload_id: PreloadRequestId,
        load_synchronously: bool,
        auto_load_only: bool,
    ) -> RequestStatus {
        let Some(request) = self.lookups.preloads.get_mut(&preload_id) else {
            log::warn!("Unknown preload request {}", preload_id);
            return RequestStatus::Failure;
        };
        self.file_cache.try_load_request(
            request,
            load_synchronously,
            auto_load_only,
            self.middleware.as_mut(),
        )
    }

    fn unload_preload_request(&mut self, preload_id: PreloadRequestId) -> RequestStatus {
        let Some(request) = self.lookups.preloads.get_mut(&preload_id) else {
            log::warn!("Unknown preload request {}", preload_id);
            return RequestStatus::Failure;
        };
        self.file_cache
            .try_unload_request(request, self.middleware.as_mut())
    }

    /// Drop all loaded data and reload it from `controls_path`
    pub fn refresh_audio_system(
        &mut self,
        controls_path: &str,
        level_name: Option<&str>,
        level_preload_id: PreloadRequestId,
    ) -> RequestStatus {
        log::info!("Refreshing the audio system");
        if controls_path.is_empty() {
            log::error!("Refresh aborted: controls path is empty");
            return RequestStatus::Failure;
        }

        if !self.middleware.stop_all_sounds().is_success() {
            log::error!("Refresh: failed to stop all sounds");
        }
        self.file_cache
            .unload_data_by_scope(DataScope::LevelSpecific, self.middleware.as_mut());
        self.file_cache
            .unload_data_by_scope(DataScope::Global, self.middleware.as_mut());
        self.loader
            .clear_controls_data(DataScope::All, &mut self.lookups, self.middleware.as_mut());
        self.loader.clear_preloads_data(
            DataScope::All,
            &mut self.lookups,
            &mut self.file_cache,
            self.middleware.as_mut(),
        );

        self.middleware.set_language(&self.language);

        let root = Path::new(controls_path);
        self.parse_controls_data(root, DataScope::Global);
        self.parse_preloads_data(root, DataScope::Global);
        if !self
            .load_preload_request(GLOBAL_PRELOAD_REQUEST_ID, true, true)
            .is_success()
        {
            log::error!("Refresh: failed to load global preloads");
        }

        if let Some(level_name) = level_name.filter(|name| !name.is_empty()) {
            let level_path = root.join(LEVELS_FOLDER).join(level_name);
            self.parse_controls_data(&level_path, DataScope::LevelSpecific);
            self.parse_preloads_data(&level_path, DataScope::LevelSpecific);
            if level_preload_id != INVALID_PRELOAD_REQUEST_ID
                && !self
                    .load_preload_request(level_preload_id, true, true)
                    .is_success()
            {
                log::error!("Refresh: failed to load preloads of level '{}'", level_name);
            }
        }

        log::info!("Audio system refreshed");
        RequestStatus::Success
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MIDDLEWARE LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn initialize_impl(&mut self) -> RequestStatus {
        let status = self.middleware.initialize(self.sender.clone());
        if !status.is_success() {
            log::error!(
                "Failed to initialize audio middleware '{}'",
                self.middleware.implementation_name()
            );
            return status;
        }

        let global_data = self
            .middleware
            .new_global_audio_object_data(GLOBAL_AUDIO_OBJECT_ID);
        self.global_object = Some(GlobalAudioObject::new(global_data));

        self.objects.initialize(self.middleware.as_mut());
        self.events.initialize(self.middleware.as_mut());
        let objects = &mut self.objects;
        self.listeners
            .initialize(self.middleware.as_mut(), || objects.allocate_id());

        self.middleware.set_language(&self.language);
        self.impl_sub_path = self.middleware.impl_sub_path();
        self.impl_initialized = true;

        log::info!(
            "Audio middleware '{}' initialized",
            self.middleware.implementation_name()
        );
        status
    }

    /// Tear down every manager and shut the middleware down
    pub fn release_impl(&mut self) {
        self.shutting_down = true;

        self.loader
            .clear_controls_data(DataScope::All, &mut self.lookups, self.middleware.as_mut());
        self.loader.clear_preloads_data(
            DataScope::All,
            &mut self.lookups,
            &mut self.file_cache,
            self.middleware.as_mut(),
        );

        if let Some(global) = self.global_object.take() {
            if let Some(data) = global.base().data() {
                self.middleware.delete_audio_object_data(data);
            }
        }

        self.objects.release(self.middleware.as_mut());
        self.listeners.release(self.middleware.as_mut());
        self.events.release(self.middleware.as_mut());
        self.file_cache.release(self.middleware.as_mut());
        self.impl_sub_path.clear();

        if !self.middleware.shut_down().is_success() {
            log::warn!("Shutting down the audio middleware failed");
        }
        if !self.middleware.release().is_success() {
            log::warn!("Releasing the audio middleware failed");
        }

        self.impl_initialized = false;
        self.shutting_down = false;
    }
}

impl Drop for AudioTranslationLayer {
    fn drop(&mut self) {
        if self.impl_initialized {
            self.release_impl();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS (disjoint field borrows)
// ═══════════════════════════════════════════════════════════════════════════════

fn resolve_object<'a>(
    global_object: &'a mut Option<GlobalAudioObject>,
    objects: &'a mut ObjectManager,
    object_id: AudioObjectId,
) -> Option<&'a mut dyn AtlObject> {
    if object_id == GLOBAL_AUDIO_OBJECT_ID || object_id == INVALID_AUDIO_OBJECT_ID {
        global_object.as_mut().map(|g| g as &mut dyn AtlObject)
    } else {
        objects.lookup_mut(object_id).map(|o| o as &mut dyn AtlObject)
    }
}

fn activate_internal_trigger(
    trigger: InternalTrigger,
    event: &AtlEvent,
    sender: &RequestSender,
) -> RequestStatus {
    match trigger {
        InternalTrigger::DoNothing => {
            let finished = AudioRequest::callback(CallbackRequest::ReportFinishedEvent {
                event_id: event.id,
                success: true,
            });
            match sender.push_thread_safe(finished) {
                Ok(()) => RequestStatus::Success,
                Err(e) => {
                    log::warn!("do_nothing trigger could not queue its completion: {}", e);
                    RequestStatus::Failure
                }
            }
        }
    }
}

fn stop_event(
    object_data: Option<ObjectData>,
    event: &AtlEvent,
    middleware: &mut dyn AudioMiddleware,
) -> RequestStatus {
    match (event.sender, object_data, event.data) {
        (Subsystem::Middleware, Some(object_data), Some(event_data)) => {
            middleware.stop_event(object_data, event_data)
        }
        (Subsystem::Middleware, ..) => RequestStatus::Failure,
        // Internal events finish on their own
        (Subsystem::AtlInternal, ..) => RequestStatus::Failure,
    }
}

fn set_environment(
    object: &mut dyn AtlObject,
    lookups: &ControlLookups,
    environment_id: EnvironmentId,
    amount: f32,
    middleware: &mut dyn AudioMiddleware,
) -> RequestStatus {
    let Some(environment) = lookups.environments.get(&environment_id) else {
        return RequestStatus::FailureInvalidControlId;
    };
    let Some(object_data) = object.base().data() else {
        return RequestStatus::Failure;
    };

    let mut result = RequestStatus::Failure;
    for environment_impl in &environment.impls {
        let status = match environment_impl {
            ControlImpl::Middleware(data) => middleware.set_environment(object_data, *data, amount),
            ControlImpl::Internal(never) => match *never {},
        };
        if status.is_success() {
            result = RequestStatus::Success;
        }
    }

    if result.is_success() {
        object.base_mut().set_environment_amount(environment_id, amount);
    } else {
        log::warn!(
            "Failed to set environment '{}' to {} on audio object {}",
            environment.name,
            amount,
            object.base().id()
        );
    }
    result
}

/// Built-in switches only affect positioned objects; always succeeds
fn set_internal_switch_state(
    object: &mut dyn AtlObject,
    state: InternalSwitchState,
    middleware: &mut dyn AudioMiddleware,
) -> RequestStatus {
    let Some(positioned) = object.as_positioned_mut() else {
        return RequestStatus::Success;
    };

    match state.switch_id {
        OBSTRUCTION_CALC_SWITCH_ID => match state.state_id {
            OBSTRUCTION_CALC_IGNORE_STATE_ID => {
                positioned.set_obstruction_calc_type(ObstructionCalcType::Ignore);
                let propagation = positioned.propagation_data();
                if let Some(data) = positioned.base().data() {
                    middleware.set_obstruction_occlusion(
                        data,
                        propagation.obstruction,
                        propagation.occlusion,
                    );
                }
            }
            OBSTRUCTION_CALC_SINGLE_RAY_STATE_ID => {
                positioned.set_obstruction_calc_type(ObstructionCalcType::SingleRay)
            }
            OBSTRUCTION_CALC_MULTI_RAY_STATE_ID => {
                positioned.set_obstruction_calc_type(ObstructionCalcType::MultiRay)
            }
            other => log::warn!("Unknown obstruction calculation state {}", other),
        },
        VELOCITY_TRACKING_SWITCH_ID => match state.state_id {
            VELOCITY_TRACKING_ON_STATE_ID => positioned.set_velocity_tracking(true),
            VELOCITY_TRACKING_OFF_STATE_ID => positioned.set_velocity_tracking(false),
            other => log::warn!("Unknown velocity tracking state {}", other),
        },
        other => log::warn!("Unknown internal switch {}", other),
    }
    RequestStatus::Success
}
