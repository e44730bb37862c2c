//! Audio middleware boundary
//!
//! The ATL never interprets backend data. Every backend-side entity is an
//! opaque handle minted by the middleware and handed back on each call.
//! Completions (event started/finished) come back through the
//! [`RequestSender`] given to [`AudioMiddleware::initialize`].

use serde::{Deserialize, Serialize};

use crate::position::{MultiPositionParams, WorldTransform};
use crate::request::RequestSender;
use crate::types::{AudioObjectId, EventId, PanningMode, RequestStatus, SourceId};

// ═══════════════════════════════════════════════════════════════════════════════
// OPAQUE HANDLES
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! impl_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub u64);
        )*
    };
}

impl_handle!(
    /// Backend state of an audio object
    ObjectData,
    /// Backend state of a listener
    ListenerData,
    /// Backend state of one in-flight event
    EventData,
    TriggerData,
    RtpcData,
    SwitchStateData,
    EnvironmentData,
    /// Backend state of a cached file
    FileEntryData,
);

/// Control definition node handed to the backend for parsing
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImplNode {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<ImplNode>,
}

impl ImplNode {
    pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_child(mut self, child: ImplNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_property(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// Backend description of a file referenced by a preload request
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntryInfo {
    pub file_name: String,
    pub localized: bool,
    /// Required alignment of the in-memory copy
    pub memory_alignment: usize,
    pub data: FileEntryData,
}

/// Configuration for an externally fed audio source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioInputConfig {
    pub source_id: SourceId,
    pub sample_rate: u32,
    pub num_channels: u16,
    /// File to stream from, if not fed by the game
    pub source_file: Option<String>,
}

/// Binds a source trigger to a created audio source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    pub source_id: SourceId,
    pub file_id: u64,
    pub language_id: u64,
    pub codec_id: u32,
}

/// Debug-only view of a backend memory pool
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryPoolInfo {
    pub name: String,
    pub reserved_bytes: usize,
    pub used_bytes: usize,
    pub peak_used_bytes: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIDDLEWARE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Capabilities the ATL needs from an audio backend.
///
/// Delete and release operations must tolerate being called twice.
pub trait AudioMiddleware: Send {
    // Lifecycle
    fn initialize(&mut self, callbacks: RequestSender) -> RequestStatus;
    fn shut_down(&mut self) -> RequestStatus;
    fn release(&mut self) -> RequestStatus;
    fn update(&mut self, delta_ms: f32);
    fn stop_all_sounds(&mut self) -> RequestStatus;
    fn set_language(&mut self, language: &str);
    /// Sub-directory (below the controls root) holding this backend's data
    fn impl_sub_path(&self) -> String;
    fn set_panning_mode(&mut self, mode: PanningMode);
    fn on_lose_focus(&mut self) -> RequestStatus;
    fn on_get_focus(&mut self) -> RequestStatus;
    fn on_mute(&mut self) -> RequestStatus;
    fn on_unmute(&mut self) -> RequestStatus;

    // Audio objects
    fn new_global_audio_object_data(&mut self, id: AudioObjectId) -> ObjectData;
    /// `None` when the backend cannot allocate another object
    fn new_audio_object_data(&mut self, id: AudioObjectId) -> Option<ObjectData>;
    fn delete_audio_object_data(&mut self, data: ObjectData);
    fn reset_audio_object(&mut self, data: ObjectData) -> RequestStatus;
    fn register_audio_object(&mut self, data: ObjectData, name: Option<&str>) -> RequestStatus;
    fn unregister_audio_object(&mut self, data: ObjectData) -> RequestStatus;
    fn update_audio_object(&mut self, data: ObjectData) -> RequestStatus;
    fn set_position(&mut self, data: ObjectData, transform: &WorldTransform) -> RequestStatus;
    fn set_multiple_positions(
        &mut self,
        data: ObjectData,
        params: &MultiPositionParams,
    ) -> RequestStatus;
    fn set_obstruction_occlusion(
        &mut self,
        data: ObjectData,
        obstruction: f32,
        occlusion: f32,
    ) -> RequestStatus;

    // Listeners
    fn new_default_listener_data(&mut self, id: AudioObjectId) -> ListenerData;
    fn new_listener_data(&mut self, id: AudioObjectId) -> ListenerData;
    fn delete_listener_data(&mut self, data: ListenerData);
    fn set_listener_position(
        &mut self,
        data: ListenerData,
        transform: &WorldTransform,
    ) -> RequestStatus;

    // Events
    fn new_event_data(&mut self, id: EventId) -> Option<EventData>;
    fn delete_event_data(&mut self, data: EventData);
    fn reset_event_data(&mut self, data: EventData);

    // Triggers
    fn new_trigger_impl_data(&mut self, node: &ImplNode) -> Option<TriggerData>;
    fn delete_trigger_impl_data(&mut self, data: TriggerData);
    fn activate_trigger(
        &mut self,
        object: ObjectData,
        trigger: TriggerData,
        event: EventData,
        source: Option<&SourceInfo>,
    ) -> RequestStatus;
    fn prepare_trigger_async(
        &mut self,
        object: ObjectData,
        trigger: TriggerData,
        event: EventData,
    ) -> RequestStatus;
    fn unprepare_trigger_async(
        &mut self,
        object: ObjectData,
        trigger: TriggerData,
        event: EventData,
    ) -> RequestStatus;
    fn stop_event(&mut self, object: ObjectData, event: EventData) -> RequestStatus;
    fn stop_all_events(&mut self, object: ObjectData) -> RequestStatus;

    // Parameters
    fn new_rtpc_impl_data(&mut self, node: &ImplNode) -> Option<RtpcData>;
    fn delete_rtpc_impl_data(&mut self, data: RtpcData);
    fn set_rtpc(&mut self, object: ObjectData, rtpc: RtpcData, value: f32) -> RequestStatus;
    fn reset_rtpc(&mut self, object: ObjectData, rtpc: RtpcData) -> RequestStatus;
    fn new_switch_state_impl_data(&mut self, node: &ImplNode) -> Option<SwitchStateData>;
    fn delete_switch_state_impl_data(&mut self, data: SwitchStateData);
    fn set_switch_state(&mut self, object: ObjectData, state: SwitchStateData) -> RequestStatus;
    fn new_environment_impl_data(&mut self, node: &ImplNode) -> Option<EnvironmentData>;
    fn delete_environment_impl_data(&mut self, data: EnvironmentData);
    fn set_environment(
        &mut self,
        object: ObjectData,
        environment: EnvironmentData,
        amount: f32,
    ) -> RequestStatus;

    // Files
    fn parse_audio_file_entry(&mut self, node: &ImplNode) -> Option<FileEntryInfo>;
    fn delete_file_entry_data(&mut self, data: FileEntryData);
    /// Directory the file lives in, including the language folder when localized
    fn audio_file_location(&self, info: &FileEntryInfo) -> String;
    fn register_in_memory_file(&mut self, info: &FileEntryInfo, data: &[u8]) -> RequestStatus;
    fn unregister_in_memory_file(&mut self, info: &FileEntryInfo) -> RequestStatus;

    // External sources
    fn create_audio_source(&mut self, config: &AudioInputConfig) -> bool;
    fn destroy_audio_source(&mut self, source_id: SourceId);

    // Introspection
    fn implementation_name(&self) -> &str;
    fn memory_pool_info(&self) -> Vec<MemoryPoolInfo> {
        Vec::new()
    }
}
