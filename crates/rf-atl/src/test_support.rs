//! Scriptable middleware for unit tests
//!
//! Impl nodes whose name starts with `fail` make the matching backend call
//! fail, `pending` makes trigger activation return `Pending`. Nodes tagged
//! `Invalid` cannot be parsed. Every call is recorded in `MockState::calls`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::middleware::*;
use crate::position::{MultiPositionParams, WorldTransform};
use crate::request::RequestSender;
use crate::types::{AudioObjectId, EventId, PanningMode, RequestStatus, SourceId};

#[derive(Default)]
pub struct MockState {
    next_handle: u64,
    names: HashMap<u64, String>,
    pub calls: Vec<String>,
    pub fail_object_data: bool,
    pub fail_event_data: bool,
    pub fail_set_position: bool,
    pub fail_initialize: bool,
    pub file_root: PathBuf,
    pub language: String,
    pub callbacks: Option<RequestSender>,
    pub registered_files: Vec<String>,
    pub obstruction: Vec<(ObjectData, f32, f32)>,
}

impl MockState {
    fn handle(&mut self, name: &str) -> u64 {
        self.next_handle += 1;
        self.names.insert(self.next_handle, name.to_string());
        self.next_handle
    }

    fn name(&self, handle: u64) -> &str {
        self.names.get(&handle).map(String::as_str).unwrap_or("")
    }

    fn status_for(&self, handle: u64) -> RequestStatus {
        let name = self.name(handle);
        if name.starts_with("fail") {
            RequestStatus::Failure
        } else if name.starts_with("pending") {
            RequestStatus::Pending
        } else {
            RequestStatus::Success
        }
    }

    fn record(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[derive(Clone, Default)]
pub struct MockMiddleware {
    pub state: Arc<Mutex<MockState>>,
}

impl MockMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_root(root: impl Into<PathBuf>) -> Self {
        let mock = Self::default();
        mock.state.lock().file_root = root.into();
        mock
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state.lock().count(prefix)
    }

    fn parse(&self, node: &ImplNode) -> Option<u64> {
        if node.tag == "Invalid" {
            return None;
        }
        Some(self.state.lock().handle(&node.name))
    }

    fn status(&self, handle: u64) -> RequestStatus {
        self.state.lock().status_for(handle)
    }
}

impl AudioMiddleware for MockMiddleware {
    fn initialize(&mut self, callbacks: RequestSender) -> RequestStatus {
        let mut s = self.state.lock();
        s.record("initialize");
        s.callbacks = Some(callbacks);
        RequestStatus::from_bool(!s.fail_initialize)
    }

    fn shut_down(&mut self) -> RequestStatus {
        self.state.lock().record("shut_down");
        RequestStatus::Success
    }

    fn release(&mut self) -> RequestStatus {
        self.state.lock().record("release");
        RequestStatus::Success
    }

    fn update(&mut self, _delta_ms: f32) {
        self.state.lock().record("update");
    }

    fn stop_all_sounds(&mut self) -> RequestStatus {
        self.state.lock().record("stop_all_sounds");
        RequestStatus::Success
    }

    fn set_language(&mut self, language: &str) {
        let mut s = self.state.lock();
        s.record(format!("set_language:{}", language));
        s.language = language.to_string();
    }

    fn impl_sub_path(&self) -> String {
        "mock".to_string()
    }

    fn set_panning_mode(&mut self, _mode: PanningMode) {
        self.state.lock().record("set_panning_mode");
    }

    fn on_lose_focus(&mut self) -> RequestStatus {
        self.state.lock().record("on_lose_focus");
        RequestStatus::Success
    }

    fn on_get_focus(&mut self) -> RequestStatus {
        self.state.lock().record("on_get_focus");
        RequestStatus::Success
    }

    fn on_mute(&mut self) -> RequestStatus {
        self.state.lock().record("on_mute");
        RequestStatus::Success
    }

    fn on_unmute(&mut self) -> RequestStatus {
        self.state.lock().record("on_unmute");
        RequestStatus::Success
    }

    fn new_global_audio_object_data(&mut self, id: AudioObjectId) -> ObjectData {
        let mut s = self.state.lock();
        s.record("new_global_audio_object_data");
        ObjectData(s.handle(&format!("object{}", id)))
    }

    fn new_audio_object_data(&mut self, id: AudioObjectId) -> Option<ObjectData> {
        let mut s = self.state.lock();
        if s.fail_object_data {
            return None;
        }
        s.record("new_audio_object_data");
        Some(ObjectData(s.handle(&format!("object{}", id))))
    }

    fn delete_audio_object_data(&mut self, _data: ObjectData) {
        self.state.lock().record("delete_audio_object_data");
    }

    fn reset_audio_object(&mut self, _data: ObjectData) -> RequestStatus {
        self.state.lock().record("reset_audio_object");
        RequestStatus::Success
    }

    fn register_audio_object(&mut self, _data: ObjectData, name: Option<&str>) -> RequestStatus {
        self.state
            .lock()
            .record(format!("register_audio_object:{}", name.unwrap_or("")));
        RequestStatus::Success
    }

    fn unregister_audio_object(&mut self, _data: ObjectData) -> RequestStatus {
        self.state.lock().record("unregister_audio_object");
        RequestStatus::Success
    }

    fn update_audio_object(&mut self, _data: ObjectData) -> RequestStatus {
        self.state.lock().record("update_audio_object");
        RequestStatus::Success
    }

    fn set_position(&mut self, _data: ObjectData, _transform: &WorldTransform) -> RequestStatus {
        let mut s = self.state.lock();
        s.record("set_position");
        RequestStatus::from_bool(!s.fail_set_position)
    }

    fn set_multiple_positions(
        &mut self,
        _data: ObjectData,
        _params: &MultiPositionParams,
    ) -> RequestStatus {
        self.state.lock().record("set_multiple_positions");
        RequestStatus::Success
    }

    fn set_obstruction_occlusion(
        &mut self,
        data: ObjectData,
        obstruction: f32,
        occlusion: f32,
    ) -> RequestStatus {
        let mut s = self.state.lock();
        s.record("set_obstruction_occlusion");
        s.obstruction.push((data, obstruction, occlusion));
        RequestStatus::Success
    }

    fn new_default_listener_data(&mut self, _id: AudioObjectId) -> ListenerData {
        let mut s = self.state.lock();
        s.record("new_default_listener_data");
        ListenerData(s.handle("default_listener"))
    }

    fn new_listener_data(&mut self, _id: AudioObjectId) -> ListenerData {
        let mut s = self.state.lock();
        s.record("new_listener_data");
        ListenerData(s.handle("listener"))
    }

    fn delete_listener_data(&mut self, _data: ListenerData) {
        self.state.lock().record("delete_listener_data");
    }

    fn set_listener_position(
        &mut self,
        _data: ListenerData,
        _transform: &WorldTransform,
    ) -> RequestStatus {
        let mut s = self.state.lock();
        s.record("set_listener_position");
        RequestStatus::from_bool(!s.fail_set_position)
    }

    fn new_event_data(&mut self, id: EventId) -> Option<EventData> {
        let mut s = self.state.lock();
        if s.fail_event_data {
            return None;
        }
        s.record("new_event_data");
        Some(EventData(s.handle(&format!("event{}", id))))
    }

    fn delete_event_data(&mut self, _data: EventData) {
        self.state.lock().record("delete_event_data");
    }

    fn reset_event_data(&mut self, _data: EventData) {
        self.state.lock().record("reset_event_data");
    }

    fn new_trigger_impl_data(&mut self, node: &ImplNode) -> Option<TriggerData> {
        self.parse(node).map(TriggerData)
    }

    fn delete_trigger_impl_data(&mut self, _data: TriggerData) {
        self.state.lock().record("delete_trigger_impl_data");
    }

    fn activate_trigger(
        &mut self,
        _object: ObjectData,
        trigger: TriggerData,
        _event: EventData,
        source: Option<&SourceInfo>,
    ) -> RequestStatus {
        let status = self.status(trigger.0);
        let mut s = self.state.lock();
        let name = s.name(trigger.0).to_string();
        match source {
            Some(info) => s.record(format!("activate_trigger:{}:source{}", name, info.source_id)),
            None => s.record(format!("activate_trigger:{}", name)),
        }
        status
    }

    fn prepare_trigger_async(
        &mut self,
        _object: ObjectData,
        trigger: TriggerData,
        _event: EventData,
    ) -> RequestStatus {
        self.state.lock().record("prepare_trigger_async");
        self.status(trigger.0)
    }

    fn unprepare_trigger_async(
        &mut self,
        _object: ObjectData,
        trigger: TriggerData,
        _event: EventData,
    ) -> RequestStatus {
        self.state.lock().record("unprepare_trigger_async");
        self.status(trigger.0)
    }

    fn stop_event(&mut self, _object: ObjectData, _event: EventData) -> RequestStatus {
        self.state.lock().record("stop_event");
        RequestStatus::Success
    }

    fn stop_all_events(&mut self, _object: ObjectData) -> RequestStatus {
        self.state.lock().record("stop_all_events");
        RequestStatus::Success
    }

    fn new_rtpc_impl_data(&mut self, node: &ImplNode) -> Option<RtpcData> {
        self.parse(node).map(RtpcData)
    }

    fn delete_rtpc_impl_data(&mut self, _data: RtpcData) {
        self.state.lock().record("delete_rtpc_impl_data");
    }

    fn set_rtpc(&mut self, _object: ObjectData, rtpc: RtpcData, _value: f32) -> RequestStatus {
        self.state.lock().record("set_rtpc");
        self.status(rtpc.0)
    }

    fn reset_rtpc(&mut self, _object: ObjectData, rtpc: RtpcData) -> RequestStatus {
        self.state.lock().record("reset_rtpc");
        self.status(rtpc.0)
    }

    fn new_switch_state_impl_data(&mut self, node: &ImplNode) -> Option<SwitchStateData> {
        self.parse(node).map(SwitchStateData)
    }

    fn delete_switch_state_impl_data(&mut self, _data: SwitchStateData) {
        self.state.lock().record("delete_switch_state_impl_data");
    }

    fn set_switch_state(&mut self, _object: ObjectData, state: SwitchStateData) -> RequestStatus {
        self.state.lock().record("set_switch_state");
        self.status(state.0)
    }

    fn new_environment_impl_data(&mut self, node: &ImplNode) -> Option<EnvironmentData> {
        self.parse(node).map(EnvironmentData)
    }

    fn delete_environment_impl_data(&mut self, _data: EnvironmentData) {
        self.state.lock().record("delete_environment_impl_data");
    }

    fn set_environment(
        &mut self,
        _object: ObjectData,
        environment: EnvironmentData,
        _amount: f32,
    ) -> RequestStatus {
        self.state.lock().record("set_environment");
        self.status(environment.0)
    }

    fn parse_audio_file_entry(&mut self, node: &ImplNode) -> Option<FileEntryInfo> {
        let handle = self.parse(node)?;
        let localized = node
            .properties
            .get("localized")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Some(FileEntryInfo {
            file_name: node.name.clone(),
            localized,
            memory_alignment: 16,
            data: FileEntryData(handle),
        })
    }

    fn delete_file_entry_data(&mut self, _data: FileEntryData) {
        self.state.lock().record("delete_file_entry_data");
    }

    fn audio_file_location(&self, info: &FileEntryInfo) -> String {
        let s = self.state.lock();
        let mut dir = s.file_root.clone();
        if info.localized {
            dir.push(&s.language);
        }
        dir.to_string_lossy().into_owned()
    }

    fn register_in_memory_file(&mut self, info: &FileEntryInfo, _data: &[u8]) -> RequestStatus {
        let mut s = self.state.lock();
        s.record(format!("register_in_memory_file:{}", info.file_name));
        s.registered_files.push(info.file_name.clone());
        RequestStatus::Success
    }

    fn unregister_in_memory_file(&mut self, info: &FileEntryInfo) -> RequestStatus {
        let mut s = self.state.lock();
        s.record(format!("unregister_in_memory_file:{}", info.file_name));
        s.registered_files.retain(|f| f != &info.file_name);
        RequestStatus::Success
    }

    fn create_audio_source(&mut self, config: &AudioInputConfig) -> bool {
        self.state
            .lock()
            .record(format!("create_audio_source:{}", config.source_id));
        true
    }

    fn destroy_audio_source(&mut self, source_id: SourceId) {
        self.state
            .lock()
            .record(format!("destroy_audio_source:{}", source_id));
    }

    fn implementation_name(&self) -> &str {
        "mock"
    }
}
