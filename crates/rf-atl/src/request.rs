//! Audio requests and the request queue
//!
//! Requests are pushed from any thread into a lock-free ring buffer and
//! drained by the single audio processing context. Blocking pushes wait for
//! the processed request to come back on a reply channel. Thread-safe pushes
//! spill into an unbounded overflow channel when the ring is full, so worker
//! completions are never lost.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AtlError, AtlResult};
use crate::middleware::{AudioInputConfig, SourceInfo};
use crate::physics::RayHit;
use crate::position::{MultiPositionParams, WorldTransform};
use crate::types::{
    AudioObjectId, ControlId, DataScope, EnvironmentId, EventId, INVALID_AUDIO_OBJECT_ID,
    OwnerId, PanningMode, PreloadRequestId, RequestStatus, SourceId, SwitchStateId, UserData,
};

// ═══════════════════════════════════════════════════════════════════════════════
// FLAGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestFlags(u32);

impl RequestFlags {
    pub const NONE: Self = Self(0);
    /// Processed before normal requests of the same drain
    pub const PRIORITY_HIGH: Self = Self(1 << 0);
    /// Caller waits for the processed request
    pub const EXECUTE_BLOCKING: Self = Self(1 << 1);
    /// Notify on the game thread instead of the audio thread
    pub const SYNC_CALLBACK: Self = Self(1 << 2);
    /// Trigger-finished notifications go to the game thread
    pub const SYNC_FINISHED_CALLBACK: Self = Self(1 << 3);
    /// Pushed from a thread other than the game thread
    pub const THREAD_SAFE_PUSH: Self = Self(1 << 4);

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

impl BitOr for RequestFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Manager,
    Object,
    Listener,
    Callback,
}

/// Process-scoped operations
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerRequest {
    None,
    /// Reserve an object id; the id is written back into `object_id`
    ReserveAudioObjectId {
        name: Option<String>,
        object_id: AudioObjectId,
    },
    ReleaseAudioObjectId {
        object_id: AudioObjectId,
    },
    CreateSource {
        config: AudioInputConfig,
    },
    DestroySource {
        source_id: SourceId,
    },
    InitAudioImpl,
    ReleaseAudioImpl,
    RefreshAudioSystem {
        controls_path: String,
        level_name: Option<String>,
        level_preload_id: PreloadRequestId,
    },
    LoseFocus,
    GetFocus,
    MuteAll,
    UnmuteAll,
    StopAllSounds,
    ParseControlsData {
        path: String,
        scope: DataScope,
    },
    ParsePreloadsData {
        path: String,
        scope: DataScope,
    },
    ClearControlsData {
        scope: DataScope,
    },
    ClearPreloadsData {
        scope: DataScope,
    },
    PreloadSingleRequest {
        preload_id: PreloadRequestId,
        auto_load_only: bool,
    },
    UnloadSingleRequest {
        preload_id: PreloadRequestId,
    },
    UnloadAfcmDataByScope {
        scope: DataScope,
    },
    ChangeLanguage {
        language: String,
    },
    SetAudioPanningMode {
        mode: PanningMode,
    },
    /// Reserve a listener id; written back into `listener_id`
    ReserveListenerId {
        listener_id: AudioObjectId,
    },
    ReleaseListenerId {
        listener_id: AudioObjectId,
    },
    SetOverrideListenerId {
        listener_id: AudioObjectId,
    },
}

impl ManagerRequest {
    pub fn specific_bit(&self) -> u32 {
        let index = match self {
            Self::None => return 0,
            Self::ReserveAudioObjectId { .. } => 0,
            Self::ReleaseAudioObjectId { .. } => 1,
            Self::CreateSource { .. } => 2,
            Self::DestroySource { .. } => 3,
            Self::InitAudioImpl => 4,
            Self::ReleaseAudioImpl => 5,
            Self::RefreshAudioSystem { .. } => 6,
            Self::LoseFocus => 7,
            Self::GetFocus => 8,
            Self::MuteAll => 9,
            Self::UnmuteAll => 10,
            Self::StopAllSounds => 11,
            Self::ParseControlsData { .. } => 12,
            Self::ParsePreloadsData { .. } => 13,
            Self::ClearControlsData { .. } => 14,
            Self::ClearPreloadsData { .. } => 15,
            Self::PreloadSingleRequest { .. } => 16,
            Self::UnloadSingleRequest { .. } => 17,
            Self::UnloadAfcmDataByScope { .. } => 18,
            Self::ChangeLanguage { .. } => 19,
            Self::SetAudioPanningMode { .. } => 20,
            Self::ReserveListenerId { .. } => 21,
            Self::ReleaseListenerId { .. } => 22,
            Self::SetOverrideListenerId { .. } => 23,
        };
        1 << index
    }
}

/// Operations on one audio object (or the global object)
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRequest {
    None,
    PrepareTrigger {
        trigger_id: ControlId,
    },
    UnprepareTrigger {
        trigger_id: ControlId,
    },
    ExecuteTrigger {
        trigger_id: ControlId,
    },
    StopTrigger {
        trigger_id: ControlId,
    },
    StopAllTriggers {
        filter_by_owner: bool,
    },
    SetPosition {
        transform: WorldTransform,
    },
    SetRtpcValue {
        rtpc_id: ControlId,
        value: f32,
    },
    SetSwitchState {
        switch_id: ControlId,
        state_id: SwitchStateId,
    },
    SetEnvironmentAmount {
        environment_id: EnvironmentId,
        amount: f32,
    },
    SetVolume {
        volume: f32,
    },
    ResetEnvironments,
    ResetRtpcs,
    ReleaseObject,
    ExecuteSourceTrigger {
        trigger_id: ControlId,
        source: SourceInfo,
    },
    SetMultiplePositions {
        params: MultiPositionParams,
    },
}

impl ObjectRequest {
    pub fn specific_bit(&self) -> u32 {
        let index = match self {
            Self::None => return 0,
            Self::PrepareTrigger { .. } => 0,
            Self::UnprepareTrigger { .. } => 1,
            Self::ExecuteTrigger { .. } => 2,
            Self::StopTrigger { .. } => 3,
            Self::StopAllTriggers { .. } => 4,
            Self::SetPosition { .. } => 5,
            Self::SetRtpcValue { .. } => 6,
            Self::SetSwitchState { .. } => 7,
            Self::SetEnvironmentAmount { .. } => 8,
            Self::SetVolume { .. } => 9,
            Self::ResetEnvironments => 10,
            Self::ResetRtpcs => 11,
            Self::ReleaseObject => 12,
            Self::ExecuteSourceTrigger { .. } => 13,
            Self::SetMultiplePositions { .. } => 14,
        };
        1 << index
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerRequest {
    None,
    SetPosition { transform: WorldTransform },
}

impl ListenerRequest {
    pub fn specific_bit(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::SetPosition { .. } => 1,
        }
    }
}

/// Results flowing back from the backend and the physics world
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackRequest {
    None,
    ReportStartedEvent {
        event_id: EventId,
    },
    ReportFinishedEvent {
        event_id: EventId,
        success: bool,
    },
    ReportFinishedTriggerInstance {
        trigger_id: ControlId,
    },
    ReportProcessedObstructionRay {
        object_id: AudioObjectId,
        ray_index: usize,
        batch: u32,
        hits: Vec<RayHit>,
    },
}

impl CallbackRequest {
    pub fn specific_bit(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::ReportStartedEvent { .. } => 1 << 0,
            Self::ReportFinishedEvent { .. } => 1 << 1,
            Self::ReportFinishedTriggerInstance { .. } => 1 << 2,
            Self::ReportProcessedObstructionRay { .. } => 1 << 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    Manager(ManagerRequest),
    Object(ObjectRequest),
    Listener(ListenerRequest),
    Callback(CallbackRequest),
}

impl RequestData {
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Manager(_) => RequestType::Manager,
            Self::Object(_) => RequestType::Object,
            Self::Listener(_) => RequestType::Listener,
            Self::Callback(_) => RequestType::Callback,
        }
    }

    pub fn specific_bit(&self) -> u32 {
        match self {
            Self::Manager(r) => r.specific_bit(),
            Self::Object(r) => r.specific_bit(),
            Self::Listener(r) => r.specific_bit(),
            Self::Callback(r) => r.specific_bit(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct AudioRequest {
    pub flags: RequestFlags,
    /// Target object or listener; invalid means global object / default listener
    pub object_id: AudioObjectId,
    pub owner: Option<OwnerId>,
    pub user_data: Option<UserData>,
    pub user_data_owner: Option<OwnerId>,
    pub data: RequestData,
    /// Written by the ATL when the request is processed
    pub status: RequestStatus,
}

impl AudioRequest {
    pub fn new(data: RequestData) -> Self {
        Self {
            flags: RequestFlags::NONE,
            object_id: INVALID_AUDIO_OBJECT_ID,
            owner: None,
            user_data: None,
            user_data_owner: None,
            data,
            status: RequestStatus::None,
        }
    }

    pub fn manager(request: ManagerRequest) -> Self {
        Self::new(RequestData::Manager(request))
    }

    pub fn object(object_id: AudioObjectId, request: ObjectRequest) -> Self {
        Self {
            object_id,
            ..Self::new(RequestData::Object(request))
        }
    }

    pub fn listener(listener_id: AudioObjectId, request: ListenerRequest) -> Self {
        Self {
            object_id: listener_id,
            ..Self::new(RequestData::Listener(request))
        }
    }

    pub fn callback(request: CallbackRequest) -> Self {
        Self::new(RequestData::Callback(request))
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_user_data(mut self, user_data: UserData, user_data_owner: Option<OwnerId>) -> Self {
        self.user_data = Some(user_data);
        self.user_data_owner = user_data_owner;
        self
    }

    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn high_priority(self) -> Self {
        self.with_flags(RequestFlags::PRIORITY_HIGH)
    }

    #[inline]
    pub fn request_type(&self) -> RequestType {
        self.data.request_type()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NOTIFICATION PAYLOAD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    Success,
    Failure,
}

/// What a request listener receives after a request was processed
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInfo {
    pub result: RequestResult,
    pub owner: Option<OwnerId>,
    pub user_data: Option<UserData>,
    pub user_data_owner: Option<OwnerId>,
    pub request_type: RequestType,
    pub specific_request: u32,
    pub control_id: ControlId,
    pub object_id: AudioObjectId,
    pub event_id: EventId,
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUEUE
// ═══════════════════════════════════════════════════════════════════════════════

/// How often a blocked caller checks whether the processor went away
const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct QueuedRequest {
    pub request: AudioRequest,
    pub reply: Option<Sender<AudioRequest>>,
}

/// Cloneable producer side of the request queue
#[derive(Clone)]
pub struct RequestSender {
    producer: Arc<Mutex<Producer<QueuedRequest>>>,
    overflow: Sender<QueuedRequest>,
}

impl RequestSender {
    fn push_queued(&self, queued: QueuedRequest) -> AtlResult<()> {
        let mut tx = self.producer.lock();
        tx.push(queued).map_err(|_| AtlError::QueueFull)
    }

    /// Push from the game thread
    pub fn push(&self, request: AudioRequest) -> AtlResult<()> {
        self.push_queued(QueuedRequest {
            request,
            reply: None,
        })
    }

    /// Push from a worker thread (physics, backend callbacks).
    ///
    /// Never rejected for capacity: a full ring spills into the overflow
    /// channel. Fails only once the receiver is gone.
    pub fn push_thread_safe(&self, mut request: AudioRequest) -> AtlResult<()> {
        request.flags.insert(RequestFlags::THREAD_SAFE_PUSH);
        let queued = QueuedRequest {
            request,
            reply: None,
        };
        let queued = {
            let mut tx = self.producer.lock();
            if tx.is_abandoned() {
                return Err(AtlError::Disconnected);
            }
            match tx.push(queued) {
                Ok(()) => return Ok(()),
                Err(rtrb::PushError::Full(queued)) => queued,
            }
        };
        match self.overflow.try_send(queued) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AtlError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(AtlError::Disconnected),
        }
    }

    /// Push and wait for the processed request.
    ///
    /// Must not be called from the thread that drains the queue.
    pub fn push_blocking(&self, mut request: AudioRequest) -> AtlResult<AudioRequest> {
        request.flags.insert(RequestFlags::EXECUTE_BLOCKING);
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.push_queued(QueuedRequest {
            request,
            reply: Some(reply_tx),
        })?;
        self.wait_for_reply(&reply_rx)
    }

    fn wait_for_reply(&self, reply_rx: &Receiver<AudioRequest>) -> AtlResult<AudioRequest> {
        loop {
            match reply_rx.recv_timeout(REPLY_POLL_INTERVAL) {
                Ok(request) => return Ok(request),
                Err(RecvTimeoutError::Timeout) => {
                    if self.producer.lock().is_abandoned() {
                        return Err(AtlError::Disconnected);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AtlError::Disconnected),
            }
        }
    }

    /// Requests currently waiting in the queue, overflow included
    pub fn pending(&self) -> usize {
        let tx = self.producer.lock();
        tx.buffer().capacity() - tx.slots() + self.overflow.len()
    }
}

/// Consumer side of the request queue, owned by the processing context
pub struct RequestReceiver {
    consumer: Consumer<QueuedRequest>,
    overflow: Receiver<QueuedRequest>,
}

impl RequestReceiver {
    /// Ring first, then anything that spilled over
    pub(crate) fn pop(&mut self) -> Option<QueuedRequest> {
        match self.consumer.pop() {
            Ok(queued) => Some(queued),
            Err(_) => self.overflow.try_recv().ok(),
        }
    }

    /// Drain everything queued, high-priority requests first
    pub(crate) fn drain_ordered(&mut self) -> Vec<QueuedRequest> {
        let mut high = Vec::new();
        let mut normal = Vec::new();
        while let Some(queued) = self.pop() {
            if queued.request.flags.contains(RequestFlags::PRIORITY_HIGH) {
                high.push(queued);
            } else {
                normal.push(queued);
            }
        }
        high.extend(normal);
        high
    }

    /// Pop plain requests (replies are dropped); test helper for direct ATL use
    pub fn drain_requests(&mut self) -> Vec<AudioRequest> {
        self.drain_ordered().into_iter().map(|q| q.request).collect()
    }
}

/// Create a request queue with the given capacity
pub fn request_queue(capacity: usize) -> (RequestSender, RequestReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity);
    let (overflow_tx, overflow_rx) = crossbeam_channel::unbounded();
    (
        RequestSender {
            producer: Arc::new(Mutex::new(producer)),
            overflow: overflow_tx,
        },
        RequestReceiver {
            consumer,
            overflow: overflow_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = RequestFlags::PRIORITY_HIGH | RequestFlags::SYNC_CALLBACK;
        assert!(flags.contains(RequestFlags::SYNC_CALLBACK));
        assert!(!flags.contains(RequestFlags::EXECUTE_BLOCKING));
        flags.remove(RequestFlags::SYNC_CALLBACK);
        assert!(!flags.contains(RequestFlags::SYNC_CALLBACK));
        assert!(flags.contains(RequestFlags::PRIORITY_HIGH));
    }

    #[test]
    fn test_specific_bits_unique() {
        let requests = [
            ObjectRequest::PrepareTrigger { trigger_id: 1 },
            ObjectRequest::ExecuteTrigger { trigger_id: 1 },
            ObjectRequest::ReleaseObject,
            ObjectRequest::ResetRtpcs,
        ];
        let mut seen = 0u32;
        for r in &requests {
            let bit = r.specific_bit();
            assert_eq!(bit.count_ones(), 1);
            assert_eq!(seen & bit, 0);
            seen |= bit;
        }
        assert_eq!(ManagerRequest::None.specific_bit(), 0);
    }

    #[test]
    fn test_push_pop_fifo_with_priority() {
        let (tx, mut rx) = request_queue(8);
        tx.push(AudioRequest::manager(ManagerRequest::StopAllSounds))
            .unwrap();
        tx.push_thread_safe(AudioRequest::callback(CallbackRequest::None).high_priority())
            .unwrap();
        assert_eq!(tx.pending(), 2);

        let drained = rx.drain_requests();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].request_type(), RequestType::Callback);
        assert!(drained[0].flags.contains(RequestFlags::THREAD_SAFE_PUSH));
        assert_eq!(drained[1].request_type(), RequestType::Manager);
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn test_full_queue_rejects() {
        let (tx, _rx) = request_queue(1);
        tx.push(AudioRequest::manager(ManagerRequest::None)).unwrap();
        let err = tx
            .push(AudioRequest::manager(ManagerRequest::None))
            .unwrap_err();
        assert!(matches!(err, AtlError::QueueFull));
    }

    #[test]
    fn test_thread_safe_push_spills_when_full() {
        let (tx, mut rx) = request_queue(1);
        tx.push(AudioRequest::manager(ManagerRequest::StopAllSounds))
            .unwrap();
        assert!(matches!(
            tx.push(AudioRequest::manager(ManagerRequest::None)),
            Err(AtlError::QueueFull)
        ));

        for _ in 0..3 {
            tx.push_thread_safe(AudioRequest::callback(CallbackRequest::None).high_priority())
                .unwrap();
        }
        assert_eq!(tx.pending(), 4);

        let drained = rx.drain_requests();
        assert_eq!(drained.len(), 4);
        assert!(
            drained[..3]
                .iter()
                .all(|r| r.request_type() == RequestType::Callback)
        );
        assert_eq!(drained[3].request_type(), RequestType::Manager);
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn test_thread_safe_push_after_receiver_dropped() {
        let (tx, rx) = request_queue(1);
        drop(rx);
        let result = tx.push_thread_safe(AudioRequest::callback(CallbackRequest::None));
        assert!(matches!(result, Err(AtlError::Disconnected)));
    }

    #[test]
    fn test_blocking_push_gets_reply() {
        let (tx, mut rx) = request_queue(4);
        let worker = std::thread::spawn(move || {
            loop {
                if let Some(mut queued) = rx.pop() {
                    queued.request.status = RequestStatus::Success;
                    if let Some(reply) = queued.reply {
                        reply.send(queued.request).unwrap();
                    }
                    break;
                }
                std::thread::yield_now();
            }
        });

        let processed = tx
            .push_blocking(AudioRequest::manager(ManagerRequest::StopAllSounds))
            .unwrap();
        assert_eq!(processed.status, RequestStatus::Success);
        assert!(processed.flags.contains(RequestFlags::EXECUTE_BLOCKING));
        worker.join().unwrap();
    }

    #[test]
    fn test_blocking_push_disconnected() {
        let (tx, rx) = request_queue(4);
        let dropper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            drop(rx);
        });
        let result = tx.push_blocking(AudioRequest::manager(ManagerRequest::None));
        assert!(matches!(result, Err(AtlError::Disconnected)));
        dropper.join().unwrap();
    }
}
