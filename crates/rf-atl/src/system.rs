//! Audio System
//!
//! Game-facing entry point. Splits the ATL into two halves:
//! - `AudioSystemHandle`: cloneable, thread-safe handle for the game thread
//!   and worker threads. Pushes requests, manages subscribers and drains
//!   deferred notifications.
//! - `AudioSystemProcessor`: owns the ATL and the queue consumer; lives on
//!   the audio thread and is driven by `process()` once per tick.

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::atl::AudioTranslationLayer;
use crate::config::AtlConfig;
use crate::error::AtlResult;
use crate::event_listener::{EventListenerManager, RequestCallback, RequestListener};
use crate::middleware::{AudioInputConfig, AudioMiddleware};
use crate::physics::PhysicsWorld;
use crate::request::{
    AudioRequest, ManagerRequest, RequestData, RequestInfo, RequestReceiver, RequestSender,
    request_queue,
};
use crate::types::{AudioObjectId, INVALID_AUDIO_OBJECT_ID, OwnerId, SourceId, SystemEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// First id handed out for audio sources
const FIRST_SOURCE_ID: SourceId = 1;

struct AudioSystemShared {
    sender: RequestSender,
    request_listeners: Arc<Mutex<EventListenerManager>>,
    /// Notifications of `SYNC_CALLBACK` requests, waiting for the game thread
    deferred: Receiver<RequestInfo>,
    next_source_id: AtomicU32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLE (game thread, any thread for thread-safe pushes)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AudioSystemHandle {
    shared: Arc<AudioSystemShared>,
}

impl AudioSystemHandle {
    /// Queue a request from the game thread
    pub fn push_request(&self, request: AudioRequest) -> AtlResult<()> {
        self.shared.sender.push(request)
    }

    /// Queue a request from a worker thread
    pub fn push_request_thread_safe(&self, request: AudioRequest) -> AtlResult<()> {
        self.shared.sender.push_thread_safe(request)
    }

    /// Queue a request and wait until the processor has handled it.
    ///
    /// Never call this from the thread running `AudioSystemProcessor::process`.
    pub fn push_request_blocking(&self, request: AudioRequest) -> AtlResult<AudioRequest> {
        self.shared.sender.push_blocking(request)
    }

    /// Sender the middleware and physics callbacks can push through
    pub fn request_sender(&self) -> RequestSender {
        self.shared.sender.clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.sender.pending()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Subscribers
    // ───────────────────────────────────────────────────────────────────────────

    pub fn add_request_listener(&self, listener: RequestListener) -> bool {
        self.shared.request_listeners.lock().add_request_listener(listener)
    }

    pub fn remove_request_listener(
        &self,
        callback: Option<&RequestCallback>,
        owner: Option<OwnerId>,
    ) -> bool {
        self.shared
            .request_listeners
            .lock()
            .remove_request_listener(callback, owner)
    }

    /// Deliver deferred notifications; call from the game thread
    pub fn process_pending_callbacks(&self) -> usize {
        let mut delivered = 0;
        while let Ok(info) = self.shared.deferred.try_recv() {
            let callback = self.shared.request_listeners.lock().find_callback(&info);
            if let Some(callback) = callback {
                callback(&info);
            }
            delivered += 1;
        }
        delivered
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Blocking helpers
    // ───────────────────────────────────────────────────────────────────────────

    /// Reserve a positioned audio object. `None` if the backend refused.
    pub fn reserve_audio_object_id(&self, name: Option<&str>) -> AtlResult<Option<AudioObjectId>> {
        let request = AudioRequest::manager(ManagerRequest::ReserveAudioObjectId {
            name: name.map(str::to_string),
            object_id: INVALID_AUDIO_OBJECT_ID,
        });
        let processed = self.push_request_blocking(request)?;
        match processed.data {
            RequestData::Manager(ManagerRequest::ReserveAudioObjectId { object_id, .. })
                if processed.status.is_success() =>
            {
                Ok(Some(object_id))
            }
            _ => Ok(None),
        }
    }

    /// Create an audio source under a fresh id. `None` if the backend refused.
    pub fn create_audio_source(
        &self,
        sample_rate: u32,
        num_channels: u16,
        source_file: Option<String>,
    ) -> AtlResult<Option<SourceId>> {
        let source_id = self.shared.next_source_id.fetch_add(1, Ordering::Relaxed);
        let config = AudioInputConfig {
            source_id,
            sample_rate,
            num_channels,
            source_file,
        };
        let request = AudioRequest::manager(ManagerRequest::CreateSource { config }).high_priority();
        let processed = self.push_request_blocking(request)?;
        Ok(processed.status.is_success().then_some(source_id))
    }

    pub fn destroy_audio_source(&self, source_id: SourceId) -> AtlResult<()> {
        self.push_request(AudioRequest::manager(ManagerRequest::DestroySource { source_id }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR (audio thread only)
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AudioSystemProcessor {
    atl: AudioTranslationLayer,
    receiver: RequestReceiver,
}

impl AudioSystemProcessor {
    /// One audio tick: handle every queued request, then update the ATL.
    /// Returns the number of requests processed.
    pub fn process(&mut self, delta_ms: f32) -> usize {
        let processed = self.process_requests();
        self.atl.update(delta_ms);
        processed
    }

    /// Handle queued requests (high priority first) without updating
    pub fn process_requests(&mut self) -> usize {
        let queued = self.receiver.drain_ordered();
        let count = queued.len();

        for mut entry in queued {
            self.atl.process_request(&mut entry.request);
            self.atl.notify_listener(&entry.request);

            if let Some(reply) = entry.reply.take() {
                if reply.send(entry.request).is_err() {
                    log::debug!("Blocking caller stopped waiting for its request");
                }
            }
        }
        count
    }

    pub fn on_system_event(&mut self, event: SystemEvent) {
        self.atl.on_system_event(event);
    }

    pub fn atl(&self) -> &AudioTranslationLayer {
        &self.atl
    }

    pub fn atl_mut(&mut self) -> &mut AudioTranslationLayer {
        &mut self.atl
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Create a connected handle/processor pair.
///
/// The middleware is not initialized yet; push `ManagerRequest::InitAudioImpl`
/// (usually followed by `RefreshAudioSystem`) to bring it up.
pub fn create_audio_system(
    config: AtlConfig,
    middleware: Box<dyn AudioMiddleware>,
    physics: Arc<dyn PhysicsWorld>,
) -> (AudioSystemHandle, AudioSystemProcessor) {
    let (sender, receiver) = request_queue(config.request_queue_capacity);
    let (deferred_tx, deferred_rx) = unbounded();

    let mut atl = AudioTranslationLayer::new(config, middleware, physics, sender.clone());
    atl.set_sync_callback_channel(deferred_tx);

    let shared = Arc::new(AudioSystemShared {
        sender,
        request_listeners: atl.request_listeners(),
        deferred: deferred_rx,
        next_source_id: AtomicU32::new(FIRST_SOURCE_ID),
    });

    let handle = AudioSystemHandle { shared };
    let processor = AudioSystemProcessor { atl, receiver };
    (handle, processor)
}
