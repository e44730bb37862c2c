//! ReelForge Audio Translation Layer
//!
//! Game-engine side of the audio stack, sitting in front of a pluggable
//! audio middleware:
//! - Request queue (game thread → audio thread) with blocking and
//!   high-priority requests
//! - Audio object, event and listener lifecycles with pooling
//! - Triggers, RTPCs, switches and environments fanned out to middleware impls
//! - Obstruction/occlusion from physics rays, velocity tracking
//! - Preload requests backed by a streaming file cache
//! - Request notifications to subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 AUDIO TRANSLATION LAYER                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   Game Thread                         Audio Thread               │
//! │   ┌───────────────────┐              ┌────────────────────┐     │
//! │   │ AudioSystemHandle │──Requests───▶│ AudioSystemProcessor│    │
//! │   │ push_request()    │  (rtrb)      │ .process(delta_ms) │     │
//! │   │ reserve_object()  │◀─Replies─────│                    │     │
//! │   │ process_pending_  │◀─Deferred────│ AudioTranslation-  │     │
//! │   │   callbacks()     │  notifies    │   Layer            │     │
//! │   └───────────────────┘              └─────────┬──────────┘     │
//! │            ▲                                   │                │
//! │            │ callback requests                 ▼                │
//! │   ┌────────┴──────────┐              ┌────────────────────┐     │
//! │   │ Middleware /      │◀─────────────│ Object / Event /   │     │
//! │   │ Physics workers   │   backend    │ Listener managers  │     │
//! │   └───────────────────┘   calls      │ FileCacheManager   │     │
//! │                                      └────────────────────┘     │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_atl::{create_audio_system, AtlConfig, AudioRequest, ManagerRequest, ObjectRequest};
//!
//! let (handle, mut processor) = create_audio_system(AtlConfig::default(), middleware, physics);
//! handle.push_request(AudioRequest::manager(ManagerRequest::InitAudioImpl))?;
//!
//! // Audio thread
//! processor.process(16.0);
//!
//! // Game thread
//! let door = handle.reserve_audio_object_id(Some("door"))?.unwrap();
//! handle.push_request(AudioRequest::object(door, ObjectRequest::ExecuteTrigger {
//!     trigger_id: audio_string_to_id("Play_Door"),
//! }))?;
//! ```

#![allow(clippy::new_without_default)]

pub mod atl;
pub mod config;
pub mod controls;
pub mod error;
pub mod event;
pub mod event_listener;
pub mod event_manager;
pub mod file_cache;
pub mod listener_manager;
pub mod loader;
pub mod middleware;
pub mod object;
pub mod object_manager;
pub mod physics;
pub mod pool;
pub mod position;
pub mod propagation;
pub mod request;
pub mod system;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports
pub use atl::AudioTranslationLayer;
pub use config::AtlConfig;
pub use controls::{ControlLookups, PreloadRequest, Trigger};
pub use error::{AtlError, AtlResult};
pub use event::{AtlEvent, EventState};
pub use event_listener::{
    EventListenerManager, RequestCallback, RequestListener, RequestTypeFilter,
};
pub use middleware::{AudioInputConfig, AudioMiddleware, ImplNode, SourceInfo};
pub use physics::{OpenSpace, PhysicsWorld, RayHit, RayQuery, RayReply};
pub use position::{MultiPositionParams, Vec3, WorldTransform};
pub use request::{
    AudioRequest, CallbackRequest, ListenerRequest, ManagerRequest, ObjectRequest, RequestFlags,
    RequestInfo, RequestResult, RequestSender, RequestType, request_queue,
};
pub use system::{AudioSystemHandle, AudioSystemProcessor, create_audio_system};
pub use types::{
    AudioObjectId, ControlId, DataScope, RequestStatus, SystemEvent, audio_string_to_id,
};
